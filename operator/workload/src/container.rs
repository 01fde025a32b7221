use crate::{
    args,
    defaults::{self, DEFAULT_CPU_REQUEST, DEFAULT_MEMORY_REQUEST, DEFAULT_PROXY_IMAGE},
    env,
    ports::ProxyPorts,
    volumes::VolumePlan,
};
use cloudsql_proxy_operator_k8s_api::{
    api::core::v1::{ContainerPort, HTTPGetAction, Probe, ResourceRequirements, SecurityContext},
    AuthProxyContainerSpec, AuthProxyWorkload, Container, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::{api::resource::Quantity, util::intstr::IntOrString};

/// How an `AuthProxyWorkload` describes its sidecar.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ContainerSpec<'a> {
    /// The sidecar is built from the proxy options, if any.
    Synthesized(Option<&'a AuthProxyContainerSpec>),
    /// The user supplied the whole container; only its name is replaced.
    Explicit(&'a Container),
}

// === impl ContainerSpec ===

impl<'a> ContainerSpec<'a> {
    pub(crate) fn of(proxy: &'a AuthProxyWorkload) -> Self {
        match proxy.spec.container_override() {
            Some(container) => Self::Explicit(container),
            None => Self::Synthesized(proxy.spec.auth_proxy_container.as_ref()),
        }
    }
}

/// Builds the sidecar container for `proxy`.
///
/// Unix socket volumes needed by the sidecar are added to `volumes`.
pub(crate) fn build_sidecar(
    proxy: &AuthProxyWorkload,
    name: String,
    ports: &ProxyPorts,
    volumes: &mut VolumePlan,
    user_agent: &str,
) -> Container {
    let spec = match ContainerSpec::of(proxy) {
        ContainerSpec::Explicit(container) => {
            tracing::debug!(container = %name, "Using container override");
            return Container {
                name,
                ..container.clone()
            };
        }
        ContainerSpec::Synthesized(spec) => spec,
    };

    let args = proxy
        .spec
        .instances
        .iter()
        .zip(&ports.instances)
        .map(|(inst, port)| args::instance_arg(inst, *port))
        .collect::<Vec<_>>();

    let mut mounts = Vec::<VolumeMount>::new();
    for path in proxy
        .spec
        .instances
        .iter()
        .filter_map(|i| i.unix_socket_path.as_deref())
    {
        let mount = volumes.mount_for_socket(&name, path);
        if !mounts.iter().any(|m| m.name == mount.name) {
            mounts.push(mount);
        }
    }

    let container_ports = ports
        .instances
        .iter()
        .flatten()
        .copied()
        .chain(ports.http)
        .chain(ports.admin)
        .map(|container_port| ContainerPort {
            container_port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let image = spec
        .and_then(|s| s.image.as_deref())
        .filter(|i| !i.is_empty())
        .unwrap_or(DEFAULT_PROXY_IMAGE);

    let resources = spec
        .and_then(|s| s.resources.clone())
        .unwrap_or_else(default_resources);

    Container {
        name,
        image: Some(image.to_string()),
        args: Some(args),
        env: Some(env::proxy_env(spec, ports.http, ports.admin, user_agent)),
        ports: Some(container_ports),
        resources: Some(resources),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(true),
            read_only_root_filesystem: Some(true),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        startup_probe: ports.http.map(|p| http_probe("/startup", p, 1, 60)),
        liveness_probe: ports.http.map(|p| http_probe("/liveness", p, 10, 3)),
        readiness_probe: ports.http.map(|p| http_probe("/readiness", p, 10, 6)),
        volume_mounts: if mounts.is_empty() {
            None
        } else {
            Some(mounts)
        },
        ..Default::default()
    }
}

/// Returns whether `container` is a sidecar built by [`build_sidecar`].
pub(crate) fn is_sidecar(container: &Container) -> bool {
    defaults::is_owned_name(&container.name)
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(
            [
                ("cpu".to_string(), Quantity(DEFAULT_CPU_REQUEST.to_string())),
                (
                    "memory".to_string(),
                    Quantity(DEFAULT_MEMORY_REQUEST.to_string()),
                ),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    }
}

fn http_probe(path: &str, port: i32, period_seconds: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        period_seconds: Some(period_seconds),
        failure_threshold: Some(failure_threshold),
        timeout_seconds: Some(10),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsql_proxy_operator_k8s_api::{AuthProxyWorkloadSpec, InstanceSpec};

    fn mk_proxy(spec: Option<AuthProxyContainerSpec>) -> AuthProxyWorkload {
        let mut proxy = AuthProxyWorkload::new(
            "instance1",
            AuthProxyWorkloadSpec {
                auth_proxy_container: spec,
                instances: vec![
                    InstanceSpec {
                        connection_string: "project:server:db".to_string(),
                        port: Some(5555),
                        ..Default::default()
                    },
                    InstanceSpec {
                        connection_string: "project:server:db2".to_string(),
                        unix_socket_path: Some("/mnt/db/server2".to_string()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        );
        proxy.metadata.namespace = Some("default".to_string());
        proxy
    }

    fn mk_ports() -> ProxyPorts {
        ProxyPorts {
            instances: vec![Some(5555), None],
            http: Some(9801),
            admin: None,
        }
    }

    #[test]
    fn synthesized_defaults() {
        let proxy = mk_proxy(None);
        let mut volumes = VolumePlan::default();
        let c = build_sidecar(
            &proxy,
            "csql-default-instance1".to_string(),
            &mk_ports(),
            &mut volumes,
            "ua",
        );

        assert_eq!(c.image.as_deref(), Some(DEFAULT_PROXY_IMAGE));
        assert_eq!(
            c.args.unwrap(),
            vec![
                "project:server:db?port=5555".to_string(),
                "project:server:db2?unix-socket-path=/mnt/db/server2".to_string(),
            ]
        );
        assert_eq!(
            c.ports
                .unwrap()
                .iter()
                .map(|p| p.container_port)
                .collect::<Vec<_>>(),
            vec![5555, 9801]
        );
        let requests = c.resources.unwrap().requests.unwrap();
        assert_eq!(requests["cpu"], Quantity("1.0".to_string()));
        assert_eq!(requests["memory"], Quantity("1Gi".to_string()));
        assert_eq!(
            c.security_context.unwrap().run_as_non_root,
            Some(true)
        );
        let mounts = c.volume_mounts.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, "/mnt/db");
        assert_eq!(
            c.liveness_probe.unwrap().http_get.unwrap().port,
            IntOrString::Int(9801)
        );
    }

    #[test]
    fn empty_image_uses_default() {
        let proxy = mk_proxy(Some(AuthProxyContainerSpec {
            image: Some(String::new()),
            ..Default::default()
        }));
        let c = build_sidecar(
            &proxy,
            "csql-default-instance1".to_string(),
            &mk_ports(),
            &mut VolumePlan::default(),
            "ua",
        );
        assert_eq!(c.image.as_deref(), Some(DEFAULT_PROXY_IMAGE));
    }

    #[test]
    fn override_keeps_user_container() {
        let proxy = mk_proxy(Some(AuthProxyContainerSpec {
            container: Some(Container {
                name: "ignored".to_string(),
                image: Some("example.com/proxy:custom".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }));
        let mut volumes = VolumePlan::default();
        let c = build_sidecar(
            &proxy,
            "csql-default-instance1".to_string(),
            &mk_ports(),
            &mut volumes,
            "ua",
        );

        assert_eq!(
            c,
            Container {
                name: "csql-default-instance1".to_string(),
                image: Some("example.com/proxy:custom".to_string()),
                ..Default::default()
            }
        );
        assert!(is_sidecar(&c));
    }
}
