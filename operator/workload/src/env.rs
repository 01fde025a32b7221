use crate::{
    defaults::{self, ENV_PREFIX, HTTP_LISTEN_ADDRESS, LOOPBACK_HOST},
    error::{ConfigErrors, ErrorCode, ProxyRef},
};
use cloudsql_proxy_operator_k8s_api::{
    AdminApi, AuthProxyContainerSpec, Container, EnvVar, InstanceSpec,
};
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

/// Environment variables set on the workload's own containers, keyed by name.
#[derive(Debug, Default)]
pub(crate) struct WorkloadEnv {
    vars: BTreeMap<String, (String, EnvOwner)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct EnvOwner {
    proxy: ProxyRef,
    index: usize,
    field: &'static str,
}

/// Builds the proxy process configuration for a sidecar.
///
/// Every option is passed as a `CSQL_PROXY_<OPTION>` variable; the result is sorted by name.
pub(crate) fn proxy_env(
    spec: Option<&AuthProxyContainerSpec>,
    http_port: Option<i32>,
    admin_port: Option<i32>,
    user_agent: &str,
) -> Vec<EnvVar> {
    let mut vars = BTreeMap::new();
    let mut set = |name: &str, value: String| {
        vars.insert(format!("{ENV_PREFIX}{name}"), value);
    };

    set("STRUCTURED_LOGS", "true".to_string());
    if let Some(port) = http_port {
        set("HEALTH_CHECK", "true".to_string());
        set("HTTP_PORT", port.to_string());
        set("HTTP_ADDRESS", HTTP_LISTEN_ADDRESS.to_string());
    }
    set("USER_AGENT", user_agent.to_string());

    if let Some(spec) = spec {
        if let Some(endpoint) = spec.sql_admin_api_endpoint.as_ref() {
            set("SQLADMIN_API_ENDPOINT", endpoint.clone());
        }
        if let Some(max) = spec.max_connections {
            set("MAX_CONNECTIONS", max.to_string());
        }
        if let Some(delay) = spec.max_sigterm_delay {
            set("MAX_SIGTERM_DELAY", delay.to_string());
        }

        if let Some(admin) = spec.admin_server.as_ref() {
            if let Some(port) = admin_port {
                set("ADMIN_PORT", port.to_string());
            }
            for api in &admin.enable_apis {
                let name = match api {
                    AdminApi::Debug => "DEBUG",
                    AdminApi::QuitQuitQuit => "QUITQUITQUIT",
                };
                set(name, "true".to_string());
            }
        }

        if let Some(telemetry) = spec.telemetry.as_ref() {
            if let Some(project) = telemetry.quota_project.as_ref() {
                set("QUOTA_PROJECT", project.clone());
            }
            if let Some(prometheus) = telemetry.prometheus {
                set("PROMETHEUS", prometheus.to_string());
            }
            if let Some(ns) = telemetry.prometheus_namespace.as_ref() {
                set("PROMETHEUS_NAMESPACE", ns.clone());
            }
            if let Some(project) = telemetry.telemetry_project.as_ref() {
                set("TELEMETRY_PROJECT", project.clone());
            }
            if let Some(prefix) = telemetry.telemetry_prefix.as_ref() {
                set("TELEMETRY_PREFIX", prefix.clone());
            }
            if let Some(rate) = telemetry.telemetry_sample_rate {
                set("TELEMETRY_SAMPLE_RATE", rate.to_string());
            }
            if let Some(disable) = telemetry.disable_traces {
                set("DISABLE_TRACES", disable.to_string());
            }
            if let Some(disable) = telemetry.disable_metrics {
                set("DISABLE_METRICS", disable.to_string());
            }
        }
    }

    vars.into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            value_from: None,
        })
        .collect()
}

// === impl WorkloadEnv ===

impl WorkloadEnv {
    /// Records the variables requested by one instance.
    ///
    /// `port` is the resolved TCP port; it is `None` for unix socket instances.
    pub(crate) fn add_instance(
        &mut self,
        proxy: &ProxyRef,
        index: usize,
        instance: &InstanceSpec,
        port: Option<i32>,
        errors: &mut ConfigErrors,
    ) {
        let requests = [
            (
                "portEnvName",
                instance.port_env_name.as_ref(),
                port.map(|p| p.to_string()),
            ),
            (
                "hostEnvName",
                instance.host_env_name.as_ref(),
                Some(LOOPBACK_HOST.to_string()),
            ),
            (
                "unixSocketPathEnvName",
                instance.unix_socket_path_env_name.as_ref(),
                instance.unix_socket_path.clone(),
            ),
        ];

        for (field, name, value) in requests {
            let (Some(name), Some(value)) = (name, value) else {
                continue;
            };
            let owner = EnvOwner {
                proxy: proxy.clone(),
                index,
                field,
            };
            match self.vars.entry(name.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert((value, owner));
                }
                Entry::Occupied(entry) => {
                    let (_, existing) = entry.get();
                    errors.push(
                        ErrorCode::EnvVarConflict,
                        proxy.clone(),
                        format!(
                            "environment variable {name} set by instance {index} {field} \
                             is already set by instance {} {} of AuthProxyWorkload {}",
                            existing.index, existing.field, existing.proxy
                        ),
                    );
                }
            }
        }
    }

    /// Sets every recorded variable on `container`, replacing variables of the same name and
    /// removing `stale` ones.
    pub(crate) fn apply(&self, container: &mut Container, stale: &BTreeSet<String>) {
        let env = container.env.get_or_insert_with(Vec::new);
        env.retain(|e| !stale.contains(&e.name) || self.vars.contains_key(&e.name));

        for (name, (value, _)) in &self.vars {
            let var = EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                value_from: None,
            };
            match env.iter_mut().find(|e| e.name == *name) {
                Some(existing) => *existing = var,
                None => env.push(var),
            }
        }

        if env.is_empty() {
            container.env = None;
        }
    }
}

/// Lists the environment variable names an `AuthProxyWorkload`'s instances set on workload
/// containers.
pub(crate) fn instance_env_names(instances: &[InstanceSpec]) -> impl Iterator<Item = String> + '_ {
    instances.iter().flat_map(|i| {
        [
            i.port_env_name.clone(),
            i.host_env_name.clone(),
            i.unix_socket_path_env_name.clone(),
        ]
        .into_iter()
        .flatten()
    })
}

/// Applies the workload env to all non-sidecar containers.
pub(crate) fn apply_to_containers(
    env: &WorkloadEnv,
    containers: &mut [Container],
    stale: &BTreeSet<String>,
) {
    for c in containers.iter_mut() {
        if !defaults::is_owned_name(&c.name) {
            env.apply(c, stale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsql_proxy_operator_k8s_api::{AdminServerSpec, TelemetrySpec};

    fn find<'e>(env: &'e [EnvVar], name: &str) -> Option<&'e str> {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    fn mk_proxy_ref(name: &str) -> ProxyRef {
        ProxyRef {
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn default_proxy_env() {
        let env = proxy_env(None, Some(9801), None, "cloud-sql-proxy-operator/dev");
        assert_eq!(find(&env, "CSQL_PROXY_STRUCTURED_LOGS"), Some("true"));
        assert_eq!(find(&env, "CSQL_PROXY_HEALTH_CHECK"), Some("true"));
        assert_eq!(find(&env, "CSQL_PROXY_HTTP_PORT"), Some("9801"));
        assert_eq!(find(&env, "CSQL_PROXY_HTTP_ADDRESS"), Some("0.0.0.0"));
        assert_eq!(
            find(&env, "CSQL_PROXY_USER_AGENT"),
            Some("cloud-sql-proxy-operator/dev")
        );
        assert_eq!(env.len(), 5);
    }

    #[test]
    fn container_level_options() {
        let spec = AuthProxyContainerSpec {
            sql_admin_api_endpoint: Some("https://example.com".to_string()),
            max_connections: Some(10),
            max_sigterm_delay: Some(20),
            admin_server: Some(AdminServerSpec {
                port: 9091,
                enable_apis: vec![AdminApi::Debug, AdminApi::QuitQuitQuit],
            }),
            telemetry: Some(TelemetrySpec {
                http_port: Some(9092),
                prometheus: Some(true),
                quota_project: Some("billing".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let env = proxy_env(Some(&spec), Some(9092), Some(9091), "ua");
        assert_eq!(
            find(&env, "CSQL_PROXY_SQLADMIN_API_ENDPOINT"),
            Some("https://example.com")
        );
        assert_eq!(find(&env, "CSQL_PROXY_HTTP_PORT"), Some("9092"));
        assert_eq!(find(&env, "CSQL_PROXY_ADMIN_PORT"), Some("9091"));
        assert_eq!(find(&env, "CSQL_PROXY_DEBUG"), Some("true"));
        assert_eq!(find(&env, "CSQL_PROXY_QUITQUITQUIT"), Some("true"));
        assert_eq!(find(&env, "CSQL_PROXY_MAX_CONNECTIONS"), Some("10"));
        assert_eq!(find(&env, "CSQL_PROXY_MAX_SIGTERM_DELAY"), Some("20"));
        assert_eq!(find(&env, "CSQL_PROXY_PROMETHEUS"), Some("true"));
        assert_eq!(find(&env, "CSQL_PROXY_QUOTA_PROJECT"), Some("billing"));

        let names = env.iter().map(|e| e.name.clone()).collect::<Vec<_>>();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn no_admin_env_without_admin_server() {
        let env = proxy_env(Some(&AuthProxyContainerSpec::default()), Some(9801), None, "ua");
        assert_eq!(find(&env, "CSQL_PROXY_DEBUG"), None);
        assert_eq!(find(&env, "CSQL_PROXY_ADMIN_PORT"), None);
    }

    #[test]
    fn instance_env_conflicts() {
        let mut env = WorkloadEnv::default();
        let mut errors = ConfigErrors::default();
        let instance = InstanceSpec {
            connection_string: "hello:world:one".to_string(),
            port_env_name: Some("DB_PORT".to_string()),
            host_env_name: Some("DB_HOST".to_string()),
            ..Default::default()
        };

        env.add_instance(&mk_proxy_ref("one"), 0, &instance, Some(5000), &mut errors);
        assert!(errors.is_empty());
        env.add_instance(&mk_proxy_ref("two"), 0, &instance, Some(5001), &mut errors);

        let error = errors.ok_if_empty("Pod", "default", "app").unwrap_err();
        assert_eq!(error.details().len(), 2);
        assert!(error.details().iter().all(|d| d.code == ErrorCode::EnvVarConflict));
        assert_eq!(error.details()[0].proxy, mk_proxy_ref("two"));
        assert_eq!(
            error.details()[0].description,
            "environment variable DB_PORT set by instance 0 portEnvName is already set by \
             instance 0 portEnvName of AuthProxyWorkload default/one"
        );
    }

    #[test]
    fn apply_replaces_and_removes_stale() {
        let mut env = WorkloadEnv::default();
        let mut errors = ConfigErrors::default();
        env.add_instance(
            &mk_proxy_ref("one"),
            0,
            &InstanceSpec {
                connection_string: "hello:world:one".to_string(),
                port_env_name: Some("DB_PORT".to_string()),
                ..Default::default()
            },
            Some(5000),
            &mut errors,
        );

        let mut container = Container {
            name: "app".to_string(),
            env: Some(vec![
                EnvVar {
                    name: "DB_PORT".to_string(),
                    value: Some("1".to_string()),
                    value_from: None,
                },
                EnvVar {
                    name: "OLD_HOST".to_string(),
                    value: Some("127.0.0.1".to_string()),
                    value_from: None,
                },
                EnvVar {
                    name: "KEEP".to_string(),
                    value: Some("yes".to_string()),
                    value_from: None,
                },
            ]),
            ..Default::default()
        };
        let stale = Some("OLD_HOST".to_string()).into_iter().collect();
        env.apply(&mut container, &stale);

        let vars = container.env.unwrap();
        assert_eq!(find(&vars, "DB_PORT"), Some("5000"));
        assert_eq!(find(&vars, "OLD_HOST"), None);
        assert_eq!(find(&vars, "KEEP"), Some("yes"));
        assert_eq!(vars.len(), 2);
    }
}
