use crate::{
    container,
    defaults::{self, ANNOTATION_PREFIX},
    env::{self, WorkloadEnv},
    error::{ConfigError, ConfigErrors, ProxyRef},
    ports,
    volumes::VolumePlan,
    PodWorkload,
};
use chrono::SecondsFormat;
use cloudsql_proxy_operator_k8s_api::{AuthProxyWorkload, Container};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

/// Adds, updates and removes Cloud SQL Auth Proxy sidecars on workload pod templates.
///
/// An `Updater` holds no per-workload state and may be shared freely; each call to
/// [`Updater::configure_workload`] operates only on the workload it is given.
#[derive(Clone, Debug)]
pub struct Updater {
    user_agent: String,
}

// === impl Updater ===

impl Updater {
    /// `user_agent` is passed to every proxy sidecar and identifies this operator to the Cloud SQL
    /// Admin API.
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    /// Reconciles the proxy sidecars of `workload` with `proxies`, the complete set of
    /// `AuthProxyWorkload`s that match it.
    ///
    /// Sidecars of proxies absent from `proxies`, or marked for deletion, are removed. Every
    /// port and environment conflict is reported in the returned error, in which case `workload`
    /// is not modified.
    #[instrument(
        skip_all,
        fields(kind = workload.kind(), namespace = %workload.namespace(), name = %workload.name())
    )]
    pub fn configure_workload(
        &self,
        workload: &mut PodWorkload,
        proxies: &[&AuthProxyWorkload],
    ) -> Result<(), ConfigError> {
        let mut proxies = proxies.to_vec();
        proxies.sort_by_key(|p| ProxyRef::of(p));
        proxies.dedup_by_key(|p| ProxyRef::of(p));
        let (deleted, live): (Vec<&AuthProxyWorkload>, Vec<&AuthProxyWorkload>) = proxies
            .iter()
            .copied()
            .partition(|p| p.metadata.deletion_timestamp.is_some());

        let mut errors = ConfigErrors::default();
        let existing: &[Container] = workload
            .pod_spec()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default();
        let ports = ports::allocate(&live, existing, &mut errors);

        let mut workload_env = WorkloadEnv::default();
        let mut volumes = VolumePlan::default();
        let mut sidecars = Vec::with_capacity(live.len());
        for (proxy, ports) in live.iter().zip(&ports) {
            let proxy_ref = ProxyRef::of(proxy);
            for (index, (instance, port)) in proxy
                .spec
                .instances
                .iter()
                .zip(&ports.instances)
                .enumerate()
            {
                workload_env.add_instance(&proxy_ref, index, instance, *port, &mut errors);
            }

            let name = defaults::sidecar_name(&proxy_ref.namespace, &proxy_ref.name);
            sidecars.push(container::build_sidecar(
                proxy,
                name,
                ports,
                &mut volumes,
                &self.user_agent,
            ));
        }

        errors.ok_if_empty(workload.kind(), &workload.namespace(), &workload.name())?;

        let stale = deleted
            .iter()
            .flat_map(|p| env::instance_env_names(&p.spec.instances))
            .collect::<BTreeSet<_>>();

        let spec = workload.pod_spec_mut();
        spec.containers.retain(|c| {
            let keep = !container::is_sidecar(c) || sidecars.iter().any(|s| s.name == c.name);
            if !keep {
                debug!(container = %c.name, "Removing proxy sidecar");
            }
            keep
        });
        for sidecar in sidecars {
            match spec.containers.iter_mut().find(|c| c.name == sidecar.name) {
                Some(current) => *current = sidecar,
                None => {
                    debug!(container = %sidecar.name, "Adding proxy sidecar");
                    spec.containers.push(sidecar);
                }
            }
        }
        env::apply_to_containers(&workload_env, &mut spec.containers, &stale);
        volumes.apply(spec);

        let annotations = workload.pod_template_annotations_mut();
        for proxy in &proxies {
            let (key, value) = pod_annotation(proxy);
            annotations.insert(key, value);
        }

        info!(
            proxies = live.len(),
            deleted = deleted.len(),
            "Configured proxy sidecars"
        );
        Ok(())
    }
}

/// Computes the pod template annotation recording which generation of `proxy` was applied.
///
/// The key is `cloudsql.cloud.google.com/<name>`. The value is the generation, followed by
/// `-deleted-<RFC 3339 timestamp>` when the proxy is marked for deletion.
pub fn pod_annotation(proxy: &AuthProxyWorkload) -> (String, String) {
    let name = proxy.metadata.name.as_deref().unwrap_or_default();
    let generation = proxy.metadata.generation.unwrap_or_default();
    let value = match proxy.metadata.deletion_timestamp.as_ref() {
        Some(ts) => format!(
            "{generation}-deleted-{}",
            ts.0.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => generation.to_string(),
    };
    (format!("{ANNOTATION_PREFIX}/{name}"), value)
}
