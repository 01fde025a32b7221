use crate::{
    container::ContainerSpec,
    defaults::{self, DEFAULT_FIRST_PORT, DEFAULT_HEALTH_CHECK_PORT},
    error::{ConfigErrors, ErrorCode, ProxyRef},
};
use cloudsql_proxy_operator_k8s_api::{AuthProxyWorkload, Container};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use tracing::trace;

/// Tracks the ports claimed within one pod during a single update.
#[derive(Debug)]
pub(crate) struct PortAllocator {
    used: BTreeMap<i32, PortOwner>,
    next_instance: i32,
    next_health: i32,
}

/// Describes what holds a port, for conflict messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PortOwner {
    Container(String),
    Instance { proxy: ProxyRef, index: usize },
    ContainerOverride(ProxyRef),
    AdminServer(ProxyRef),
    HttpServer(ProxyRef),
}

/// The ports resolved for one `AuthProxyWorkload`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ProxyPorts {
    /// One entry per instance; `None` for unix socket instances.
    pub(crate) instances: Vec<Option<i32>>,
    /// The health check and telemetry HTTP port; `None` for container overrides.
    pub(crate) http: Option<i32>,
    pub(crate) admin: Option<i32>,
}

// === impl PortAllocator ===

impl PortAllocator {
    /// Seeds the allocator with the ports of the workload's own containers. Proxy sidecars from
    /// a previous update are ignored since they are rebuilt.
    pub(crate) fn new<'c>(containers: impl IntoIterator<Item = &'c Container>) -> Self {
        let mut used = BTreeMap::new();
        for c in containers {
            if defaults::is_owned_name(&c.name) {
                continue;
            }
            for p in c.ports.iter().flatten() {
                used.entry(p.container_port)
                    .or_insert_with(|| PortOwner::Container(c.name.clone()));
            }
        }

        Self {
            used,
            next_instance: DEFAULT_FIRST_PORT,
            next_health: DEFAULT_HEALTH_CHECK_PORT,
        }
    }

    /// Claims an explicitly configured port, returning the current holder if it is taken.
    pub(crate) fn claim(&mut self, port: i32, owner: PortOwner) -> Result<(), PortOwner> {
        if let Some(existing) = self.used.get(&port) {
            return Err(existing.clone());
        }
        trace!(port, %owner, "Claimed port");
        self.used.insert(port, owner);
        Ok(())
    }

    /// Claims `port` on behalf of `proxy`, recording a conflict in `errors` if it is taken.
    fn claim_for(
        &mut self,
        proxy: &ProxyRef,
        port: i32,
        owner: PortOwner,
        errors: &mut ConfigErrors,
    ) {
        let description = format!("port {port} for {owner}");
        if let Err(existing) = self.claim(port, owner) {
            errors.push(
                ErrorCode::PortConflict,
                proxy.clone(),
                format!("{description} is already used by {existing}"),
            );
        }
    }

    pub(crate) fn next_instance_port(&mut self, owner: PortOwner) -> i32 {
        let port = Self::next_free(&self.used, &mut self.next_instance);
        self.used.insert(port, owner);
        port
    }

    pub(crate) fn next_health_port(&mut self, owner: PortOwner) -> i32 {
        let port = Self::next_free(&self.used, &mut self.next_health);
        self.used.insert(port, owner);
        port
    }

    fn next_free(used: &BTreeMap<i32, PortOwner>, candidate: &mut i32) -> i32 {
        while used.contains_key(candidate) {
            *candidate += 1;
        }
        let port = *candidate;
        *candidate += 1;
        port
    }
}

/// Resolves the ports of every instance and sidecar server of `proxies`, in order.
///
/// Explicit ports are claimed first so that automatically assigned ports never collide with
/// them. Every conflict is recorded in `errors`; conflicting ports are still returned so that
/// the rest of the update can proceed and report further problems.
///
/// A container override exposes its own ports. They are claimed for the proxy as declared and
/// no instance or health ports are assigned to it automatically.
pub(crate) fn allocate(
    proxies: &[&AuthProxyWorkload],
    containers: &[Container],
    errors: &mut ConfigErrors,
) -> Vec<ProxyPorts> {
    let mut alloc = PortAllocator::new(containers);

    let mut plans = Vec::with_capacity(proxies.len());
    for proxy in proxies {
        let proxy_ref = ProxyRef::of(proxy);

        let exposed = match ContainerSpec::of(proxy) {
            ContainerSpec::Explicit(container) => Some(
                container
                    .ports
                    .iter()
                    .flatten()
                    .map(|p| p.container_port)
                    .collect::<BTreeSet<_>>(),
            ),
            ContainerSpec::Synthesized(_) => None,
        };
        for &port in exposed.iter().flatten() {
            let owner = PortOwner::ContainerOverride(proxy_ref.clone());
            alloc.claim_for(&proxy_ref, port, owner, errors);
        }

        let mut instances = Vec::with_capacity(proxy.spec.instances.len());
        for (index, inst) in proxy.spec.instances.iter().enumerate() {
            let port = inst.port.filter(|_| inst.unix_socket_path.is_none());
            if let Some(port) = port {
                // An override listing the instance port has already claimed it.
                if !exposed.as_ref().is_some_and(|e| e.contains(&port)) {
                    let owner = PortOwner::Instance {
                        proxy: proxy_ref.clone(),
                        index,
                    };
                    alloc.claim_for(&proxy_ref, port, owner, errors);
                }
            }
            instances.push(port);
        }

        if exposed.is_some() {
            plans.push(ProxyPorts {
                instances,
                http: None,
                admin: None,
            });
            continue;
        }

        let container = proxy.spec.auth_proxy_container.as_ref();
        let admin = container
            .and_then(|c| c.admin_server.as_ref())
            .map(|admin| admin.port);
        if let Some(port) = admin {
            let owner = PortOwner::AdminServer(proxy_ref.clone());
            alloc.claim_for(&proxy_ref, port, owner, errors);
        }

        let http = container
            .and_then(|c| c.telemetry.as_ref())
            .and_then(|t| t.http_port);
        if let Some(port) = http {
            let owner = PortOwner::HttpServer(proxy_ref.clone());
            alloc.claim_for(&proxy_ref, port, owner, errors);
        }

        plans.push(ProxyPorts {
            instances,
            http,
            admin,
        });
    }

    // Assign the remaining ports by workload, then by instance index.
    for (proxy, plan) in proxies.iter().zip(plans.iter_mut()) {
        if is_override(proxy) {
            continue;
        }
        let proxy_ref = ProxyRef::of(proxy);
        for (index, inst) in proxy.spec.instances.iter().enumerate() {
            if inst.unix_socket_path.is_none() && inst.port.is_none() {
                let owner = PortOwner::Instance {
                    proxy: proxy_ref.clone(),
                    index,
                };
                plan.instances[index] = Some(alloc.next_instance_port(owner));
            }
        }
    }

    for (proxy, plan) in proxies.iter().zip(plans.iter_mut()) {
        if plan.http.is_none() && !is_override(proxy) {
            let owner = PortOwner::HttpServer(ProxyRef::of(proxy));
            plan.http = Some(alloc.next_health_port(owner));
        }
    }

    plans
}

fn is_override(proxy: &AuthProxyWorkload) -> bool {
    matches!(ContainerSpec::of(proxy), ContainerSpec::Explicit(_))
}

// === impl PortOwner ===

impl fmt::Display for PortOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(name) => write!(f, "workload container {name}"),
            Self::Instance { proxy, index } => {
                write!(f, "instance {index} of AuthProxyWorkload {proxy}")
            }
            Self::ContainerOverride(proxy) => {
                write!(f, "container override of AuthProxyWorkload {proxy}")
            }
            Self::AdminServer(proxy) => write!(f, "admin server of AuthProxyWorkload {proxy}"),
            Self::HttpServer(proxy) => write!(f, "http server of AuthProxyWorkload {proxy}"),
        }
    }
}
