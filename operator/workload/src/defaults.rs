//! Fixed values used when building proxy sidecars.

/// The proxy image used when an `AuthProxyWorkload` does not name one.
pub const DEFAULT_PROXY_IMAGE: &str = "gcr.io/cloud-sql-connectors/cloud-sql-proxy:2.1.0";

/// The first port assigned to instances that do not declare a port.
pub const DEFAULT_FIRST_PORT: i32 = 5000;

/// The first port assigned to a sidecar's health check server when telemetry does not set one.
pub const DEFAULT_HEALTH_CHECK_PORT: i32 = 9801;

/// Every proxy sidecar, and every volume created for one, is named with this prefix.
pub const CONTAINER_PREFIX: &str = "csql-";

/// Prefix of the environment variables that configure the proxy process.
pub const ENV_PREFIX: &str = "CSQL_PROXY_";

/// Pod template annotations recording applied `AuthProxyWorkload` generations use this prefix.
pub const ANNOTATION_PREFIX: &str = "cloudsql.cloud.google.com";

pub(crate) const LOOPBACK_HOST: &str = "127.0.0.1";

pub(crate) const HTTP_LISTEN_ADDRESS: &str = "0.0.0.0";

pub(crate) const DEFAULT_CPU_REQUEST: &str = "1.0";

pub(crate) const DEFAULT_MEMORY_REQUEST: &str = "1Gi";

/// Names the sidecar container owned by the `AuthProxyWorkload` `namespace/name`.
pub fn sidecar_name(namespace: &str, name: &str) -> String {
    format!("{CONTAINER_PREFIX}{namespace}-{name}")
}

/// Indicates whether a container or volume was created by the updater.
pub(crate) fn is_owned_name(name: &str) -> bool {
    name.starts_with(CONTAINER_PREFIX)
}
