use super::labels;
use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reported when two instances, or an instance and a workload container, resolve to the same
/// port.
pub const ERROR_CODE_PORT_CONFLICT: &str = "PortConflict";

/// Reported when two instances set the same environment variable on the workload's containers.
pub const ERROR_CODE_ENV_CONFLICT: &str = "EnvVarConflict";

/// Workload kinds that may be selected by an `AuthProxyWorkload`.
pub const SUPPORTED_KINDS: &[&str] = &[
    "Pod",
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Job",
    "CronJob",
];

/// Declares that the pods of a workload should run a Cloud SQL Auth Proxy sidecar connected to
/// one or more database instances.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cloudsql.cloud.google.com",
    version = "v1alpha1",
    kind = "AuthProxyWorkload",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuthProxyWorkloadSpec {
    pub workload: WorkloadSelectorSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_proxy_container: Option<AuthProxyContainerSpec>,

    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

/// Selects the workloads whose pod templates receive the proxy sidecar.
///
/// Exactly one of `name` or `selector` is expected to be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelectorSpec {
    #[serde(default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<labels::Selector>,
}

/// A single database instance the proxy connects to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// The instance connection name, i.e. `project:region:instance`.
    pub connection_string: String,

    /// The TCP port the proxy listens on for this instance. Assigned automatically when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Set on the workload's containers to the proxy's port for this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_env_name: Option<String>,

    /// Set on the workload's containers to the proxy's host for this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_env_name: Option<String>,

    /// When set, the proxy listens on a unix socket at this path instead of a TCP port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket_path: Option<String>,

    /// Set on the workload's containers to the unix socket path for this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket_path_env_name: Option<String>,

    #[serde(
        rename = "autoIAMAuthN",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_iam_authn: Option<bool>,

    #[serde(rename = "privateIP", default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<bool>,
}

/// Container-level proxy configuration, shared by all instances of a workload.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthProxyContainerSpec {
    /// Replaces the generated proxy container entirely. Only the container's name is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<i64>,

    /// Seconds to wait for open connections to close after the proxy receives SIGTERM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sigterm_delay: Option<i64>,

    #[serde(
        rename = "sqlAdminAPIEndpoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sql_admin_api_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_server: Option<AdminServerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySpec>,
}

/// Enables the proxy's admin server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminServerSpec {
    pub port: i32,

    #[serde(rename = "enableAPIs", default)]
    pub enable_apis: Vec<AdminApi>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum AdminApi {
    Debug,
    QuitQuitQuit,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySpec {
    /// The port used by the proxy's health check and telemetry HTTP server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_sample_rate: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_traces: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_metrics: Option<bool>,
}

// === impl AuthProxyWorkloadSpec ===

impl AuthProxyWorkloadSpec {
    /// Returns the full container override, if the spec declares one.
    pub fn container_override(&self) -> Option<&Container> {
        self.auth_proxy_container.as_ref()?.container.as_ref()
    }
}
