#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod auth_proxy_workload;
pub mod labels;
mod validation;

pub use self::{
    auth_proxy_workload::{
        AdminApi, AdminServerSpec, AuthProxyContainerSpec, AuthProxyWorkload,
        AuthProxyWorkloadSpec, InstanceSpec, TelemetrySpec, WorkloadSelectorSpec,
        ERROR_CODE_ENV_CONFLICT, ERROR_CODE_PORT_CONFLICT, SUPPORTED_KINDS,
    },
    labels::Labels,
    validation::ValidationError,
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
        core::v1::{Container, EnvVar, Pod, PodSpec, PodTemplateSpec, Volume, VolumeMount},
    },
    apimachinery::pkg::apis::meta::v1::Time,
};
pub use kube::core::{ObjectMeta, ResourceExt};

/// The namespace assumed for resources whose manifests omit one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Returns the resource's namespace, falling back to [`DEFAULT_NAMESPACE`].
pub fn namespace_or_default<K: ResourceExt>(resource: &K) -> String {
    resource
        .namespace()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}
