use crate::{AuthProxyWorkloadSpec, InstanceSpec, SUPPORTED_KINDS};
use regex::Regex;
use thiserror::Error;

// Domain-scoped projects (`example.com:project`) contain a colon of their own.
const CONNECTION_STRING_REGEX: &str = r"^([^:]+(:[^:]+)?):([^:]+):([^:]+)$";

const ENV_NAME_REGEX: &str = r"^[-._a-zA-Z][-._a-zA-Z0-9]*$";

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValidationError {
    #[error("spec.instances must declare at least one instance")]
    NoInstances,

    #[error(
        "spec.instances[{index}].connectionString {value:?} must match <project>:<region>:<instance>"
    )]
    ConnectionString { index: usize, value: String },

    #[error("{field} {port} must be between 1 and 65535")]
    PortRange { field: String, port: i32 },

    /// A unix socket instance has no TCP listener, so a port is meaningless.
    #[error("spec.instances[{index}] sets both port and unixSocketPath")]
    PortAndUnixSocket { index: usize },

    #[error("spec.instances[{index}].unixSocketPath {path:?} must be an absolute path")]
    RelativeUnixSocketPath { index: usize, path: String },

    #[error("{field} {name:?} is not a valid environment variable name")]
    EnvName { field: String, name: String },

    #[error("spec.workload must set exactly one of name or selector")]
    WorkloadSelector,

    #[error("spec.workload.kind {0:?} is not a supported workload kind")]
    UnsupportedKind(String),
}

// === impl AuthProxyWorkloadSpec ===

impl AuthProxyWorkloadSpec {
    /// Checks the spec for errors that can be detected without looking at the target workload.
    ///
    /// All errors are returned, not only the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = vec![];

        let workload = &self.workload;
        if workload.name.is_some() == workload.selector.is_some() {
            errors.push(ValidationError::WorkloadSelector);
        }
        if !workload.kind.is_empty() && !SUPPORTED_KINDS.contains(&workload.kind.as_str()) {
            errors.push(ValidationError::UnsupportedKind(workload.kind.clone()));
        }

        if self.instances.is_empty() {
            errors.push(ValidationError::NoInstances);
        }
        for (index, instance) in self.instances.iter().enumerate() {
            validate_instance(index, instance, &mut errors);
        }

        if let Some(container) = self.auth_proxy_container.as_ref() {
            if let Some(admin) = container.admin_server.as_ref() {
                check_port("spec.authProxyContainer.adminServer.port", admin.port, &mut errors);
            }
            if let Some(port) = container.telemetry.as_ref().and_then(|t| t.http_port) {
                check_port("spec.authProxyContainer.telemetry.httpPort", port, &mut errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_instance(index: usize, instance: &InstanceSpec, errors: &mut Vec<ValidationError>) {
    let regex = Regex::new(CONNECTION_STRING_REGEX).expect("should compile");
    if !regex.is_match(&instance.connection_string) {
        errors.push(ValidationError::ConnectionString {
            index,
            value: instance.connection_string.clone(),
        });
    }

    if let Some(port) = instance.port {
        check_port(&format!("spec.instances[{index}].port"), port, errors);
    }

    if let Some(path) = instance.unix_socket_path.as_deref() {
        if instance.port.is_some() {
            errors.push(ValidationError::PortAndUnixSocket { index });
        }
        if !path.starts_with('/') {
            errors.push(ValidationError::RelativeUnixSocketPath {
                index,
                path: path.to_string(),
            });
        }
    }

    let env_names = [
        ("portEnvName", instance.port_env_name.as_deref()),
        ("hostEnvName", instance.host_env_name.as_deref()),
        (
            "unixSocketPathEnvName",
            instance.unix_socket_path_env_name.as_deref(),
        ),
    ];
    let regex = Regex::new(ENV_NAME_REGEX).expect("should compile");
    for (field, name) in env_names {
        if let Some(name) = name {
            if !regex.is_match(name) {
                errors.push(ValidationError::EnvName {
                    field: format!("spec.instances[{index}].{field}"),
                    name: name.to_string(),
                });
            }
        }
    }
}

fn check_port(field: &str, port: i32, errors: &mut Vec<ValidationError>) {
    if !(1..=i32::from(u16::MAX)).contains(&port) {
        errors.push(ValidationError::PortRange {
            field: field.to_string(),
            port,
        });
    }
}
