use cloudsql_proxy_operator_k8s_api::{
    self as k8s, AuthProxyWorkload, ResourceExt, ERROR_CODE_ENV_CONFLICT,
    ERROR_CODE_PORT_CONFLICT,
};
use std::fmt;
use thiserror::Error;

/// Classifies a [`ConfigErrorDetail`].
///
/// The string form of each code is stable; callers match on it when surfacing status conditions
/// and events.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    PortConflict,
    EnvVarConflict,
}

/// Identifies the `AuthProxyWorkload` responsible for a configuration error.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyRef {
    pub namespace: String,
    pub name: String,
}

/// A single problem detected while configuring a workload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code} (AuthProxyWorkload {proxy}): {description}")]
pub struct ConfigErrorDetail {
    pub code: ErrorCode,
    pub proxy: ProxyRef,
    pub description: String,
}

/// Every problem detected while configuring one workload.
///
/// When the updater returns this error the workload is left as it was; it must not be applied
/// as though the proxies were configured.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "found {} configuration errors on workload {kind} {namespace}/{name}{}",
    .details.len(),
    DisplayDetails(.details)
)]
pub struct ConfigError {
    kind: String,
    namespace: String,
    name: String,
    details: Vec<ConfigErrorDetail>,
}

struct DisplayDetails<'a>(&'a [ConfigErrorDetail]);

/// Accumulates error details over a whole update pass.
#[derive(Debug, Default)]
pub(crate) struct ConfigErrors {
    details: Vec<ConfigErrorDetail>,
}

/// Returned by lookups against a workload's pod spec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no container found with name {0}")]
    ContainerNotFound(String),

    #[error("no env var named {env} on container {container}")]
    EnvVarNotFound { container: String, env: String },
}

// === impl ErrorCode ===

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PortConflict => ERROR_CODE_PORT_CONFLICT,
            Self::EnvVarConflict => ERROR_CODE_ENV_CONFLICT,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ProxyRef ===

impl ProxyRef {
    pub fn of(proxy: &AuthProxyWorkload) -> Self {
        Self {
            namespace: k8s::namespace_or_default(proxy),
            name: proxy.name_any(),
        }
    }
}

impl fmt::Display for ProxyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl ConfigError ===

impl ConfigError {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn details(&self) -> &[ConfigErrorDetail] {
        &self.details
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.details.iter().any(|d| d.code == code)
    }

    /// Lists the `(error code, message)` pairs in the order they were detected.
    pub fn codes_and_messages(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        self.details
            .iter()
            .map(|d| (d.code.as_str(), format!("{}: {}", d.proxy, d.description)))
    }
}

impl fmt::Display for DisplayDetails<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for detail in self.0 {
            write!(f, "; {detail}")?;
        }
        Ok(())
    }
}

// === impl ConfigErrors ===

impl ConfigErrors {
    pub(crate) fn push(&mut self, code: ErrorCode, proxy: ProxyRef, description: String) {
        tracing::info!(%code, %proxy, %description, "Invalid proxy configuration");
        self.details.push(ConfigErrorDetail {
            code,
            proxy,
            description,
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    pub(crate) fn ok_if_empty(
        self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), ConfigError> {
        if self.details.is_empty() {
            return Ok(());
        }
        Err(ConfigError {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            details: self.details,
        })
    }
}
