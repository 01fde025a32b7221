use anyhow::{bail, Context, Result};
use cloudsql_proxy_operator_k8s_api::{
    AuthProxyWorkload, CronJob, DaemonSet, Deployment, Job, Pod, ReplicaSet,
    StatefulSet, ValidationError,
};
use cloudsql_proxy_operator_workload::{ConfigError, PodWorkload, ProxyRef, Updater};
use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configures proxy sidecars on a stream of workload manifests.
#[derive(Clone, Debug)]
pub struct Injector {
    updater: Updater,
    validate: bool,
}

/// The result of an injection pass.
///
/// Every input document is kept, in order. Workloads that could not be configured are emitted
/// unmodified and their errors are listed in `failures`.
#[derive(Debug)]
pub struct Injected {
    documents: Vec<Document>,
    pub failures: Vec<InjectError>,
}

/// A problem that prevented a proxy or workload from being configured.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("AuthProxyWorkload {proxy} is invalid: {}", DisplayAll(.errors))]
    InvalidProxy {
        proxy: ProxyRef,
        errors: Vec<ValidationError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Clone, Debug)]
enum Document {
    Workload(PodWorkload),
    Other(Value),
}

struct DisplayAll<'a>(&'a [ValidationError]);

// === impl Injector ===

impl Injector {
    pub fn new(updater: Updater) -> Self {
        Self {
            updater,
            validate: true,
        }
    }

    /// Skips `AuthProxyWorkload` validation, e.g. when the resources were already admitted by
    /// the API server.
    pub fn without_validation(self) -> Self {
        Self {
            validate: false,
            ..self
        }
    }

    /// Configures every supported workload in `workloads` (a multi-document YAML stream) with
    /// the `AuthProxyWorkload`s in `proxies`.
    pub fn inject(&self, proxies: &str, workloads: &str) -> Result<Injected> {
        let proxies = parse_proxies(proxies)?;
        let mut failures = Vec::new();

        let proxies = if self.validate {
            let mut valid = Vec::with_capacity(proxies.len());
            for proxy in proxies {
                match proxy.spec.validate() {
                    Ok(()) => valid.push(proxy),
                    Err(errors) => {
                        let proxy = ProxyRef::of(&proxy);
                        warn!(%proxy, errors = errors.len(), "Ignoring invalid AuthProxyWorkload");
                        failures.push(InjectError::InvalidProxy { proxy, errors });
                    }
                }
            }
            valid
        } else {
            proxies
        };

        let mut documents = parse_documents(workloads)?;
        let snapshot = documents
            .iter()
            .filter_map(|doc| match doc {
                Document::Workload(w) => Some(w.clone()),
                Document::Other(_) => None,
            })
            .collect::<Vec<_>>();

        for doc in documents.iter_mut() {
            let Document::Workload(workload) = doc else {
                continue;
            };

            let owners = owners_of(workload, &snapshot);
            let matching = self
                .updater
                .find_matching_auth_proxy_workloads(&proxies, workload, &owners);
            if matching.is_empty() && workload.sidecars().next().is_none() {
                debug!(kind = workload.kind(), name = %workload.name(), "No proxies apply");
                continue;
            }

            match self.updater.configure_workload(workload, &matching) {
                Ok(()) => info!(
                    kind = workload.kind(),
                    namespace = %workload.namespace(),
                    name = %workload.name(),
                    proxies = matching.len(),
                    "Configured workload"
                ),
                Err(error) => {
                    warn!(%error, "Failed to configure workload");
                    failures.push(error.into());
                }
            }
        }

        Ok(Injected {
            documents,
            failures,
        })
    }
}

// === impl Injected ===

impl Injected {
    /// Returns the configured workload documents.
    pub fn workloads(&self) -> impl Iterator<Item = &PodWorkload> {
        self.documents.iter().filter_map(|doc| match doc {
            Document::Workload(w) => Some(w),
            Document::Other(_) => None,
        })
    }

    /// Renders every document as a multi-document YAML stream.
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for doc in &self.documents {
            let value = match doc {
                Document::Workload(w) => to_value(w)?,
                Document::Other(v) => v.clone(),
            };
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&value).context("failed to render manifest")?);
        }
        Ok(out)
    }
}

impl fmt::Display for DisplayAll<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            item.fmt(f)?;
        }
        Ok(())
    }
}

fn documents(yaml: &str) -> impl Iterator<Item = Result<Value>> + '_ {
    serde_yaml::Deserializer::from_str(yaml)
        .enumerate()
        .map(|(i, doc)| {
            Value::deserialize(doc).with_context(|| format!("invalid YAML document {i}"))
        })
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
}

fn kind_of(value: &Value) -> Option<&str> {
    value.get("kind").and_then(Value::as_str)
}

fn parse_proxies(yaml: &str) -> Result<Vec<AuthProxyWorkload>> {
    let mut proxies = Vec::new();
    for value in documents(yaml) {
        let value = value?;
        match kind_of(&value) {
            Some("AuthProxyWorkload") => {}
            Some(kind) => bail!("expected an AuthProxyWorkload, found {kind}"),
            None => bail!("manifest has no kind"),
        }
        let proxy = serde_yaml::from_value::<AuthProxyWorkload>(value)
            .context("invalid AuthProxyWorkload")?;
        proxies.push(proxy);
    }
    Ok(proxies)
}

fn parse_documents(yaml: &str) -> Result<Vec<Document>> {
    documents(yaml)
        .map(|value| {
            let value = value?;
            let kind = kind_of(&value).unwrap_or_default().to_string();
            let workload = match kind.as_str() {
                "Pod" => PodWorkload::from(serde_yaml::from_value::<Pod>(value)?),
                "Deployment" => PodWorkload::from(serde_yaml::from_value::<Deployment>(value)?),
                "StatefulSet" => PodWorkload::from(serde_yaml::from_value::<StatefulSet>(value)?),
                "DaemonSet" => PodWorkload::from(serde_yaml::from_value::<DaemonSet>(value)?),
                "ReplicaSet" => PodWorkload::from(serde_yaml::from_value::<ReplicaSet>(value)?),
                "Job" => PodWorkload::from(serde_yaml::from_value::<Job>(value)?),
                "CronJob" => PodWorkload::from(serde_yaml::from_value::<CronJob>(value)?),
                _ => return Ok(Document::Other(value)),
            };
            debug!(%kind, name = %workload.name(), "Parsed workload");
            Ok(Document::Workload(workload))
        })
        .collect()
}

fn to_value(workload: &PodWorkload) -> Result<Value> {
    let value = match workload {
        PodWorkload::Pod(r) => serde_yaml::to_value(r),
        PodWorkload::Deployment(r) => serde_yaml::to_value(r),
        PodWorkload::StatefulSet(r) => serde_yaml::to_value(r),
        PodWorkload::DaemonSet(r) => serde_yaml::to_value(r),
        PodWorkload::ReplicaSet(r) => serde_yaml::to_value(r),
        PodWorkload::Job(r) => serde_yaml::to_value(r),
        PodWorkload::CronJob(r) => serde_yaml::to_value(r),
    };
    value.with_context(|| format!("failed to render {} {}", workload.kind(), workload.name()))
}

/// Collects the workloads in `all` that control `workload`, following owner references
/// transitively (e.g. Pod -> ReplicaSet -> Deployment).
fn owners_of(workload: &PodWorkload, all: &[PodWorkload]) -> Vec<PodWorkload> {
    let namespace = workload.namespace();
    let mut owners = Vec::<PodWorkload>::new();
    let mut pending = vec![workload.clone()];
    while let Some(current) = pending.pop() {
        for reference in current.metadata().owner_references.iter().flatten() {
            let owner = all.iter().find(|w| {
                w.namespace() == namespace
                    && w.kind() == reference.kind
                    && w.name() == reference.name
            });
            if let Some(owner) = owner {
                if !owners.contains(owner) {
                    owners.push(owner.clone());
                    pending.push(owner.clone());
                }
            }
        }
    }
    owners
}
