use crate::{defaults, error::LookupError};
use cloudsql_proxy_operator_k8s_api::{
    self as k8s, Container, CronJob, DaemonSet, Deployment, EnvVar, Job, Labels, ObjectMeta, Pod,
    PodSpec, PodTemplateSpec, ReplicaSet, StatefulSet,
};
use std::collections::BTreeMap;

/// A workload resource whose pod template receives proxy sidecars.
///
/// The updater only touches the pod template: its containers, volumes and annotations. For a bare
/// `Pod` the pod itself is the template.
#[derive(Clone, Debug, PartialEq)]
pub enum PodWorkload {
    Pod(Pod),
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
    ReplicaSet(ReplicaSet),
    Job(Job),
    CronJob(CronJob),
}

/// A bare `Pod` is its own template.
enum TemplateMut<'a> {
    Pod(&'a mut Pod),
    Template(&'a mut PodTemplateSpec),
}

// === impl PodWorkload ===

impl PodWorkload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pod(_) => "Pod",
            Self::Deployment(_) => "Deployment",
            Self::StatefulSet(_) => "StatefulSet",
            Self::DaemonSet(_) => "DaemonSet",
            Self::ReplicaSet(_) => "ReplicaSet",
            Self::Job(_) => "Job",
            Self::CronJob(_) => "CronJob",
        }
    }

    /// The workload resource's own metadata (not its pod template's).
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Pod(r) => &r.metadata,
            Self::Deployment(r) => &r.metadata,
            Self::StatefulSet(r) => &r.metadata,
            Self::DaemonSet(r) => &r.metadata,
            Self::ReplicaSet(r) => &r.metadata,
            Self::Job(r) => &r.metadata,
            Self::CronJob(r) => &r.metadata,
        }
    }

    pub fn namespace(&self) -> String {
        self.metadata()
            .namespace
            .clone()
            .unwrap_or_else(|| k8s::DEFAULT_NAMESPACE.to_string())
    }

    pub fn name(&self) -> String {
        self.metadata().name.clone().unwrap_or_default()
    }

    pub fn labels(&self) -> Labels {
        self.metadata().labels.clone().into()
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            Self::Pod(pod) => pod.spec.as_ref(),
            _ => self.template()?.spec.as_ref(),
        }
    }

    /// Returns the template's pod spec, creating empty parents as needed.
    pub fn pod_spec_mut(&mut self) -> &mut PodSpec {
        match self.template_mut() {
            TemplateMut::Pod(pod) => pod.spec.get_or_insert_with(Default::default),
            TemplateMut::Template(t) => t.spec.get_or_insert_with(Default::default),
        }
    }

    /// Returns the annotations of the pod template.
    pub fn pod_template_annotations(&self) -> BTreeMap<String, String> {
        let meta = match self {
            Self::Pod(pod) => Some(&pod.metadata),
            _ => self.template().and_then(|t| t.metadata.as_ref()),
        };
        meta.and_then(|m| m.annotations.clone()).unwrap_or_default()
    }

    pub(crate) fn pod_template_annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        let meta = match self.template_mut() {
            TemplateMut::Pod(pod) => &mut pod.metadata,
            TemplateMut::Template(t) => t.metadata.get_or_insert_with(Default::default),
        };
        meta.annotations.get_or_insert_with(Default::default)
    }

    pub fn find_container(&self, name: &str) -> Result<&Container, LookupError> {
        self.pod_spec()
            .and_then(|spec| spec.containers.iter().find(|c| c.name == name))
            .ok_or_else(|| LookupError::ContainerNotFound(name.to_string()))
    }

    pub fn find_env_var(&self, container: &str, env: &str) -> Result<&EnvVar, LookupError> {
        self.find_container(container)?
            .env
            .iter()
            .flatten()
            .find(|e| e.name == env)
            .ok_or_else(|| LookupError::EnvVarNotFound {
                container: container.to_string(),
                env: env.to_string(),
            })
    }

    /// Lists the proxy sidecars currently in the pod template.
    pub fn sidecars(&self) -> impl Iterator<Item = &Container> {
        self.pod_spec()
            .into_iter()
            .flat_map(|spec| spec.containers.iter())
            .filter(|c| defaults::is_owned_name(&c.name))
    }

    fn template(&self) -> Option<&PodTemplateSpec> {
        match self {
            Self::Pod(_) => None,
            Self::Deployment(r) => r.spec.as_ref().map(|s| &s.template),
            Self::StatefulSet(r) => r.spec.as_ref().map(|s| &s.template),
            Self::DaemonSet(r) => r.spec.as_ref().map(|s| &s.template),
            Self::ReplicaSet(r) => r.spec.as_ref().and_then(|s| s.template.as_ref()),
            Self::Job(r) => r.spec.as_ref().map(|s| &s.template),
            Self::CronJob(r) => r
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .map(|s| &s.template),
        }
    }

    /// Creates empty parents of the template as needed.
    fn template_mut(&mut self) -> TemplateMut<'_> {
        let template = match self {
            Self::Pod(pod) => return TemplateMut::Pod(pod),
            Self::Deployment(r) => &mut r.spec.get_or_insert_with(Default::default).template,
            Self::StatefulSet(r) => &mut r.spec.get_or_insert_with(Default::default).template,
            Self::DaemonSet(r) => &mut r.spec.get_or_insert_with(Default::default).template,
            Self::ReplicaSet(r) => r
                .spec
                .get_or_insert_with(Default::default)
                .template
                .get_or_insert_with(Default::default),
            Self::Job(r) => &mut r.spec.get_or_insert_with(Default::default).template,
            Self::CronJob(r) => {
                &mut r
                    .spec
                    .get_or_insert_with(Default::default)
                    .job_template
                    .spec
                    .get_or_insert_with(Default::default)
                    .template
            }
        };
        TemplateMut::Template(template)
    }
}

macro_rules! impl_from {
    ($($kind:ident),+ $(,)?) => {
        $(
            impl From<$kind> for PodWorkload {
                fn from(r: $kind) -> Self {
                    Self::$kind(r)
                }
            }
        )+
    };
}

impl_from!(Pod, Deployment, StatefulSet, DaemonSet, ReplicaSet, Job, CronJob);
