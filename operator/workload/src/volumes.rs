use crate::defaults;
use cloudsql_proxy_operator_k8s_api::{
    api::core::v1::EmptyDirVolumeSource, PodSpec, Volume, VolumeMount,
};
use std::{collections::BTreeMap, path::Path};

/// Plans the `emptyDir` volumes that share unix sockets between proxies and the workload.
///
/// One volume is created per distinct socket directory in the pod, no matter how many instances
/// or `AuthProxyWorkload`s place sockets there.
#[derive(Debug, Default)]
pub(crate) struct VolumePlan {
    /// Socket directory to volume name.
    by_dir: BTreeMap<String, String>,
    volumes: Vec<Volume>,
}

// === impl VolumePlan ===

impl VolumePlan {
    /// Returns the mount that exposes `socket_path`'s directory, allocating a volume the first
    /// time the directory is seen.
    pub(crate) fn mount_for_socket(&mut self, sidecar: &str, socket_path: &str) -> VolumeMount {
        let dir = socket_dir(socket_path);
        let name = match self.by_dir.get(&dir) {
            Some(name) => name.clone(),
            None => {
                let name = format!("{sidecar}-unix-{}", self.volumes.len());
                tracing::debug!(%dir, volume = %name, "Adding unix socket volume");
                self.volumes.push(Volume {
                    name: name.clone(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                });
                self.by_dir.insert(dir.clone(), name.clone());
                name
            }
        };

        VolumeMount {
            name,
            mount_path: dir,
            ..Default::default()
        }
    }

    /// Mounts for the workload's own containers: every planned volume.
    fn mounts(&self) -> impl Iterator<Item = VolumeMount> + '_ {
        self.by_dir.iter().map(|(dir, name)| VolumeMount {
            name: name.clone(),
            mount_path: dir.clone(),
            ..Default::default()
        })
    }

    /// Replaces the volumes and workload container mounts from any previous update with this
    /// plan. Sidecar mounts are set when the sidecars are built.
    pub(crate) fn apply(&self, spec: &mut PodSpec) {
        let volumes = spec.volumes.get_or_insert_with(Vec::new);
        volumes.retain(|v| !defaults::is_owned_name(&v.name));
        volumes.extend(self.volumes.iter().cloned());
        if volumes.is_empty() {
            spec.volumes = None;
        }

        for c in spec.containers.iter_mut() {
            if defaults::is_owned_name(&c.name) {
                continue;
            }
            let mounts = c.volume_mounts.get_or_insert_with(Vec::new);
            mounts.retain(|m| !defaults::is_owned_name(&m.name));
            mounts.extend(self.mounts());
            if mounts.is_empty() {
                c.volume_mounts = None;
            }
        }
    }
}

/// The directory mounted for a socket path: its parent, or the path itself when it has none.
fn socket_dir(socket_path: &str) -> String {
    Path::new(socket_path)
        .parent()
        .and_then(Path::to_str)
        .filter(|p| !p.is_empty())
        .unwrap_or(socket_path)
        .to_string()
}
