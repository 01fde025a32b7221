use crate::{error::ProxyRef, PodWorkload, Updater};
use cloudsql_proxy_operator_k8s_api::{self as k8s, AuthProxyWorkload, WorkloadSelectorSpec};

impl Updater {
    /// Selects the `AuthProxyWorkload`s that apply to `workload`.
    ///
    /// `owners` are the resources that control `workload` (e.g. the `ReplicaSet` and
    /// `Deployment` of a `Pod`); a proxy that selects any of them also applies to the workload.
    /// Proxies marked for deletion are included. The result is sorted by namespace and name.
    pub fn find_matching_auth_proxy_workloads<'p>(
        &self,
        proxies: &'p [AuthProxyWorkload],
        workload: &PodWorkload,
        owners: &[PodWorkload],
    ) -> Vec<&'p AuthProxyWorkload> {
        let mut matches = proxies
            .iter()
            .filter(|proxy| {
                std::iter::once(workload)
                    .chain(owners)
                    .any(|w| selects(proxy, w))
            })
            .collect::<Vec<_>>();
        matches.sort_by_key(|p| ProxyRef::of(p));
        matches.dedup_by_key(|p| ProxyRef::of(p));
        tracing::trace!(
            kind = workload.kind(),
            name = %workload.name(),
            matches = matches.len(),
            "Matched proxies"
        );
        matches
    }
}

fn selects(proxy: &AuthProxyWorkload, workload: &PodWorkload) -> bool {
    if k8s::namespace_or_default(proxy) != workload.namespace() {
        return false;
    }

    let WorkloadSelectorSpec {
        kind,
        name,
        selector,
    } = &proxy.spec.workload;
    if !kind.is_empty() && kind != workload.kind() {
        return false;
    }
    if let Some(name) = name.as_deref().filter(|n| !n.is_empty()) {
        if name != workload.name() {
            return false;
        }
    }
    match selector {
        Some(selector) => selector.matches(&workload.labels()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cloudsql_proxy_operator_k8s_api::{
        labels::Selector, AuthProxyWorkloadSpec, Deployment, ObjectMeta, Pod, Time,
    };
    use maplit::btreemap;
    use std::collections::BTreeMap;

    fn mk_proxy(ns: &str, name: &str, workload: WorkloadSelectorSpec) -> AuthProxyWorkload {
        let mut proxy = AuthProxyWorkload::new(
            name,
            AuthProxyWorkloadSpec {
                workload,
                ..Default::default()
            },
        );
        proxy.metadata.namespace = Some(ns.to_string());
        proxy
    }

    fn mk_pod(ns: &str, name: &str, labels: Option<BTreeMap<String, String>>) -> PodWorkload {
        PodWorkload::from(Pod {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                labels,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn by_name(kind: &str, name: &str) -> WorkloadSelectorSpec {
        WorkloadSelectorSpec {
            kind: kind.to_string(),
            name: Some(name.to_string()),
            selector: None,
        }
    }

    fn by_labels(kind: &str, extra: BTreeMap<String, String>) -> WorkloadSelectorSpec {
        let mut labels = btreemap! { "app".to_string() => "busybox".to_string() };
        labels.extend(extra);
        WorkloadSelectorSpec {
            kind: kind.to_string(),
            name: None,
            selector: Some(Selector::from_map(labels)),
        }
    }

    #[test]
    fn matches_by_name_and_labels() {
        let updater = Updater::new("test");
        let proxies = vec![
            mk_proxy("default", "b-labels", by_labels("Pod", BTreeMap::new())),
            mk_proxy("default", "a-name", by_name("Pod", "busybox")),
            mk_proxy("default", "other-name", by_name("Pod", "other")),
            mk_proxy("default", "other-kind", by_name("Deployment", "busybox")),
            mk_proxy("other", "other-ns", by_name("Pod", "busybox")),
            mk_proxy(
                "default",
                "other-labels",
                by_labels("Pod", btreemap! { "tier".to_string() => "db".to_string() }),
            ),
        ];
        let pod = mk_pod(
            "default",
            "busybox",
            Some(btreemap! { "app".to_string() => "busybox".to_string() }),
        );

        let matches = updater.find_matching_auth_proxy_workloads(&proxies, &pod, &[]);

        assert_eq!(
            matches
                .iter()
                .map(|p| p.metadata.name.as_deref().unwrap())
                .collect::<Vec<_>>(),
            vec!["a-name", "b-labels"]
        );
    }

    #[test]
    fn matches_through_owner() {
        let updater = Updater::new("test");
        let proxies = vec![mk_proxy("default", "db", by_name("Deployment", "web"))];
        let pod = mk_pod("default", "web-7d9c-abcde", None);
        let deployment = PodWorkload::from(Deployment {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("web".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        assert!(updater
            .find_matching_auth_proxy_workloads(&proxies, &pod, &[])
            .is_empty());
        assert_eq!(
            updater
                .find_matching_auth_proxy_workloads(&proxies, &pod, &[deployment])
                .len(),
            1
        );
    }

    #[test]
    fn includes_deleted_proxies() {
        let updater = Updater::new("test");
        let mut proxy = mk_proxy("default", "db", by_name("Pod", "busybox"));
        proxy.metadata.deletion_timestamp =
            Some(Time(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()));
        let proxies = vec![proxy];
        let pod = mk_pod("default", "busybox", None);

        assert_eq!(
            updater
                .find_matching_auth_proxy_workloads(&proxies, &pod, &[])
                .len(),
            1
        );
    }
}
