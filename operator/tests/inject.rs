use cloudsql_proxy_operator::{
    workload::{PodWorkload, Updater},
    InjectError, Injector,
};

const PROXIES: &str = r#"
apiVersion: cloudsql.cloud.google.com/v1alpha1
kind: AuthProxyWorkload
metadata:
  name: db
  namespace: apps
  generation: 2
spec:
  workload:
    kind: Deployment
    name: web
  instances:
    - connectionString: project:region:db
      portEnvName: DB_PORT
      hostEnvName: DB_HOST
---
apiVersion: cloudsql.cloud.google.com/v1alpha1
kind: AuthProxyWorkload
metadata:
  name: batch-db
  namespace: apps
  generation: 1
spec:
  workload:
    kind: Job
    selector:
      matchLabels:
        app: batch
  instances:
    - connectionString: project:region:batch
      unixSocketPath: /var/run/db/socket
      unixSocketPathEnvName: DB_SOCKET
"#;

const WORKLOADS: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: apps
spec:
  ports:
    - port: 80
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: apps
spec:
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
        - name: web
          image: nginx
          ports:
            - containerPort: 8080
---
apiVersion: batch/v1
kind: Job
metadata:
  name: nightly
  namespace: apps
  labels:
    app: batch
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: batch
          image: busybox
---
apiVersion: v1
kind: Pod
metadata:
  name: unrelated
  namespace: apps
spec:
  containers:
    - name: app
      image: busybox
"#;

fn find<'w>(workloads: &'w [&'w PodWorkload], name: &str) -> &'w PodWorkload {
    workloads
        .iter()
        .find(|w| w.name() == name)
        .copied()
        .expect("workload must be present")
}

#[test]
fn configures_matching_workloads() {
    let injected = Injector::new(Updater::new("test-agent"))
        .inject(PROXIES, WORKLOADS)
        .expect("inject must succeed");
    assert!(injected.failures.is_empty(), "{:?}", injected.failures);

    let workloads = injected.workloads().collect::<Vec<_>>();
    assert_eq!(workloads.len(), 3);

    let web = find(&workloads, "web");
    assert_eq!(
        web.sidecars().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["csql-apps-db"]
    );
    assert_eq!(
        web.find_env_var("web", "DB_PORT").unwrap().value.as_deref(),
        Some("5000")
    );
    assert_eq!(
        web.pod_template_annotations()
            .get("cloudsql.cloud.google.com/db")
            .map(String::as_str),
        Some("2")
    );

    let job = find(&workloads, "nightly");
    assert_eq!(
        job.find_env_var("batch", "DB_SOCKET").unwrap().value.as_deref(),
        Some("/var/run/db/socket")
    );
    assert_eq!(job.sidecars().count(), 1);

    let unrelated = find(&workloads, "unrelated");
    assert_eq!(unrelated.sidecars().count(), 0);
    assert!(unrelated.pod_template_annotations().is_empty());

    let yaml = injected.to_yaml().expect("manifests must render");
    assert_eq!(yaml.matches("---\n").count(), 4);
    assert!(yaml.contains("kind: Service"));
    assert!(yaml.contains("csql-apps-db"));
    assert!(yaml.contains("CSQL_PROXY_USER_AGENT"));
}

#[test]
fn invalid_proxies_are_reported_and_skipped() {
    let proxies = r#"
apiVersion: cloudsql.cloud.google.com/v1alpha1
kind: AuthProxyWorkload
metadata:
  name: broken
  namespace: apps
spec:
  workload:
    kind: Deployment
    name: web
  instances:
    - connectionString: not-a-connection-string
"#;

    let injected = Injector::new(Updater::new("test-agent"))
        .inject(proxies, WORKLOADS)
        .expect("inject must succeed");

    assert_eq!(injected.failures.len(), 1);
    match &injected.failures[0] {
        InjectError::InvalidProxy { proxy, errors } => {
            assert_eq!(proxy.to_string(), "apps/broken");
            assert!(!errors.is_empty());
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert!(injected.workloads().all(|w| w.sidecars().next().is_none()));

    let injected = Injector::new(Updater::new("test-agent"))
        .without_validation()
        .inject(proxies, WORKLOADS)
        .expect("inject must succeed");
    assert!(injected.failures.is_empty());
    let workloads = injected.workloads().collect::<Vec<_>>();
    assert_eq!(find(&workloads, "web").sidecars().count(), 1);
}

#[test]
fn conflicting_workloads_are_left_unmodified() {
    let proxies = r#"
apiVersion: cloudsql.cloud.google.com/v1alpha1
kind: AuthProxyWorkload
metadata:
  name: db
  namespace: apps
spec:
  workload:
    kind: Deployment
    name: web
  instances:
    - connectionString: project:region:db
      port: 8080
"#;

    let injected = Injector::new(Updater::new("test-agent"))
        .inject(proxies, WORKLOADS)
        .expect("inject must succeed");

    assert_eq!(injected.failures.len(), 1);
    let InjectError::Config(error) = &injected.failures[0] else {
        panic!("expected a configuration error");
    };
    assert_eq!(error.kind(), "Deployment");
    assert_eq!(error.name(), "web");
    let workloads = injected.workloads().collect::<Vec<_>>();
    assert_eq!(find(&workloads, "web").sidecars().count(), 0);
}

#[test]
fn rejects_non_proxy_documents() {
    let error = Injector::new(Updater::new("test-agent"))
        .inject(WORKLOADS, WORKLOADS)
        .expect_err("workloads are not proxies");
    assert!(error.to_string().contains("expected an AuthProxyWorkload"));
}
