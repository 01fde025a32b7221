use cloudsql_proxy_operator_k8s_api::InstanceSpec;
use std::collections::BTreeMap;

/// Builds the proxy argument for one instance: `<connection-string>?<key>=<value>&...`.
///
/// Query parameters are sorted by key. The port is omitted for unix socket instances.
pub(crate) fn instance_arg(instance: &InstanceSpec, port: Option<i32>) -> String {
    let mut params = BTreeMap::new();

    if let Some(auto_iam_authn) = instance.auto_iam_authn {
        params.insert("auto-iam-authn", auto_iam_authn.to_string());
    }
    if let Some(private_ip) = instance.private_ip {
        params.insert("private-ip", private_ip.to_string());
    }
    match instance.unix_socket_path.as_deref() {
        Some(path) => {
            params.insert("unix-socket-path", path.to_string());
        }
        None => {
            if let Some(port) = port {
                params.insert("port", port.to_string());
            }
        }
    }

    if params.is_empty() {
        return instance.connection_string.clone();
    }

    let query = params
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", instance.connection_string, query)
}
