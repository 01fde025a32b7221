#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use cloudsql_proxy_operator_k8s_api as k8s;
pub use cloudsql_proxy_operator_workload as workload;

mod args;
mod inject;
mod log;

pub use self::{
    args::Args,
    inject::{InjectError, Injected, Injector},
    log::LogFormat,
};
