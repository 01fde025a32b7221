//! Cloud SQL Auth Proxy PodSpec Updater
//!
//! Given a workload's pod template and the `AuthProxyWorkload` resources that select it, the
//! updater rewrites the template so that it runs one Cloud SQL Auth Proxy sidecar per
//! `AuthProxyWorkload`:
//!
//! - Each instance of each proxy is assigned a TCP port (explicit ports first, then consecutive
//!   ports from 5000) or shares a unix socket through an `emptyDir` volume.
//! - The sidecar's arguments and `CSQL_PROXY_*` environment are derived from the proxy spec;
//!   a full container override replaces them.
//! - The workload's own containers receive the host, port and socket path variables requested
//!   by each instance.
//! - Sidecars for proxies that no longer apply are removed, and the pod template is annotated
//!   with the generation of every applied proxy.
//!
//! ```text
//! [ AuthProxyWorkload ]* -> [ Updater ] -> [ Pod template + csql-* sidecars ]
//! ```
//!
//! All port and environment conflicts found in one pass are reported together as a
//! [`ConfigError`]. The updater performs no I/O; the caller reads and writes resources.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod container;
pub mod defaults;
mod env;
mod error;
mod matching;
mod pod;
mod ports;
mod updater;
mod volumes;


pub use self::{
    error::{ConfigError, ConfigErrorDetail, ErrorCode, LookupError, ProxyRef},
    pod::PodWorkload,
    updater::{pod_annotation, Updater},
};
