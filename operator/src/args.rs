use crate::{Injector, LogFormat};
use anyhow::{bail, Context, Result};
use clap::Parser;
use cloudsql_proxy_operator_workload::Updater;
use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
};
use tracing::error;

const DEFAULT_USER_AGENT: &str = concat!("cloud-sql-proxy-operator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Parser)]
#[clap(
    name = "csql-inject",
    version,
    about = "Adds Cloud SQL Auth Proxy sidecars to workload manifests"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "cloudsql_proxy_operator=info,warn",
        env = "CSQL_OPERATOR_LOG"
    )]
    log_level: String,

    #[clap(long, value_enum, default_value = "plain")]
    log_format: LogFormat,

    /// Identifies the operator to the Cloud SQL Admin API from every proxy sidecar.
    #[clap(long, default_value = DEFAULT_USER_AGENT, env = "CSQL_OPERATOR_USER_AGENT")]
    user_agent: String,

    /// A YAML file of `AuthProxyWorkload` resources.
    #[clap(long)]
    proxies: PathBuf,

    /// A YAML file of workload manifests, or `-` to read stdin.
    #[clap(long, default_value = "-")]
    workloads: PathBuf,

    /// Applies `AuthProxyWorkload` resources without validating them first.
    #[clap(long)]
    skip_validation: bool,
}

impl Args {
    #[inline]
    pub fn parse_and_run() -> Result<()> {
        Self::parse().run()
    }

    pub fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            user_agent,
            proxies,
            workloads,
            skip_validation,
        } = self;

        log_format.try_init(&log_level)?;

        let proxies = read(&proxies)?;
        let workloads = read(&workloads)?;

        let mut injector = Injector::new(Updater::new(user_agent));
        if skip_validation {
            injector = injector.without_validation();
        }
        let injected = injector.inject(&proxies, &workloads)?;

        io::stdout()
            .lock()
            .write_all(injected.to_yaml()?.as_bytes())
            .context("failed to write manifests")?;

        if !injected.failures.is_empty() {
            for failure in &injected.failures {
                error!(%failure);
            }
            bail!(
                "{} resources could not be configured",
                injected.failures.len()
            );
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
