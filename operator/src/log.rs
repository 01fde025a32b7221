use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Selects how log events are rendered.
///
/// Logs are always written to stderr so that stdout carries only manifests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    pub fn try_init(self, filter: &str) -> Result<()> {
        let filter = EnvFilter::try_new(filter).context("invalid log filter")?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        let res = match self {
            Self::Plain => builder.try_init(),
            Self::Json => builder.json().try_init(),
        };
        res.map_err(|error| anyhow!("failed to initialize logging: {error}"))
    }
}
