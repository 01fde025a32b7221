#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

fn main() -> anyhow::Result<()> {
    cloudsql_proxy_operator::Args::parse_and_run()
}
