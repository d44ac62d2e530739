//! Connects a pool, asks for one login's deal count and exits.
//!
//! Usage: `mgw-probe <login> [from_unix] [to_unix]`, configured by `MGW_*`
//! environment variables.

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mgw_client::{ClientConfig, Pool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let login = match args.next() {
        Some(login) => login,
        None => bail!("usage: mgw-probe <login> [from_unix] [to_unix]"),
    };
    let from: i64 = match args.next() {
        Some(raw) => raw.parse().context("from must be unix seconds")?,
        None => 0,
    };
    let to: i64 = match args.next() {
        Some(raw) => raw.parse().context("to must be unix seconds")?,
        None => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock before 1970")?
            .as_secs() as i64,
    };

    let config = ClientConfig::from_env().context("loading MGW_* configuration")?;
    info!(?config, "connecting");
    let pool = Pool::connect(config).await.context("opening session pool")?;

    let outcome = pool.deals_total(&login, from, to).await;
    let metrics = pool.metrics();
    pool.close().await.context("closing session pool")?;

    let total = outcome.with_context(|| format!("DEAL_GET_TOTAL for {login}"))?;
    println!("{login}: {total} deals");
    info!(
        requests = metrics.requests_total,
        mean_latency = ?metrics.latency.mean(),
        "done"
    );
    Ok(())
}
