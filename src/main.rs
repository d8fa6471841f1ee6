//! framepipe CLI entrypoint

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use framepipe::cli::Cli;

/// Pipeline progress at `info`; dependencies (image decoding, HTTP) only
/// when they warn
const DEFAULT_LOG_FILTER: &str = "warn,framepipe=info";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `status`/`list` output stays pipeable
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    Cli::parse().execute().await
}
