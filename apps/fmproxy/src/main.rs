mod bootstrap;
mod cli;
mod models_file;

use anyhow::{Context, Result};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::CliArgs::parse();
    let boot = bootstrap::bootstrap(&args).await.context("bootstrap")?;

    let app = fmproxy_router::build_router(boot.state.clone());

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    tracing::info!(event = "startup", %bind, "fmproxy listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve");

    boot.pool_sweeper.abort();
    result
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(event = "shutdown", "received ctrl-c, shutting down");
}
