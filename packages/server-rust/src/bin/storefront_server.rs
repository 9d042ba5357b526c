//! storefront-server: multi-domain storefront API.
//!
//! Configuration comes from flags or `STOREFRONT_*` environment variables
//! (see `--help`). Invalid configuration exits non-zero before anything is
//! started.

use anyhow::Context;
use clap::Parser;
use storefront_server::app::App;
use storefront_server::service::{AppConfig, Cli};
use storefront_server::telemetry::{init_metrics, init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = AppConfig::from_env(&cli).context("invalid configuration")?;
    if let Some(port) = config.metrics_port {
        init_metrics(&config.network.host, port)?;
        info!(port, "metrics exporter listening");
    }

    let app = App::build(config)?;
    app.init().await?;

    let mut network = app.network();
    let port = network.start().await?;
    info!(port, "storefront-server listening");

    let served = network.serve(shutdown_signal()).await;
    let stopped = app.shutdown().await;
    served?;
    stopped?;

    info!("storefront-server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
