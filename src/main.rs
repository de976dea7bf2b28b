/// Linkpulse worker
///
/// Runs the sync job processor until interrupted, optionally serving
/// `/health` and `/metrics` alongside it.

use linkpulse::{config::WorkerConfig, context::AppContext, server};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = WorkerConfig::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "linkpulse=debug,tower_http=debug".into());
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Print banner
    print_banner();

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start health + metrics endpoint
    if let Some(addr) = ctx.config.metrics_addr {
        let listener = server::bind(addr).await?;
        let server_ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve_metrics(listener, server_ctx).await {
                tracing::error!("Metrics server stopped: {}", e);
            }
        });
    }

    // Stop after the current batch on Ctrl-C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let processor = Arc::new(ctx.processor());
    processor.run(shutdown_rx).await;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    __    _       __                __
   / /   (_)___  / /______  __  __/ /_______
  / /   / / __ \/ //_/ __ \/ / / / / ___/ _ \
 / /___/ / / / / ,< / /_/ / /_/ / (__  )  __/
/_____/_/_/ /_/_/|_/ .___/\__,_/_/____/\___/
                  /_/
        Link ingestion worker v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
