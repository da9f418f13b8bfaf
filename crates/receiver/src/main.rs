//! Rate alerts receiver
//!
//! Main entry point

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use alerts_receiver::{settings, ReceiverService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Starting rate alerts receiver v{}", env!("CARGO_PKG_VERSION"));

    let config = settings::load()?;
    info!(
        "Polling {} every {}s, delivering with {} attempts",
        config.poll.price_api_url, config.poll.interval_secs, config.delivery.max_attempts
    );

    let mut service = ReceiverService::new(config)?;
    if let Err(e) = service.start().await {
        error!("Startup failed: {}", e);
        service.shutdown().await;
        return Err(e);
    }

    info!("Press Ctrl+C to shutdown");
    wait_for_signal().await?;

    service.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
            }
            _ = terminate.recv() => {
                info!("Received termination signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
