use anyhow::Context;
use tokio::sync::watch;

use arb_engine::{
    config::{AppConfig, BackendConfig},
    consumer::Consumer,
    engine::SpreadDetector,
    logger::init_tracing_from_env,
    publisher::Publisher,
    queue::{RabbitMqBackend, SqsBackend},
};

/// Bridges Ctrl-C into a watch channel so the consumer can drain its
/// in-flight message before stopping.
fn spawn_signal_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(true);
    });

    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing_from_env();

    tracing::info!("Starting arbitrage detection service...");

    let cfg = AppConfig::load().await.context("configuration is incomplete")?;

    let detector = SpreadDetector::new(cfg.lookback, cfg.spread_threshold);
    let publisher = Publisher::new(cfg.output_mode);
    let shutdown = spawn_signal_listener();

    match cfg.backend {
        BackendConfig::RabbitMq(mq) => {
            let backend = RabbitMqBackend::connect(mq)
                .await
                .context("rabbitmq connection failed")?;
            Consumer::new(backend, detector, publisher)
                .run(shutdown)
                .await?;
        }
        BackendConfig::Sqs(sqs) => {
            let backend = SqsBackend::connect(sqs).await;
            Consumer::new(backend, detector, publisher)
                .run(shutdown)
                .await?;
        }
    }

    tracing::info!("Arbitrage detection service stopped");
    Ok(())
}
