//! Carepay API server
//!
//! Hosts the booking payment and payout lifecycle endpoints and runs the
//! periodic release scheduler in the background.

mod config;
mod error;
mod routes;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use carepay_engine::engine::PayoutEngine;
use carepay_engine::notify::LogEventSink;
use carepay_engine::processor::HttpPaymentProcessor;

use crate::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,carepay_engine=debug,carepay_api=debug")),
        )
        .init();

    let config = ApiConfig::from_env().context("loading configuration")?;

    let processor = Arc::new(HttpPaymentProcessor::new(
        config.processor_base_url.clone(),
        config.processor_api_key.clone(),
    ));
    let engine = Arc::new(PayoutEngine::new(
        config.engine.clone(),
        processor,
        Arc::new(LogEventSink),
    ));

    let scheduler = engine.scheduler();
    tokio::spawn(async move {
        scheduler.run().await;
    });

    let app = routes::router(engine)
        .layer(tower::limit::ConcurrencyLimitLayer::new(1024));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "carepay api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
