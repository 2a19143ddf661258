// Main entry point - Dependency injection and listener setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::application::clock::{Clock, SystemClock};
use crate::application::day_aggregator::DayAggregator;
use crate::application::ingest_service::IngestService;
use crate::domain::frame::FrameDecoder;
use crate::infrastructure::config::load_logger_config;
use crate::infrastructure::csv_sink::CsvDaySink;
use crate::infrastructure::raw_log::RawFrameLog;
use crate::presentation::udp_listener::UdpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_logger_config()?;
    tracing::debug!("Loaded configuration: {:?}", config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Create sink (infrastructure layer)
    let sink = Arc::new(CsvDaySink::new(config.storage.output_dir.clone()));

    // Create services (application layer)
    let decoder = FrameDecoder::new(config.decoder.checksum_policy, config.decoder.marker_policy);
    let aggregator = DayAggregator::new(sink, clock.clone(), config.storage.write_attempts)
        .with_retry_delay(config.storage.write_retry_delay)
        .with_skip_empty_days(config.storage.skip_empty_days);
    let service = IngestService::new(decoder, aggregator);

    // Bind listener (presentation layer)
    let listener = UdpListener::bind(
        config.listener.socket_addr(),
        config.listener.idle_timeout,
        clock,
        service,
    )
    .await?
    .with_verbose(config.listener.verbose)
    .with_raw_log(config.storage.raw_log_dir.map(RawFrameLog::new));

    listener
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
