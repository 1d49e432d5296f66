use identity_relay_harness::{config::HarnessConfig, harness};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,identity_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = match HarnessConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(storage_path = %config.storage_path.display(), "Loaded configuration");

    match harness::run(&config).await {
        Ok(round_trip) => {
            tracing::info!(?round_trip, "Round trip complete");
            ExitCode::SUCCESS
        }
        Err(report) => {
            tracing::error!(error = %report, "Round trip failed");
            ExitCode::FAILURE
        }
    }
}
