mod config;

use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use turbofan_router::domain::{LogSeverity, RouterContext};
use turbofan_router::turbofan_router::TurbofanRouter;
use turbofan_runner::Runner;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let initial_level = match config.logging_level.parse::<LogSeverity>() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Invalid logging_level: {}", e);
            std::process::exit(1);
        }
    };
    let context = Arc::new(RouterContext::new(initial_level));

    // The router threshold filters every event from here on
    let mut telemetry_config =
        TelemetryConfig::new(&config.otel_service_name).with_log_level(&config.log_level);
    if config.otel_enabled {
        telemetry_config = telemetry_config.with_otel_endpoint(&config.otel_endpoint);
    }

    let telemetry_providers: Option<TelemetryProviders> =
        match init_telemetry(&telemetry_config, context.log_filter()) {
            Ok(providers) => providers,
            Err(e) => {
                eprintln!("Failed to initialize telemetry: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        logging_level = %initial_level,
        "Starting turbofan-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let nats_client = match initialize_nats(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize NATS: {}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let turbofan_router = match TurbofanRouter::new(
        Arc::clone(&nats_client),
        Arc::clone(&context),
        config.router_config(),
    )
    .await
    {
        Ok(router) => router,
        Err(e) => {
            error!("Failed to initialize turbofan router: {}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();
    for (name, process) in turbofan_router.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner = runner
        .with_closer({
            let nats_for_close = nats_client;
            move || {
                Box::pin(async move {
                    info!("Running cleanup tasks...");
                    match Arc::try_unwrap(nats_for_close) {
                        Ok(client) => client.close().await,
                        Err(_) => warn!("NATS client still shared at shutdown, skipping flush"),
                    }

                    // Flush pending traces and logs
                    shutdown_telemetry(telemetry_providers);

                    info!("Cleanup complete");
                    Ok(())
                })
            }
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

async fn initialize_nats(config: &ServiceConfig) -> anyhow::Result<Arc<NatsClient>> {
    info!("Initializing NATS...");
    let nats_client = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.startup_timeout_secs),
        )
        .await?,
    );
    nats_client
        .ensure_stream(&config.nats_stream, config.stream_subjects())
        .await?;
    Ok(nats_client)
}
