use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cotrelay_core::DestinationId;
use cotrelay_dispatch::source::{MockPluginSource, PluginSource};
use cotrelay_dispatch::{Dispatcher, DispatcherConfig, TcpTakTransport};
use cotrelay_node::api::api_router;
use cotrelay_node::config::Config;
use cotrelay_queue::{DestinationRegistry, QueueConfig, StalenessSweeper};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "cotrelay-node")]
#[command(about = "Device-keyed position relay for TAK destinations")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "cotrelay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let registry = Arc::new(DestinationRegistry::new());
    let cancel = CancellationToken::new();

    let dispatcher_config = DispatcherConfig {
        poll_interval: Duration::from_millis(config.dispatch.poll_interval_ms),
        batch_size: config.dispatch.batch_size,
        max_attempts: config.dispatch.max_attempts,
    };

    let mut names = HashMap::new();
    let mut destination_ids = Vec::new();
    for destination in &config.destinations {
        let id = DestinationId(destination.id.unwrap_or_else(ulid::Ulid::new));
        let queue_config = QueueConfig {
            max_devices: destination.max_devices.unwrap_or(config.queue.max_devices),
        };
        registry.open(id, queue_config);
        names.insert(id, destination.name.clone());
        destination_ids.push(id);

        info!(
            destination_id = %id,
            name = %destination.name,
            addr = %destination.addr,
            max_devices = queue_config.max_devices,
            "destination registered"
        );

        let dispatcher = Dispatcher::new(
            id,
            Arc::clone(&registry),
            TcpTakTransport::new(destination.addr),
            dispatcher_config,
        );
        tokio::spawn(dispatcher.run(cancel.clone()));
    }

    let sweeper = StalenessSweeper::new(
        Arc::clone(&registry),
        Duration::from_secs(config.sweep.interval_secs),
        Duration::from_secs(config.sweep.stale_after_secs),
    );
    tokio::spawn(sweeper.run(cancel.clone()));

    if let Some(mock) = &config.mock_source {
        let source = MockPluginSource::new(
            mock.device_count,
            Duration::from_secs(mock.poll_interval_secs),
            mock.history_depth,
        );
        let mut polls = match source.start(cancel.clone()).await {
            Ok(rx) => rx,
            Err(never) => match never {},
        };

        let registry = Arc::clone(&registry);
        let ids = destination_ids.clone();
        tokio::spawn(async move {
            while let Some(batch) = polls.recv().await {
                for &id in &ids {
                    match registry.admit(id, &batch) {
                        Ok(report) => {
                            debug!(
                                destination_id = %id,
                                accepted = report.accepted,
                                replaced = report.replaced,
                                rejected_stale = report.rejected_stale,
                                "mock poll admitted"
                            );
                            if report.dropped_capacity > 0 {
                                warn!(
                                    destination_id = %id,
                                    dropped_capacity = report.dropped_capacity,
                                    "destination is falling behind intake"
                                );
                            }
                        }
                        Err(error) => {
                            warn!(destination_id = %id, %error, "mock poll admission failed");
                        }
                    }
                }
            }
        });
    }

    let app = api_router(Arc::clone(&registry), names);
    let listener = TcpListener::bind(config.server.http_addr).await?;
    info!(http_addr = %config.server.http_addr, "HTTP server listening");

    let cancel_http = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    for id in destination_ids {
        if let Err(error) = registry.close(id) {
            warn!(destination_id = %id, %error, "failed to close destination");
        }
    }

    Ok(())
}
