use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::api::rest::{self, AppState};
use crate::client::PuppetDbClient;
use crate::config::{ExporterConfig, LogFormat};
use crate::domain::collector::PuppetDbCollector;
use crate::domain::schema::MetricSchema;
use crate::telemetry::MetricsExporter;

/// Initialise the global tracing subscriber. `RUST_LOG` takes precedence.
pub fn init_tracing(config: &ExporterConfig) {
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wire client → schema → collector → exporter from a validated config.
pub fn build_exporter(config: &ExporterConfig) -> Result<MetricsExporter> {
    let client = PuppetDbClient::new(&config.client).context("failed to create PuppetDB client")?;
    let schema = MetricSchema::build(config.categories.iter().cloned());
    let collector = PuppetDbCollector::new(
        Arc::new(client),
        Arc::new(schema),
        config.unreported_after,
    );
    Ok(MetricsExporter::new(collector))
}

pub async fn run(config: ExporterConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "PuppetDB exporter starting");

    let exporter = Arc::new(build_exporter(&config)?);
    for descriptor in exporter.describe() {
        debug!(
            metric = %descriptor.name,
            labels = ?descriptor.labels,
            "exporting metric"
        );
    }

    let app = rest::router(AppState {
        exporter,
        metric_path: config.metric_path.clone(),
    })
    .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("binding to {}", config.listen_address))?;

    info!(
        addr = %config.listen_address,
        metric_path = %config.metric_path,
        puppetdb_url = %config.client.url,
        "providing metrics"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("PuppetDB exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down"); },
        _ = terminate => { info!("Received SIGTERM, shutting down"); },
    }
}
