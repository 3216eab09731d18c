use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tracing::warn;

use crate::telemetry::MetricsExporter;

/// Shared application state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub exporter: Arc<MetricsExporter>,
    pub metric_path: String,
}

pub fn router(state: AppState) -> Router {
    let metric_path = state.metric_path.clone();
    Router::new()
        .route("/", get(index))
        .route(&metric_path, get(metrics))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let version = env!("CARGO_PKG_VERSION");
    Html(format!(
        "<html>\n\
         <head><title>Prometheus PuppetDB Exporter v{version}</title></head>\n\
         <body>\n\
         <h1>Prometheus PuppetDB Exporter {version}</h1>\n\
         <p><a href='{path}'>Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = state.metric_path,
    ))
}

/// Scrape PuppetDB and serve the text exposition. A failed scrape is a 500.
async fn metrics(State(state): State<AppState>) -> Response {
    match state.exporter.scrape().await {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "scrape failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An error has occurred while serving metrics:\n\n{e}\n"),
            )
                .into_response()
        }
    }
}
