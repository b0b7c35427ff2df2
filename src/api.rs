use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::clients::health::HealthChecker;

/// `/health` returns the full report; `/health/live` only answers whether the
/// process is up.
pub fn router(health_checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(health_report))
        .route("/health/live", get(liveness))
        .layer(TraceLayer::new_for_http())
        .with_state(health_checker)
}

pub async fn run_api_server(health_checker: HealthChecker, port: u16) -> Result<(), Error> {
    let app = router(Arc::new(health_checker));

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Health check server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_report(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let report = checker.report();

    let status_code = if report.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(report))
}

async fn liveness() -> StatusCode {
    StatusCode::OK
}
