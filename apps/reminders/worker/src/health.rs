//! Liveness, readiness and metrics endpoints.

use amqp_broker::ResilientConnection;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::metrics;

#[derive(Clone)]
pub struct HealthState {
    pub db: DatabaseConnection,
    pub broker: ResilientConnection,
    pub app_name: &'static str,
    pub app_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: &'static str,
    pub version: &'static str,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let database = database::postgres::check_health(&state.db)
        .await
        .map_err(|e| e.to_string());
    let broker = if state.broker.is_connected().await {
        Ok(())
    } else {
        Err(format!("link {}", state.broker.state().as_str()))
    };
    readiness(database, broker)
}

/// Ready only when both the database and the broker answer.
fn readiness(database: Result<(), String>, broker: Result<(), String>) -> (StatusCode, Json<Value>) {
    let check = |result: &Result<(), String>| match result {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let ready = database.is_ok() && broker.is_ok();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "database": check(&database),
                "broker": check(&broker),
            }
        })),
    )
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
