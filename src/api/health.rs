//! Liveness and dependency checks.
//!
//! There is no payment gateway, so the payment check is simulated. The
//! email check connects to the SMTP relay when one is configured and
//! reports simulated figures otherwise.

use axum::{extract::State, http::StatusCode, Json};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::AppState;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Record process start; called once at boot
pub fn mark_started() {
    START_TIME.get_or_init(Instant::now);
}

fn uptime_seconds() -> u64 {
    START_TIME.get_or_init(Instant::now).elapsed().as_secs()
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": uptime_seconds(),
        "timestamp": timestamp(),
    }))
}

pub async fn database(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let started = Instant::now();
    let result: Result<(i64,), sqlx::Error> =
        sqlx::query_as("SELECT 1").fetch_one(&state.db).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "ok",
                "latencyMs": latency_ms,
                "timestamp": timestamp(),
            })),
        ),
        Err(e) => {
            tracing::error!("Database health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "status": "error",
                    "message": "Database is unreachable",
                    "latencyMs": latency_ms,
                    "timestamp": timestamp(),
                })),
            )
        }
    }
}

pub async fn payment() -> Json<Value> {
    let latency_ms: u64 = rand::rng().random_range(40..=180);
    Json(json!({
        "success": true,
        "status": "ok",
        "simulated": true,
        "provider": "manual",
        "latencyMs": latency_ms,
        "timestamp": timestamp(),
    }))
}

pub async fn email(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    if !state.mailer.is_enabled() {
        let latency_ms: u64 = rand::rng().random_range(20..=120);
        return (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "ok",
                "simulated": true,
                "latencyMs": latency_ms,
                "timestamp": timestamp(),
            })),
        );
    }

    let email = &state.config.email;
    let started = Instant::now();
    let result = state.mailer.test_connection().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "ok",
                "simulated": false,
                "host": email.smtp_host,
                "port": email.smtp_port,
                "latencyMs": latency_ms,
                "timestamp": timestamp(),
            })),
        ),
        Err(e) => {
            tracing::error!("Email health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "status": "error",
                    "simulated": false,
                    "message": "SMTP server is unreachable",
                    "latencyMs": latency_ms,
                    "timestamp": timestamp(),
                })),
            )
        }
    }
}
