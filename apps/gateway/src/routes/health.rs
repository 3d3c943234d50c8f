use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    active: usize,
    cooling: usize,
    failed: usize,
}

/// `GET /health` (§6.2, no auth). 200 while at least one key is ACTIVE, else 503.
pub async fn health(State(state): State<AppState>) -> Response {
    let summary = state.pool.summary().await;
    let status = if summary.active > 0 {
        http::StatusCode::OK
    } else {
        http::StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthBody {
            status: if summary.active > 0 { "ok" } else { "degraded" },
            active: summary.active,
            cooling: summary.cooling,
            failed: summary.failed,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct StatsBody {
    uptime_secs: u64,
    pool: gateway_pool::PoolSummary,
    environment: &'static str,
}

/// `GET /stats` (§6.2, client auth): pool + process-level performance stats.
pub async fn stats(State(state): State<AppState>) -> Json<StatsBody> {
    Json(StatsBody {
        uptime_secs: state.uptime_secs(),
        pool: state.pool.summary().await,
        environment: match state.config.environment {
            gateway_core::Environment::Development => "development",
            gateway_core::Environment::Staging => "staging",
            gateway_core::Environment::Production => "production",
        },
    })
}
