use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// `GET /health` (§6.3): never fails the transport, only degrades the
/// reported status once the registry has gone stale past its failure
/// threshold (`DocumentRegistry::is_healthy`).
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let status = if state.registry.is_healthy() { "ok" } else { "degraded" };
    let registry_age_secs = state.registry.registry_age().map(|age| age.as_secs());
    let load = state.concurrency.load();

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "registryAge": registry_age_secs,
            "activeJobs": load.active,
            "maxJobs": load.max,
        })),
    )
}
