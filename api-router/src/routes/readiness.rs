use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// `GET /ready` (§6.3): 200 only once the registry has published at least one
/// document and the database is reachable. A registry with zero documents is
/// indistinguishable from "not warmed up yet" and must not serve traffic.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let db_ok = state.db.client.query("RETURN true").await.is_ok();
    let document_count = state.registry.document_count();

    if db_ok && document_count > 0 {
        (
            StatusCode::OK,
            Json(json!({"status": "ok", "documentCount": document_count})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "documentCount": document_count,
                "db": db_ok,
            })),
        )
    }
}
