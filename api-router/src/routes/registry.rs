use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use common::storage::types::user::User;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

/// `POST /refresh-registry` (§6.3): force-reloads the document/owner cache.
/// Super-admin only — this bypasses the refresh period and is meant for
/// operators reacting to a webhook, not for regular traffic.
pub async fn refresh_registry(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.ok_or(ApiError::Unauthorized { reason: "registered" })?;
    if !user.is_super_admin() {
        return Err(ApiError::Unauthorized { reason: "forbidden" });
    }

    state.registry.refresh(&state.db).await?;

    Ok((
        StatusCode::OK,
        Json(json!({"ok": true, "documentCount": state.registry.document_count()})),
    ))
}
