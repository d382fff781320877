use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::{
    error::AppError,
    storage::types::{processing_log::ProcessingLogEntry, user::User, user_document::UserDocument},
};
use ingestion_pipeline::{try_admit_and_process, AdmissionOutcome};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub user_document_id: String,
}

/// Shared body for `/process-document` and `/retrain-document`: both admit
/// through the same concurrency gate and claim logic, the only difference
/// is which `UserDocument` rows are eligible for the caller to name (any
/// `pending`/`error` row for either; retraining a `ready` row is also valid
/// since `document_slug` is already set and `drive()` preserves it).
async fn admit(state: &ApiState, user: &User, user_document_id: &str) -> Result<impl IntoResponse, ApiError> {
    let document: UserDocument = state
        .db
        .get_item(user_document_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::NotFound(user_document_id.to_string()))?;

    if document.user_id != user.id {
        return Err(ApiError::NotFound(user_document_id.to_string()));
    }

    // The lease duration and the stuck-job threshold are the same configured
    // value (`stuck_threshold_secs`): a claim is considered stuck exactly
    // once its own lease would have expired.
    let outcome = try_admit_and_process(
        Arc::clone(&state.concurrency),
        Arc::clone(&state.ingestion_pipeline),
        Arc::clone(&state.db),
        user_document_id.to_string(),
        state.ingestion_lease,
        state.ingestion_lease,
    )
    .await?;

    match outcome {
        AdmissionOutcome::Accepted => Ok((StatusCode::ACCEPTED, Json(json!({"status": "accepted"})))),
        AdmissionOutcome::Busy { retry_after_secs } => Err(ApiError::Busy { retry_after_secs }),
        AdmissionOutcome::Conflict => Err(ApiError::Conflict(
            "document is already being processed".to_string(),
        )),
    }
}

/// `POST /process-document`.
pub async fn process_document(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
    Json(body): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.ok_or(ApiError::Unauthorized { reason: "registered" })?;
    admit(&state, &user, &body.user_document_id).await
}

/// `POST /retrain-document`: identical contract to `/process-document`; the
/// pipeline itself decides whether to mint a fresh slug or reuse an existing
/// one based on the row's `document_slug`.
pub async fn retrain_document(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
    Json(body): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.ok_or(ApiError::Unauthorized { reason: "registered" })?;
    admit(&state, &user, &body.user_document_id).await
}

/// `GET /processing-status/{userDocumentId}`.
pub async fn processing_status(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
    Path(user_document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.ok_or(ApiError::Unauthorized { reason: "registered" })?;

    let document: UserDocument = state
        .db
        .get_item(&user_document_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::NotFound(user_document_id.clone()))?;

    if document.user_id != user.id {
        return Err(ApiError::NotFound(user_document_id));
    }

    let log = ProcessingLogEntry::tail_for_user_document(&state.db, &user_document_id, 50).await?;

    Ok((
        StatusCode::OK,
        Json(json!({"document": document, "log": log})),
    ))
}
