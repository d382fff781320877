use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::{
    error::AppError,
    storage::types::{document::DownloadLink, user::User, user_document::UserDocument},
};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    pub title: String,
    #[form_data(limit = "104857600")]
    pub file: FieldData<NamedTempFile>,
}

/// `POST /user-documents`: stores the uploaded blob and queues a `pending`
/// row; ingestion itself only starts once `/process-document` admits it.
pub async fn upload(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.ok_or(ApiError::Unauthorized { reason: "registered" })?;

    let mime_type = input
        .file
        .metadata
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let file_name = input.file.metadata.file_name.unwrap_or_else(|| "upload".to_string());

    let id = Uuid::new_v4().to_string();
    let location = format!("{}/{id}/{file_name}", user.id);
    let bytes = tokio::fs::read(input.file.contents.path()).await.map_err(AppError::from)?;
    state.storage.put(&location, bytes.into()).await.map_err(AppError::from)?;

    let document = UserDocument::new(id, user.id, input.title, location, mime_type);
    state.db.store_item(document.clone()).await.map_err(AppError::from)?;

    Ok((StatusCode::CREATED, Json(document)))
}

/// `GET /user-documents`: the caller's own rows, newest first.
pub async fn list(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.ok_or(ApiError::Unauthorized { reason: "registered" })?;
    let documents = UserDocument::list_for_user(&state.db, &user.id).await?;
    Ok((StatusCode::OK, Json(documents)))
}

/// `GET /user-documents/{id}/download-url`: 410 once the source blob has
/// been purged (ingestion succeeded and the orphan-blob sweeper, or the
/// success path itself, cleared `file_path`); 404 if the row doesn't exist
/// or belongs to someone else.
pub async fn download_url(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.ok_or(ApiError::Unauthorized { reason: "registered" })?;
    let document: UserDocument = state
        .db
        .get_item(&id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;

    if document.user_id != user.id {
        return Err(ApiError::NotFound(id));
    }

    let Some(file_path) = document.file_path else {
        return Err(ApiError::Conflict("source file has already been purged".to_string()));
    };

    let link = DownloadLink {
        url: file_path,
        title: document.title,
    };
    Ok((StatusCode::OK, Json(link)))
}
