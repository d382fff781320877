use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// `pending -> processing -> {ready, error}`; `error -> pending` on retry;
/// `processing -> pending` on force-restart (stuck-job recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserDocumentStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

/// A user-uploaded source file. Doubles as the ingestion job queue row — the
/// lease fields (`worker_id`, `lease_expires_at`) let a worker claim it and
/// let the stuck-job sweeper (C10) detect an orphaned claim.
stored_object!(UserDocument, "user_documents", {
    user_id: String,
    title: String,
    status: UserDocumentStatus,
    error_message: Option<String>,
    file_path: Option<String>,
    mime_type: Option<String>,
    document_slug: Option<String>,
    attempts: u32,
    worker_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>
});

impl UserDocument {
    pub fn new(id: String, user_id: String, title: String, file_path: String, mime_type: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            user_id,
            title,
            status: UserDocumentStatus::Pending,
            error_message: None,
            file_path: Some(file_path),
            mime_type: Some(mime_type),
            document_slug: None,
            attempts: 0,
            worker_id: None,
            lease_expires_at: None,
        }
    }

    /// A document `error`'d can always be manually retried.
    pub fn can_retry(&self) -> bool {
        matches!(self.status, UserDocumentStatus::Error)
    }

    /// Force-restart only succeeds while genuinely stuck: `processing` and
    /// `updated_at` older than `stuck_threshold`.
    pub fn is_stuck(&self, stuck_threshold: Duration, now: DateTime<Utc>) -> bool {
        matches!(self.status, UserDocumentStatus::Processing)
            && now - self.updated_at
                >= ChronoDuration::from_std(stuck_threshold).unwrap_or(ChronoDuration::MAX)
    }

    /// Atomically claims this row for `worker_id`, marking it `processing`
    /// with a lease, but only if it is currently `pending`. Returns `None`
    /// if the row doesn't exist or isn't pending (racing claim, already
    /// processing, already ready).
    pub async fn claim(
        db: &SurrealDbClient,
        id: &str,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Self>, AppError> {
        let lease_expires_at = Utc::now()
            + ChronoDuration::from_std(lease).map_err(|e| AppError::InternalError(e.to_string()))?;

        let sql = "
            UPDATE type::thing('user_documents', $id)
            SET status = 'processing', worker_id = $worker_id, lease_expires_at = $lease_expires_at,
                updated_at = time::now()
            WHERE status = 'pending'
            RETURN AFTER;
        ";

        let mut response = db
            .client
            .query(sql)
            .bind(("id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", lease_expires_at))
            .await?;
        let claimed: Vec<Self> = response.take(0)?;
        Ok(claimed.into_iter().next())
    }

    /// Reclaims a single row stuck `processing` past `stuck_threshold`,
    /// re-claiming it for `worker_id` in the same query so a racing caller
    /// can't also observe it as stuck. Returns `None` if the row isn't
    /// `processing`, or is but hasn't aged past the threshold yet.
    pub async fn claim_stuck(
        db: &SurrealDbClient,
        id: &str,
        worker_id: &str,
        lease: Duration,
        stuck_threshold: Duration,
    ) -> Result<Option<Self>, AppError> {
        let lease_expires_at = Utc::now()
            + ChronoDuration::from_std(lease).map_err(|e| AppError::InternalError(e.to_string()))?;
        let threshold_secs = i64::try_from(stuck_threshold.as_secs())
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        let sql = format!(
            "UPDATE type::thing('user_documents', $id)
                SET status = 'processing', worker_id = $worker_id, lease_expires_at = $lease_expires_at,
                    updated_at = time::now()
                WHERE status = 'processing' AND updated_at <= time::now() - {threshold_secs}s
                RETURN AFTER;"
        );

        let mut response = db
            .client
            .query(sql)
            .bind(("id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", lease_expires_at))
            .await?;
        let claimed: Vec<Self> = response.take(0)?;
        Ok(claimed.into_iter().next())
    }

    pub async fn mark_succeeded(
        db: &SurrealDbClient,
        id: &str,
        document_slug: &str,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('user_documents', $id) SET status = 'ready', \
                 document_slug = $slug, file_path = NONE, worker_id = NONE, \
                 lease_expires_at = NONE, updated_at = time::now();",
            )
            .bind(("id", id.to_string()))
            .bind(("slug", document_slug.to_string()))
            .await?;
        Ok(())
    }

    pub async fn mark_failed(db: &SurrealDbClient, id: &str, message: &str) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('user_documents', $id) SET status = 'error', \
                 error_message = $message, attempts += 1, worker_id = NONE, \
                 lease_expires_at = NONE, updated_at = time::now();",
            )
            .bind(("id", id.to_string()))
            .bind(("message", message.to_string()))
            .await?;
        Ok(())
    }

    /// `error -> pending`; used by the manual retry endpoint.
    pub async fn reset_to_pending(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing('user_documents', $id) SET status = 'pending', \
                 error_message = NONE, worker_id = NONE, lease_expires_at = NONE, \
                 updated_at = time::now();",
            )
            .bind(("id", id.to_string()))
            .await?;
        Ok(())
    }

    /// Rows in `error` whose blob hasn't been purged yet and that have sat
    /// past `grace` since their last update. Candidates for the orphaned-blob
    /// sweeper, which deletes the blob and clears `file_path`.
    pub async fn orphaned_error_blobs(db: &SurrealDbClient, grace: Duration) -> Result<Vec<Self>, AppError> {
        let grace_secs =
            i64::try_from(grace.as_secs()).map_err(|e| AppError::InternalError(e.to_string()))?;

        let sql = format!(
            "SELECT * FROM user_documents
             WHERE status = 'error' AND file_path != NONE
               AND updated_at <= time::now() - {grace_secs}s;"
        );

        let mut response = db.client.query(sql).await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    /// All rows owned by `user_id`, newest first. Backs `GET /user-documents`.
    pub async fn list_for_user(db: &SurrealDbClient, user_id: &str) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM user_documents WHERE user_id = $user_id ORDER BY updated_at DESC;")
            .bind(("user_id", user_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn clear_file_path(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing('user_documents', $id) SET file_path = NONE, updated_at = time::now();")
            .bind(("id", id.to_string()))
            .await?;
        Ok(())
    }

    /// Scans for `processing` rows past `stuck_threshold` and resets them to
    /// `pending`, returning the ids that were reclaimed (C10 sweeper).
    pub async fn reclaim_stuck(
        db: &SurrealDbClient,
        stuck_threshold: Duration,
    ) -> Result<Vec<String>, AppError> {
        let threshold_secs = i64::try_from(stuck_threshold.as_secs())
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        let sql = format!(
            "UPDATE (
                SELECT VALUE id FROM user_documents
                WHERE status = 'processing' AND updated_at <= time::now() - {threshold_secs}s
            ) SET status = 'pending', worker_id = NONE, lease_expires_at = NONE, updated_at = time::now()
            RETURN AFTER;"
        );

        let mut response = db.client.query(sql).await?;
        let reclaimed: Vec<Self> = response.take(0)?;
        Ok(reclaimed.into_iter().map(|doc| doc.id).collect())
    }
}
