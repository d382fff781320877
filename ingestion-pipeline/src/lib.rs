#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod pipeline;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    concurrency::ConcurrencyManager,
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            processing_log::{ProcessingLogEntry, Stage, StageStatus},
            user_document::UserDocument,
        },
    },
};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
use serde_json::json;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

const BUSY_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// A background task was spawned for this row.
    Accepted,
    /// No concurrency slot was free; caller should retry after this many seconds.
    Busy { retry_after_secs: u64 },
    /// The row wasn't in `pending` (already processing, or raced by another caller).
    Conflict,
}

/// Entry point for `/process-document`: acquire a concurrency slot (C9),
/// atomically claim the specific row, and spawn the pipeline in the
/// background. Existence and ownership checks are the caller's
/// responsibility (they produce 404/403, not handled here).
///
/// A row already `processing` is only admitted if it's stuck: `document.
/// is_stuck` against `stuck_threshold` decides, and `claim_stuck` does the
/// actual reclaim so a racing caller can't also see it as stuck. Everything
/// else (not found, genuinely still running) is a `Conflict`.
pub async fn try_admit_and_process(
    concurrency: Arc<ConcurrencyManager>,
    pipeline: Arc<IngestionPipeline>,
    db: Arc<SurrealDbClient>,
    user_document_id: String,
    lease: Duration,
    stuck_threshold: Duration,
) -> Result<AdmissionOutcome, AppError> {
    let Some(token) = concurrency.try_acquire() else {
        return Ok(AdmissionOutcome::Busy {
            retry_after_secs: BUSY_RETRY_AFTER_SECS,
        });
    };

    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let claimed = match UserDocument::claim(&db, &user_document_id, &worker_id, lease).await? {
        Some(doc) => doc,
        None => match reclaim_if_stuck(&db, &user_document_id, &worker_id, lease, stuck_threshold).await? {
            Some(doc) => doc,
            None => return Ok(AdmissionOutcome::Conflict),
        },
    };

    info!(user_document_id = %user_document_id, %worker_id, "admitted ingestion job");

    tokio::spawn(async move {
        let _token = token;
        if let Err(err) = pipeline.process_user_document(claimed).await {
            error!(user_document_id = %user_document_id, error = %err, "ingestion pipeline task failed");
        }
    });

    Ok(AdmissionOutcome::Accepted)
}

/// Checks whether `user_document_id` is the specific stuck-`processing`
/// case (spec boundary: exactly `stuck_threshold` seconds old succeeds,
/// younger does not) and, if so, reclaims it for `worker_id` directly from
/// the request path rather than waiting on the background sweeper's tick.
async fn reclaim_if_stuck(
    db: &SurrealDbClient,
    user_document_id: &str,
    worker_id: &str,
    lease: Duration,
    stuck_threshold: Duration,
) -> Result<Option<UserDocument>, AppError> {
    let Some(document) = db.get_item::<UserDocument>(user_document_id).await.map_err(AppError::from)? else {
        return Ok(None);
    };
    if !document.is_stuck(stuck_threshold, Utc::now()) {
        return Ok(None);
    }
    UserDocument::claim_stuck(db, user_document_id, worker_id, lease, stuck_threshold).await
}

/// C10: reclaims `UserDocument` rows stuck in `processing` past the stuck
/// threshold, on a fixed tick. Runs for the lifetime of the process.
pub async fn run_stuck_job_sweeper(db: Arc<SurrealDbClient>, stuck_threshold: Duration, log_path: String, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        match UserDocument::reclaim_stuck(&db, stuck_threshold).await {
            Ok(ids) => {
                for id in &ids {
                    let entry = ProcessingLogEntry::new(
                        Some(id.clone()),
                        None,
                        Stage::Error,
                        StageStatus::Failed,
                        "stalled",
                        json!({}),
                    );
                    entry.record(&db, &log_path).await;
                }
                if !ids.is_empty() {
                    info!(count = ids.len(), "reclaimed stuck ingestion jobs");
                }
            }
            Err(err) => error!(error = %err, "stuck-job sweep failed"),
        }
    }
}

/// Periodic sweep for `error` rows whose source blob was never purged
/// (purge only runs on the success path). Deletes the blob past a grace
/// period and clears `file_path` so repeated sweeps don't re-touch it.
pub async fn run_orphaned_blob_sweeper(
    db: Arc<SurrealDbClient>,
    storage: common::storage::store::StorageManager,
    grace: Duration,
    period: Duration,
) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        match UserDocument::orphaned_error_blobs(&db, grace).await {
            Ok(rows) => {
                for row in rows {
                    let Some(file_path) = row.file_path.clone() else { continue };
                    match storage.delete_prefix(&file_path).await {
                        Ok(()) => {
                            if let Err(err) = UserDocument::clear_file_path(&db, &row.id).await {
                                warn!(user_document_id = %row.id, error = %err, "failed to clear file_path after orphan sweep");
                            }
                        }
                        Err(err) => {
                            warn!(user_document_id = %row.id, file_path = %file_path, error = %err, "failed to purge orphaned blob");
                        }
                    }
                }
            }
            Err(err) => error!(error = %err, "orphaned blob sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::storage::types::user_document::UserDocumentStatus;

    async fn make_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("ingestion_lib_ns", &database).await.expect("in-memory db");
        db.apply_migrations().await.expect("migrations");
        db
    }

    fn new_row(id: &str) -> UserDocument {
        UserDocument::new(id.into(), "user1".into(), "Title".into(), "blob/path".into(), "application/pdf".into())
    }

    #[tokio::test]
    async fn reclaim_if_stuck_returns_none_for_a_row_still_pending() {
        let db = make_db().await;
        db.store_item(new_row("p1")).await.expect("store");

        let reclaimed = reclaim_if_stuck(&db, "p1", "worker-x", Duration::from_secs(60), Duration::from_secs(300))
            .await
            .expect("reclaim_if_stuck");
        assert!(reclaimed.is_none());
    }

    #[tokio::test]
    async fn reclaim_if_stuck_returns_none_for_a_recently_claimed_row() {
        let db = make_db().await;
        let mut row = new_row("p2");
        row.status = UserDocumentStatus::Processing;
        db.store_item(row).await.expect("store");

        let reclaimed = reclaim_if_stuck(&db, "p2", "worker-x", Duration::from_secs(60), Duration::from_secs(300))
            .await
            .expect("reclaim_if_stuck");
        assert!(reclaimed.is_none(), "a freshly claimed row is not stuck yet");
    }

    #[tokio::test]
    async fn reclaim_if_stuck_reclaims_a_row_past_the_threshold() {
        let db = make_db().await;
        let mut row = new_row("p3");
        row.status = UserDocumentStatus::Processing;
        row.updated_at = Utc::now() - ChronoDuration::minutes(10);
        db.store_item(row).await.expect("store");

        let reclaimed = reclaim_if_stuck(&db, "p3", "worker-x", Duration::from_secs(60), Duration::from_secs(300))
            .await
            .expect("reclaim_if_stuck")
            .expect("row past the threshold should be reclaimed");
        assert_eq!(reclaimed.worker_id.as_deref(), Some("worker-x"));
    }
}
