use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Extract,
    Chunk,
    Embed,
    Store,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Started,
    Progress,
    Completed,
    Failed,
}

stored_object!(ProcessingLogEntry, "document_processing_logs", {
    user_document_id: Option<String>,
    document_slug: Option<String>,
    stage: Stage,
    status: StageStatus,
    message: String,
    metadata: Value
});

impl ProcessingLogEntry {
    pub fn new(
        user_document_id: Option<String>,
        document_slug: Option<String>,
        stage: Stage,
        status: StageStatus,
        message: impl Into<String>,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_document_id,
            document_slug,
            stage,
            status,
            message: message.into(),
            metadata,
        }
    }

    /// Dual-sink append: durable file line plus a DB row. Failures in either
    /// sink must never abort ingestion — they are swallowed and surfaced to
    /// stderr via `tracing::error!`.
    pub async fn record(&self, db: &SurrealDbClient, log_path: &str) {
        if let Err(err) = self.append_to_file(log_path).await {
            error!(error = %err, path = log_path, "processing log file append failed");
        }
        if let Err(err) = db.store_item(self.clone()).await {
            error!(error = %err, "processing log db insert failed");
        }
    }

    /// Most recent entries for a `UserDocument`, newest first — backs
    /// `GET /processing-status/{userDocumentId}`.
    pub async fn tail_for_user_document(
        db: &SurrealDbClient,
        user_document_id: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM document_processing_logs \
                 WHERE user_document_id = $id \
                 ORDER BY created_at DESC LIMIT $limit;",
            )
            .bind(("id", user_document_id.to_string()))
            .bind(("limit", limit))
            .await?;
        Ok(response.take(0)?)
    }

    async fn append_to_file(&self, log_path: &str) -> Result<(), AppError> {
        if let Some(parent) = std::path::Path::new(log_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let line = serde_json::to_string(self)
            .map_err(|e| AppError::InternalError(format!("serializing log entry: {e}")))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    #[tokio::test]
    async fn record_writes_both_file_and_db_row() {
        let db = SurrealDbClient::memory("log_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.apply_migrations().await.expect("migrations");

        let tmp = NamedTempFile::new().expect("tmp file");
        let path = tmp.path().to_str().expect("utf8 path").to_string();

        let entry = ProcessingLogEntry::new(
            Some("ud1".into()),
            None,
            Stage::Extract,
            StageStatus::Started,
            "beginning extraction",
            json!({"pages": 3}),
        );
        entry.record(&db, &path).await;

        let contents = tokio::fs::read_to_string(&path).await.expect("read log file");
        assert!(contents.contains("beginning extraction"));

        let rows: Vec<ProcessingLogEntry> = db.get_all_stored_items().await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stage, Stage::Extract);
    }

    #[tokio::test]
    async fn record_swallows_db_failure_and_still_appends_file() {
        // A client pointed at a namespace/db never initialized still accepts
        // the insert because tables are schemaless by default; this test
        // focuses on the file sink being independent of DB outcome.
        let db = SurrealDbClient::memory("log_ns2", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");

        let tmp = NamedTempFile::new().expect("tmp file");
        let path = tmp.path().to_str().expect("utf8 path").to_string();

        let entry = ProcessingLogEntry::new(
            None,
            Some("doc-slug".into()),
            Stage::Complete,
            StageStatus::Completed,
            "done",
            Value::Null,
        );
        entry.record(&db, &path).await;

        let contents = tokio::fs::read_to_string(&path).await.expect("read log file");
        assert!(contents.contains("doc-slug"));
    }
}
