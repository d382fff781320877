use bytes::Bytes;
use common::{
    concurrency::ConcurrencyManager,
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::{
        processing_log::{ProcessingLogEntry, Stage, StageStatus},
        user_document::UserDocument,
    },
};
use serde_json::Value;
use tracing::error;

use crate::utils::chunker::ChunkSpan;

use super::{config::IngestionConfig, enrichment_result::DocumentSummary, services::PipelineServices};

/// Per-job mutable state threaded through the pipeline's stage functions.
/// Each stage consumes the previous stage's artifact and deposits its own;
/// accessors error out (rather than panic) if asked for an artifact no
/// stage has produced yet.
pub struct PipelineContext<'a> {
    pub user_document: &'a UserDocument,
    pub user_document_id: String,
    pub attempt: u32,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub log_path: &'a str,
    pub concurrency: &'a ConcurrencyManager,

    pub fetched_bytes: Option<Bytes>,
    pub marked_text: Option<String>,
    pub page_count: Option<u32>,
    pub summary: Option<DocumentSummary>,
    pub chunk_spans: Option<Vec<ChunkSpan>>,
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub document_slug: Option<String>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        user_document: &'a UserDocument,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
        log_path: &'a str,
        concurrency: &'a ConcurrencyManager,
    ) -> Self {
        Self {
            user_document,
            user_document_id: user_document.id.clone(),
            attempt: user_document.attempts,
            db,
            pipeline_config,
            services,
            log_path,
            concurrency,
            fetched_bytes: None,
            marked_text: None,
            page_count: None,
            summary: None,
            chunk_spans: None,
            embeddings: None,
            document_slug: None,
        }
    }

    pub fn take_fetched_bytes(&mut self) -> Result<Bytes, AppError> {
        self.fetched_bytes
            .take()
            .ok_or_else(|| AppError::InternalError("fetched bytes expected to be available".into()))
    }

    pub fn marked_text(&self) -> Result<&str, AppError> {
        self.marked_text
            .as_deref()
            .ok_or_else(|| AppError::InternalError("marked text expected to be available".into()))
    }

    pub fn take_chunk_spans(&mut self) -> Result<Vec<ChunkSpan>, AppError> {
        self.chunk_spans
            .take()
            .ok_or_else(|| AppError::InternalError("chunk spans expected to be available".into()))
    }

    pub fn chunk_spans(&self) -> Result<&[ChunkSpan], AppError> {
        self.chunk_spans
            .as_deref()
            .ok_or_else(|| AppError::InternalError("chunk spans expected to be available".into()))
    }

    pub fn take_embeddings(&mut self) -> Result<Vec<Vec<f32>>, AppError> {
        self.embeddings
            .take()
            .ok_or_else(|| AppError::InternalError("embeddings expected to be available".into()))
    }

    pub fn take_document_slug(&mut self) -> Result<String, AppError> {
        self.document_slug
            .take()
            .ok_or_else(|| AppError::InternalError("document slug expected to be available".into()))
    }

    /// Dual-sink append for a stage boundary (C8). Never fails ingestion —
    /// `ProcessingLogEntry::record` swallows its own errors.
    pub async fn log_stage(&self, stage: Stage, status: StageStatus, message: impl Into<String>, metadata: Value) {
        let entry = ProcessingLogEntry::new(
            Some(self.user_document_id.clone()),
            self.document_slug.clone(),
            stage,
            status,
            message,
            metadata,
        );
        entry.record(self.db, self.log_path).await;
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            user_document_id = %self.user_document_id,
            attempt = self.attempt,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
