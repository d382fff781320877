use std::sync::Arc;
use std::time::Duration;

use common::{
    concurrency::ConcurrencyManager,
    registry::DocumentRegistry,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::RagOrchestrator;

/// Everything a handler needs: storage/db handles, the cached document
/// registry, the admission gate, and the two pipelines. Built once in `main`
/// and cheaply cloned per request (every field is an `Arc` or already `Clone`).
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub registry: Arc<DocumentRegistry>,
    pub concurrency: Arc<ConcurrencyManager>,
    pub ingestion_pipeline: Arc<IngestionPipeline>,
    pub orchestrator: Arc<RagOrchestrator>,
    /// How long a claimed `UserDocument` may stay leased before the stuck-job
    /// sweeper (C10) reclaims it.
    pub ingestion_lease: Duration,
}
