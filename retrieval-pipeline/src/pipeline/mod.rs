mod config;

pub use config::{RetrievalConfig, RetrievalTuning};

use std::time::{Duration, Instant};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
    utils::embedding::{EmbeddingProvider, EmbeddingType},
};
use tracing::instrument;

use crate::retrieval::{self, RetrievedChunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Embed,
    Search,
}

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }

    pub fn embed_ms(&self) -> u128 {
        self.stage_ms(StageKind::Embed)
    }

    pub fn search_ms(&self) -> u128 {
        self.stage_ms(StageKind::Search)
    }

    fn stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
            .unwrap_or(0)
    }
}

pub struct PipelineRunOutput {
    pub chunks: Vec<RetrievedChunk>,
    pub stage_timings: PipelineStageTimings,
}

/// Runs retrieval end to end against a query already reduced to a document
/// set (C7 has already resolved slugs and access). Embeds the query text,
/// then partition-searches each document (C6).
#[instrument(skip_all, fields(document_count = documents.len()))]
pub async fn run_pipeline(
    db: &SurrealDbClient,
    embedding_provider: &EmbeddingProvider,
    documents: &[Document],
    query_text: &str,
    resolved_chunk_limit: usize,
    config: &RetrievalConfig,
) -> Result<PipelineRunOutput, AppError> {
    let embed_start = Instant::now();
    let query_embedding = embedding_provider.embed(query_text).await?;
    let embed_elapsed = embed_start.elapsed();

    let mut output = run_pipeline_with_embedding(
        db,
        documents,
        &query_embedding,
        embedding_provider.embedding_type(),
        resolved_chunk_limit,
        config,
    )
    .await?;
    output.stage_timings.record(StageKind::Embed, embed_elapsed);
    Ok(output)
}

/// Same as [`run_pipeline`] but for callers that already hold the query
/// embedding (the orchestrator embeds once and reuses it for logging).
pub async fn run_pipeline_with_embedding(
    db: &SurrealDbClient,
    documents: &[Document],
    query_embedding: &[f32],
    embedding_type: EmbeddingType,
    resolved_chunk_limit: usize,
    config: &RetrievalConfig,
) -> Result<PipelineRunOutput, AppError> {
    let mut timings = PipelineStageTimings::default();

    let search_start = Instant::now();
    let chunks = retrieval::retrieve(
        db,
        documents,
        query_embedding,
        embedding_type,
        resolved_chunk_limit,
        &config.tuning,
    )
    .await?;
    timings.record(StageKind::Search, search_start.elapsed());

    Ok(PipelineRunOutput {
        chunks,
        stage_timings: timings,
    })
}
