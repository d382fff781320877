use std::future::Future;

use common::{
    error::AppError,
    storage::types::{
        document::{AccessLevel, Document},
        processing_log::{Stage as LogStage, StageStatus},
        text_chunk::DocumentChunk,
    },
    utils::embedding::EmbeddingType,
};
use serde_json::json;
use state_machines::core::GuardError;
use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::utils::{chunker, pdf_ingestion};

use super::{
    config::embed_batch_pacing,
    context::PipelineContext,
    state::{
        Chunked, DocumentCreated, Embedded, Extracted, Fetched, Finalized, IngestionMachine, Purged, Summarized,
    },
};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!("invalid ingestion pipeline transition during {event}: {guard:?}"))
}

/// A `reqwest` failure is retriable per §4.4 only for a request timeout or
/// any 5xx status; a 4xx other than 429 rate-limiting is fatal to the attempt.
fn is_retriable_reqwest(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err
            .status()
            .is_some_and(|status| status.as_u16() == 429 || status.is_server_error())
}

/// §4.4: retriable kinds are rate-limit (429), request timeout, and any 5xx.
/// Everything else — malformed input, auth failures, unparseable responses —
/// is fatal to the attempt rather than burning the retry budget.
fn is_retriable_for_ingestion(err: &AppError) -> bool {
    match err {
        AppError::Timeout(_) => true,
        AppError::Reqwest(inner) => is_retriable_reqwest(inner),
        AppError::OpenAI(inner) => match inner {
            async_openai::error::OpenAIError::Reqwest(inner) => is_retriable_reqwest(inner),
            async_openai::error::OpenAIError::ApiError(api_err) => {
                api_err.code.as_deref() == Some("rate_limit_exceeded")
            }
            _ => false,
        },
        _ => false,
    }
}

/// Exponential backoff wrapper for the two LLM-backed stages (embed,
/// summarize). A provider `retry-after` hint would override the computed
/// delay if the provider client surfaced one; `async-openai`'s public error
/// type doesn't expose response headers, so this always uses the computed
/// backoff (documented scoping decision, see `DESIGN.md`).
async fn retry_with_backoff<F, Fut, T>(tuning: &super::config::IngestionTuning, mut attempt_fn: F) -> Result<T, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut last_err: Option<AppError> = None;
    for attempt in 1..=tuning.retry_max_attempts {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_retriable_for_ingestion(&err) && attempt < tuning.retry_max_attempts => {
                let delay = tuning.retry_delay(attempt);
                warn!(attempt, delay_secs = delay.as_secs(), error = %err, "retrying transient ingestion failure");
                sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| AppError::InternalError("retry loop exited without an attempt".into())))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn extract(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    ctx.log_stage(LogStage::Extract, StageStatus::Started, "extracting source text", json!({}))
        .await;

    let bytes = ctx.take_fetched_bytes()?;
    let mime_type = ctx.user_document.mime_type.as_deref().unwrap_or("text/plain");

    let (marked_text, page_count) = if mime_type == "application/pdf" {
        let extracted =
            pdf_ingestion::extract_pdf_text(bytes, ctx.pipeline_config.tuning.pdf_extraction_timeout).await?;
        (extracted.marked_text, extracted.page_count)
    } else {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| AppError::Validation(format!("non-PDF source must be UTF-8 text: {e}")))?;
        (format!("[Page 1]\n{text}"), 1)
    };

    ctx.log_stage(
        LogStage::Extract,
        StageStatus::Completed,
        "source text extracted",
        json!({"page_count": page_count}),
    )
    .await;

    ctx.marked_text = Some(marked_text);
    ctx.page_count = Some(page_count);

    machine.extract().map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn summarize(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Summarized>, AppError> {
    let marked_text = ctx.marked_text()?.to_string();
    let timeout = ctx.pipeline_config.tuning.summarization_timeout;

    let summary = match ctx.services.summarize(&marked_text, timeout).await {
        Ok(summary) => summary,
        Err(err) => {
            warn!(error = %err, "summarization failed; continuing with an empty summary");
            ctx.log_stage(
                LogStage::Extract,
                StageStatus::Failed,
                format!("summarization failed, continuing without one: {err}"),
                json!({}),
            )
            .await;
            super::enrichment_result::DocumentSummary::default()
        }
    };

    ctx.summary = Some(summary);

    machine.summarize().map_err(|(_, guard)| map_guard_error("summarize", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn chunk(
    machine: IngestionMachine<(), Summarized>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    ctx.log_stage(LogStage::Chunk, StageStatus::Started, "chunking source text", json!({}))
        .await;

    let marked_text = ctx.marked_text()?.to_string();
    let page_count = ctx.page_count.unwrap_or(1);
    let spans = chunker::chunk_marked_text(&marked_text, page_count)?;

    ctx.log_stage(
        LogStage::Chunk,
        StageStatus::Completed,
        "chunking complete",
        json!({"chunk_count": spans.len()}),
    )
    .await;

    ctx.chunk_spans = Some(spans);

    machine.chunk().map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    ctx.log_stage(LogStage::Embed, StageStatus::Started, "embedding chunks", json!({}))
        .await;

    let spans = ctx.chunk_spans()?.to_vec();
    let batch_size = ctx.pipeline_config.tuning.embed_batch_size;
    let sdk_timeout = ctx.pipeline_config.tuning.embed_sdk_timeout;
    let hard_timeout = ctx.pipeline_config.tuning.embed_hard_timeout;
    let tuning = ctx.pipeline_config.tuning.clone();
    let services = ctx.services;

    let mut embeddings = Vec::with_capacity(spans.len());
    let batch_count = spans.chunks(batch_size.max(1)).count();
    for (batch_idx, batch) in spans.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|span| span.content.clone()).collect();
        let batch_embeddings = retry_with_backoff(&tuning, |_attempt| {
            let texts = texts.clone();
            async move { services.embed_batch(&texts, sdk_timeout, hard_timeout).await }
        })
        .await?;
        embeddings.extend(batch_embeddings);

        if batch_idx + 1 < batch_count {
            let active_jobs = ctx.concurrency.load().active;
            sleep(embed_batch_pacing(active_jobs)).await;
        }
    }

    ctx.log_stage(
        LogStage::Embed,
        StageStatus::Completed,
        "embedding complete",
        json!({"embedded_count": embeddings.len()}),
    )
    .await;

    ctx.embeddings = Some(embeddings);

    machine.embed().map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn create_document(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
    slug: String,
    owner_id: Option<String>,
    access_level: AccessLevel,
    embedding_type: EmbeddingType,
) -> Result<IngestionMachine<(), DocumentCreated>, AppError> {
    let summary = ctx.summary.clone().unwrap_or_default();
    let title = summary.title.unwrap_or_else(|| ctx.user_document.title.clone());

    let mut document = Document::new(slug.clone(), title, owner_id, access_level, embedding_type)?;
    document.subtitle = summary.subtitle;
    document.metadata = json!({"abstract": summary.abstract_text, "keywords": summary.keywords});

    ctx.services.create_document(document).await?;
    ctx.document_slug = Some(slug);

    machine
        .create_document()
        .map_err(|(_, guard)| map_guard_error("create_document", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn store_chunks(
    machine: IngestionMachine<(), DocumentCreated>,
    ctx: &mut PipelineContext<'_>,
    embedding_type: EmbeddingType,
) -> Result<IngestionMachine<(), super::state::ChunksStored>, AppError> {
    ctx.log_stage(LogStage::Store, StageStatus::Started, "storing chunks", json!({}))
        .await;

    let spans = ctx.take_chunk_spans()?;
    let embeddings = ctx.take_embeddings()?;
    let slug = ctx
        .document_slug
        .clone()
        .ok_or_else(|| AppError::InternalError("document slug expected to be available".into()))?;

    if spans.len() != embeddings.len() {
        return Err(AppError::InternalError(
            "chunk span count does not match embedding count".into(),
        ));
    }

    let chunks: Vec<DocumentChunk> = spans
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(ordinal, (span, embedding))| {
            DocumentChunk::new(
                slug.clone(),
                i64::try_from(ordinal).unwrap_or(i64::MAX),
                span.content,
                embedding,
                span.page_number,
                span.char_start,
                span.char_end,
            )
        })
        .collect();

    let store_batch_size = ctx.pipeline_config.tuning.chunk_store_batch_size.max(1);
    for batch in chunks.chunks(store_batch_size) {
        ctx.services.store_chunks(batch, embedding_type).await?;
    }

    ctx.log_stage(
        LogStage::Store,
        StageStatus::Completed,
        "chunks stored",
        json!({"chunk_count": chunks.len()}),
    )
    .await;

    machine
        .store_chunks()
        .map_err(|(_, guard)| map_guard_error("store_chunks", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn purge(
    machine: IngestionMachine<(), super::state::ChunksStored>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Purged>, AppError> {
    if let Some(file_path) = &ctx.user_document.file_path {
        if let Err(err) = ctx.services.purge_blob(file_path).await {
            warn!(error = %err, file_path = %file_path, "failed to purge source blob after ingestion");
        }
    }

    machine.purge().map_err(|(_, guard)| map_guard_error("purge", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_document_id = %ctx.user_document_id, attempt = ctx.attempt))]
pub async fn finalize(
    machine: IngestionMachine<(), Purged>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Finalized>, AppError> {
    ctx.log_stage(LogStage::Complete, StageStatus::Completed, "ingestion finalized", json!({}))
        .await;

    machine.finalize().map_err(|(_, guard)| map_guard_error("finalize", &guard))
}
