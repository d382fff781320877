use std::sync::Arc;
use std::time::Duration;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{document::Document, text_chunk::DocumentChunk},
    },
    utils::embedding::{EmbeddingProvider, EmbeddingType},
};

use super::enrichment_result::DocumentSummary;

const SUMMARIZATION_CHAR_LIMIT: usize = 12_000;
const SUMMARIZATION_MODEL: &str = "gpt-4o-mini";

const SUMMARIZATION_SYSTEM_MESSAGE: &str = "You summarize an ingested document's marked-up text. \
Produce a short title, an optional subtitle, a one-paragraph abstract, and up to 8 keywords.";

/// Abstracts every piece of I/O an ingestion job performs, so the stage
/// functions in `stages.rs` stay pure orchestration and the whole pipeline
/// is testable against an injected fake.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_blob(&self, file_path: &str) -> Result<Bytes, AppError>;

    /// Best-effort; callers decide what to do with a failure (§4.4 step 4
    /// says it must downgrade, not abort).
    async fn summarize(&self, marked_text: &str, timeout: Duration) -> Result<DocumentSummary, AppError>;

    /// Races the provider SDK's own timeout against a hard outer timeout;
    /// whichever fires first is reported (§4.4 step 6).
    async fn embed_batch(
        &self,
        texts: &[String],
        sdk_timeout: Duration,
        hard_timeout: Duration,
    ) -> Result<Vec<Vec<f32>>, AppError>;

    async fn create_document(&self, document: Document) -> Result<(), AppError>;

    async fn store_chunks(&self, chunks: &[DocumentChunk], embedding_type: EmbeddingType) -> Result<(), AppError>;

    async fn purge_blob(&self, file_path: &str) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    db: Arc<SurrealDbClient>,
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    storage: StorageManager,
    embedding_provider: Arc<EmbeddingProvider>,
}

impl DefaultPipelineServices {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            db,
            openai_client,
            storage,
            embedding_provider,
        }
    }

    fn summary_response_format() -> ResponseFormat {
        ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Structured summary of an ingested document".into()),
                name: "document_summary".into(),
                schema: Some(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": ["string", "null"]},
                        "subtitle": {"type": ["string", "null"]},
                        "abstract": {"type": ["string", "null"]},
                        "keywords": {"type": "array", "items": {"type": "string"}},
                    },
                    "required": ["title", "subtitle", "abstract", "keywords"],
                    "additionalProperties": false,
                })),
                strict: Some(true),
            },
        }
    }
}

fn truncate_for_prompt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_blob(&self, file_path: &str) -> Result<Bytes, AppError> {
        self.storage.get(file_path).await.map_err(AppError::from)
    }

    async fn summarize(&self, marked_text: &str, timeout: Duration) -> Result<DocumentSummary, AppError> {
        let truncated = truncate_for_prompt(marked_text, SUMMARIZATION_CHAR_LIMIT);
        let request = CreateChatCompletionRequestArgs::default()
            .model(SUMMARIZATION_MODEL)
            .messages([
                ChatCompletionRequestSystemMessage::from(SUMMARIZATION_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(truncated).into(),
            ])
            .response_format(Self::summary_response_format())
            .build()?;

        let response = tokio::time::timeout(timeout, self.openai_client.chat().create(request))
            .await
            .map_err(|_| AppError::Timeout("summarization exceeded its time budget".into()))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| AppError::LLMParsing("no content in summarization response".into()))?;

        serde_json::from_str(content)
            .map_err(|e| AppError::LLMParsing(format!("failed to parse document summary: {e}")))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        sdk_timeout: Duration,
        hard_timeout: Duration,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let provider = &self.embedding_provider;
        match tokio::time::timeout(hard_timeout, tokio::time::timeout(sdk_timeout, provider.embed_batch(texts))).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::Timeout("embedding batch exceeded the provider SDK timeout".into())),
            Err(_) => Err(AppError::Timeout("embedding batch exceeded the hard timeout".into())),
        }
    }

    async fn create_document(&self, document: Document) -> Result<(), AppError> {
        // `upsert`, not `create`: a retrain targets the same slug as the
        // document it replaces.
        self.db.upsert_item(document).await?;
        Ok(())
    }

    async fn store_chunks(&self, chunks: &[DocumentChunk], embedding_type: EmbeddingType) -> Result<(), AppError> {
        DocumentChunk::store_batch(chunks, embedding_type, &self.db).await
    }

    async fn purge_blob(&self, file_path: &str) -> Result<(), AppError> {
        self.storage.delete_prefix(file_path).await.map_err(AppError::from)
    }
}
