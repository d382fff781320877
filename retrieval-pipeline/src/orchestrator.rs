use std::{pin::Pin, sync::Arc, time::Instant};

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs},
    Client,
};
use async_stream::stream;
use common::{
    access::{check_access, AccessDecision, DenyReason},
    error::AppError,
    registry::DocumentRegistry,
    storage::{
        db::SurrealDbClient,
        types::{
            conversation::{ChunkSource, Conversation, RetrievalMetadata, TimingBreakdownMs},
            document::Document,
            user::User,
        },
    },
    utils::embedding::{EmbeddingProvider, EmbeddingType},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{pipeline, pipeline::RetrievalConfig, retrieval::RetrievedChunk};

/// The only model identifiers a forced override ever applies to. A caller
/// requesting anything else (e.g. a Gemini model id) bypasses forced models
/// entirely — see `resolve_effective_model`.
const GROK_FAMILY_MODELS: [&str; 2] = ["standard", "reasoning"];

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    #[error("no documents were requested")]
    NoDocumentsRequested,
    #[error("at most {max} documents may be queried together")]
    TooManyDocuments { max: usize },
    #[error("access denied: {0:?}")]
    AccessDenied(DenyReason),
    #[error(transparent)]
    App(#[from] AppError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub user: Option<User>,
    pub question: String,
    pub history: Vec<HistoryTurn>,
    /// Raw `doc` query parameter: one slug, or several joined with `+`.
    pub doc_param: String,
    pub passcode: Option<String>,
    pub requested_model: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMetadata {
    pub conversation_id: String,
    pub session_id: String,
    pub model_requested: String,
    pub model_actual: String,
    pub chunks_used: usize,
    pub chunk_sources: Vec<ChunkSource>,
    pub timing_ms: TimingBreakdownMs,
    pub excluded_embedding_mismatch: Vec<String>,
}

/// Transport-agnostic answer stream. The HTTP layer adapts this into SSE
/// (`/chat/stream`) or collects it into one JSON body (`/chat`).
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    Content(String),
    Done(AnswerMetadata),
    Error(String),
}

type BoxedAnswerStream = Pin<Box<dyn Stream<Item = AnswerEvent> + Send>>;

/// `doc=slug` or `doc=slug1+slug2+...+slugN`.
fn parse_doc_param(doc_param: &str, max_documents: usize) -> Result<Vec<String>, OrchestratorError> {
    let slugs: Vec<String> = doc_param
        .split('+')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if slugs.is_empty() {
        return Err(OrchestratorError::NoDocumentsRequested);
    }
    if slugs.len() > max_documents {
        return Err(OrchestratorError::TooManyDocuments { max: max_documents });
    }
    Ok(slugs)
}

fn resolve_documents(registry: &DocumentRegistry, slugs: &[String]) -> Result<Vec<Document>, OrchestratorError> {
    slugs
        .iter()
        .map(|slug| registry.get_by_slug(slug).ok_or_else(|| OrchestratorError::UnknownDocument(slug.clone())))
        .collect()
}

fn check_all_access(user: Option<&User>, documents: &[Document], passcode: Option<&str>) -> Result<(), OrchestratorError> {
    for document in documents {
        if let AccessDecision::Deny(reason) = check_access(user, document, passcode) {
            return Err(OrchestratorError::AccessDenied(reason));
        }
    }
    Ok(())
}

fn is_grok_family(model: &str) -> bool {
    GROK_FAMILY_MODELS.contains(&model)
}

/// A single owner id shared by every document, or `None` if the set is empty,
/// spans multiple owners, or any document has no owner.
fn shared_owner_id(documents: &[Document]) -> Option<&str> {
    let first = documents.first()?.owner_id.as_deref()?;
    documents
        .iter()
        .all(|d| d.owner_id.as_deref() == Some(first))
        .then_some(first)
}

/// Forced-model conflicts across documents resolve to `reasoning`, the safest
/// variant. A forced override never applies when the caller asked for a
/// model outside the Grok family — that request passes straight through.
fn resolve_effective_model(requested_model: &str, documents: &[Document], owner_forced_model: Option<&str>) -> (String, bool) {
    if !is_grok_family(requested_model) {
        return (requested_model.to_string(), false);
    }

    let forced: Vec<&str> = documents.iter().filter_map(|d| d.forced_model.as_deref()).collect();

    let effective = if forced.is_empty() {
        owner_forced_model.unwrap_or(requested_model)
    } else if forced.iter().all(|m| *m == forced[0]) {
        forced[0]
    } else {
        "reasoning"
    };

    (effective.to_string(), effective != requested_model)
}

/// The process only ever holds one live embedding provider, so a query can
/// only be embedded in `available_type`'s space (§4.5: "embeddings MUST use
/// the type matching the document"). Any targeted document — whether it's
/// the only one requested or one of several — whose own `embedding_type`
/// doesn't match is dropped from the query rather than rejecting it
/// outright, and its slug is reported back. This is reachable any time an
/// operator switches `EmbeddingBackend` and redeploys: documents ingested
/// under the old default keep their original tag forever.
fn resolve_embedding_type(documents: Vec<Document>, available_type: EmbeddingType) -> (EmbeddingType, Vec<Document>, Vec<String>) {
    let (included, excluded): (Vec<_>, Vec<_>) = documents.into_iter().partition(|d| d.embedding_type == available_type);
    let excluded_slugs = excluded.into_iter().map(|d| d.slug().to_string()).collect();
    (available_type, included, excluded_slugs)
}

/// Per-document override if every targeted document sets the same value;
/// `None` otherwise (no override, or documents disagree). The single-document
/// case is just the one-element instance of "all agree".
fn document_chunk_limit_override(documents: &[Document]) -> Option<i64> {
    let first = documents.first()?.chunk_limit_override?;
    documents[1..]
        .iter()
        .all(|doc| doc.chunk_limit_override == Some(first))
        .then_some(first)
}

fn footnote_label(index: usize, chunk: &RetrievedChunk, multi_doc: bool) -> String {
    if multi_doc {
        format!("[{}] {} — page {}", index + 1, chunk.document_title, chunk.chunk.page_number)
    } else {
        format!("[{}] page {}", index + 1, chunk.chunk.page_number)
    }
}

fn build_system_prompt(chunks: &[RetrievedChunk], multi_doc: bool) -> String {
    if chunks.is_empty() {
        return "No passages in the available documents are relevant to this question. \
                Politely decline to answer, say so directly, and suggest the user rephrase \
                the question or pick a different document. Do not invent an answer."
            .to_string();
    }

    let references = chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| footnote_label(idx, chunk, multi_doc))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Answer the user's question using only the context passages supplied below. Cite the \
         passage behind every claim with a footnote numeral like [1], [2], matching the numbered \
         passage it came from. Never cite a numeral that wasn't given to you. After the answer, \
         add a `References` section that lists each numeral you cited next to its source:\n\n{references}"
    )
}

fn build_user_message(chunks: &[RetrievedChunk], history: &[HistoryTurn], question: &str) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| format!("[{}] {}", idx + 1, chunk.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let history_text = history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{role}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("Conversation so far:\n{history_text}\n\nContext passages:\n{context}\n\nQuestion:\n{question}")
}

/// Drives C7: resolves the requested documents and model, retrieves chunks
/// (C6), streams the LLM's answer, and logs a `Conversation` once the stream
/// settles. Held behind an `Arc` by callers; every field here is itself
/// cheap to clone so the streaming body can own its copies.
#[derive(Clone)]
pub struct RagOrchestrator {
    db: Arc<SurrealDbClient>,
    registry: Arc<DocumentRegistry>,
    openai_client: Arc<Client<OpenAIConfig>>,
    embedding_provider: Arc<EmbeddingProvider>,
    retrieval_config: RetrievalConfig,
}

impl RagOrchestrator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        registry: Arc<DocumentRegistry>,
        openai_client: Arc<Client<OpenAIConfig>>,
        embedding_provider: Arc<EmbeddingProvider>,
        retrieval_config: RetrievalConfig,
    ) -> Self {
        Self {
            db,
            registry,
            openai_client,
            embedding_provider,
            retrieval_config,
        }
    }

    #[instrument(skip_all, fields(session_id = %request.session_id))]
    pub async fn answer(&self, request: AnswerRequest) -> Result<BoxedAnswerStream, OrchestratorError> {
        let slugs = parse_doc_param(&request.doc_param, self.retrieval_config.tuning.max_documents)?;
        let documents = resolve_documents(&self.registry, &slugs)?;
        check_all_access(request.user.as_ref(), &documents, request.passcode.as_deref())?;

        let owner_forced_model = shared_owner_id(&documents)
            .and_then(|owner_id| self.registry.get_owner(owner_id))
            .and_then(|owner| owner.forced_model);
        let (model_actual, override_applied) = resolve_effective_model(&request.requested_model, &documents, owner_forced_model.as_deref());

        let owner_chunk_limit = shared_owner_id(&documents)
            .and_then(|owner_id| self.registry.get_owner(owner_id))
            .map(|owner| owner.default_chunk_limit);
        let document_override = document_chunk_limit_override(&documents);
        let resolved_chunk_limit =
            crate::retrieval::resolve_chunk_limit(document_override, owner_chunk_limit, self.retrieval_config.tuning.system_chunk_limit);

        let (embedding_type, documents, excluded_embedding_mismatch) =
            resolve_embedding_type(documents, self.embedding_provider.embedding_type());
        let multi_doc = documents.len() > 1;

        let embed_start = Instant::now();
        let query_embedding = self.embedding_provider.embed(&request.question).await.map_err(OrchestratorError::App)?;
        let embed_ms = as_ms(embed_start.elapsed());

        let retrieve_start = Instant::now();
        let run = pipeline::run_pipeline_with_embedding(
            &self.db,
            &documents,
            &query_embedding,
            embedding_type,
            resolved_chunk_limit,
            &self.retrieval_config,
        )
        .await?;
        let retrieve_ms = as_ms(retrieve_start.elapsed());
        let chunks = run.chunks;

        let system_prompt = build_system_prompt(&chunks, multi_doc);
        let user_message = build_user_message(&chunks, &request.history, &request.question);

        let messages = vec![
            ChatCompletionRequestSystemMessage::from(system_prompt).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&model_actual)
            .messages(messages)
            .build()
            .map_err(AppError::from)?;

        let openai_stream = self
            .openai_client
            .chat()
            .create_stream(chat_request)
            .await
            .map_err(AppError::from)?;

        let chunk_sources: Vec<ChunkSource> = chunks
            .iter()
            .map(|c| ChunkSource {
                document_slug: c.document_slug.clone(),
                similarity: c.similarity,
            })
            .collect();

        let db = Arc::clone(&self.db);
        let conversation_id = Uuid::new_v4().to_string();
        let session_id = request.session_id;
        let user_id = request.user.map(|u| u.id);
        let question = request.question;
        let model_requested = request.requested_model;
        let document_slugs = slugs;

        let event_stream = stream! {
            let llm_start = Instant::now();
            let mut first_token_ms = 0u64;
            let mut full_answer = String::new();
            let mut stream_error: Option<String> = None;

            let mut openai_stream = openai_stream;
            while let Some(item) = openai_stream.next().await {
                match item {
                    Ok(response) => {
                        let Some(delta) = response.choices.first().and_then(|c| c.delta.content.clone()) else {
                            continue;
                        };
                        if delta.is_empty() {
                            continue;
                        }
                        if full_answer.is_empty() {
                            first_token_ms = as_ms(llm_start.elapsed());
                        }
                        full_answer.push_str(&delta);
                        yield AnswerEvent::Content(delta);
                    }
                    Err(err) => {
                        let message = err.to_string();
                        stream_error = Some(message.clone());
                        yield AnswerEvent::Error(message);
                        break;
                    }
                }
            }

            let timing_ms = TimingBreakdownMs {
                embed: embed_ms,
                retrieve: retrieve_ms,
                llm_first_token: first_token_ms,
                llm_total: as_ms(llm_start.elapsed()),
            };

            let retrieval_metadata = RetrievalMetadata {
                chunk_sources: chunk_sources.clone(),
                timing_ms: timing_ms.clone(),
                original_model_requested: override_applied.then(|| model_requested.clone()),
                model_override_applied: override_applied,
                excluded_embedding_mismatch: excluded_embedding_mismatch.clone(),
                error: stream_error.clone(),
            };

            let conversation = Conversation::new(
                session_id.clone(),
                conversation_id.clone(),
                user_id,
                document_slugs,
                question,
                full_answer,
                model_requested.clone(),
                model_actual.clone(),
                retrieval_metadata,
            );

            if let Err(err) = db.store_item(conversation).await {
                warn!(error = %err, "failed to persist conversation log");
            }

            if stream_error.is_none() {
                yield AnswerEvent::Done(AnswerMetadata {
                    conversation_id,
                    session_id,
                    model_requested,
                    model_actual,
                    chunks_used: chunk_sources.len(),
                    chunk_sources,
                    timing_ms,
                    excluded_embedding_mismatch,
                });
            }
        };

        Ok(Box::pin(event_stream))
    }
}

fn as_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::document::AccessLevel;

    fn doc(slug: &str, owner: Option<&str>, forced_model: Option<&str>) -> Document {
        let mut d = Document::new(
            slug.into(),
            "Title".into(),
            owner.map(String::from),
            if owner.is_some() { AccessLevel::OwnerRestricted } else { AccessLevel::Public },
            EmbeddingType::Openai,
        )
        .expect("valid document");
        d.forced_model = forced_model.map(String::from);
        d
    }

    #[test]
    fn parse_doc_param_splits_on_plus_and_rejects_empty() {
        assert_eq!(parse_doc_param("a+b+c", 5).unwrap(), vec!["a", "b", "c"]);
        assert!(parse_doc_param("", 5).is_err());
        assert!(matches!(parse_doc_param("a+b+c+d+e+f", 5), Err(OrchestratorError::TooManyDocuments { max: 5 })));
    }

    #[test]
    fn non_grok_requested_model_bypasses_any_forced_override() {
        let docs = vec![doc("a", None, Some("reasoning"))];
        let (model, overridden) = resolve_effective_model("gemini-2.0-flash", &docs, None);
        assert_eq!(model, "gemini-2.0-flash");
        assert!(!overridden);
    }

    #[test]
    fn conflicting_forced_models_resolve_to_reasoning() {
        let docs = vec![doc("a", None, Some("standard")), doc("b", None, Some("reasoning"))];
        let (model, overridden) = resolve_effective_model("standard", &docs, None);
        assert_eq!(model, "reasoning");
        assert!(overridden);
    }

    #[test]
    fn agreeing_forced_models_are_used_directly() {
        let docs = vec![doc("a", None, Some("reasoning")), doc("b", None, Some("reasoning"))];
        let (model, overridden) = resolve_effective_model("standard", &docs, None);
        assert_eq!(model, "reasoning");
        assert!(overridden);
    }

    #[test]
    fn owner_default_applies_when_no_document_forces_a_model() {
        let docs = vec![doc("a", Some("acme"), None)];
        let (model, overridden) = resolve_effective_model("standard", &docs, Some("reasoning"));
        assert_eq!(model, "reasoning");
        assert!(overridden);
    }

    #[test]
    fn mixed_embedding_types_drop_the_one_that_does_not_match_the_live_provider() {
        let mut local_doc = doc("local", None, None);
        local_doc.embedding_type = EmbeddingType::Local;
        let openai_doc = doc("openai", None, None);

        let (resolved_type, included, excluded) = resolve_embedding_type(vec![openai_doc, local_doc], EmbeddingType::Openai);
        assert_eq!(resolved_type, EmbeddingType::Openai);
        assert_eq!(included.len(), 1);
        assert_eq!(excluded, vec!["local".to_string()]);
    }

    #[test]
    fn a_single_document_of_the_wrong_type_is_excluded_too() {
        let mut local_doc = doc("local", None, None);
        local_doc.embedding_type = EmbeddingType::Local;

        let (resolved_type, included, excluded) = resolve_embedding_type(vec![local_doc], EmbeddingType::Openai);
        assert_eq!(resolved_type, EmbeddingType::Openai);
        assert!(included.is_empty());
        assert_eq!(excluded, vec!["local".to_string()]);
    }

    #[test]
    fn document_chunk_limit_override_is_honored_when_every_document_agrees() {
        let mut a = doc("a", None, None);
        a.chunk_limit_override = Some(7);
        let mut b = doc("b", None, None);
        b.chunk_limit_override = Some(7);
        assert_eq!(document_chunk_limit_override(&[a, b]), Some(7));
    }

    #[test]
    fn document_chunk_limit_override_is_dropped_when_documents_disagree() {
        let mut a = doc("a", None, None);
        a.chunk_limit_override = Some(7);
        let mut b = doc("b", None, None);
        b.chunk_limit_override = Some(9);
        assert_eq!(document_chunk_limit_override(&[a, b]), None);
    }

    #[test]
    fn shared_owner_id_requires_every_document_to_match() {
        let docs = vec![doc("a", Some("acme"), None), doc("b", Some("acme"), None)];
        assert_eq!(shared_owner_id(&docs), Some("acme"));

        let mixed = vec![doc("a", Some("acme"), None), doc("b", Some("globex"), None)];
        assert_eq!(shared_owner_id(&mixed), None);
    }
}
