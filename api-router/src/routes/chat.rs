use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension, Json,
};
use common::storage::types::user::User;
use futures::{Stream, StreamExt};
use retrieval_pipeline::{AnswerEvent, AnswerMetadata, AnswerRequest, ChatRole, HistoryTurn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ChatHistoryTurn {
    pub role: String,
    pub content: String,
}

/// `{message, history[], model, doc, sessionId?, embedding?}`. `embedding` is
/// accepted for forward compatibility but unused: a document's embedding
/// space is intrinsic to how it was ingested, not selectable per query.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatHistoryTurn>,
    pub model: String,
    pub doc: String,
    pub session_id: Option<String>,
    pub passcode: Option<String>,
    #[serde(default)]
    pub embedding: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub model: String,
    pub actual_model: String,
    pub conversation_id: String,
    pub session_id: String,
    pub metadata: AnswerMetadata,
}

fn build_request(body: ChatRequest, user: Option<User>) -> AnswerRequest {
    let history = body
        .history
        .into_iter()
        .map(|turn| HistoryTurn {
            role: if turn.role == "assistant" { ChatRole::Assistant } else { ChatRole::User },
            content: turn.content,
        })
        .collect();

    AnswerRequest {
        user,
        question: body.message,
        history,
        doc_param: body.doc,
        passcode: body.passcode,
        requested_model: body.model,
        session_id: body.session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
    }
}

/// `POST /chat`: drains the answer stream into a single JSON response.
pub async fn chat(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let requested_model = body.model.clone();
    let request = build_request(body, user);
    let mut stream = state.orchestrator.answer(request).await?;

    let mut response = String::new();
    let mut metadata: Option<AnswerMetadata> = None;
    while let Some(event) = stream.next().await {
        match event {
            AnswerEvent::Content(text) => response.push_str(&text),
            AnswerEvent::Done(meta) => metadata = Some(meta),
            AnswerEvent::Error(message) => return Err(ApiError::Provider(message)),
        }
    }

    let metadata = metadata.ok_or_else(|| ApiError::Internal("answer stream closed without a result".to_string()))?;

    Ok(Json(ChatResponse {
        response,
        model: requested_model,
        actual_model: metadata.model_actual.clone(),
        conversation_id: metadata.conversation_id.clone(),
        session_id: metadata.session_id.clone(),
        metadata,
    }))
}

/// `POST /chat/stream`: the same answer, relayed as Server-Sent Events —
/// `content` for each incremental chunk, a terminal `done` carrying the
/// final metadata, or a terminal `error`.
pub async fn chat_stream(
    State(state): State<ApiState>,
    Extension(user): Extension<Option<User>>,
    Json(body): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = build_request(body, user);
    let answer_stream = state.orchestrator.answer(request).await?;

    let sse_stream = answer_stream.map(|event| {
        let sse_event = match event {
            AnswerEvent::Content(text) => Event::default().event("content").data(text),
            AnswerEvent::Done(meta) => Event::default()
                .event("done")
                .json_data(meta)
                .unwrap_or_else(|_| Event::default().event("error").data("failed to encode metadata")),
            AnswerEvent::Error(message) => Event::default().event("error").data(message),
        };
        Ok(sse_event)
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}
