use crate::stored_object;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChunkSource {
    #[serde(rename = "slug")]
    pub document_slug: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Default)]
pub struct TimingBreakdownMs {
    pub embed: u64,
    pub retrieve: u64,
    pub llm_first_token: u64,
    pub llm_total: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Default)]
pub struct RetrievalMetadata {
    pub chunk_sources: Vec<ChunkSource>,
    pub timing_ms: TimingBreakdownMs,
    pub original_model_requested: Option<String>,
    pub model_override_applied: bool,
    /// Documents dropped from a mixed-embedding-type multi-doc query.
    pub excluded_embedding_mismatch: Vec<String>,
    pub error: Option<String>,
}

stored_object!(Conversation, "conversations", {
    session_id: String,
    conversation_id: String,
    user_id: Option<String>,
    document_slugs: Vec<String>,
    question: String,
    answer: String,
    model_requested: String,
    model_actual: String,
    retrieval_metadata: RetrievalMetadata,
    rating: Option<i32>
});

impl Conversation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        conversation_id: String,
        user_id: Option<String>,
        document_slugs: Vec<String>,
        question: String,
        answer: String,
        model_requested: String,
        model_actual: String,
        retrieval_metadata: RetrievalMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            conversation_id,
            user_id,
            document_slugs,
            question,
            answer,
            model_requested,
            model_actual,
            retrieval_metadata,
            rating: None,
        }
    }
}
