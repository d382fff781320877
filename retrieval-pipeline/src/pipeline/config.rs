use serde::{Deserialize, Serialize};

/// Tunable parameters that govern chunk retrieval (C6). No graph traversal,
/// FTS, or reranking surface in this deployment — those knobs are gone, not
/// just unused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalTuning {
    /// Cosine-similarity floor below which a candidate chunk is dropped.
    pub similarity_floor: f32,
    /// System-wide default chunk limit, lowest-priority in the resolution chain.
    pub system_chunk_limit: i64,
    /// Maximum distinct documents a single query may span.
    pub max_documents: usize,
    /// Per-document cap on contributed chunks once a query spans >1 document.
    pub per_document_cap: usize,
    /// Hard cap on the merged result set for multi-document queries.
    pub overall_cap: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            similarity_floor: 0.3,
            system_chunk_limit: 50,
            max_documents: 5,
            per_document_cap: 5,
            overall_cap: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
}

impl RetrievalConfig {
    pub fn new(tuning: RetrievalTuning) -> Self {
        Self { tuning }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tuning: RetrievalTuning::default(),
        }
    }
}
