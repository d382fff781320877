pub mod orchestrator;
pub mod pipeline;
pub mod retrieval;

pub use orchestrator::{AnswerEvent, AnswerMetadata, AnswerRequest, ChatRole, HistoryTurn, OrchestratorError, RagOrchestrator};
pub use pipeline::{RetrievalConfig, RetrievalTuning};
pub use retrieval::{resolve_chunk_limit, RetrievedChunk};
