pub mod chat;
pub mod health;
pub mod ingestion;
pub mod readiness;
pub mod registry;
pub mod user_documents;
