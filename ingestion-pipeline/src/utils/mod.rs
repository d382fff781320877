pub mod chunker;
pub mod pdf_ingestion;
