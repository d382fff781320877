use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Blob storage backend selection for `StorageManager`.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Which embedding family the deployment's default chat/query path uses when a
/// document doesn't pin its own `embedding_type`. Documents still carry their
/// own `EmbeddingType` independently of this default.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    Local,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAi
}

/// Environment-sourced configuration. Field names mirror the enumerated
/// environment configuration: `MaxConcurrentProcessing`, `RegistryRefreshPeriod`,
/// `StuckThreshold`, `SimilarityFloor`, `SystemChunkLimit`, plus provider
/// credentials for embedding, chat, blob and database backends.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,

    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    pub http_port: u16,

    #[serde(default = "default_max_concurrent_processing")]
    pub max_concurrent_processing: usize,
    #[serde(default = "default_registry_refresh_period_secs")]
    pub registry_refresh_period_secs: u64,
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
    #[serde(default = "default_system_chunk_limit")]
    pub system_chunk_limit: i64,
    #[serde(default = "default_orphan_blob_grace_secs")]
    pub orphan_blob_grace_secs: u64,

    #[serde(default = "default_processing_log_path")]
    pub processing_log_path: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_concurrent_processing() -> usize {
    5
}

fn default_registry_refresh_period_secs() -> u64 {
    120
}

fn default_stuck_threshold_secs() -> u64 {
    300
}

fn default_similarity_floor() -> f32 {
    0.3
}

fn default_system_chunk_limit() -> i64 {
    50
}

fn default_orphan_blob_grace_secs() -> u64 {
    3600
}

fn default_processing_log_path() -> String {
    "./data/processing.log".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
