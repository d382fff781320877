use std::sync::Mutex;

use async_openai::types::CreateEmbeddingRequestArgs;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Embedding-type tag carried by every document and chunk. Identifies the
/// vector-space family: `OpenAi` chunks are 1536-dimensional, `Local` chunks
/// are 384-dimensional. The two spaces are never comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingType {
    Openai,
    Local,
}

impl EmbeddingType {
    pub fn dimension(self) -> usize {
        match self {
            EmbeddingType::Openai => 1536,
            EmbeddingType::Local => 384,
        }
    }

    pub fn table_suffix(self) -> &'static str {
        match self {
            EmbeddingType::Openai => "openai",
            EmbeddingType::Local => "local",
        }
    }
}

/// Uniform interface over the embedding backends the deployment may run
/// (C1 provider adapter). `openai` delegates to the OpenAI embeddings API;
/// `local` runs a bundled FastEmbed model entirely in-process.
pub enum EmbeddingProvider {
    OpenAi {
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: String,
    },
    Local {
        model: Mutex<TextEmbedding>,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            crate::utils::config::EmbeddingBackend::OpenAi => Ok(Self::openai(client)),
            crate::utils::config::EmbeddingBackend::Local => Self::local(),
        }
    }

    fn openai(client: async_openai::Client<async_openai::config::OpenAIConfig>) -> Self {
        EmbeddingProvider::OpenAi {
            client,
            model: "text-embedding-3-small".to_string(),
        }
    }

    fn local() -> Result<Self, AppError> {
        let model =
            TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false))
                .map_err(|err| AppError::InternalError(format!("failed to initialize local embedding model: {err}")))?;

        Ok(EmbeddingProvider::Local {
            model: Mutex::new(model),
        })
    }

    pub fn embedding_type(&self) -> EmbeddingType {
        match self {
            EmbeddingProvider::OpenAi { .. } => EmbeddingType::Openai,
            EmbeddingProvider::Local { .. } => EmbeddingType::Local,
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedding_type().dimension()
    }

    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let mut batch = self.embed_batch(std::slice::from_ref(&input.to_string())).await?;
        batch
            .pop()
            .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))
    }

    /// Embeds up to 50 inputs at a time, matching the ingestion pipeline's batch contract.
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match self {
            EmbeddingProvider::OpenAi { client, model } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .dimensions(EmbeddingType::Openai.dimension() as u32)
                    .input(inputs.to_vec())
                    .build()?;

                let response = client.embeddings().create(request).await?;
                debug!(count = response.data.len(), "openai embedding batch returned");

                let mut by_index: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
                for item in response.data {
                    if let Some(slot) = by_index.get_mut(item.index as usize) {
                        *slot = Some(item.embedding);
                    }
                }

                by_index
                    .into_iter()
                    .map(|maybe| maybe.ok_or_else(|| AppError::LLMParsing("missing embedding in batch response".into())))
                    .collect()
            }
            EmbeddingProvider::Local { model } => {
                // FastEmbed's inference is CPU-bound and synchronous; holding the lock
                // across the call is fine since no other async work happens concurrently
                // on this provider (ingestion serializes embed calls per task).
                let mut guard = model
                    .lock()
                    .map_err(|_| AppError::InternalError("embedding model lock poisoned".into()))?;
                guard
                    .embed(inputs.to_vec(), None)
                    .map_err(|err| AppError::Processing(format!("local embedding failed: {err}")))
            }
        }
    }
}

