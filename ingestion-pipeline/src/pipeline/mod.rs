mod config;
mod context;
mod enrichment_result;
mod services;
mod stages;
mod state;

pub use config::{embed_batch_pacing, IngestionConfig, IngestionTuning};
pub use enrichment_result::DocumentSummary;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::sync::Arc;

use common::{
    concurrency::ConcurrencyManager,
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::AccessLevel,
            text_chunk::DocumentChunk,
            user_document::UserDocument,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use tracing::{info, warn};
use uuid::Uuid;

use self::{context::PipelineContext, state::fetched};

/// Drives a single claimed `UserDocument` through Fetch → ... → Finalize,
/// persisting success/failure back onto the row and the processing log.
/// Admission and the initial claim happen one layer up, at the request
/// handler that calls `process_user_document`.
#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
    embedding_provider: Arc<EmbeddingProvider>,
    log_path: String,
    concurrency: Arc<ConcurrencyManager>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
        embedding_provider: Arc<EmbeddingProvider>,
        log_path: String,
        concurrency: Arc<ConcurrencyManager>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
            embedding_provider,
            log_path,
            concurrency,
        }
    }

    /// Slug for the document a `UserDocument` produces once ingested.
    /// Derived, not user-supplied — keeps slugs URL-safe and collision-free.
    fn generate_slug(title: &str) -> String {
        let base: String = title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let base = base.trim_matches('-');
        let base = if base.is_empty() { "document" } else { base };
        format!("{base}-{}", Uuid::new_v4())
    }

    #[tracing::instrument(
        skip_all,
        fields(user_document_id = %user_document.id, attempt = user_document.attempts)
    )]
    pub async fn process_user_document(&self, user_document: UserDocument) -> Result<(), AppError> {
        let embedding_type = self.embedding_provider.embedding_type();

        let mut ctx = PipelineContext::new(
            &user_document,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
            &self.log_path,
            self.concurrency.as_ref(),
        );

        let result = self.drive(&mut ctx, embedding_type).await;

        match result {
            Ok(slug) => {
                UserDocument::mark_succeeded(&self.db, &user_document.id, &slug).await?;
                info!(user_document_id = %user_document.id, document_slug = %slug, "ingestion succeeded");
                Ok(())
            }
            Err(err) => {
                if let Some(slug) = ctx.document_slug.clone() {
                    if let Err(rollback_err) = self.rollback(&slug).await {
                        warn!(
                            user_document_id = %user_document.id,
                            document_slug = %slug,
                            error = %rollback_err,
                            "failed to roll back partially-ingested document"
                        );
                    }
                }

                UserDocument::mark_failed(&self.db, &user_document.id, &err.to_string()).await?;
                warn!(user_document_id = %user_document.id, error = %err, "ingestion failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        ctx: &mut PipelineContext<'_>,
        embedding_type: common::utils::embedding::EmbeddingType,
    ) -> Result<String, AppError> {
        let file_path = ctx
            .user_document
            .file_path
            .clone()
            .ok_or_else(|| AppError::Validation("user document has no source file to ingest".into()))?;

        let bytes = self
            .services
            .fetch_blob(&file_path)
            .await
            .map_err(|err| ctx.abort(err))?;
        ctx.fetched_bytes = Some(bytes);

        let machine = fetched();

        let machine = stages::extract(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::summarize(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::chunk(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::embed(machine, ctx).await.map_err(|err| ctx.abort(err))?;

        // A retrain carries the slug of the document it replaces forward
        // (`/retrain-document` preserves the slug); a first-time ingestion
        // mints a fresh one. Either way the old chunk rows at that slug must
        // go before the new ones land, or stale and fresh chunks would be
        // served side by side.
        let slug = match ctx.user_document.document_slug.clone() {
            Some(existing) => {
                DocumentChunk::delete_by_document_slug(&existing, &self.db)
                    .await
                    .map_err(|err| ctx.abort(err))?;
                existing
            }
            None => Self::generate_slug(&ctx.user_document.title),
        };
        let owner_id = Some(ctx.user_document.user_id.clone());
        let machine = stages::create_document(
            machine,
            ctx,
            slug.clone(),
            owner_id,
            AccessLevel::OwnerRestricted,
            embedding_type,
        )
        .await
        .map_err(|err| ctx.abort(err))?;

        let machine = stages::store_chunks(machine, ctx, embedding_type)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = stages::purge(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let _machine = stages::finalize(machine, ctx).await.map_err(|err| ctx.abort(err))?;

        Ok(slug)
    }

    async fn rollback(&self, document_slug: &str) -> Result<(), AppError> {
        DocumentChunk::delete_by_document_slug(document_slug, &self.db).await?;
        self.db.delete_item::<common::storage::types::document::Document>(document_slug).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use common::storage::types::{document::Document, user_document::UserDocumentStatus};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::pipeline::enrichment_result::DocumentSummary;

    struct MockServices {
        fail_summarize: bool,
        fail_embed: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockServices {
        fn new() -> Self {
            Self {
                fail_summarize: false,
                fail_embed: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PipelineServices for MockServices {
        async fn fetch_blob(&self, _file_path: &str) -> Result<bytes::Bytes, AppError> {
            self.calls.lock().await.push("fetch_blob");
            Ok(bytes::Bytes::from_static(b"Hello world. This is a test document about testing."))
        }

        async fn summarize(&self, _marked_text: &str, _timeout: Duration) -> Result<DocumentSummary, AppError> {
            self.calls.lock().await.push("summarize");
            if self.fail_summarize {
                return Err(AppError::Timeout("summarization timed out".into()));
            }
            Ok(DocumentSummary {
                title: Some("A Test Document".into()),
                subtitle: None,
                abstract_text: Some("A short abstract.".into()),
                keywords: vec!["test".into()],
            })
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            _sdk_timeout: Duration,
            _hard_timeout: Duration,
        ) -> Result<Vec<Vec<f32>>, AppError> {
            self.calls.lock().await.push("embed_batch");
            if self.fail_embed {
                return Err(AppError::Validation("embedding rejected".into()));
            }
            Ok(texts.iter().map(|_| vec![0.1_f32; 1536]).collect())
        }

        async fn create_document(&self, document: Document) -> Result<(), AppError> {
            self.calls.lock().await.push("create_document");
            let _ = document;
            Ok(())
        }

        async fn store_chunks(
            &self,
            _chunks: &[DocumentChunk],
            _embedding_type: common::utils::embedding::EmbeddingType,
        ) -> Result<(), AppError> {
            self.calls.lock().await.push("store_chunks");
            Ok(())
        }

        async fn purge_blob(&self, _file_path: &str) -> Result<(), AppError> {
            self.calls.lock().await.push("purge_blob");
            Ok(())
        }
    }

    async fn make_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("ingestion_pipeline_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.apply_migrations().await.expect("migrations");
        db
    }

    fn make_user_document(id: &str) -> UserDocument {
        UserDocument::new(
            id.into(),
            "user-1".into(),
            "A Test Document".into(),
            "uploads/doc.txt".into(),
            "text/plain".into(),
        )
    }

    #[tokio::test]
    async fn successful_run_marks_the_row_ready_and_calls_every_service() {
        let db = Arc::new(make_db().await);
        let mock = Arc::new(MockServices::new());
        let services: Arc<dyn PipelineServices> = Arc::clone(&mock);
        let embedding_provider = Arc::new(test_embedding_provider());

        let pipeline = IngestionPipeline::new(
            Arc::clone(&db),
            IngestionConfig::default(),
            services,
            embedding_provider,
            std::env::temp_dir()
                .join(format!("ingestion-test-{}.log", Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            Arc::new(ConcurrencyManager::new(5)),
        );

        let doc = make_user_document("ud1");
        db.store_item(doc.clone()).await.expect("store");

        pipeline
            .process_user_document(doc)
            .await
            .expect("pipeline should succeed");

        let stored: UserDocument = db.get_item("ud1").await.expect("fetch").expect("row exists");
        assert_eq!(stored.status, UserDocumentStatus::Ready);
        assert!(stored.document_slug.is_some());
        assert!(stored.file_path.is_none());

        let call_log = mock.calls.lock().await.clone();
        assert_eq!(
            call_log,
            vec![
                "fetch_blob",
                "summarize",
                "embed_batch",
                "create_document",
                "store_chunks",
                "purge_blob",
            ]
        );
    }

    #[tokio::test]
    async fn embed_failure_marks_the_row_error_and_leaves_no_document_behind() {
        let db = Arc::new(make_db().await);
        let mut mock = MockServices::new();
        mock.fail_embed = true;
        let services: Arc<dyn PipelineServices> = Arc::new(mock);
        let embedding_provider = Arc::new(test_embedding_provider());

        let pipeline = IngestionPipeline::new(
            Arc::clone(&db),
            IngestionConfig::default(),
            services,
            embedding_provider,
            std::env::temp_dir()
                .join(format!("ingestion-test-{}.log", Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            Arc::new(ConcurrencyManager::new(5)),
        );

        let doc = make_user_document("ud2");
        db.store_item(doc.clone()).await.expect("store");

        let result = pipeline.process_user_document(doc).await;
        assert!(result.is_err());

        let stored: UserDocument = db.get_item("ud2").await.expect("fetch").expect("row exists");
        assert_eq!(stored.status, UserDocumentStatus::Error);
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn retrain_preserves_the_original_document_slug_and_drops_old_chunks() {
        let db = Arc::new(make_db().await);
        let mock = Arc::new(MockServices::new());
        let services: Arc<dyn PipelineServices> = Arc::clone(&mock);
        let embedding_provider = Arc::new(test_embedding_provider());

        let pipeline = IngestionPipeline::new(
            Arc::clone(&db),
            IngestionConfig::default(),
            services,
            embedding_provider,
            std::env::temp_dir()
                .join(format!("ingestion-test-{}.log", Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            Arc::new(ConcurrencyManager::new(5)),
        );

        // Seed chunks under the slug a prior ingestion produced.
        let stale_chunk = DocumentChunk::new(
            "a-test-document-preexisting".into(),
            0,
            "stale content".into(),
            vec![0.0_f32; 1536],
            1,
            0,
            1,
        );
        DocumentChunk::store_batch(&[stale_chunk], common::utils::embedding::EmbeddingType::Openai, &db)
            .await
            .expect("seed stale chunk");

        let mut doc = make_user_document("ud3");
        doc.document_slug = Some("a-test-document-preexisting".into());
        db.store_item(doc.clone()).await.expect("store");

        pipeline.process_user_document(doc).await.expect("retrain should succeed");

        let stored: UserDocument = db.get_item("ud3").await.expect("fetch").expect("row exists");
        assert_eq!(stored.document_slug.as_deref(), Some("a-test-document-preexisting"));

        let remaining = DocumentChunk::vector_search_single(
            "a-test-document-preexisting",
            common::utils::embedding::EmbeddingType::Openai,
            &vec![0.0_f32; 1536],
            10,
            &db,
        )
        .await
        .expect("search");
        assert!(remaining.iter().all(|r| r.chunk.content != "stale content"));
    }

    fn test_embedding_provider() -> common::utils::embedding::EmbeddingProvider {
        common::utils::embedding::EmbeddingProvider::OpenAi {
            client: async_openai::Client::with_config(async_openai::config::OpenAIConfig::new()),
            model: "text-embedding-3-small".into(),
        }
    }
}
