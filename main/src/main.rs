use std::sync::Arc;
use std::time::Duration;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    concurrency::ConcurrencyManager,
    registry::DocumentRegistry,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{
    pipeline::{DefaultPipelineServices, IngestionConfig, IngestionPipeline},
    run_orphaned_blob_sweeper, run_stuck_job_sweeper,
};
use retrieval_pipeline::{RagOrchestrator, RetrievalConfig, RetrievalTuning};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.apply_migrations().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config, (*openai_client).clone())?);
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimension = embedding_provider.dimension(),
        "embedding provider initialized"
    );

    let storage = StorageManager::new(&config).await?;

    let registry = Arc::new(DocumentRegistry::new());
    registry.refresh(&db).await?;

    let concurrency = Arc::new(ConcurrencyManager::new(config.max_concurrent_processing));

    let services = Arc::new(DefaultPipelineServices::new(
        Arc::clone(&db),
        Arc::clone(&openai_client),
        storage.clone(),
        Arc::clone(&embedding_provider),
    ));
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        IngestionConfig::default(),
        services,
        Arc::clone(&embedding_provider),
        config.processing_log_path.clone(),
        Arc::clone(&concurrency),
    ));

    let retrieval_config = RetrievalConfig::new(RetrievalTuning {
        similarity_floor: config.similarity_floor,
        system_chunk_limit: config.system_chunk_limit,
        ..RetrievalTuning::default()
    });
    let orchestrator = Arc::new(RagOrchestrator::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        Arc::clone(&openai_client),
        Arc::clone(&embedding_provider),
        retrieval_config,
    ));

    let ingestion_lease = Duration::from_secs(config.stuck_threshold_secs);

    let api_state = ApiState {
        db: Arc::clone(&db),
        config: config.clone(),
        storage: storage.clone(),
        registry: Arc::clone(&registry),
        concurrency,
        ingestion_pipeline,
        orchestrator,
        ingestion_lease,
    };

    tokio::spawn(registry_refresh_loop(
        Arc::clone(&registry),
        Arc::clone(&db),
        Duration::from_secs(config.registry_refresh_period_secs),
    ));
    tokio::spawn(run_stuck_job_sweeper(
        Arc::clone(&db),
        Duration::from_secs(config.stuck_threshold_secs),
        config.processing_log_path.clone(),
        Duration::from_secs(config.stuck_threshold_secs.max(1)),
    ));
    tokio::spawn(run_orphaned_blob_sweeper(
        Arc::clone(&db),
        storage,
        Duration::from_secs(config.orphan_blob_grace_secs),
        Duration::from_secs(config.orphan_blob_grace_secs.max(1)),
    ));

    let app = Router::new().nest("/api/v1", api_routes_v1::<ApiState>(&api_state)).with_state(api_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!(address = %serve_address, "starting server");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// C2's other half: the periodic caller of `DocumentRegistry::refresh`.
/// Runs for the lifetime of the process; a failed tick is logged by
/// `refresh` itself and simply retried on the next tick.
async fn registry_refresh_loop(registry: Arc<DocumentRegistry>, db: Arc<SurrealDbClient>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let _ = registry.refresh(&db).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::utils::config::{AppConfig, EmbeddingBackend, StorageKind};
    use object_store::memory::InMemory;
    use std::sync::Arc as StdArc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_config() -> AppConfig {
        AppConfig {
            openai_api_key: "test".into(),
            openai_base_url: "http://localhost".into(),
            embedding_backend: EmbeddingBackend::OpenAi,
            surrealdb_address: "mem://".into(),
            surrealdb_username: "test".into(),
            surrealdb_password: "test".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            data_dir: "/tmp/unused".into(),
            storage: StorageKind::Memory,
            http_port: 0,
            max_concurrent_processing: 5,
            registry_refresh_period_secs: 120,
            stuck_threshold_secs: 300,
            similarity_floor: 0.3,
            system_chunk_limit: 50,
            orphan_blob_grace_secs: 3600,
            processing_log_path: "/tmp/unused_processing.log".into(),
        }
    }

    /// Builds the same component graph as `main`, minus the background
    /// tasks and the bound listener, and drives `/api/v1/health` and
    /// `/api/v1/ready` straight through the router. Grounded on the
    /// teacher's `smoke_startup_with_in_memory_surrealdb` pattern, adapted
    /// to this system's probe routes.
    #[tokio::test]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let config = test_config();

        let db = StdArc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb should start"),
        );
        db.apply_migrations().await.expect("migrations should apply");

        let openai_client = StdArc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new().with_api_key(&config.openai_api_key),
        ));

        let embedding_provider = StdArc::new(EmbeddingProvider::OpenAi {
            client: (*openai_client).clone(),
            model: "text-embedding-3-small".to_string(),
        });

        let storage = StorageManager::with_backend(StdArc::new(InMemory::new()), StorageKind::Memory);

        let registry = StdArc::new(DocumentRegistry::new());
        registry.refresh(&db).await.expect("registry refresh should succeed against an empty db");

        let concurrency = StdArc::new(ConcurrencyManager::new(config.max_concurrent_processing));

        let services = StdArc::new(DefaultPipelineServices::new(
            StdArc::clone(&db),
            StdArc::clone(&openai_client),
            storage.clone(),
            StdArc::clone(&embedding_provider),
        ));
        let ingestion_pipeline = StdArc::new(IngestionPipeline::new(
            StdArc::clone(&db),
            IngestionConfig::default(),
            services,
            StdArc::clone(&embedding_provider),
            config.processing_log_path.clone(),
            StdArc::clone(&concurrency),
        ));

        let retrieval_config = RetrievalConfig::new(RetrievalTuning {
            similarity_floor: config.similarity_floor,
            system_chunk_limit: config.system_chunk_limit,
            ..RetrievalTuning::default()
        });
        let orchestrator = StdArc::new(RagOrchestrator::new(
            StdArc::clone(&db),
            StdArc::clone(&registry),
            StdArc::clone(&openai_client),
            StdArc::clone(&embedding_provider),
            retrieval_config,
        ));

        let api_state = ApiState {
            db: StdArc::clone(&db),
            config: config.clone(),
            storage,
            registry: StdArc::clone(&registry),
            concurrency,
            ingestion_pipeline,
            orchestrator,
            ingestion_lease: Duration::from_secs(config.stuck_threshold_secs),
        };

        let app = Router::new().nest("/api/v1", api_routes_v1::<ApiState>(&api_state)).with_state(api_state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).expect("request should build"))
            .await
            .expect("router should answer");
        assert_eq!(response.status(), StatusCode::OK);

        // An empty registry is indistinguishable from "not warmed up yet",
        // so `/ready` must refuse traffic until at least one document exists.
        let response = app
            .oneshot(Request::builder().uri("/api/v1/ready").body(Body::empty()).expect("request should build"))
            .await
            .expect("router should answer");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
