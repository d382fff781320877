use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use middleware_auth::resolve_identity;
use routes::{
    chat::{chat, chat_stream},
    health::health,
    ingestion::{process_document, processing_status, retrain_document},
    readiness::ready,
    registry::refresh_registry,
    user_documents::{download_url, list, upload},
};

pub mod api_state;
pub mod error;
mod middleware_auth;
mod routes;

/// Router for API functionality, version 1. Identity resolution runs on
/// every route (`resolve_identity`) since `Public`/`Passcode` documents are
/// reachable anonymously — handlers that require a signed-in caller reject
/// a missing identity themselves rather than gating at the router level.
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let probes = Router::new().route("/health", get(health)).route("/ready", get(ready));

    let api = Router::new()
        .route("/refresh-registry", post(refresh_registry))
        .route(
            "/user-documents",
            post(upload).layer(DefaultBodyLimit::max(104_857_600)).get(list),
        )
        .route("/user-documents/{id}/download-url", get(download_url))
        .route("/process-document", post(process_document))
        .route("/retrain-document", post(retrain_document))
        .route("/processing-status/{userDocumentId}", get(processing_status))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route_layer(from_fn_with_state(app_state.clone(), resolve_identity));

    probes.merge(api)
}
