use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{error, warn};

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::document::Document;
use crate::storage::types::owner::Owner;

/// Consecutive refresh failures after which the registry is considered
/// degraded (readiness probes should start failing).
const DEGRADED_FAILURE_THRESHOLD: usize = 3;

struct Snapshot {
    by_slug: HashMap<String, Document>,
    by_owner: HashMap<String, Vec<String>>,
    owners_by_id: HashMap<String, Owner>,
}

impl Snapshot {
    fn build(documents: Vec<Document>, owners: Vec<Owner>) -> Self {
        let mut by_slug = HashMap::with_capacity(documents.len());
        let mut by_owner: HashMap<String, Vec<String>> = HashMap::new();
        for doc in documents {
            if let Some(owner_id) = &doc.owner_id {
                by_owner.entry(owner_id.clone()).or_default().push(doc.slug().to_string());
            }
            by_slug.insert(doc.slug().to_string(), doc);
        }
        let owners_by_id = owners.into_iter().map(|o| (o.id.clone(), o)).collect();
        Self { by_slug, by_owner, owners_by_id }
    }
}

/// In-memory snapshot of every document, kept current by a single refresh
/// worker and read lock-free via an atomic pointer swap (C2). Readers never
/// observe a half-applied refresh.
pub struct DocumentRegistry {
    snapshot: ArcSwap<Snapshot>,
    consecutive_failures: AtomicUsize,
    generation_tx: watch::Sender<u64>,
    /// Millis since the epoch of the last successful refresh, or 0 if none yet.
    last_refreshed_at_ms: AtomicI64,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        let (generation_tx, _rx) = watch::channel(0);
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::build(Vec::new(), Vec::new())),
            consecutive_failures: AtomicUsize::new(0),
            generation_tx,
            last_refreshed_at_ms: AtomicI64::new(0),
        }
    }

    /// Reloads every document and owner from storage and publishes both as
    /// one atomic swap. On failure the previous snapshot is left in place and
    /// the consecutive-failure counter is bumped.
    pub async fn refresh(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let documents = db.get_all_stored_items::<Document>().await;
        let owners = db.get_all_stored_items::<Owner>().await;

        match (documents, owners) {
            (Ok(documents), Ok(owners)) => {
                let document_count = documents.len();
                let owner_count = owners.len();
                self.snapshot.store(Arc::new(Snapshot::build(documents, owners)));
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.last_refreshed_at_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
                let next_generation = self.generation_tx.borrow().wrapping_add(1);
                let _ = self.generation_tx.send(next_generation);
                tracing::debug!(document_count, owner_count, "document registry refreshed");
                Ok(())
            }
            (Err(err), _) | (_, Err(err)) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= DEGRADED_FAILURE_THRESHOLD {
                    error!(failures, error = %err, "document registry refresh degraded: stale snapshot being served");
                } else {
                    warn!(failures, error = %err, "document registry refresh failed");
                }
                Err(err.into())
            }
        }
    }

    /// `false` once `DEGRADED_FAILURE_THRESHOLD` consecutive refreshes have
    /// failed; readiness probes should reflect this.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures.load(Ordering::SeqCst) < DEGRADED_FAILURE_THRESHOLD
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Document> {
        self.snapshot.load().by_slug.get(slug).cloned()
    }

    pub fn get_by_owner(&self, owner_id: &str) -> Vec<Document> {
        let snapshot = self.snapshot.load();
        snapshot
            .by_owner
            .get(owner_id)
            .into_iter()
            .flatten()
            .filter_map(|slug| snapshot.by_slug.get(slug).cloned())
            .collect()
    }

    pub fn get_owner(&self, owner_id: &str) -> Option<Owner> {
        self.snapshot.load().owners_by_id.get(owner_id).cloned()
    }

    /// Number of documents currently published (used by `/ready`).
    pub fn document_count(&self) -> usize {
        self.snapshot.load().by_slug.len()
    }

    /// Wall-clock time of the last successful refresh, if any has happened.
    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        let millis = self.last_refreshed_at_ms.load(Ordering::SeqCst);
        if millis == 0 {
            None
        } else {
            Utc.timestamp_millis_opt(millis).single()
        }
    }

    /// Time elapsed since the last successful refresh, if any has happened
    /// (used by `/health`'s `registryAge`).
    pub fn registry_age(&self) -> Option<Duration> {
        let now = Utc::now();
        self.last_refreshed_at()
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    /// A receiver that ticks (with a monotonically increasing generation
    /// number) every time `refresh` publishes a new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::document::AccessLevel;
    use crate::utils::embedding::EmbeddingType;
    use uuid::Uuid;

    async fn make_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("registry_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.apply_migrations().await.expect("migrations");
        db
    }

    #[tokio::test]
    async fn refresh_publishes_documents_queryable_by_slug_and_owner() {
        let db = make_db().await;
        let doc = Document::new(
            "doc1".into(),
            "Title".into(),
            Some("acme".into()),
            AccessLevel::OwnerRestricted,
            EmbeddingType::Openai,
        )
        .expect("valid document");
        db.store_item(doc).await.expect("store");

        let registry = DocumentRegistry::new();
        assert!(registry.get_by_slug("doc1").is_none());

        registry.refresh(&db).await.expect("refresh");
        assert!(registry.get_by_slug("doc1").is_some());
        assert_eq!(registry.get_by_owner("acme").len(), 1);
        assert!(registry.is_healthy());
        assert_eq!(registry.document_count(), 1);
    }

    #[tokio::test]
    async fn registry_age_is_none_before_first_refresh_and_small_after() {
        let db = make_db().await;
        let registry = DocumentRegistry::new();
        assert!(registry.last_refreshed_at().is_none());
        assert!(registry.registry_age().is_none());
        assert_eq!(registry.document_count(), 0);

        registry.refresh(&db).await.expect("refresh");
        assert!(registry.last_refreshed_at().is_some());
        let age = registry.registry_age().expect("age present after refresh");
        assert!(age < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn refresh_publishes_owners_alongside_documents() {
        let db = make_db().await;
        let owner = Owner::new("acme".into(), "Acme Corp".into());
        db.store_item(owner).await.expect("store owner");

        let registry = DocumentRegistry::new();
        assert!(registry.get_owner("acme").is_none());

        registry.refresh(&db).await.expect("refresh");
        let cached = registry.get_owner("acme").expect("owner cached");
        assert_eq!(cached.name, "Acme Corp");
        assert!(registry.get_owner("missing").is_none());
    }

    #[tokio::test]
    async fn subscribe_notifies_on_each_refresh() {
        let db = make_db().await;
        let registry = DocumentRegistry::new();
        let mut rx = registry.subscribe();
        assert_eq!(*rx.borrow(), 0);

        registry.refresh(&db).await.expect("refresh");
        rx.changed().await.expect("channel open");
        assert_eq!(*rx.borrow(), 1);
    }
}
