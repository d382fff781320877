use std::cmp::Ordering;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document, types::text_chunk::DocumentChunk},
    utils::embedding::EmbeddingType,
};

use crate::pipeline::RetrievalTuning;

/// A chunk returned by the retrieval engine, carrying enough of its parent
/// document to build citations without a second lookup.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub document_slug: String,
    pub document_title: String,
    pub chunk: DocumentChunk,
    pub similarity: f32,
}

/// Chunk-limit resolution: per-document override wins, then the owner's
/// default, then the system default. Always clamped to `[1, 200]`.
pub fn resolve_chunk_limit(document_override: Option<i64>, owner_default: Option<i64>, system_default: i64) -> usize {
    let resolved = document_override.or(owner_default).unwrap_or(system_default);
    usize::try_from(resolved.clamp(1, 200)).unwrap_or(1)
}

/// No SurrealDB primitive searches across documents in one query, so a
/// multi-document request is composed here: each document is searched
/// independently for its share of the limit, then the combined candidates
/// are floor-filtered and re-sorted by global similarity.
///
/// Single document: plain top-`resolved_chunk_limit` search, uncapped by
/// `overall_cap` (that cap only exists to bound fan-out across documents).
pub async fn retrieve(
    db: &SurrealDbClient,
    documents: &[Document],
    query_embedding: &[f32],
    embedding_type: EmbeddingType,
    resolved_chunk_limit: usize,
    tuning: &RetrievalTuning,
) -> Result<Vec<RetrievedChunk>, AppError> {
    if documents.is_empty() {
        return Ok(Vec::new());
    }

    let per_document_take = if documents.len() == 1 {
        resolved_chunk_limit
    } else {
        resolved_chunk_limit.div_ceil(documents.len()).min(tuning.per_document_cap)
    };

    let mut merged = Vec::new();
    for document in documents {
        let results = DocumentChunk::vector_search_single(
            document.slug(),
            embedding_type,
            query_embedding,
            per_document_take,
            db,
        )
        .await?;

        merged.extend(results.into_iter().map(|result| RetrievedChunk {
            document_slug: document.slug().to_string(),
            document_title: document.title.clone(),
            chunk: result.chunk,
            similarity: result.score,
        }));
    }

    merged.retain(|candidate| candidate.similarity >= tuning.similarity_floor);
    merged.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));

    let cap = if documents.len() > 1 {
        tuning.overall_cap
    } else {
        resolved_chunk_limit
    };
    merged.truncate(cap);

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::document::AccessLevel;
    use uuid::Uuid;

    async fn make_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("retrieval_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.apply_migrations().await.expect("migrations");
        db
    }

    fn doc(slug: &str, title: &str) -> Document {
        Document::new(slug.into(), title.into(), None, AccessLevel::Public, EmbeddingType::Openai)
            .expect("valid document")
    }

    fn embedding(weight: f32) -> Vec<f32> {
        let mut v = vec![0.0_f32; 1536];
        v[0] = weight;
        v
    }

    async fn seed_chunks(db: &SurrealDbClient, slug: &str, count: usize, weight: f32) {
        let chunks: Vec<DocumentChunk> = (0..count)
            .map(|i| {
                DocumentChunk::new(
                    slug.to_string(),
                    i as i64,
                    format!("chunk {i} of {slug}"),
                    embedding(weight),
                    1,
                    0,
                    1,
                )
            })
            .collect();
        DocumentChunk::store_batch(&chunks, EmbeddingType::Openai, db).await.expect("store chunks");
    }

    #[test]
    fn resolve_chunk_limit_prefers_document_then_owner_then_system() {
        assert_eq!(resolve_chunk_limit(Some(10), Some(20), 30), 10);
        assert_eq!(resolve_chunk_limit(None, Some(20), 30), 20);
        assert_eq!(resolve_chunk_limit(None, None, 30), 30);
    }

    #[test]
    fn resolve_chunk_limit_clamps_to_one_and_two_hundred() {
        assert_eq!(resolve_chunk_limit(Some(0), None, 50), 1);
        assert_eq!(resolve_chunk_limit(Some(500), None, 50), 200);
    }

    #[tokio::test]
    async fn single_document_retrieval_is_not_bounded_by_the_overall_cap() {
        let db = make_db().await;
        let d = doc("solo", "Solo Doc");
        db.store_item(d.clone()).await.expect("store doc");
        seed_chunks(&db, "solo", 8, 1.0).await;

        let tuning = RetrievalTuning {
            overall_cap: 3,
            ..RetrievalTuning::default()
        };

        let results = retrieve(&db, &[d], &embedding(1.0), EmbeddingType::Openai, 8, &tuning)
            .await
            .expect("retrieve");
        assert_eq!(results.len(), 8);
    }

    #[tokio::test]
    async fn multi_document_retrieval_balances_quota_across_documents() {
        let db = make_db().await;
        let a = doc("a", "Doc A");
        let b = doc("b", "Doc B");
        db.store_item(a.clone()).await.expect("store a");
        db.store_item(b.clone()).await.expect("store b");
        seed_chunks(&db, "a", 10, 1.0).await;
        seed_chunks(&db, "b", 10, 1.0).await;

        let results = retrieve(
            &db,
            &[a, b],
            &embedding(1.0),
            EmbeddingType::Openai,
            10,
            &RetrievalTuning::default(),
        )
        .await
        .expect("retrieve");

        assert_eq!(results.len(), 10);
        let from_a = results.iter().filter(|r| r.document_slug == "a").count();
        let from_b = results.iter().filter(|r| r.document_slug == "b").count();
        assert_eq!(from_a, 5);
        assert_eq!(from_b, 5);
    }

    #[tokio::test]
    async fn similarity_floor_drops_low_scoring_chunks() {
        let db = make_db().await;
        let d = doc("floor", "Floor Doc");
        db.store_item(d.clone()).await.expect("store doc");
        seed_chunks(&db, "floor", 1, 1.0).await;
        // Orthogonal chunk: zero cosine similarity against the query.
        let low = DocumentChunk::new("floor".into(), 99, "irrelevant".into(), {
            let mut v = vec![0.0_f32; 1536];
            v[1] = 1.0;
            v
        }, 1, 0, 1);
        DocumentChunk::store_batch(&[low], EmbeddingType::Openai, &db).await.expect("store low");

        let tuning = RetrievalTuning {
            similarity_floor: 0.5,
            ..RetrievalTuning::default()
        };

        let results = retrieve(&db, &[d], &embedding(1.0), EmbeddingType::Openai, 10, &tuning)
            .await
            .expect("retrieve");
        assert_eq!(results.len(), 1);
        assert!(results[0].similarity >= 0.5);
    }

    #[tokio::test]
    async fn empty_document_list_returns_no_chunks() {
        let db = make_db().await;
        let results = retrieve(&db, &[], &embedding(1.0), EmbeddingType::Openai, 10, &RetrievalTuning::default())
            .await
            .expect("retrieve");
        assert!(results.is_empty());
    }
}
