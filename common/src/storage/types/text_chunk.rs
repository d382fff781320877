use crate::{error::AppError, storage::db::SurrealDbClient, utils::embedding::EmbeddingType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A token-bounded span of a document's text, stored with its embedding and
/// page attribution. Lives in one of two tables depending on `EmbeddingType` —
/// `document_chunks_openai` (1536D) or `document_chunks_local` (384D) — so the
/// table name is resolved at call time rather than fixed by `StoredObject`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub document_slug: String,
    pub ordinal: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub page_number: u32,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: DocumentChunk,
    pub score: f32,
}

pub const fn table_for(embedding_type: EmbeddingType) -> &'static str {
    match embedding_type {
        EmbeddingType::Openai => "document_chunks_openai",
        EmbeddingType::Local => "document_chunks_local",
    }
}

impl DocumentChunk {
    pub fn new(
        document_slug: String,
        ordinal: i64,
        content: String,
        embedding: Vec<f32>,
        page_number: u32,
        char_start: usize,
        char_end: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_slug,
            ordinal,
            content,
            embedding,
            page_number,
            char_start,
            char_end,
        }
    }

    /// Inserts a batch (caller enforces the ≤50-per-batch contract) in one
    /// transaction. Requires the parent `documents` row to already exist;
    /// callers insert the document before calling this (foreign-key safety).
    pub async fn store_batch(
        chunks: &[Self],
        embedding_type: EmbeddingType,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let table = table_for(embedding_type);
        let mut query = db.client.query("BEGIN TRANSACTION;");
        for (idx, chunk) in chunks.iter().enumerate() {
            query = query
                .query(format!(
                    "CREATE type::thing('{table}', $id{idx}) CONTENT $chunk{idx};"
                ))
                .bind((format!("id{idx}"), chunk.id.clone()))
                .bind((format!("chunk{idx}"), chunk.clone()));
        }
        let response = query.query("COMMIT TRANSACTION;").await?;
        response.check()?;
        Ok(())
    }

    /// Deletes every chunk belonging to `document_slug` in both embedding tables;
    /// cascades alongside document deletion.
    pub async fn delete_by_document_slug(
        document_slug: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        for table in ["document_chunks_openai", "document_chunks_local"] {
            db.client
                .query(format!("DELETE {table} WHERE document_slug = $slug;"))
                .bind(("slug", document_slug.to_string()))
                .await?;
        }
        Ok(())
    }

    /// Nearest-neighbor search restricted to a single document.
    pub async fn vector_search_single(
        document_slug: &str,
        embedding_type: EmbeddingType,
        query_embedding: &[f32],
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        let table = table_for(embedding_type);
        let sql = format!(
            r"
            SELECT *,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {table}
            WHERE document_slug = $slug
              AND embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "
        );

        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            chunk: DocumentChunk,
            score: f32,
        }

        let mut response = db
            .client
            .query(&sql)
            .bind(("embedding", query_embedding.to_vec()))
            .bind(("slug", document_slug.to_string()))
            .await?;
        let rows: Vec<Row> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| ChunkSearchResult {
                chunk: r.chunk,
                score: r.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::document::{AccessLevel, Document};

    async fn setup_doc(db: &SurrealDbClient, slug: &str, embedding_type: EmbeddingType) {
        let doc = Document::new(
            slug.to_string(),
            "Title".into(),
            None,
            AccessLevel::Public,
            embedding_type,
        )
        .expect("valid document");
        db.store_item(doc).await.expect("store document");
    }

    #[tokio::test]
    async fn store_and_delete_batch_round_trip() {
        let db = SurrealDbClient::memory("chunks_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.apply_migrations().await.expect("migrations");
        setup_doc(&db, "doc1", EmbeddingType::Openai).await;

        let chunks = vec![
            DocumentChunk::new("doc1".into(), 0, "first".into(), vec![0.1; 1536], 1, 0, 5),
            DocumentChunk::new("doc1".into(), 1, "second".into(), vec![0.2; 1536], 1, 5, 11),
        ];
        DocumentChunk::store_batch(&chunks, EmbeddingType::Openai, &db)
            .await
            .expect("store batch");

        let results =
            DocumentChunk::vector_search_single("doc1", EmbeddingType::Openai, &vec![0.1; 1536], 5, &db)
                .await
                .expect("search");
        assert_eq!(results.len(), 2);

        DocumentChunk::delete_by_document_slug("doc1", &db)
            .await
            .expect("delete");
        let results_after =
            DocumentChunk::vector_search_single("doc1", EmbeddingType::Openai, &vec![0.1; 1536], 5, &db)
                .await
                .expect("search after delete");
        assert!(results_after.is_empty());
    }

    #[tokio::test]
    async fn vector_search_is_scoped_to_document_slug() {
        let db = SurrealDbClient::memory("chunks_ns_scope", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.apply_migrations().await.expect("migrations");
        setup_doc(&db, "doc_a", EmbeddingType::Local).await;
        setup_doc(&db, "doc_b", EmbeddingType::Local).await;

        let a = vec![DocumentChunk::new(
            "doc_a".into(),
            0,
            "fish".into(),
            vec![0.1; 384],
            1,
            0,
            4,
        )];
        let b = vec![DocumentChunk::new(
            "doc_b".into(),
            0,
            "birds".into(),
            vec![0.9; 384],
            1,
            0,
            5,
        )];
        DocumentChunk::store_batch(&a, EmbeddingType::Local, &db)
            .await
            .expect("store a");
        DocumentChunk::store_batch(&b, EmbeddingType::Local, &db)
            .await
            .expect("store b");

        let results =
            DocumentChunk::vector_search_single("doc_a", EmbeddingType::Local, &vec![0.1; 384], 5, &db)
                .await
                .expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.document_slug, "doc_a");
    }
}
