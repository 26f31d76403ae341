//! The persistence store: documents, chunks, digests, messages, and the
//! three-channel hybrid search query.
//!
//! Embedding vectors are stored as little-endian f32 BLOBs; cosine
//! similarity is computed in Rust over the fetched vectors. Lexical
//! relevance comes from an FTS5 index over chunk text.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    Digest, Document, HitKind, HybridCandidates, Message, SearchHit, StoredChunk,
};

pub struct Repo {
    pool: SqlitePool,
}

impl Repo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Documents ============

    /// Insert a new version of `title` and deactivate all older versions,
    /// in one transaction. A title's active version stays unique even
    /// under concurrent uploads of the same title.
    pub async fn create_document_version(&self, title: &str, source: &str) -> Result<Document> {
        let mut tx = self.pool.begin().await?;

        let max_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM docs WHERE title = ?")
                .bind(title)
                .fetch_one(&mut *tx)
                .await?;

        let version = max_version.unwrap_or(0) + 1;
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO docs (id, title, source, version, is_active, created_at) VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(title)
        .bind(source)
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE docs SET is_active = 0 WHERE title = ? AND version < ?")
            .bind(title)
            .bind(version)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Document {
            id,
            title: title.to_string(),
            source: source.to_string(),
            version,
            is_active: true,
            created_at: now,
        })
    }

    pub async fn get_active_document(&self, title: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, title, source, version, is_active, created_at FROM docs
             WHERE title = ? AND is_active = 1 ORDER BY version DESC LIMIT 1",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_document))
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, title, source, version, is_active, created_at FROM docs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_document))
    }

    pub async fn list_active_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, title, source, version, is_active, created_at FROM docs
             WHERE is_active = 1 ORDER BY title",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    // ============ Chunks ============

    /// Append one chunk with its vector, mirroring the text into the FTS
    /// index. Returns the stored row.
    pub async fn store_chunk(
        &self,
        doc_id: &str,
        section: &str,
        text: &str,
        tokens: i64,
        embedding: &[f32],
        meta: &serde_json::Value,
    ) -> Result<StoredChunk> {
        let id = Uuid::new_v4().to_string();
        let blob = vec_to_blob(embedding);
        let meta_json = meta.to_string();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO doc_chunks (id, doc_id, section, text, tokens, embedding, meta)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(doc_id)
        .bind(section)
        .bind(text)
        .bind(tokens)
        .bind(&blob)
        .bind(&meta_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, doc_id, text) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(doc_id)
            .bind(text)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(StoredChunk {
            id,
            doc_id: doc_id.to_string(),
            section: section.to_string(),
            text: text.to_string(),
            tokens,
            meta: meta.clone(),
        })
    }

    /// Delete all chunks owned by `doc_id` (FTS rows included). Returns
    /// the number of chunks removed.
    pub async fn delete_document_chunks(&self, doc_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM doc_chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    // ============ Digests ============

    pub async fn store_digest(
        &self,
        date: NaiveDate,
        text: &str,
        embedding: &[f32],
        meta: &serde_json::Value,
    ) -> Result<Digest> {
        let id = Uuid::new_v4().to_string();
        let blob = vec_to_blob(embedding);

        sqlx::query("INSERT INTO digests (id, date, text, embedding, meta) VALUES (?, ?, ?, ?, ?)")
            .bind(&id)
            .bind(date.to_string())
            .bind(text)
            .bind(&blob)
            .bind(meta.to_string())
            .execute(&self.pool)
            .await?;

        Ok(Digest {
            id,
            date,
            text: text.to_string(),
            meta: meta.clone(),
        })
    }

    // ============ Messages ============

    pub async fn store_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        text: &str,
        kept: bool,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO messages (id, chat_id, sender_id, text, kept, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(chat_id)
        .bind(sender_id)
        .bind(text)
        .bind(kept)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id,
            chat_id,
            sender_id,
            text: text.to_string(),
            kept,
            created_at: now,
        })
    }

    pub async fn get_recent_messages(&self, chat_id: i64, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, chat_id, sender_id, text, kept, created_at FROM messages
             WHERE chat_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    /// All kept messages created on `date` (UTC), in arrival order.
    pub async fn get_kept_messages_for_digest(&self, date: NaiveDate) -> Result<Vec<Message>> {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end = start + 86_400;

        let rows = sqlx::query(
            "SELECT id, chat_id, sender_id, text, kept, created_at FROM messages
             WHERE kept = 1 AND created_at >= ? AND created_at < ? ORDER BY created_at",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    /// Delete non-kept messages older than `cutoff` (unix seconds).
    /// Kept messages survive regardless of age.
    pub async fn cleanup_messages(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at < ? AND kept = 0")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ============ Hybrid search ============

    /// Run the three independent channels and return their candidate
    /// lists in the fixed order the engine concatenates them: lexical
    /// over chunks (`top_k`), vector over chunks (`top_k`), vector over
    /// digests (`top_k / 2`). Score fusion happens in the caller.
    pub async fn hybrid_search(
        &self,
        query: &str,
        query_vec: &[f32],
        top_k: i64,
    ) -> Result<HybridCandidates> {
        let lexical = self.lexical_candidates(query, top_k).await?;
        let semantic = self.vector_candidates(query_vec, top_k).await?;
        let digests = self.digest_candidates(query_vec, top_k / 2).await?;

        Ok(HybridCandidates {
            lexical,
            semantic,
            digests,
        })
    }

    async fn lexical_candidates(&self, query: &str, top_k: i64) -> Result<Vec<SearchHit>> {
        // FTS5 treats punctuation as query syntax; reduce the query to
        // bare terms the way plain-text search functions do.
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT f.chunk_id, c.text, c.meta, f.rank AS rank
            FROM chunks_fts f
            JOIN doc_chunks c ON c.id = f.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(&sanitized)
        .bind(top_k)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                SearchHit {
                    id: row.get("chunk_id"),
                    text: row.get("text"),
                    kind: HitKind::DocChunk,
                    bm25_score: Some(-rank), // negate so higher = better
                    vector_score: None,
                    meta: parse_meta(row.get("meta")),
                }
            })
            .collect();

        Ok(hits)
    }

    async fn vector_candidates(&self, query_vec: &[f32], top_k: i64) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT id, text, embedding, meta FROM doc_chunks WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                SearchHit {
                    id: row.get("id"),
                    text: row.get("text"),
                    kind: HitKind::DocChunk,
                    bm25_score: None,
                    vector_score: Some(cosine_similarity(query_vec, &vec) as f64),
                    meta: parse_meta(row.get("meta")),
                }
            })
            .collect();

        sort_by_vector_score(&mut hits);
        hits.truncate(top_k.max(0) as usize);
        Ok(hits)
    }

    async fn digest_candidates(&self, query_vec: &[f32], limit: i64) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT id, text, embedding, meta FROM digests WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                SearchHit {
                    id: row.get("id"),
                    text: row.get("text"),
                    kind: HitKind::Digest,
                    bm25_score: None,
                    vector_score: Some(cosine_similarity(query_vec, &vec) as f64),
                    meta: parse_meta(row.get("meta")),
                }
            })
            .collect();

        sort_by_vector_score(&mut hits);
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}

fn sort_by_vector_score(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.vector_score
            .partial_cmp(&a.vector_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        title: row.get("title"),
        source: row.get("source"),
        version: row.get("version"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: row.get("created_at"),
    }
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Message {
    Message {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        sender_id: row.get("sender_id"),
        text: row.get("text"),
        kept: row.get::<i64, _>("kept") != 0,
        created_at: row.get("created_at"),
    }
}

fn parse_meta(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null)
}

/// Reduce a free-text query to bare alphanumeric terms for FTS5 MATCH.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============ Vector helpers ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `1 − cosine_distance`.
/// Returns `0.0` for empty or mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_sanitize_fts_query() {
        assert_eq!(
            sanitize_fts_query("what's the \"deployment\" plan?"),
            "what s the deployment plan"
        );
        assert_eq!(sanitize_fts_query("???"), "");
    }
}
