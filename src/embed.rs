//! Embedding management: turning chunks, digests, and queries into
//! vectors and persisting the association.
//!
//! Chunk texts go to the provider in fixed-size batches to bound request
//! size; input and output order correspond positionally end-to-end, and
//! each stored chunk records its emission position as `chunk_index`.

use anyhow::Result;
use chrono::NaiveDate;

use crate::llm::LlmProvider;
use crate::models::{ChunkDraft, Digest, StoredChunk};
use crate::repo::Repo;

/// Texts per embedding request.
pub const EMBED_BATCH_SIZE: usize = 10;

pub struct EmbeddingManager<'a> {
    provider: &'a dyn LlmProvider,
    repo: &'a Repo,
}

impl<'a> EmbeddingManager<'a> {
    pub fn new(provider: &'a dyn LlmProvider, repo: &'a Repo) -> Self {
        Self { provider, repo }
    }

    /// Embed and persist a document's chunks.
    ///
    /// All batches embed before anything is stored, so a provider
    /// failure leaves the database untouched. A storage failure leaves
    /// previously stored chunks in place.
    pub async fn embed_chunks(
        &self,
        chunks: &[ChunkDraft],
        doc_id: &str,
    ) -> Result<Vec<StoredChunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let batch_vectors = self.provider.embed_batch(batch).await?;
            vectors.extend(batch_vectors);
        }

        let mut stored = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let meta = serde_json::json!({
                "title": chunk.title,
                "section": chunk.section,
                "chunk_index": stored.len(),
            });

            let row = self
                .repo
                .store_chunk(
                    doc_id,
                    &chunk.section,
                    &chunk.text,
                    chunk.tokens as i64,
                    vector,
                    &meta,
                )
                .await?;
            stored.push(row);
        }

        Ok(stored)
    }

    /// Embed and persist one digest, merging caller metadata over the
    /// base `{date, type}` fields.
    pub async fn embed_digest(
        &self,
        text: &str,
        date: NaiveDate,
        meta: &serde_json::Value,
    ) -> Result<Digest> {
        let vector = self.provider.embed(text).await?;

        let mut digest_meta = serde_json::json!({
            "date": date.to_string(),
            "type": "digest",
        });
        if let (Some(base), Some(extra)) = (digest_meta.as_object_mut(), meta.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }

        self.repo.store_digest(date, text, &vector, &digest_meta).await
    }

    /// Embed a query for search. No persistence.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.provider.embed(query).await
    }

    /// Delete a document's chunks and re-embed from fresh drafts.
    /// Returns the new chunk count. The delete and the re-embed are not
    /// atomic; a concurrent reader can see the document with no chunks.
    pub async fn reindex_document(&self, doc_id: &str, chunks: &[ChunkDraft]) -> Result<usize> {
        self.repo.delete_document_chunks(doc_id).await?;
        let stored = self.embed_chunks(chunks, doc_id).await?;
        Ok(stored.len())
    }
}
