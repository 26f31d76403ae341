//! Core data models used throughout Askbase.
//!
//! These types represent the documents, chunks, digests, and chat messages
//! that flow through the ingestion, digest, and retrieval pipelines.

use chrono::NaiveDate;

/// A chunk produced by the chunker before embedding and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub text: String,
    pub tokens: usize,
    pub title: String,
    pub section: String,
}

/// A versioned document row. Only one version per title is active;
/// superseded versions stay in the table with `is_active = false`.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source: String,
    pub version: i64,
    pub is_active: bool,
    pub created_at: i64,
}

/// A persisted chunk owned by exactly one document.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub doc_id: String,
    pub section: String,
    pub text: String,
    pub tokens: i64,
    pub meta: serde_json::Value,
}

/// An LLM-generated summary of one day's retained chat messages,
/// embedded and searchable like a document chunk. Never mutated after
/// creation.
#[derive(Debug, Clone)]
pub struct Digest {
    pub id: String,
    pub date: NaiveDate,
    pub text: String,
    pub meta: serde_json::Value,
}

/// An incoming chat message. `kept` messages are digest source material
/// and survive cleanup; the rest are transient.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub chat_id: i64,
    pub sender_id: i64,
    pub text: String,
    pub kept: bool,
    pub created_at: i64,
}

/// Where a search hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    DocChunk,
    Digest,
}

/// A single candidate returned by one of the hybrid search channels.
/// Only the channel that produced the hit fills in its score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub kind: HitKind,
    pub bm25_score: Option<f64>,
    pub vector_score: Option<f64>,
    pub meta: serde_json::Value,
}

/// A fused, ranked search result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub kind: HitKind,
    pub combined_score: f64,
    pub meta: serde_json::Value,
}

/// The three candidate lists produced by [`crate::repo::Repo::hybrid_search`],
/// in the fixed order the retrieval engine concatenates them.
#[derive(Debug, Clone, Default)]
pub struct HybridCandidates {
    pub lexical: Vec<SearchHit>,
    pub semantic: Vec<SearchHit>,
    pub digests: Vec<SearchHit>,
}

/// Output of one retrieval call: ranked context plus source labels.
#[derive(Debug, Clone)]
pub struct RetrievalOutput {
    pub context_chunks: Vec<String>,
    pub sources: Vec<String>,
    pub latency_ms: u64,
    pub total_results: usize,
}

/// Outcome of one day's digest generation.
#[derive(Debug, Clone)]
pub struct DigestOutcome {
    pub date: NaiveDate,
    pub digest_created: bool,
    pub digest_id: Option<String>,
    pub message_count: usize,
    pub error: Option<String>,
}

impl DigestOutcome {
    pub fn skipped(date: NaiveDate) -> Self {
        Self {
            date,
            digest_created: false,
            digest_id: None,
            message_count: 0,
            error: None,
        }
    }

    pub fn failed(date: NaiveDate, error: String) -> Self {
        Self {
            date,
            digest_created: false,
            digest_id: None,
            message_count: 0,
            error: Some(error),
        }
    }
}
