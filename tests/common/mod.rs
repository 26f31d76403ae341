//! Shared test harness: a deterministic mock provider and database
//! setup helpers.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use askbase::db;
use askbase::llm::{ChatMessage, LlmProvider, TokenCounter};
use askbase::migrate;
use askbase::repo::Repo;

pub const EMBED_DIM: usize = 8;

/// An offline [`LlmProvider`] with call counters.
///
/// Embeddings are a pure function of the input text, so identical texts
/// get cosine similarity 1.0 and retrieval ordering is reproducible.
/// Chat completions return a fixed string, or fail when any message
/// contains `fail_on` to simulate a provider outage.
pub struct MockProvider {
    pub embed_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub fail_on: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            embed_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn embed_count(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn batch_count(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn chat_count(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

/// Deterministic embedding: byte histogram folded into `EMBED_DIM`
/// buckets, offset so no text maps to the zero vector.
pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![1.0f32; EMBED_DIM];
    for (i, b) in text.bytes().enumerate() {
        v[i % EMBED_DIM] += b as f32 / 255.0;
    }
    v
}

impl TokenCounter for MockProvider {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(mock_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| mock_embedding(t)).collect())
    }

    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(marker) = &self.fail_on {
            if messages.iter().any(|m| m.content.contains(marker)) {
                bail!("mock provider failure on '{}'", marker);
            }
        }

        Ok("mock completion".to_string())
    }
}

/// Fresh migrated database in a temp directory. Keep the `TempDir`
/// alive for the duration of the test.
pub async fn setup_repo() -> Result<(TempDir, Repo)> {
    let dir = TempDir::new()?;
    let pool = db::connect(&dir.path().join("test.db")).await?;
    migrate::run_migrations(&pool).await?;
    Ok((dir, Repo::new(pool)))
}

/// Rewrite a message's `created_at`, for tests that need messages on
/// past days.
pub async fn backdate_message(repo: &Repo, message_id: &str, timestamp: i64) -> Result<()> {
    sqlx::query("UPDATE messages SET created_at = ? WHERE id = ?")
        .bind(timestamp)
        .bind(message_id)
        .execute(repo.pool())
        .await?;
    Ok(())
}
