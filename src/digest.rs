//! Daily chat digest generation and message cleanup.
//!
//! Converts one day's kept messages into a summarized, embedded digest
//! document, and prunes transient messages past their retention window.
//! Backfills over a date range record each day's failure in that day's
//! result entry instead of aborting the remaining days.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::BTreeSet;

use crate::config::Config;
use crate::db;
use crate::embed::EmbeddingManager;
use crate::llm::{self, LlmProvider};
use crate::models::DigestOutcome;
use crate::repo::Repo;

pub struct DigestPipeline<'a> {
    provider: &'a dyn LlmProvider,
    repo: &'a Repo,
}

impl<'a> DigestPipeline<'a> {
    pub fn new(provider: &'a dyn LlmProvider, repo: &'a Repo) -> Self {
        Self { provider, repo }
    }

    /// Summarize, embed, and persist the digest for one date.
    ///
    /// A date with zero kept messages is a no-op: no LLM call, no
    /// persistence, `digest_created = false`.
    pub async fn generate_daily_digest(&self, date: NaiveDate) -> Result<DigestOutcome> {
        let messages = self.repo.get_kept_messages_for_digest(date).await?;

        if messages.is_empty() {
            return Ok(DigestOutcome::skipped(date));
        }

        let texts: Vec<String> = messages.iter().map(|m| m.text.clone()).collect();
        let summary = llm::summarize_messages(self.provider, &texts, &date.to_string()).await?;

        let chat_ids: BTreeSet<i64> = messages.iter().map(|m| m.chat_id).collect();
        let sender_count = messages
            .iter()
            .map(|m| m.sender_id)
            .collect::<BTreeSet<_>>()
            .len();

        let meta = serde_json::json!({
            "message_count": messages.len(),
            "chat_ids": chat_ids.iter().collect::<Vec<_>>(),
            "sender_count": sender_count,
        });

        let manager = EmbeddingManager::new(self.provider, self.repo);
        let digest = manager.embed_digest(&summary, date, &meta).await?;

        Ok(DigestOutcome {
            date,
            digest_created: true,
            digest_id: Some(digest.id),
            message_count: messages.len(),
            error: None,
        })
    }

    /// Sequential per-day backfill over `[start, end]`. One day's
    /// failure is recorded in its entry and never aborts the rest.
    pub async fn generate_digest_for_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DigestOutcome>> {
        let mut results = Vec::new();
        let mut date = start;

        while date <= end {
            match self.generate_daily_digest(date).await {
                Ok(outcome) => results.push(outcome),
                Err(e) => {
                    tracing::warn!(date = %date, error = %e, "digest generation failed");
                    results.push(DigestOutcome::failed(date, e.to_string()));
                }
            }
            date += Duration::days(1);
        }

        Ok(results)
    }

    /// Delete non-kept messages older than `days`. Kept messages are
    /// never deleted regardless of age. Returns the deleted count.
    pub async fn cleanup_old_messages(&self, days: i64) -> Result<u64> {
        let cutoff = (Utc::now() - Duration::days(days)).timestamp();
        self.repo.cleanup_messages(cutoff).await
    }
}

/// Default digest target: the previous UTC calendar day.
pub fn yesterday() -> NaiveDate {
    Utc::now().date_naive() - Duration::days(1)
}

// ============ CLI entry points ============

/// `askbase digest run` — generate one day's digest (yesterday by
/// default). Errors propagate to the caller.
pub async fn run_digest(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(yesterday);

    let pool = db::connect(&config.db.path).await?;
    let repo = Repo::new(pool);
    let provider = llm::create_provider(&config.llm)?;
    let pipeline = DigestPipeline::new(provider.as_ref(), &repo);

    let outcome = pipeline.generate_daily_digest(date).await?;
    print_outcome(&outcome);

    repo.pool().close().await;
    Ok(())
}

/// `askbase digest backfill` — per-day digests over a date range.
pub async fn run_backfill(config: &Config, start: NaiveDate, end: NaiveDate) -> Result<()> {
    if end < start {
        anyhow::bail!("backfill end date is before start date");
    }

    let pool = db::connect(&config.db.path).await?;
    let repo = Repo::new(pool);
    let provider = llm::create_provider(&config.llm)?;
    let pipeline = DigestPipeline::new(provider.as_ref(), &repo);

    let outcomes = pipeline.generate_digest_for_date_range(start, end).await?;
    for outcome in &outcomes {
        print_outcome(outcome);
    }
    let created = outcomes.iter().filter(|o| o.digest_created).count();
    println!("backfill: {} of {} days produced a digest", created, outcomes.len());

    repo.pool().close().await;
    Ok(())
}

/// `askbase cleanup` — delete transient messages past retention.
pub async fn run_cleanup(config: &Config, days: Option<i64>) -> Result<()> {
    let days = days.unwrap_or(config.digest.retention_days);

    let pool = db::connect(&config.db.path).await?;
    let repo = Repo::new(pool);
    let provider = llm::create_provider(&config.llm)?;
    let pipeline = DigestPipeline::new(provider.as_ref(), &repo);

    let deleted = pipeline.cleanup_old_messages(days).await?;
    println!("cleanup: deleted {} messages older than {} days", deleted, days);

    repo.pool().close().await;
    Ok(())
}

fn print_outcome(outcome: &DigestOutcome) {
    match (&outcome.error, outcome.digest_created) {
        (Some(e), _) => println!("{}: failed ({})", outcome.date, e),
        (None, true) => println!(
            "{}: digest created from {} messages",
            outcome.date, outcome.message_count
        ),
        (None, false) => println!("{}: no kept messages, skipped", outcome.date),
    }
}
