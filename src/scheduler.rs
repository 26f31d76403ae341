//! Timer-driven jobs: the daily digest and the weekly message cleanup.
//!
//! The [`Scheduler`] is an explicitly owned service constructed at
//! process start; it holds the job handles and nothing lives in
//! globals. Each named job is one sequential loop — the next run cannot
//! start before the previous returns — which gives at most one
//! concurrent execution per job id. The two jobs do not coordinate with
//! each other, and manual `digest run` / `cleanup` invocations are
//! likewise independent of the timers.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db;
use crate::digest::{yesterday, DigestPipeline};
use crate::llm::{self, LlmProvider};
use crate::repo::Repo;

const DAILY_DIGEST_JOB: &str = "daily_digest";
const WEEKLY_CLEANUP_JOB: &str = "weekly_cleanup";

pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn both job loops and return the service holding their
    /// handles.
    pub fn start(config: Config, repo: Arc<Repo>, provider: Arc<dyn LlmProvider>) -> Self {
        let digest_hour = config.digest.hour;
        let cleanup_hour = config.digest.cleanup_hour;
        let retention_days = config.digest.retention_days;

        let digest_repo = Arc::clone(&repo);
        let digest_provider = Arc::clone(&provider);
        let digest_handle = tokio::spawn(async move {
            tracing::info!(job = DAILY_DIGEST_JOB, hour = digest_hour, "job scheduled");
            loop {
                let next = next_daily(Utc::now(), digest_hour);
                sleep_until(next).await;

                let pipeline = DigestPipeline::new(digest_provider.as_ref(), &digest_repo);
                match pipeline.generate_daily_digest(yesterday()).await {
                    Ok(outcome) => tracing::info!(
                        job = DAILY_DIGEST_JOB,
                        date = %outcome.date,
                        created = outcome.digest_created,
                        messages = outcome.message_count,
                        "digest job finished"
                    ),
                    Err(e) => {
                        tracing::warn!(job = DAILY_DIGEST_JOB, error = %e, "digest job failed")
                    }
                }
            }
        });

        let cleanup_repo = Arc::clone(&repo);
        let cleanup_provider = Arc::clone(&provider);
        let cleanup_handle = tokio::spawn(async move {
            tracing::info!(job = WEEKLY_CLEANUP_JOB, hour = cleanup_hour, "job scheduled");
            loop {
                let next = next_weekly_sunday(Utc::now(), cleanup_hour);
                sleep_until(next).await;

                let pipeline = DigestPipeline::new(cleanup_provider.as_ref(), &cleanup_repo);
                match pipeline.cleanup_old_messages(retention_days).await {
                    Ok(deleted) => tracing::info!(
                        job = WEEKLY_CLEANUP_JOB,
                        deleted,
                        "cleanup job finished"
                    ),
                    Err(e) => {
                        tracing::warn!(job = WEEKLY_CLEANUP_JOB, error = %e, "cleanup job failed")
                    }
                }
            }
        });

        Self {
            handles: vec![digest_handle, cleanup_handle],
        }
    }

    /// Stop both job loops. In-flight provider calls are not
    /// interrupted gracefully; abort is immediate.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

async fn sleep_until(when: DateTime<Utc>) {
    let now = Utc::now();
    if when > now {
        let wait = (when - now).num_milliseconds().max(0) as u64;
        tokio::time::sleep(Duration::from_millis(wait)).await;
    }
}

// Hours come from config, which rejects anything outside 0..24; the
// midnight fallback only covers the Option API.
fn fire_time(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default()
}

/// Next occurrence of `hour:00:00` UTC strictly after `now`.
fn next_daily(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let candidate = Utc.from_utc_datetime(&now.date_naive().and_time(fire_time(hour)));
    if candidate > now {
        candidate
    } else {
        candidate + ChronoDuration::days(1)
    }
}

/// Next Sunday `hour:00:00` UTC strictly after `now`.
fn next_weekly_sunday(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let days_from_sunday = now.date_naive().weekday().num_days_from_sunday() as i64;
    let this_sunday = now.date_naive() - ChronoDuration::days(days_from_sunday);
    let candidate = Utc.from_utc_datetime(&this_sunday.and_time(fire_time(hour)));
    if candidate > now {
        candidate
    } else {
        candidate + ChronoDuration::weeks(1)
    }
}

/// `askbase schedule` — run both timer jobs until interrupted.
pub async fn run_schedule(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let repo = Arc::new(Repo::new(pool));
    let provider: Arc<dyn LlmProvider> = Arc::from(llm::create_provider(&config.llm)?);

    let scheduler = Scheduler::start(config.clone(), repo, provider);
    tracing::info!(
        "scheduler running (digest daily at {:02}:00 UTC, cleanup Sundays at {:02}:00 UTC)",
        config.digest.hour,
        config.digest.cleanup_hour
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down scheduler");
    scheduler.shutdown();

    Ok(())
}
