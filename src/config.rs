use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_percent")]
    pub overlap_percent: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            overlap_percent: default_overlap_percent(),
        }
    }
}

fn default_min_tokens() -> usize {
    300
}
fn default_max_tokens() -> usize {
    800
}
fn default_overlap_percent() -> f64 {
    0.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// How many prior same-chat messages are merged into the query.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_messages: default_context_messages(),
        }
    }
}

fn default_top_k() -> i64 {
    8
}
fn default_context_messages() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            embed_model: default_embed_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
            max_answer_tokens: default_max_answer_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_timeout_secs() -> u64 {
    60
}
fn default_max_answer_tokens() -> u32 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct DigestConfig {
    /// UTC hour at which the daily digest job fires.
    #[serde(default = "default_digest_hour")]
    pub hour: u32,
    /// UTC hour on Sunday at which the weekly cleanup job fires.
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u32,
    /// Age in days past which non-kept messages are deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            hour: default_digest_hour(),
            cleanup_hour: default_cleanup_hour(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_digest_hour() -> u32 {
    2
}
fn default_cleanup_hour() -> u32 {
    3
}
fn default_retention_days() -> i64 {
    14
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.min_tokens > config.chunking.max_tokens {
        anyhow::bail!("chunking.min_tokens must be <= chunking.max_tokens");
    }
    if !(0.0..1.0).contains(&config.chunking.overlap_percent) {
        anyhow::bail!("chunking.overlap_percent must be in [0.0, 1.0)");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.digest.hour > 23 || config.digest.cleanup_hour > 23 {
        anyhow::bail!("digest hours must be in 0..=23");
    }
    if config.digest.retention_days < 1 {
        anyhow::bail!("digest.retention_days must be >= 1");
    }

    Ok(config)
}
