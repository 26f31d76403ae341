//! LLM provider abstraction and the OpenAI implementation.
//!
//! Defines the [`LlmProvider`] trait consumed by the embedding manager,
//! retrieval engine, and digest pipeline, plus:
//! - **[`OpenAiProvider`]** — calls the OpenAI embeddings and chat APIs
//!   with retry and backoff.
//! - **[`DisabledProvider`]** — returns errors; used when no provider is
//!   configured.
//!
//! # Retry strategy
//!
//! Up to `max_retries` attempts with exponential backoff doubling from a
//! 1-second base:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//!
//! Single calls carry a 30-second timeout, batch embedding 60 seconds
//! (both configurable).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

/// Approximate chars-per-token ratio for the counting heuristic.
const CHARS_PER_TOKEN: usize = 4;

/// Instruction for the daily digest summary.
const DIGEST_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise daily \
summaries. Summarize the key points and topics discussed in the provided messages. Focus on \
actionable insights and important information. Keep the summary under 300 words.";

/// Instruction for answering questions from retrieved context.
const QA_SYSTEM_PROMPT: &str = "You are a knowledgeable assistant. Answer the question using \
only the provided context. If the context does not contain the answer, say so briefly.";

/// Converts text to an approximate or exact token count.
///
/// The chunker depends only on this seam, so an exact tokenizer can be
/// slotted in without touching chunking logic.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Counts whitespace-separated words. Deterministic and cheap; used in
/// tests and anywhere an offline counter suffices.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// One message in a chat completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// The remote LLM collaborator: embeddings, chat completion, and token
/// counting. `embed_batch` must preserve input order.
#[async_trait]
pub trait LlmProvider: TokenCounter {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;
}

/// Summarize one day's kept messages under the fixed digest instruction.
pub async fn summarize_messages(
    provider: &dyn LlmProvider,
    message_texts: &[String],
    date: &str,
) -> Result<String> {
    let listing: String = message_texts
        .iter()
        .map(|m| format!("- {}", m))
        .collect::<Vec<_>>()
        .join("\n");

    let messages = [
        ChatMessage::system(DIGEST_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Create a daily digest for {} based on these messages:\n\n{}",
            date, listing
        )),
    ];

    provider.chat_completion(&messages, 500, 0.3).await
}

/// Answer a question from retrieved context chunks.
pub async fn answer_question(
    provider: &dyn LlmProvider,
    question: &str,
    context: &[String],
    max_answer_tokens: u32,
) -> Result<String> {
    let context_text: String = context
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Context {}: {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n\n");

    let messages = [
        ChatMessage::system(QA_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}",
            context_text, question
        )),
    ];

    provider
        .chat_completion(&messages, max_answer_tokens, 0.7)
        .await
}

/// Create the appropriate provider from configuration.
///
/// # Errors
///
/// Returns an error for unknown provider names, or for `"openai"` when
/// `OPENAI_API_KEY` is not in the environment.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op provider that always returns errors. Token counting still
/// works so chunking remains usable without credentials.
pub struct DisabledProvider;

impl TokenCounter for DisabledProvider {
    fn count_tokens(&self, text: &str) -> usize {
        approx_tokens(text)
    }
}

#[async_trait]
impl LlmProvider for DisabledProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("LLM provider is disabled")
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("LLM provider is disabled")
    }

    async fn chat_completion(
        &self,
        _messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

// ============ OpenAI Provider ============

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    embed_model: String,
    max_retries: u32,
    timeout: Duration,
    batch_timeout: Duration,
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            embed_model: config.embed_model.clone(),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
        })
    }

    /// POST a JSON body with retry/backoff, returning the parsed response.
    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let mut last_err = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OpenAI call failed after retries")))
    }

    async fn embed_request(&self, input: serde_json::Value, timeout: Duration) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.embed_model,
            "input": input,
        });

        let json = self
            .post_with_retry("https://api.openai.com/v1/embeddings", &body, timeout)
            .await?;

        parse_embeddings_response(&json)
    }
}

impl TokenCounter for OpenAiProvider {
    fn count_tokens(&self, text: &str) -> usize {
        approx_tokens(text)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embed_request(serde_json::json!(text), self.timeout)
            .await?;
        if vectors.is_empty() {
            bail!("Empty embedding response");
        }
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .embed_request(serde_json::json!(texts), self.batch_timeout)
            .await?;
        if vectors.len() != texts.len() {
            bail!(
                "Embedding response length mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            );
        }
        Ok(vectors)
    }

    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages
                .iter()
                .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
                .collect::<Vec<_>>(),
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let json = self
            .post_with_retry(
                "https://api.openai.com/v1/chat/completions",
                &body,
                self.timeout,
            )
            .await?;

        json.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
    }
}

/// Chars/4 token estimate; good enough to bound chunk sizes.
fn approx_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Extract the `data[].embedding` arrays in input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}
