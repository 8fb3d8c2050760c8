//! Script-generation orchestrator.
//!
//! Picks a strategy from input size and the caller's swarm flag, assembles
//! prompts, and drives provider calls with pool bookkeeping. A failing batch
//! summary degrades to a marker line; a failing swarm agent degrades to the
//! single strategy over the full input. A partial script beats no script.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::store::{Speech, Store};

use super::client::{ChatMessage, OpenRouterClient};
use super::pool::{KeyErrorKind, KeyPool, DEFAULT_COOLDOWN};
use super::LlmError;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_DURATION_MINUTES: u32 = 10;
pub const DEFAULT_STYLE: &str = "professional";

const EXCERPT_CHARS: usize = 500;
const SWARM_MIN_SPEECHES: usize = 3;
const BATCH_FAILURE_MARKER: &str = "Batch processing failed:";

#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub model: String,
    pub style: String,
    pub duration_minutes: u32,
    pub batch_size: usize,
    pub use_swarm: bool,
    /// Explicit key supplied by the caller; wins over pool and environment.
    pub client_key: Option<String>,
    pub use_pool: bool,
}

impl ScriptRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            style: DEFAULT_STYLE.into(),
            duration_minutes: DEFAULT_DURATION_MINUTES,
            batch_size: DEFAULT_BATCH_SIZE,
            use_swarm: false,
            client_key: None,
            use_pool: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Single,
    Batched,
    Swarm,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutcome {
    pub script: String,
    pub strategy: Strategy,
    pub batch_processed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySource {
    Client,
    Pool,
    Env,
}

pub struct Orchestrator {
    client: OpenRouterClient,
    pool: Arc<KeyPool>,
    store: Store,
    env_key: Option<String>,
}

/// Strategy selection: swarm needs the flag and at least three speeches;
/// anything over the batch size gets batched; the rest is a single call.
fn select_strategy(count: usize, use_swarm: bool, batch_size: usize) -> Strategy {
    if use_swarm && count >= SWARM_MIN_SPEECHES {
        Strategy::Swarm
    } else if count > batch_size {
        Strategy::Batched
    } else {
        Strategy::Single
    }
}

/// Split into three contiguous, roughly equal slices.
fn three_slices(speeches: &[Speech]) -> [&[Speech]; 3] {
    let n = speeches.len();
    let a = n.div_ceil(3);
    let b = (n - a).div_ceil(2);
    let (first, rest) = speeches.split_at(a);
    let (second, third) = rest.split_at(b);
    [first, second, third]
}

fn excerpt(speech: &Speech) -> Option<String> {
    speech
        .transcript
        .as_deref()
        .map(|t| t.chars().take(EXCERPT_CHARS).collect::<String>())
        .filter(|t| !t.trim().is_empty())
}

fn speech_block(index: usize, speech: &Speech) -> String {
    let mut block = format!("{}. \"{}\"", index + 1, speech.title);
    if let Some(date) = &speech.date {
        block.push_str(&format!(" ({date})"));
    }
    if let Some(location) = &speech.rally_location {
        block.push_str(&format!(" — {location}"));
    }
    if let Some(text) = excerpt(speech) {
        block.push_str(&format!("\n   Excerpt: {text}"));
    }
    block
}

fn single_prompt(speeches: &[Speech], style: &str, duration_minutes: u32) -> String {
    let blocks: Vec<String> = speeches
        .iter()
        .enumerate()
        .map(|(i, s)| speech_block(i, s))
        .collect();
    format!(
        "Write a {duration_minutes}-minute podcast script in a {style} style \
         covering the following {count} archived speeches:\n\n{blocks}\n\n\
         Weave the material into one continuous narration. \
         Return only the script text.",
        count = speeches.len(),
        blocks = blocks.join("\n\n"),
    )
}

fn batch_summary_prompt(chunk: &[Speech]) -> String {
    let blocks: Vec<String> = chunk
        .iter()
        .enumerate()
        .map(|(i, s)| speech_block(i, s))
        .collect();
    format!(
        "Summarize the following {count} archived speeches in at most 200 words, \
         keeping the most quotable moments and shared themes:\n\n{blocks}",
        count = chunk.len(),
        blocks = blocks.join("\n\n"),
    )
}

fn synthesis_prompt(summaries: &[String], style: &str, duration_minutes: u32) -> String {
    let numbered: Vec<String> = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Summary {}: {}", i + 1, s))
        .collect();
    format!(
        "Using the batch summaries below, write a {duration_minutes}-minute podcast \
         script in a {style} style. Where a summary reports a processing failure, \
         acknowledge the gap briefly and move on.\n\n{summaries}\n\n\
         Return only the script text.",
        summaries = numbered.join("\n\n"),
    )
}

const AGENT_ROLES: [(&str, &str); 3] = [
    (
        "content analyst",
        "Identify the dominant themes, strongest quotes, and factual anchors in these speeches.",
    ),
    (
        "narrative designer",
        "Design a compelling narrative arc with transitions that connects these speeches.",
    ),
    (
        "audio producer",
        "Propose pacing, emphasis, and production notes for a spoken rendition of these speeches.",
    ),
];

fn agent_prompt(role_index: usize, slice: &[Speech]) -> Vec<ChatMessage> {
    let (role, task) = AGENT_ROLES[role_index];
    let blocks: Vec<String> = slice
        .iter()
        .enumerate()
        .map(|(i, s)| speech_block(i, s))
        .collect();
    vec![
        ChatMessage::system(format!("You are a {role} on a podcast production team.")),
        ChatMessage::user(format!("{task}\n\n{}", blocks.join("\n\n"))),
    ]
}

fn swarm_synthesis_prompt(
    analyses: &[String; 3],
    style: &str,
    duration_minutes: u32,
) -> String {
    format!(
        "Combine the three specialist analyses below into a {duration_minutes}-minute \
         podcast script in a {style} style.\n\n\
         Content analysis:\n{}\n\nNarrative design:\n{}\n\nProduction notes:\n{}\n\n\
         Return only the script text.",
        analyses[0], analyses[1], analyses[2],
    )
}

impl Orchestrator {
    pub fn new(
        client: OpenRouterClient,
        pool: Arc<KeyPool>,
        store: Store,
        env_key: Option<String>,
    ) -> Self {
        Self {
            client,
            pool,
            store,
            env_key,
        }
    }

    /// Key precedence: explicit client key → pool → environment key.
    fn select_key(
        &self,
        client_key: Option<&str>,
        use_pool: bool,
    ) -> Result<(String, KeySource), LlmError> {
        if let Some(key) = client_key {
            return Ok((key.to_string(), KeySource::Client));
        }
        if use_pool && !self.pool.is_empty() {
            if let Some(key) = self.pool.next() {
                return Ok((key, KeySource::Pool));
            }
            // Every pool key is cooling down; the env key may still serve.
        }
        if let Some(key) = &self.env_key {
            return Ok((key.clone(), KeySource::Env));
        }
        Err(LlmError::NoAvailableKey)
    }

    async fn record_use(&self, model: &str, elapsed_secs: f64, success: bool) {
        if let Err(e) = self.store.record_model_use(model, elapsed_secs, success).await {
            tracing::warn!(model, error = %e, "model usage bookkeeping failed");
        }
    }

    /// One provider call with pool bookkeeping. Rate limits and invalid keys
    /// fail upward; the caller is never retried inside a single request.
    async fn call_model(
        &self,
        req: &ScriptRequest,
        messages: Vec<ChatMessage>,
    ) -> Result<String, LlmError> {
        let (key, source) = self.select_key(req.client_key.as_deref(), req.use_pool)?;
        let started = Instant::now();
        let result = self
            .client
            .chat(&key, &req.model, &messages, Some(0.7), None)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(_) => {
                if source == KeySource::Pool {
                    self.pool.mark_success(&key);
                }
                self.record_use(&req.model, elapsed, true).await;
            }
            Err(LlmError::RateLimited) => {
                if source == KeySource::Pool {
                    self.pool.mark_rate_limited(&key, DEFAULT_COOLDOWN);
                }
                self.record_use(&req.model, elapsed, false).await;
            }
            Err(LlmError::InvalidKey) => {
                if source == KeySource::Pool {
                    self.pool.mark_error(&key, KeyErrorKind::InvalidKey);
                }
                self.record_use(&req.model, elapsed, false).await;
            }
            Err(_) => {
                if source == KeySource::Pool {
                    self.pool.mark_error(&key, KeyErrorKind::Other);
                }
                self.record_use(&req.model, elapsed, false).await;
            }
        }

        result
    }

    /// Generate a script for the given speeches, selecting the strategy
    /// from input size and the swarm flag.
    pub async fn generate(
        &self,
        speeches: &[Speech],
        req: &ScriptRequest,
    ) -> Result<ScriptOutcome, LlmError> {
        match select_strategy(speeches.len(), req.use_swarm, req.batch_size) {
            Strategy::Swarm => self.generate_swarm(speeches, req).await,
            Strategy::Batched => self.generate_batched(speeches, req).await,
            Strategy::Single => self.generate_single(speeches, req).await,
        }
    }

    async fn generate_single(
        &self,
        speeches: &[Speech],
        req: &ScriptRequest,
    ) -> Result<ScriptOutcome, LlmError> {
        let prompt = single_prompt(speeches, &req.style, req.duration_minutes);
        let script = self
            .call_model(req, vec![ChatMessage::user(prompt)])
            .await?;
        Ok(ScriptOutcome {
            script,
            strategy: Strategy::Single,
            batch_processed: false,
        })
    }

    async fn generate_batched(
        &self,
        speeches: &[Speech],
        req: &ScriptRequest,
    ) -> Result<ScriptOutcome, LlmError> {
        let mut summaries = Vec::new();
        for chunk in speeches.chunks(req.batch_size.max(1)) {
            match self
                .call_model(req, vec![ChatMessage::user(batch_summary_prompt(chunk))])
                .await
            {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    let titles: Vec<&str> = chunk.iter().map(|s| s.title.as_str()).collect();
                    tracing::warn!(error = %e, batch = titles.join(", "), "batch summary failed");
                    summaries.push(format!("{BATCH_FAILURE_MARKER} {}", titles.join(", ")));
                }
            }
        }

        let prompt = synthesis_prompt(&summaries, &req.style, req.duration_minutes);
        let script = self
            .call_model(req, vec![ChatMessage::user(prompt)])
            .await?;
        Ok(ScriptOutcome {
            script,
            strategy: Strategy::Batched,
            batch_processed: true,
        })
    }

    async fn generate_swarm(
        &self,
        speeches: &[Speech],
        req: &ScriptRequest,
    ) -> Result<ScriptOutcome, LlmError> {
        let slices = three_slices(speeches);

        // Total join: all three agents finish (success or error) before the
        // synthesis decision.
        let (content, narrative, audio) = tokio::join!(
            self.call_model(req, agent_prompt(0, slices[0])),
            self.call_model(req, agent_prompt(1, slices[1])),
            self.call_model(req, agent_prompt(2, slices[2])),
        );

        let analyses = match (content, narrative, audio) {
            (Ok(c), Ok(n), Ok(a)) => [c, n, a],
            (c, n, a) => {
                let failed: Vec<&str> = [("content", &c), ("narrative", &n), ("audio", &a)]
                    .iter()
                    .filter(|(_, r)| r.is_err())
                    .map(|(name, _)| *name)
                    .collect();
                tracing::warn!(
                    agents = failed.join(", "),
                    "swarm agent failed, falling back to single strategy"
                );
                return self.generate_single(speeches, req).await;
            }
        };

        let prompt = swarm_synthesis_prompt(&analyses, &req.style, req.duration_minutes);
        let script = self
            .call_model(req, vec![ChatMessage::user(prompt)])
            .await?;
        Ok(ScriptOutcome {
            script,
            strategy: Strategy::Swarm,
            batch_processed: false,
        })
    }

    /// Raw passthrough for the proxy endpoint: same key precedence and pool
    /// bookkeeping, body and response untouched.
    pub async fn proxy(
        &self,
        body: &serde_json::Value,
        client_key: Option<&str>,
        use_pool: bool,
    ) -> Result<serde_json::Value, LlmError> {
        let (key, source) = self.select_key(client_key, use_pool)?;
        let result = self.client.chat_raw(&key, body).await;

        if source == KeySource::Pool {
            match &result {
                Ok(_) => self.pool.mark_success(&key),
                Err(LlmError::RateLimited) => self.pool.mark_rate_limited(&key, DEFAULT_COOLDOWN),
                Err(LlmError::InvalidKey) => self.pool.mark_error(&key, KeyErrorKind::InvalidKey),
                Err(_) => self.pool.mark_error(&key, KeyErrorKind::Other),
            }
        }

        result
    }
}
