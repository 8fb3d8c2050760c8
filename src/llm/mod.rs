//! LLM provider plumbing: key pool, validation, client, curated catalog,
//! and the script-generation orchestrator.

use thiserror::Error;

pub mod catalog;
pub mod client;
pub mod orchestrator;
pub mod pool;
pub mod validator;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key available")]
    NoAvailableKey,

    #[error("invalid API key")]
    InvalidKey,

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected provider response: {0}")]
    Parse(String),
}
