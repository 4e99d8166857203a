//! Language adapter boundary.
//!
//! The core never talks to a model provider directly; it hands a prompt plus
//! context to whatever implements [`LlmAdapter`]. Keeps the cognitive loop
//! testable (a mock adapter) and lets deployments swap providers without
//! touching core state.

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::Persona;
use crate::memory::MemoryEntry;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Worth retrying once (timeouts, rate limits, transport hiccups).
    #[error("transient adapter failure: {0}")]
    Transient(String),

    /// Not worth retrying (bad credentials, rejected input).
    #[error("permanent adapter failure: {0}")]
    Permanent(String),
}

/// Everything the adapter may see about the agent's current state.
#[derive(Debug, Clone)]
pub struct LlmContext {
    pub persona: Persona,
    pub mood_summary: String,
    pub recent_memories: Vec<MemoryEntry>,
}

/// External language model boundary.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn generate(&self, prompt: &str, context: &LlmContext) -> Result<String, LlmError>;
}

/// Deterministic adapter for development and tests: echoes the prompt through
/// the persona, no network.
pub struct MockLlm;

#[async_trait]
impl LlmAdapter for MockLlm {
    async fn generate(&self, prompt: &str, context: &LlmContext) -> Result<String, LlmError> {
        Ok(format!(
            "[{} | {}] {}",
            context.persona.name, context.mood_summary, prompt
        ))
    }
}
