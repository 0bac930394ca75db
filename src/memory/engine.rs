//! The strategy seam and the engine entry point.
//!
//! Both strategies take a window that may be over budget and hand back a
//! bounded one. Errors never cross `process_memory`: the caller always gets
//! a window, plus a tagged error when something went wrong.

use super::message::Message;
use crate::{MemoryConfig, MemoryError, Result, StrategyKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Token ceiling for one call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    pub max_total_tokens: usize,
    /// Share of `max_total_tokens` reserved for recalled memories
    pub memory_fraction: f64,
}

impl Budget {
    pub fn new(max_total_tokens: usize, memory_fraction: f64) -> Self {
        Self {
            max_total_tokens,
            memory_fraction,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_context_tokens, config.memory_fraction)
    }

    pub fn memory_tokens(&self) -> f64 {
        self.max_total_tokens as f64 * self.memory_fraction
    }
}

/// Per-conversation state carried between calls by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Digest of every chunk the rolling strategy has evicted so far
    #[serde(default)]
    pub rolling_summary: String,
}

impl ConversationState {
    pub fn with_rolling_summary(summary: impl Into<String>) -> Self {
        Self {
            rolling_summary: summary.into(),
        }
    }
}

/// What one engine call hands back
#[derive(Debug)]
pub struct MemoryOutcome {
    pub messages: Vec<Message>,
    pub tokens: usize,
    pub state: ConversationState,
    /// Memo of the newest message folded into a summary this call
    pub last_memo: Option<String>,
    pub error: Option<MemoryError>,
}

impl MemoryOutcome {
    /// The input, untouched
    pub fn unchanged(messages: &[Message], tokens: usize, state: &ConversationState) -> Self {
        Self {
            messages: messages.to_vec(),
            tokens,
            state: state.clone(),
            last_memo: None,
            error: None,
        }
    }

    /// The input, untouched, tagged with the failure that stopped the call
    pub fn failed(
        messages: &[Message],
        tokens: usize,
        state: &ConversationState,
        error: MemoryError,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::unchanged(messages, tokens, state)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A way of fitting an overflowing conversation into a budget
#[async_trait]
pub trait MemoryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Run the strategy once. `Err` means nothing was changed.
    async fn process(
        &self,
        messages: &[Message],
        current_tokens: usize,
        budget: Budget,
        state: &ConversationState,
    ) -> Result<MemoryOutcome>;
}

/// Fit `messages` into `budget` with the given strategy.
///
/// Under budget this is a no-op: no summarize, embed, or store calls.
pub async fn process_memory(
    strategy: &dyn MemoryStrategy,
    messages: &[Message],
    current_tokens: usize,
    budget: Budget,
    state: &ConversationState,
) -> MemoryOutcome {
    if current_tokens <= budget.max_total_tokens {
        debug!(
            "Context within budget ({} / {} tokens), no memory processing needed",
            current_tokens, budget.max_total_tokens
        );
        return MemoryOutcome::unchanged(messages, current_tokens, state);
    }

    match strategy.process(messages, current_tokens, budget, state).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{:?} memory failed: {}", strategy.kind(), e);
            MemoryOutcome::failed(messages, current_tokens, state, e)
        }
    }
}
