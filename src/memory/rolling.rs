//! Rolling summary memory.
//!
//! One summary string per conversation. On overflow, chunks are carved off
//! the oldest messages, summarized, and appended to the summary until the
//! summary plus the remaining turns fit the budget:
//!   1. Fold the prior summary's cost into the running count
//!   2. Select a chunk capped at a fraction of the budget
//!   3. Summarize it and append the result to the rolling summary
//!   4. Repeat until under budget, or fail if nothing is left to carve
//!   5. Prepend the summary as a system message

use super::chunk::{ChunkLimit, ChunkSelector};
use super::engine::{Budget, ConversationState, MemoryOutcome, MemoryStrategy};
use super::message::{Message, Role};
use super::summarizer::{summarize_or_original, Summarizer};
use super::tokens::TokenAccountant;
use crate::{MemoryConfig, MemoryError, Result, StrategyKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Memo tagging the injected rolling summary message
pub const ROLLING_SUMMARY_MEMO: &str = "supaMemory";

pub struct RollingSummaryMemory {
    accountant: TokenAccountant,
    selector: ChunkSelector,
    summarizer: Arc<dyn Summarizer>,
    character_name: String,
    chunk_token_fraction: f64,
    prompt: String,
}

impl RollingSummaryMemory {
    pub fn new(config: &MemoryConfig, accountant: TokenAccountant, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            accountant,
            selector: ChunkSelector::from_config(config),
            summarizer,
            character_name: config.character_name.clone(),
            chunk_token_fraction: config.chunk_token_fraction,
            prompt: config.llm.rolling_prompt.clone(),
        }
    }

    /// Render a chunk as `label: content` paragraphs
    fn render(&self, messages: &[Message]) -> String {
        let mut text = String::new();
        for message in messages {
            let label = match message.role {
                Role::Assistant => self.character_name.as_str(),
                _ => "user",
            };
            text.push_str(&format!("{}: {}\n\n", label, message.content));
        }
        text
    }

    /// Cost of the injected summary message; nothing when there is no summary
    fn summary_cost(&self, summary: &str) -> usize {
        if summary.is_empty() {
            0
        } else {
            self.accountant.per_message_overhead() + self.accountant.count(summary)
        }
    }
}

#[async_trait]
impl MemoryStrategy for RollingSummaryMemory {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Supa
    }

    async fn process(
        &self,
        messages: &[Message],
        current_tokens: usize,
        budget: Budget,
        state: &ConversationState,
    ) -> Result<MemoryOutcome> {
        let max_tokens = budget.max_total_tokens;
        if current_tokens <= max_tokens {
            return Ok(MemoryOutcome::unchanged(messages, current_tokens, state));
        }

        info!(
            "Context limit exceeded ({} / {} tokens), starting rolling summarization",
            current_tokens, max_tokens
        );

        let limit = ChunkLimit::tokens((max_tokens as f64 * self.chunk_token_fraction) as usize);
        let mut summary = state.rolling_summary.trim().to_string();
        let mut raw_tokens = current_tokens;
        let mut remaining = messages;
        let mut carried = Vec::new();
        let mut last_memo = None;
        let mut total = raw_tokens + self.summary_cost(&summary);

        while total > max_tokens {
            let chunk = self.selector.select(remaining, 0, limit, &self.accountant);
            if chunk.is_empty() {
                warn!(
                    "No summarizable chunk left, still at {} / {} tokens",
                    total, max_tokens
                );
                return Err(MemoryError::InsufficientBudget {
                    tokens: total,
                    max_tokens,
                });
            }

            let rendered = self.render(&chunk.messages);
            let part = summarize_or_original(self.summarizer.as_ref(), &rendered, &self.prompt).await;
            summary = format!("{}\n\n{}", summary, part).trim().to_string();

            raw_tokens = raw_tokens.saturating_sub(chunk.tokens);
            if let Some(memo) = chunk.last_memo() {
                last_memo = Some(memo.to_string());
            }
            remaining = &remaining[chunk.next_start..];
            carried.extend(chunk.carried);
            total = raw_tokens + self.summary_cost(&summary);

            debug!(
                "Summarized {} messages ({} tokens), now at {} tokens",
                chunk.messages.len(),
                chunk.tokens,
                total
            );
        }

        let mut window = Vec::with_capacity(1 + carried.len() + remaining.len());
        window.push(Message::system(summary.clone()).with_memo(ROLLING_SUMMARY_MEMO));
        window.extend(carried);
        window.extend_from_slice(remaining);

        info!("Rolling summary ready: {} tokens, {} messages", total, window.len());

        Ok(MemoryOutcome {
            messages: window,
            tokens: total,
            state: ConversationState::with_rolling_summary(summary),
            last_memo,
            error: None,
        })
    }
}
