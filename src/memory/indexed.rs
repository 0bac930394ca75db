//! Indexed memory.
//!
//! Evicted chunks become discrete summary records in a similarity store.
//! Each call runs three phases:
//!   1. Summarize: when over budget, carve one chunk off the oldest turns,
//!      summarize and embed it, and append it to the store
//!   2. Recall: embed the most recent turns and pull the closest records,
//!      accepting them in rank order while they fit the memory sub-budget
//!   3. Assemble: prepend recalled memories, dropping the oldest turns if
//!      the result still overflows
//!
//! Recall failures degrade to "no memories this turn". A failed summarize
//! phase commits nothing and leaves the chunk in place for the next call.

use super::chunk::{Chunk, ChunkLimit, ChunkSelector};
use super::engine::{Budget, ConversationState, MemoryOutcome, MemoryStrategy};
use super::message::Message;
use super::store::{SummaryRecord, SummaryStore};
use super::summarizer::{summarize_or_original, Embedder, Summarizer};
use super::tokens::TokenAccountant;
use crate::{MemoryConfig, MemoryError, Result, StrategyKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Memo tagging the injected memory message
pub const INDEXED_MEMORY_MEMO: &str = "hypaMemory";

pub struct IndexedMemory {
    accountant: TokenAccountant,
    selector: ChunkSelector,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn SummaryStore>,
    max_chats_per_summary: usize,
    retained_recent: usize,
    top_k: usize,
    memory_tag: String,
    prompt: String,
}

impl IndexedMemory {
    pub fn new(
        config: &MemoryConfig,
        accountant: TokenAccountant,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn SummaryStore>,
    ) -> Self {
        Self {
            accountant,
            selector: ChunkSelector::from_config(config),
            summarizer,
            embedder,
            store,
            max_chats_per_summary: config.max_chats_per_summary,
            retained_recent: config.retained_recent_messages,
            top_k: config.top_k_candidates,
            memory_tag: config.memory_prompt_tag.clone(),
            prompt: config.llm.indexed_prompt.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SummaryStore> {
        &self.store
    }

    /// Evict one chunk into the store. `Ok(None)` when nothing is eligible.
    async fn summarize_oldest(&self, messages: &[Message]) -> Result<Option<Chunk>> {
        let chunk = self.selector.select(
            messages,
            0,
            ChunkLimit::messages(self.max_chats_per_summary),
            &self.accountant,
        );
        if chunk.is_empty() {
            debug!("No summarizable messages outside the retained window");
            return Ok(None);
        }

        let rendered = chunk
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let summary = summarize_or_original(self.summarizer.as_ref(), &rendered, &self.prompt).await;

        let embedding = self.embedder.embed(&summary).await.map_err(|e| match e {
            MemoryError::EmbeddingFailed(_) => e,
            other => MemoryError::EmbeddingFailed(other.to_string()),
        })?;
        if embedding.is_empty() {
            return Err(MemoryError::EmbeddingFailed("embedder returned an empty vector".into()));
        }

        let record = SummaryRecord::new(summary, embedding)?;
        let id = record.id.clone();
        self.store.insert(record).await.map_err(|e| match e {
            MemoryError::StoreUnavailable(_) => e,
            other => MemoryError::StoreUnavailable(other.to_string()),
        })?;

        info!(
            "Stored summary {} covering {} messages ({} tokens)",
            id,
            chunk.messages.len(),
            chunk.tokens
        );
        Ok(Some(chunk))
    }

    /// Records most similar to the recent turns that fit `budget` tokens,
    /// best first. Any failure yields no memories.
    async fn recall(&self, window: &[Message], budget: f64) -> Vec<String> {
        match self.store.is_empty().await {
            Ok(true) => return Vec::new(),
            Ok(false) => {}
            Err(e) => {
                warn!("Summary store unavailable, skipping recall: {}", e);
                return Vec::new();
            }
        }

        let recent_start = window.len().saturating_sub(self.retained_recent);
        let query = window[recent_start..]
            .iter()
            .filter(|m| !m.is_blank())
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if query.is_empty() {
            return Vec::new();
        }

        let embedding = match self.embedder.embed(&query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Query embedding failed, no memories recalled: {}", e);
                return Vec::new();
            }
        };

        let hits = match self.store.query(&embedding, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Summary store query failed, no memories recalled: {}", e);
                return Vec::new();
            }
        };

        let mut selected = Vec::new();
        let mut consumed = 0usize;
        for hit in hits {
            let tokens = self.accountant.count(&hit.text);
            if (consumed + tokens) as f64 > budget {
                break;
            }
            consumed += tokens;
            selected.push(hit.text);
        }

        debug!("Recalled {} memories ({} tokens)", selected.len(), consumed);
        selected
    }

    fn memory_message(&self, memories: &[String]) -> Option<Message> {
        if memories.is_empty() {
            return None;
        }
        let content = format!(
            "<{tag}>\n{}\n</{tag}>",
            memories.join("\n\n"),
            tag = self.memory_tag
        );
        Some(Message::system(content).with_memo(INDEXED_MEMORY_MEMO))
    }

    fn memory_cost(&self, memories: &[String]) -> usize {
        self.memory_message(memories)
            .map(|m| self.accountant.count_message(&m))
            .unwrap_or(0)
    }
}

#[async_trait]
impl MemoryStrategy for IndexedMemory {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hypa
    }

    async fn process(
        &self,
        messages: &[Message],
        current_tokens: usize,
        budget: Budget,
        state: &ConversationState,
    ) -> Result<MemoryOutcome> {
        let max_tokens = budget.max_total_tokens;
        let mut window = messages.to_vec();
        let mut last_memo = None;
        let mut error = None;

        if current_tokens > max_tokens {
            info!(
                "Context limit exceeded ({} / {} tokens), summarizing oldest chunk",
                current_tokens, max_tokens
            );
            match self.summarize_oldest(messages).await {
                Ok(Some(chunk)) => {
                    last_memo = chunk.last_memo().map(str::to_string);
                    window = chunk.carried;
                    window.extend_from_slice(&messages[chunk.next_start..]);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Summary not committed, chunk kept for next call: {}", e);
                    error = Some(e);
                }
            }
        }

        let mut memories = self.recall(&window, budget.memory_tokens()).await;
        let mut memory_tokens = self.memory_cost(&memories);

        let mut tokens = self.accountant.count_window(&window) + memory_tokens;
        let mut dropped = 0;
        while tokens > max_tokens && window.len() - dropped > 1 {
            tokens -= self.accountant.count_message(&window[dropped]);
            dropped += 1;
        }
        if dropped > 0 {
            warn!("Dropped {} oldest messages to stay within budget", dropped);
            window.drain(..dropped);
        }

        // the last turn is kept; recalled memories give way to it
        while tokens > max_tokens && !memories.is_empty() {
            memories.pop();
            let cost = self.memory_cost(&memories);
            tokens = tokens - memory_tokens + cost;
            memory_tokens = cost;
            debug!("Released lowest-ranked memory, now at {} tokens", tokens);
        }

        if let Some(message) = self.memory_message(&memories) {
            window.insert(0, message);
        }

        info!("Final context ready: {} tokens, {} messages", tokens, window.len());

        Ok(MemoryOutcome {
            messages: window,
            tokens,
            state: state.clone(),
            last_memo,
            error,
        })
    }
}
