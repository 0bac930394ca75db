//! Chunk selection: which of the oldest messages get summarized next.
//!
//! A chunk is a contiguous run of the window starting at a cursor. System,
//! blank, and placeholder turns inside that run are never summarized; they
//! are handed back as `carried` so the engine can keep them verbatim. The
//! last `retained_recent` messages of the whole window are never selected.

use super::message::Message;
use super::tokens::TokenAccountant;
use crate::MemoryConfig;

/// Caps on one chunk. Unset caps are unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkLimit {
    pub max_messages: Option<usize>,
    pub max_tokens: Option<usize>,
}

impl ChunkLimit {
    pub fn messages(max: usize) -> Self {
        Self {
            max_messages: Some(max),
            max_tokens: None,
        }
    }

    pub fn tokens(max: usize) -> Self {
        Self {
            max_messages: None,
            max_tokens: Some(max),
        }
    }
}

/// Messages picked for summarization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Turns to summarize, oldest first
    pub messages: Vec<Message>,
    /// Non-summarizable turns passed over before the last selected one
    pub carried: Vec<Message>,
    /// Index just past the last selected message
    pub next_start: usize,
    /// Raw token cost of `messages`
    pub tokens: usize,
}

impl Chunk {
    fn empty(start: usize) -> Self {
        Self {
            next_start: start,
            ..Self::default()
        }
    }

    /// An empty chunk means the window cannot shrink any further
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Memo of the newest summarized message
    pub fn last_memo(&self) -> Option<&str> {
        self.messages.last().and_then(|m| m.memo())
    }
}

#[derive(Debug, Clone)]
pub struct ChunkSelector {
    retained_recent: usize,
    placeholder_memo: String,
}

impl ChunkSelector {
    pub fn new(retained_recent: usize, placeholder_memo: impl Into<String>) -> Self {
        Self {
            retained_recent,
            placeholder_memo: placeholder_memo.into(),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.retained_recent_messages, config.placeholder_memo.clone())
    }

    /// Whether a message may be folded into a summary
    pub fn is_summarizable(&self, message: &Message) -> bool {
        if message.is_system() || message.is_blank() {
            return false;
        }
        let placeholder = self.placeholder_memo.as_str();
        message.memo() != Some(placeholder) && message.content.trim() != placeholder
    }

    /// Select the longest eligible chunk of `messages[start..]`.
    ///
    /// The first eligible message is always admitted even if it alone
    /// exceeds `max_tokens`, otherwise an oversized turn could never be
    /// summarized.
    pub fn select(
        &self,
        messages: &[Message],
        start: usize,
        limit: ChunkLimit,
        accountant: &TokenAccountant,
    ) -> Chunk {
        let end = messages.len().saturating_sub(self.retained_recent);
        let mut chunk = Chunk::empty(start);
        let mut passed_over = Vec::new();

        for (i, message) in messages.iter().enumerate().take(end).skip(start) {
            if !self.is_summarizable(message) {
                passed_over.push(message.clone());
                continue;
            }

            if let Some(max) = limit.max_messages {
                if chunk.messages.len() >= max {
                    break;
                }
            }

            let cost = accountant.count_message(message);
            if let Some(max) = limit.max_tokens {
                if !chunk.is_empty() && chunk.tokens + cost > max {
                    break;
                }
            }

            chunk.carried.append(&mut passed_over);
            chunk.messages.push(message.clone());
            chunk.tokens += cost;
            chunk.next_start = i + 1;
        }

        chunk
    }
}
