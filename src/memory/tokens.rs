//! Token accounting
//!
//! Counts are estimates; the engine only needs them to be deterministic and
//! monotonic. The overhead constants must match what the downstream prompt
//! actually costs, so they come from configuration.

use super::message::Message;
use crate::MemoryConfig;
use std::sync::Arc;

/// Approximate bytes per token for estimation
const APPROX_BYTES_PER_TOKEN: usize = 4;

/// Counts tokens in raw text
pub trait TextTokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Byte-length estimator. Any non-empty text costs at least one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl TextTokenizer for ApproxTokenizer {
    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(APPROX_BYTES_PER_TOKEN)
    }
}

/// Token oracle over strings, messages and whole windows
#[derive(Clone)]
pub struct TokenAccountant {
    tokenizer: Arc<dyn TextTokenizer>,
    per_message_overhead: usize,
    per_request_overhead: usize,
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAccountant")
            .field("per_message_overhead", &self.per_message_overhead)
            .field("per_request_overhead", &self.per_request_overhead)
            .finish()
    }
}

impl TokenAccountant {
    pub fn new(
        tokenizer: Arc<dyn TextTokenizer>,
        per_message_overhead: usize,
        per_request_overhead: usize,
    ) -> Self {
        Self {
            tokenizer,
            per_message_overhead,
            per_request_overhead,
        }
    }

    /// Accountant with the byte estimator and the configured overheads
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            Arc::new(ApproxTokenizer),
            config.per_message_overhead,
            config.per_request_overhead,
        )
    }

    pub fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    pub fn count_message(&self, message: &Message) -> usize {
        self.per_message_overhead + self.count(&message.content)
    }

    /// Sum of message costs plus the per-request overhead
    pub fn count_window(&self, messages: &[Message]) -> usize {
        self.count_messages(messages) + self.per_request_overhead
    }

    /// Sum of message costs without the per-request overhead
    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    pub fn per_message_overhead(&self) -> usize {
        self.per_message_overhead
    }
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_free() {
        let acct = TokenAccountant::default();
        assert_eq!(acct.count(""), 0);
        assert_eq!(acct.count("a"), 1);
        assert_eq!(acct.count("abcd"), 1);
        assert_eq!(acct.count("abcde"), 2);
    }

    #[test]
    fn test_monotonic() {
        let acct = TokenAccountant::default();
        let mut text = String::new();
        let mut last = 0;
        for _ in 0..50 {
            text.push_str("xy ");
            let n = acct.count(&text);
            assert!(n >= last);
            last = n;
        }
    }

    #[test]
    fn test_message_and_window_overheads() {
        let acct = TokenAccountant::new(Arc::new(ApproxTokenizer), 4, 3);
        let msg = Message::user("abcdefgh");
        assert_eq!(acct.count_message(&msg), 6);
        assert_eq!(acct.count_window(&[msg.clone(), msg]), 15);
        assert_eq!(acct.count_window(&[]), 3);
    }
}
