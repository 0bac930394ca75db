//! Longmem - long-term memory for chat agents
//!
//! Keeps a conversation that grows without bound inside a fixed token budget:
//! - Detects when the window overflows the budget
//! - Evicts the oldest eligible turns and compresses them into summaries
//! - Indexes summaries for similarity recall (indexed strategy)
//! - Reassembles a bounded prompt from recent turns plus recalled memory

pub mod config;
pub mod llm;
pub mod memory;
pub mod service;

pub use config::{MemoryConfig, StrategyKind};
pub use memory::{
    process_memory, Budget, ConversationState, IndexedMemory, MemoryOutcome, MemoryStrategy,
    Message, Role, RollingSummaryMemory, TokenAccountant,
};
pub use service::{ChatRequest, ChatResponse, MemoryService};

/// Result type for Longmem operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur in Longmem
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Not enough tokens to summarize: {tokens} tokens left over a budget of {max_tokens}")]
    InsufficientBudget { tokens: usize, max_tokens: usize },

    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Summary store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid summary record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoryError {
    /// Whether the window returned alongside this error can still be sent
    /// to the model as is.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SummarizationFailed(_) | Self::EmbeddingFailed(_) | Self::StoreUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}
