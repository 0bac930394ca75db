//! Configuration for Longmem
//!
//! Loaded from a TOML file. Every field has a default so a partial file (or
//! no file at all) is valid.

use crate::{MemoryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prompt appended to a chunk for the rolling strategy
pub const ROLLING_SUMMARY_PROMPT: &str = "[Summarize the ongoing role story, It must also remove redundancy and unnecessary text and content from the output to reduce tokens for gpt3 and other sublanguage models]";

/// Prompt appended to a chunk for the indexed strategy
pub const INDEXED_SUMMARY_PROMPT: &str = "[Summarize the ongoing role story, focusing on key events, character progression, and unresolved plot points.]";

/// Which memory strategy handles an overflowing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// One rolling summary string per conversation
    #[serde(alias = "rolling")]
    Supa,
    /// Discrete summary records recalled by similarity
    #[default]
    #[serde(alias = "indexed")]
    Hypa,
}

impl std::str::FromStr for StrategyKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "supa" | "rolling" => Ok(Self::Supa),
            "hypa" | "indexed" => Ok(Self::Hypa),
            other => Err(MemoryError::Config(format!("unknown memory strategy: {other}"))),
        }
    }
}

/// Summarizer / embedder endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub summarization_model: String,
    pub embedding_model: String,
    pub rolling_prompt: String,
    pub indexed_prompt: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "LONGMEM_API_KEY".to_string(),
            summarization_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            rolling_prompt: ROLLING_SUMMARY_PROMPT.to_string(),
            indexed_prompt: INDEXED_SUMMARY_PROMPT.to_string(),
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Where summary records and room state live on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Summary records file, relative to `data_dir`
    pub store_file: String,
    /// Room state directory, relative to `data_dir`
    pub rooms_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".longmem"))
            .unwrap_or_else(|| PathBuf::from(".longmem"));
        Self {
            data_dir,
            store_file: "summaries.jsonl".to_string(),
            rooms_dir: "rooms".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store_file)
    }

    pub fn rooms_path(&self) -> PathBuf {
        self.data_dir.join(&self.rooms_dir)
    }
}

/// Memory engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub strategy: StrategyKind,

    /// Hard token ceiling for the assembled prompt
    pub max_context_tokens: usize,

    /// Label used for assistant turns when rendering chunks
    pub character_name: String,

    /// Message cap for one indexed-strategy chunk
    pub max_chats_per_summary: usize,

    /// Share of the budget reserved for recalled summary records
    pub memory_fraction: f64,

    /// Share of the budget one rolling-strategy chunk may consume
    pub chunk_token_fraction: f64,

    /// Most recent messages that are never summarized
    pub retained_recent_messages: usize,

    /// Records fetched from the store per retrieval
    pub top_k_candidates: usize,

    /// Memo marking a placeholder turn that is never summarized
    pub placeholder_memo: String,

    /// Tag wrapping recalled memories in the injected system message
    pub memory_prompt_tag: String,

    /// Tokens added per message for role/formatting metadata
    pub per_message_overhead: usize,

    /// Tokens added once per request
    pub per_request_overhead: usize,

    pub llm: LlmConfig,

    pub storage: StorageConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            max_context_tokens: 8192,
            character_name: "Risu".to_string(),
            max_chats_per_summary: 8,
            memory_fraction: 0.25,
            chunk_token_fraction: 1.0 / 3.0,
            retained_recent_messages: 3,
            top_k_candidates: 5,
            placeholder_memo: "NewChat".to_string(),
            memory_prompt_tag: "Past Events Summary".to_string(),
            per_message_overhead: 4,
            per_request_overhead: 3,
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| MemoryError::Config(format!("{}: {}", path.display(), e)))?;
            info!("Loaded config from {}", path.display());
            config
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(base_url) = std::env::var("LONGMEM_BASE_URL") {
            config.llm.base_url = base_url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Default config location: `~/.longmem/config.toml`
    pub fn default_path() -> PathBuf {
        StorageConfig::default().data_dir.join("config.toml")
    }

    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.max_context_tokens == 0 {
            return Err(MemoryError::Config("max_context_tokens must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.memory_fraction) {
            return Err(MemoryError::Config(format!(
                "memory_fraction must be within [0, 1], got {}",
                self.memory_fraction
            )));
        }
        if !(self.chunk_token_fraction > 0.0 && self.chunk_token_fraction <= 1.0) {
            return Err(MemoryError::Config(format!(
                "chunk_token_fraction must be within (0, 1], got {}",
                self.chunk_token_fraction
            )));
        }
        if self.max_chats_per_summary == 0 {
            return Err(MemoryError::Config("max_chats_per_summary must be positive".into()));
        }
        if self.top_k_candidates == 0 {
            return Err(MemoryError::Config("top_k_candidates must be positive".into()));
        }
        Ok(())
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_character_name(mut self, name: impl Into<String>) -> Self {
        self.character_name = name.into();
        self
    }

    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    pub fn with_max_chats_per_summary(mut self, count: usize) -> Self {
        self.max_chats_per_summary = count;
        self
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.storage.data_dir = dir;
        self
    }
}
