//! Request-level entry point.
//!
//! Counts the incoming window, skips memory work when it already fits,
//! otherwise routes it to the configured strategy and keeps the room's
//! rolling summary on disk between requests. Requests for the same room
//! are serialized; different rooms proceed independently.

use crate::llm::OpenAiClient;
use crate::memory::{
    process_memory, Budget, ConversationState, Embedder, IndexedMemory, JsonlStore, MemoryOutcome,
    Message, RollingSummaryMemory, RoomStore, Summarizer, SummaryStore, TokenAccountant,
};
use crate::{MemoryConfig, Result, StrategyKind};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// One prompt-assembly request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Overrides the configured strategy
    #[serde(default, alias = "memory_type")]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
    #[serde(default)]
    pub character_name: Option<String>,
    /// Caller-held state; when absent the room's saved state is used
    #[serde(default, alias = "room_data")]
    pub state: Option<ConversationState>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = Some(tokens);
        self
    }
}

/// Bounded window plus bookkeeping for the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub messages: Vec<Message>,
    pub final_tokens: usize,
    pub strategy: StrategyKind,
    /// Updated rolling summary, for callers that hold their own state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_memo: Option<String>,
    pub info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct MemoryService {
    config: MemoryConfig,
    accountant: TokenAccountant,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn SummaryStore>,
    rooms: RoomStore,
    room_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryService {
    pub fn new(
        config: MemoryConfig,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn SummaryStore>,
        rooms: RoomStore,
    ) -> Self {
        Self {
            accountant: TokenAccountant::from_config(&config),
            config,
            summarizer,
            embedder,
            store,
            rooms,
            room_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the HTTP client and on-disk stores described by `config`
    pub async fn open(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(OpenAiClient::new(&config.llm)?);
        let store = Arc::new(JsonlStore::open(&config.storage.store_path()).await?);
        let rooms = RoomStore::new(&config.storage.rooms_path()).await?;
        Ok(Self::new(config, client.clone(), client, store, rooms))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn accountant(&self) -> &TokenAccountant {
        &self.accountant
    }

    pub fn store(&self) -> &Arc<dyn SummaryStore> {
        &self.store
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    async fn room_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.room_locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Forget a room's lock once no other request holds or waits on it
    async fn release_room_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.room_locks.lock().await;
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    /// Fit a room's window into its budget
    pub async fn process_chat(&self, room_id: &str, request: ChatRequest) -> Result<ChatResponse> {
        let key = RoomStore::room_key(room_id);
        let lock = self.room_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.process_locked(room_id, request).await
        };
        self.release_room_lock(&key, lock).await;
        result
    }

    async fn process_locked(&self, room_id: &str, request: ChatRequest) -> Result<ChatResponse> {
        let mut config = self.config.clone();
        if let Some(strategy) = request.strategy {
            config.strategy = strategy;
        }
        if let Some(tokens) = request.max_context_tokens {
            config.max_context_tokens = tokens;
        }
        if let Some(name) = request.character_name {
            config.character_name = name;
        }
        config.validate()?;

        let strategy = config.strategy;
        let current_tokens = self.accountant.count_window(&request.messages);
        let budget = Budget::from_config(&config);

        if current_tokens <= budget.max_total_tokens {
            return Ok(ChatResponse {
                messages: request.messages,
                final_tokens: current_tokens,
                strategy,
                rolling_summary: None,
                last_memo: None,
                info: "Context window not exceeded, no memory processing needed.".to_string(),
                error: None,
            });
        }

        let mut room = self.rooms.load_or_default(room_id).await?;
        let state = request.state.unwrap_or_else(|| room.conversation_state());

        let outcome: MemoryOutcome = match strategy {
            StrategyKind::Supa => {
                let engine = RollingSummaryMemory::new(&config, self.accountant.clone(), self.summarizer.clone());
                process_memory(&engine, &request.messages, current_tokens, budget, &state).await
            }
            StrategyKind::Hypa => {
                let engine = IndexedMemory::new(
                    &config,
                    self.accountant.clone(),
                    self.summarizer.clone(),
                    self.embedder.clone(),
                    self.store.clone(),
                );
                process_memory(&engine, &request.messages, current_tokens, budget, &state).await
            }
        };

        if strategy == StrategyKind::Supa && outcome.is_ok() {
            room.rolling_summary = outcome.state.rolling_summary.clone();
            room.last_memo = outcome.last_memo.clone().or(room.last_memo);
            room.saved_at = Utc::now();
            self.rooms.save(&room).await?;
        }

        let info = match (&outcome.error, strategy) {
            (Some(_), _) => format!("{:?} memory could not complete", strategy),
            (None, StrategyKind::Supa) => format!(
                "SupaMemory processed. Last summarized message ID: {}",
                outcome.last_memo.as_deref().unwrap_or("")
            ),
            (None, StrategyKind::Hypa) => "HypaMemory processed.".to_string(),
        };
        info!(
            "Room {}: {} -> {} tokens ({:?})",
            room_id, current_tokens, outcome.tokens, strategy
        );

        Ok(ChatResponse {
            rolling_summary: (strategy == StrategyKind::Supa && outcome.is_ok())
                .then(|| outcome.state.rolling_summary.clone()),
            messages: outcome.messages,
            final_tokens: outcome.tokens,
            strategy,
            last_memo: outcome.last_memo,
            info,
            error: outcome.error.map(|e| e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Short;

    #[async_trait]
    impl Summarizer for Short {
        async fn summarize(&self, text: &str, _prompt: &str) -> Result<String> {
            Ok(text.chars().take(10).collect())
        }
    }

    #[async_trait]
    impl Embedder for Short {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    async fn service(dir: &TempDir) -> MemoryService {
        let config = MemoryConfig::default()
            .with_max_context_tokens(120)
            .with_data_dir(dir.path().to_path_buf());
        let rooms = RoomStore::new(&config.storage.rooms_path()).await.unwrap();
        MemoryService::new(config, Arc::new(Short), Arc::new(Short), Arc::new(InMemoryStore::new()), rooms)
    }

    fn turns(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("{i:03} {}", "w".repeat(60)))).collect()
    }

    #[tokio::test]
    async fn test_under_budget_passthrough() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let msgs = turns(2);

        let resp = svc.process_chat("r1", ChatRequest::new(msgs.clone())).await.unwrap();
        assert_eq!(resp.messages, msgs);
        assert!(resp.info.contains("not exceeded"));
        assert!(svc.store().is_empty().await.unwrap());
        assert!(svc.rooms().list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rolling_summary_is_saved_per_room() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let request = ChatRequest::new(turns(8)).with_strategy(StrategyKind::Supa);

        let resp = svc.process_chat("r1", request).await.unwrap();
        assert!(resp.error.is_none());
        assert!(resp.final_tokens <= 120);

        let room = svc.rooms().load("r1").await.unwrap().unwrap();
        assert_eq!(Some(room.rolling_summary), resp.rolling_summary);
    }

    #[tokio::test]
    async fn test_room_locks_are_released() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;

        let first = svc.room_lock(&RoomStore::room_key("guild/7")).await;
        let second = svc.room_lock(&RoomStore::room_key("guild:7")).await;
        assert!(Arc::ptr_eq(&first, &second));
        drop(second);

        let request = ChatRequest::new(turns(8)).with_strategy(StrategyKind::Supa);
        svc.process_chat("other:room", request).await.unwrap();
        assert_eq!(svc.room_locks.lock().await.len(), 1);

        svc.release_room_lock("guild_7", first).await;
        assert!(svc.room_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_indexed_request_override() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let request = ChatRequest::new(turns(8))
            .with_strategy(StrategyKind::Hypa)
            .with_max_context_tokens(100);

        let resp = svc.process_chat("r2", request).await.unwrap();
        assert_eq!(resp.strategy, StrategyKind::Hypa);
        assert!(resp.final_tokens <= 100);
        assert_eq!(svc.store().len().await.unwrap(), 1);
    }
}
