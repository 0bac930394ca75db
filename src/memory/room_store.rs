//! Per-room conversation state.
//!
//! The engines are stateless across calls; the rolling summary a room has
//! accumulated lives here between requests, one file per room:
//!   {rooms_dir}/{room_id}.json

use super::engine::ConversationState;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Saved state of one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub room_id: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub rolling_summary: String,
    /// Memo of the newest message folded into a summary
    #[serde(default)]
    pub last_memo: Option<String>,
}

impl RoomState {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            saved_at: Utc::now(),
            rolling_summary: String::new(),
            last_memo: None,
        }
    }

    pub fn conversation_state(&self) -> ConversationState {
        ConversationState::with_rolling_summary(self.rolling_summary.clone())
    }
}

/// Manages per-room state files
pub struct RoomStore {
    rooms_dir: PathBuf,
}

impl RoomStore {
    /// Create a new room store. Creates the directory if needed.
    pub async fn new(rooms_dir: &Path) -> Result<Self> {
        fs::create_dir_all(rooms_dir).await?;
        Ok(Self {
            rooms_dir: rooms_dir.to_path_buf(),
        })
    }

    pub async fn save(&self, state: &RoomState) -> Result<()> {
        let path = self.room_path(&state.room_id);
        let content = serde_json::to_string_pretty(state)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!("Saved room state for {}", state.room_id);
        Ok(())
    }

    /// Load a room's state. Returns None if nothing was saved or the file
    /// cannot be parsed.
    pub async fn load(&self, room_id: &str) -> Result<Option<RoomState>> {
        let path = self.room_path(room_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str::<RoomState>(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!("Failed to parse room file for {}: {}", room_id, e);
                Ok(None)
            }
        }
    }

    /// Load a room's state, or a blank one
    pub async fn load_or_default(&self, room_id: &str) -> Result<RoomState> {
        Ok(self
            .load(room_id)
            .await?
            .unwrap_or_else(|| RoomState::new(room_id)))
    }

    pub async fn remove(&self, room_id: &str) -> Result<bool> {
        let path = self.room_path(room_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        info!("Removed room state for {}", room_id);
        Ok(true)
    }

    /// List all saved room ids (sanitized form)
    pub async fn list_rooms(&self) -> Result<Vec<String>> {
        let mut rooms = Vec::new();
        let mut entries = fs::read_dir(&self.rooms_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(room_id) = name.strip_suffix(".json") {
                    rooms.push(room_id.to_string());
                }
            }
        }
        rooms.sort();
        Ok(rooms)
    }

    /// File stem for a room id. Ids that differ only in characters outside
    /// `[A-Za-z0-9_-]` share one file.
    pub fn room_key(room_id: &str) -> String {
        room_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn room_path(&self, room_id: &str) -> PathBuf {
        self.rooms_dir.join(format!("{}.json", Self::room_key(room_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = RoomStore::new(&dir.path().join("rooms")).await.unwrap();

        assert!(store.load("general").await.unwrap().is_none());

        let mut state = RoomState::new("general");
        state.rolling_summary = "They met at the inn.".to_string();
        state.last_memo = Some("m7".to_string());
        store.save(&state).await.unwrap();

        let loaded = store.load("general").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.conversation_state().rolling_summary, "They met at the inn.");
    }

    #[tokio::test]
    async fn test_room_ids_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = RoomStore::new(dir.path()).await.unwrap();

        store.save(&RoomState::new("guild/123:chan")).await.unwrap();
        assert_eq!(store.list_rooms().await.unwrap(), vec!["guild_123_chan".to_string()]);
        assert!(store.load("guild/123:chan").await.unwrap().is_some());
        assert!(store.remove("guild/123:chan").await.unwrap());
        assert!(!store.remove("guild/123:chan").await.unwrap());
        assert_eq!(RoomStore::room_key("guild:123/chan"), "guild_123_chan");
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = RoomStore::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        assert!(store.load("broken").await.unwrap().is_none());
        let fresh = store.load_or_default("broken").await.unwrap();
        assert!(fresh.rolling_summary.is_empty());
    }
}
