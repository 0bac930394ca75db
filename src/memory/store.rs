//! Summary record stores for the indexed strategy.
//!
//! Records are append-only. A record is only ever inserted with both its
//! text and its embedding, so a reader never sees a half-written entry.

use crate::{MemoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// One compressed chunk plus its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl SummaryRecord {
    /// Build a record with a fresh id. Text and embedding must both be present.
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("summary text is empty".into()));
        }
        if embedding.is_empty() {
            return Err(MemoryError::InvalidRecord("embedding is empty".into()));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            embedding,
            created_at: Utc::now(),
        })
    }
}

/// A query hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSummary {
    pub text: String,
    pub score: f32,
}

/// Similarity-searchable, append-only record store
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn insert(&self, record: SummaryRecord) -> Result<()>;

    /// Top `k` records by similarity, best first
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredSummary>>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Cosine similarity; mismatched or zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

fn rank(records: &[SummaryRecord], embedding: &[f32], k: usize, min_similarity: Option<f32>) -> Vec<ScoredSummary> {
    let mut scored: Vec<ScoredSummary> = records
        .iter()
        .map(|r| ScoredSummary {
            text: r.text.clone(),
            score: cosine_similarity(&r.embedding, embedding),
        })
        .filter(|s| min_similarity.map_or(true, |min| s.score >= min))
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

/// Records held in memory for the life of the process
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<SummaryRecord>>,
    min_similarity: Option<f32>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop hits scoring below `min`
    pub fn with_min_similarity(mut self, min: f32) -> Self {
        self.min_similarity = Some(min);
        self
    }

    fn from_records(records: Vec<SummaryRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            min_similarity: None,
        }
    }
}

#[async_trait]
impl SummaryStore for InMemoryStore {
    async fn insert(&self, record: SummaryRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredSummary>> {
        let records = self.records.read().await;
        Ok(rank(&records, embedding, k, self.min_similarity))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

/// Durable store: one JSON record per line, reloaded on open.
///
/// A record becomes visible to queries only after its line is on disk.
pub struct JsonlStore {
    path: PathBuf,
    index: InMemoryStore,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut records = Vec::new();
        if path.exists() {
            let content = fs::read_to_string(path).await?;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SummaryRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping malformed record at {}:{}: {}", path.display(), line_no + 1, e),
                }
            }
        }

        info!("Summary store '{}' loaded with {} entries", path.display(), records.len());

        Ok(Self {
            path: path.to_path_buf(),
            index: InMemoryStore::from_records(records),
            write_lock: Mutex::new(()),
        })
    }

    async fn append_line(&self, record: &SummaryRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for JsonlStore {
    async fn insert(&self, record: SummaryRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append_line(&record)
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("{}: {}", self.path.display(), e)))?;
        debug!("Appended summary {} to {}", record.id, self.path.display());
        self.index.insert(record).await
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredSummary>> {
        self.index.query(embedding, k).await
    }

    async fn len(&self) -> Result<usize> {
        self.index.len().await
    }
}
