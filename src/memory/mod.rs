//! Memory module for Longmem
//!
//! Token accounting, chunk selection, summary stores, and the two memory
//! strategies that keep a conversation inside its token budget.

mod chunk;
mod engine;
mod indexed;
mod message;
mod rolling;
mod room_store;
mod store;
mod summarizer;
mod tokens;

pub use chunk::{Chunk, ChunkLimit, ChunkSelector};
pub use engine::{process_memory, Budget, ConversationState, MemoryOutcome, MemoryStrategy};
pub use indexed::{IndexedMemory, INDEXED_MEMORY_MEMO};
pub use message::{Message, Role};
pub use rolling::{RollingSummaryMemory, ROLLING_SUMMARY_MEMO};
pub use room_store::{RoomState, RoomStore};
pub use store::{cosine_similarity, InMemoryStore, JsonlStore, ScoredSummary, SummaryRecord, SummaryStore};
pub use summarizer::{summarize_or_original, Embedder, Summarizer};
pub use tokens::{ApproxTokenizer, TextTokenizer, TokenAccountant};
