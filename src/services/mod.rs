pub mod chat;
pub mod limiter;
pub mod persistence;
pub mod segment;
pub mod store;
pub mod table;

pub use chat::{ChatSession, SubmitOutcome};
pub use limiter::CooldownController;
pub use persistence::{KeyValueStore, MemoryStore, SqliteStore};
pub use segment::{segment, SegmentCache};
pub use store::ConversationStore;
pub use table::{extract_table, TableExtract};
