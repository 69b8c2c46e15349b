use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Message, Turn};

/// A persisted conversation: the full message list plus the bounded
/// context window that was live when it was archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub turn_window: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
