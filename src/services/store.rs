use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::models::{Conversation, Message, Role, Turn};
use crate::services::persistence::KeyValueStore;

/// Turns kept in the upstream context window; oldest dropped first.
pub const TURN_WINDOW_CAP: usize = 20;

/// Archived conversations kept; least-recently-updated evicted first.
pub const HISTORY_CAP: usize = 50;

const TITLE_MAX_CHARS: usize = 50;
const PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

mod keys {
    pub const MESSAGES: &str = "assistant_messages";
    pub const TURN_WINDOW: &str = "assistant_turn_window";
    pub const HISTORY: &str = "assistant_history";
    pub const ACTIVE_ID: &str = "assistant_active_id";
}

#[derive(Debug, Clone)]
struct ActiveConversation {
    /// Allocated on the first appended message, not before.
    id: Option<String>,
    /// Derived on first persist from the first user message.
    title: Option<String>,
    messages: Vec<Message>,
    turn_window: Vec<Turn>,
    next_message_id: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ActiveConversation {
    fn empty() -> Self {
        let now = Utc::now();
        Self {
            id: None,
            title: None,
            messages: Vec::new(),
            turn_window: Vec::new(),
            next_message_id: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn from_stored(conv: Conversation) -> Self {
        let next_message_id = conv.messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        Self {
            id: Some(conv.id),
            title: Some(conv.title),
            messages: conv.messages,
            turn_window: conv.turn_window,
            next_message_id,
            created_at: conv.created_at,
            updated_at: conv.updated_at,
        }
    }
}

#[derive(Debug)]
struct StoreState {
    active: ActiveConversation,
    history: Vec<Conversation>,
    dirty: bool,
}

/// Everything written to the backend in one flush.
struct PersistSnapshot {
    messages: String,
    turn_window: String,
    history: String,
    active_id: Option<String>,
}

/// Owns the active message list, the bounded turn window, and the capped
/// conversation history.
///
/// Appends mark the store dirty and (re)arm a one-shot 1 s debounce that
/// performs the actual write: the old timer is cancelled, never stacked.
/// Persistence failures are logged and never surfaced.
pub struct ConversationStore {
    state: Mutex<StoreState>,
    kv: Arc<dyn KeyValueStore>,
    debounce: Mutex<Option<CancellationToken>>,
}

impl ConversationStore {
    /// Restore state from the backend. Unreadable or missing values fall
    /// back to defaults; a degraded conversation is never fatal.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Arc<Self> {
        let messages: Vec<Message> = read_json(kv.as_ref(), keys::MESSAGES).await;
        let turn_window: Vec<Turn> = read_json(kv.as_ref(), keys::TURN_WINDOW).await;
        let history: Vec<Conversation> = read_json(kv.as_ref(), keys::HISTORY).await;
        let active_id: Option<String> = match kv.get(keys::ACTIVE_ID).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to read {}: {}", keys::ACTIVE_ID, e);
                None
            }
        };

        let mut active = ActiveConversation::empty();
        active.next_message_id = messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        active.messages = messages;
        active.turn_window = turn_window;
        if let Some(id) = active_id {
            if let Some(stored) = history.iter().find(|c| c.id == id) {
                active.title = Some(stored.title.clone());
                active.created_at = stored.created_at;
                active.updated_at = stored.updated_at;
            }
            active.id = Some(id);
        }

        Arc::new(Self {
            state: Mutex::new(StoreState {
                active,
                history,
                dirty: false,
            }),
            kv,
            debounce: Mutex::new(None),
        })
    }

    /// Append to the active conversation and arm the debounced persist.
    pub fn append_message(
        self: &Arc<Self>,
        role: Role,
        text: impl Into<String>,
        attached_file: Option<String>,
    ) -> Message {
        let message = {
            let mut state = self.state.lock().unwrap();
            let active = &mut state.active;
            if active.id.is_none() {
                active.id = Some(uuid::Uuid::new_v4().to_string());
                active.created_at = Utc::now();
            }
            let mut message = Message::new(active.next_message_id, role, text);
            message.attached_file = attached_file;
            active.next_message_id += 1;
            active.updated_at = message.timestamp;
            active.messages.push(message.clone());
            message
        };
        self.mark_dirty();
        message
    }

    /// Append a turn to the bounded context window, dropping from the
    /// front past the cap.
    pub fn push_turn(self: &Arc<Self>, turn: Turn) {
        {
            let mut state = self.state.lock().unwrap();
            let window = &mut state.active.turn_window;
            window.push(turn);
            while window.len() > TURN_WINDOW_CAP {
                window.remove(0);
            }
        }
        self.mark_dirty();
    }

    /// Archive the active conversation (when it has any messages) and
    /// begin a fresh one. No new conversation id is allocated until the
    /// next appended message is persisted.
    pub async fn start_new_conversation(&self) {
        self.cancel_debounce();
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            if !state.active.messages.is_empty() {
                archive_active(&mut state);
            }
            state.active = ActiveConversation::empty();
            state.dirty = false;
            snapshot(&state)
        };
        self.write_snapshot(snapshot).await;
    }

    /// Switch to a stored conversation, persisting the current one
    /// first. Returns false when the id is unknown.
    pub async fn load_conversation(&self, id: &str) -> bool {
        self.cancel_debounce();
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let Some(stored) = state.history.iter().find(|c| c.id == id).cloned() else {
                return false;
            };
            if !state.active.messages.is_empty() {
                archive_active(&mut state);
            }
            state.active = ActiveConversation::from_stored(stored);
            state.dirty = false;
            snapshot(&state)
        };
        self.write_snapshot(snapshot).await;
        true
    }

    /// Remove a conversation from history. Deleting the active one
    /// clears it without re-archiving (it would otherwise reappear) and
    /// behaves like starting a new conversation.
    pub async fn delete_conversation(&self, id: &str) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.history.retain(|c| c.id != id);
            if state.active.id.as_deref() == Some(id) {
                state.active = ActiveConversation::empty();
            }
            state.dirty = false;
            snapshot(&state)
        };
        self.cancel_debounce();
        self.write_snapshot(snapshot).await;
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().active.messages.clone()
    }

    pub fn turn_window(&self) -> Vec<Turn> {
        self.state.lock().unwrap().active.turn_window.clone()
    }

    pub fn active_id(&self) -> Option<String> {
        self.state.lock().unwrap().active.id.clone()
    }

    /// Archived conversations, most recently updated first, for the
    /// host's history panel.
    pub fn history(&self) -> Vec<Conversation> {
        let state = self.state.lock().unwrap();
        let mut list = state.history.clone();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    /// (Re)arm the one-shot persistence timer: cancel-and-restart, not
    /// stacking.
    fn mark_dirty(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            state.dirty = true;
        }
        let token = CancellationToken::new();
        if let Some(previous) = self.debounce.lock().unwrap().replace(token.clone()) {
            previous.cancel();
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(PERSIST_DEBOUNCE) => {
                    store.flush().await;
                }
            }
        });
    }

    fn cancel_debounce(&self) {
        if let Some(token) = self.debounce.lock().unwrap().take() {
            token.cancel();
        }
    }

    /// Perform the pending write: upsert the active conversation into
    /// history and persist all four keys. No-op when clean.
    pub async fn flush(&self) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            if !state.dirty {
                return;
            }
            state.dirty = false;
            if !state.active.messages.is_empty() {
                archive_active(&mut state);
            }
            snapshot(&state)
        };
        self.write_snapshot(snapshot).await;
    }

    async fn write_snapshot(&self, snapshot: PersistSnapshot) {
        let kv = self.kv.as_ref();
        write_value(kv, keys::MESSAGES, &snapshot.messages).await;
        write_value(kv, keys::TURN_WINDOW, &snapshot.turn_window).await;
        write_value(kv, keys::HISTORY, &snapshot.history).await;
        match &snapshot.active_id {
            Some(id) => write_value(kv, keys::ACTIVE_ID, id).await,
            None => {
                if let Err(e) = kv.remove(keys::ACTIVE_ID).await {
                    tracing::error!("Failed to remove {}: {}", keys::ACTIVE_ID, e);
                }
            }
        }
    }
}

/// Upsert the active conversation into history, deriving the title on
/// first persist and evicting past the cap.
fn archive_active(state: &mut StoreState) {
    let active = &mut state.active;
    let id = match &active.id {
        Some(id) => id.clone(),
        // Nothing persisted yet and nothing to persist.
        None => return,
    };
    if active.title.is_none() {
        active.title = Some(derive_title(&active.messages, active.created_at));
    }
    let title = active.title.clone().unwrap_or_default();

    let entry = Conversation {
        id: id.clone(),
        title,
        messages: active.messages.clone(),
        turn_window: active.turn_window.clone(),
        created_at: active.created_at,
        updated_at: active.updated_at,
    };

    if let Some(existing) = state.history.iter_mut().find(|c| c.id == id) {
        *existing = entry;
    } else {
        state.history.push(entry);
    }

    while state.history.len() > HISTORY_CAP {
        let oldest = state
            .history
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.updated_at)
            .map(|(i, _)| i);
        match oldest {
            Some(index) => {
                let evicted = state.history.remove(index);
                tracing::debug!(id = %evicted.id, "evicted least-recently-updated conversation");
            }
            None => break,
        }
    }
}

fn derive_title(messages: &[Message], created_at: DateTime<Utc>) -> String {
    match messages.iter().find(|m| m.role == Role::User) {
        Some(user) => {
            if user.text.chars().count() > TITLE_MAX_CHARS {
                let mut title: String = user.text.chars().take(TITLE_MAX_CHARS).collect();
                title.push('…');
                title
            } else {
                user.text.clone()
            }
        }
        None => format!("Conversation {}", created_at.format("%Y-%m-%d %H:%M")),
    }
}

fn snapshot(state: &StoreState) -> PersistSnapshot {
    PersistSnapshot {
        messages: serde_json::to_string(&state.active.messages).unwrap_or_else(|_| "[]".into()),
        turn_window: serde_json::to_string(&state.active.turn_window)
            .unwrap_or_else(|_| "[]".into()),
        history: serde_json::to_string(&state.history).unwrap_or_else(|_| "[]".into()),
        active_id: state.active.id.clone(),
    }
}

async fn read_json<T: serde::de::DeserializeOwned + Default>(
    kv: &dyn KeyValueStore,
    key: &str,
) -> T {
    match kv.get(key).await {
        Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::error!("Failed to decode {}: {}", key, e);
            T::default()
        }),
        Ok(None) => T::default(),
        Err(e) => {
            tracing::error!("Failed to read {}: {}", key, e);
            T::default()
        }
    }
}

async fn write_value(kv: &dyn KeyValueStore, key: &str, value: &str) {
    if let Err(e) = kv.set(key, value).await {
        tracing::error!("Failed to persist {}: {}", key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::persistence::MemoryStore;
    use std::time::Duration;

    async fn fresh_store() -> Arc<ConversationStore> {
        ConversationStore::load(Arc::new(MemoryStore::new())).await
    }

    #[tokio::test]
    async fn test_message_ids_strictly_increase() {
        let store = fresh_store().await;
        let first = store.append_message(Role::User, "one", None);
        let second = store.append_message(Role::Assistant, "two", None);
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_turn_window_caps_at_twenty() {
        let store = fresh_store().await;
        for n in 0..25 {
            store.push_turn(Turn::user(format!("turn {}", n)));
        }
        let window = store.turn_window();
        assert_eq!(window.len(), TURN_WINDOW_CAP);
        assert_eq!(window[0].content, "turn 5");
        assert_eq!(window[19].content, "turn 24");
    }

    #[tokio::test]
    async fn test_title_verbatim_when_short() {
        let store = fresh_store().await;
        let text = "a".repeat(41);
        store.append_message(Role::User, text.clone(), None);
        store.start_new_conversation().await;
        assert_eq!(store.history()[0].title, text);
    }

    #[tokio::test]
    async fn test_title_truncated_with_ellipsis() {
        let store = fresh_store().await;
        store.append_message(Role::User, "b".repeat(60), None);
        store.start_new_conversation().await;
        let title = &store.history()[0].title;
        assert_eq!(title.chars().count(), 51);
        assert!(title.ends_with('…'));
        assert!(title.starts_with(&"b".repeat(50)));
    }

    #[tokio::test]
    async fn test_fallback_title_without_user_message() {
        let store = fresh_store().await;
        store.append_message(Role::Assistant, "hello from the assistant", None);
        store.start_new_conversation().await;
        assert!(store.history()[0].title.starts_with("Conversation "));
    }

    #[tokio::test]
    async fn test_new_conversation_clears_active_state() {
        let store = fresh_store().await;
        store.append_message(Role::User, "hi", None);
        store.push_turn(Turn::user("hi"));
        store.start_new_conversation().await;

        assert!(store.messages().is_empty());
        assert!(store.turn_window().is_empty());
        assert!(store.active_id().is_none());

        // Ids restart in the fresh conversation
        let msg = store.append_message(Role::User, "again", None);
        assert_eq!(msg.id, 1);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_not_archived() {
        let store = fresh_store().await;
        store.start_new_conversation().await;
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_evicts_least_recently_updated_past_cap() {
        let store = fresh_store().await;
        let mut first_id = None;
        for n in 0..51 {
            store.append_message(Role::User, format!("conversation {}", n), None);
            if n == 0 {
                first_id = store.active_id();
            }
            store.start_new_conversation().await;
        }
        let history = store.history();
        assert_eq!(history.len(), HISTORY_CAP);
        let first_id = first_id.unwrap();
        assert!(history.iter().all(|c| c.id != first_id));
    }

    #[tokio::test]
    async fn test_load_conversation_restores_messages_and_window() {
        let store = fresh_store().await;
        store.append_message(Role::User, "first chat", None);
        store.push_turn(Turn::user("first chat"));
        let original_id = store.active_id().unwrap();
        store.start_new_conversation().await;

        store.append_message(Role::User, "second chat", None);
        assert!(store.load_conversation(&original_id).await);

        assert_eq!(store.active_id().as_deref(), Some(original_id.as_str()));
        assert_eq!(store.messages()[0].text, "first chat");
        assert_eq!(store.turn_window().len(), 1);
        // The interrupted second chat was archived first
        assert!(store
            .history()
            .iter()
            .any(|c| c.messages[0].text == "second chat"));
    }

    #[tokio::test]
    async fn test_load_unknown_conversation_is_refused() {
        let store = fresh_store().await;
        assert!(!store.load_conversation("nope").await);
    }

    #[tokio::test]
    async fn test_delete_active_conversation_starts_fresh() {
        let store = fresh_store().await;
        store.append_message(Role::User, "doomed", None);
        let id = store.active_id().unwrap();
        store.flush().await;
        assert_eq!(store.history().len(), 1);

        store.delete_conversation(&id).await;
        assert!(store.history().is_empty());
        assert!(store.messages().is_empty());
        assert!(store.active_id().is_none());
    }

    #[tokio::test]
    async fn test_delete_archived_conversation_keeps_active() {
        let store = fresh_store().await;
        store.append_message(Role::User, "old", None);
        let old_id = store.active_id().unwrap();
        store.start_new_conversation().await;
        store.append_message(Role::User, "current", None);

        store.delete_conversation(&old_id).await;
        assert!(store.history().is_empty());
        assert_eq!(store.messages()[0].text, "current");
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_write_fires_after_one_second() {
        let kv = Arc::new(MemoryStore::new());
        let store = ConversationStore::load(kv.clone() as Arc<dyn KeyValueStore>).await;
        store.append_message(Role::User, "debounce me", None);

        assert!(kv.get(keys::MESSAGES).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let persisted = kv.get(keys::MESSAGES).await.unwrap().unwrap();
        assert!(persisted.contains("debounce me"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_restarts_instead_of_stacking() {
        let kv = Arc::new(MemoryStore::new());
        let store = ConversationStore::load(kv.clone() as Arc<dyn KeyValueStore>).await;

        store.append_message(Role::User, "first", None);
        tokio::time::sleep(Duration::from_millis(600)).await;
        store.append_message(Role::User, "second", None);
        tokio::time::sleep(Duration::from_millis(600)).await;

        // 1.2s after the first append, but only 0.6s after the rearm
        assert!(kv.get(keys::MESSAGES).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let persisted = kv.get(keys::MESSAGES).await.unwrap().unwrap();
        assert!(persisted.contains("second"));
    }

    #[tokio::test]
    async fn test_reload_restores_state() {
        let kv = Arc::new(MemoryStore::new());
        {
            let store = ConversationStore::load(kv.clone() as Arc<dyn KeyValueStore>).await;
            store.append_message(Role::User, "persist me", None);
            store.push_turn(Turn::user("persist me"));
            store.flush().await;
        }

        let reloaded = ConversationStore::load(kv as Arc<dyn KeyValueStore>).await;
        assert_eq!(reloaded.messages().len(), 1);
        assert_eq!(reloaded.messages()[0].text, "persist me");
        assert_eq!(reloaded.turn_window().len(), 1);
        assert!(reloaded.active_id().is_some());

        // Ids continue from where they left off
        let next = reloaded.append_message(Role::Assistant, "reply", None);
        assert_eq!(next.id, 2);
    }
}
