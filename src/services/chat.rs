use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::AssistantConfig;
use crate::models::{Message, Role, Section, Turn};
use crate::providers::{CompletionProvider, CompletionRequest, ProviderError};
use crate::services::limiter::CooldownController;
use crate::services::segment::SegmentCache;
use crate::services::store::ConversationStore;

const COOLDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Empty input with no attachment, ignored silently.
    Ignored,
    /// A request is already in flight.
    Busy,
    /// Rejected by the hard cooldown; an informational message with the
    /// remaining seconds was appended.
    CoolingDown,
    /// The upstream reply was appended.
    Replied,
    /// The upstream call failed; a synthetic error message was appended.
    Failed,
}

/// Coordinates user submissions, the cooldown gate, the upstream call,
/// and store updates. One logical request in flight at a time.
///
/// Session state is explicit and owned here; nothing lives in module
/// globals. A 1 s tick reads the live cooldown each firing so an armed
/// cooldown clears on schedule even when nobody submits.
pub struct ChatSession {
    store: Arc<ConversationStore>,
    cooldown: Arc<Mutex<CooldownController>>,
    provider: Arc<dyn CompletionProvider>,
    config: AssistantConfig,
    cache: SegmentCache,
    sending: AtomicBool,
    _tick_guard: DropGuard,
}

impl ChatSession {
    pub fn new(
        store: Arc<ConversationStore>,
        provider: Arc<dyn CompletionProvider>,
        config: AssistantConfig,
    ) -> Self {
        let cooldown = Arc::new(Mutex::new(CooldownController::new()));
        let token = CancellationToken::new();
        spawn_cooldown_tick(Arc::clone(&cooldown), token.clone());

        Self {
            store,
            cooldown,
            provider,
            config,
            cache: SegmentCache::new(),
            sending: AtomicBool::new(false),
            _tick_guard: token.drop_guard(),
        }
    }

    /// Handle a user submission end to end. Always leaves the sending
    /// indicator cleared, whatever the outcome.
    pub async fn submit(&self, text: &str, attached_file: Option<String>) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() && attached_file.is_none() {
            return SubmitOutcome::Ignored;
        }

        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SubmitOutcome::Busy;
        }
        let _sending = ClearOnDrop(&self.sending);

        // Hard cooldown, checked opportunistically before anything else.
        let remaining = self.cooldown.lock().unwrap().active_cooldown_secs();
        if let Some(secs) = remaining {
            self.store
                .append_message(Role::Assistant, cooldown_notice(secs), None);
            return SubmitOutcome::CoolingDown;
        }

        // Soft pacing delays, never rejects.
        let delay = self.cooldown.lock().unwrap().pacing_delay();
        if !delay.is_zero() {
            tracing::debug!(?delay, "pacing before upstream call");
            tokio::time::sleep(delay).await;
        }

        // The window sent upstream excludes the turn being submitted.
        let prior_turns = self.store.turn_window();
        self.store.append_message(Role::User, text, attached_file);
        self.store.push_turn(Turn::user(text));

        self.cooldown.lock().unwrap().mark_request_start();

        let request = CompletionRequest {
            api_key: self.config.api_key.clone(),
            model: self.config.model.clone(),
            base_url: self.config.base_url.clone(),
            system_instruction: self.config.system_instruction.clone(),
            prior_turns,
            user_text: text.to_string(),
            options: self.config.options.clone(),
        };

        match self.provider.complete(request).await {
            Ok(response) => {
                self.store
                    .append_message(Role::Assistant, response.message.clone(), None);
                self.store.push_turn(Turn::assistant(response.message));
                self.cooldown.lock().unwrap().clear();
                SubmitOutcome::Replied
            }
            Err(err) => {
                tracing::warn!(error = %err, "upstream request failed");
                let notice = self.failure_notice(&err);
                self.store.append_message(Role::Assistant, notice, None);
                SubmitOutcome::Failed
            }
        }
    }

    fn failure_notice(&self, err: &ProviderError) -> String {
        match err {
            ProviderError::RateLimited { retry_after_secs } => {
                let mut cooldown = self.cooldown.lock().unwrap();
                cooldown.arm(*retry_after_secs);
                let secs = cooldown.active_cooldown_secs().unwrap_or(0);
                format!(
                    "The assistant is receiving too many requests. Please wait {} before trying again.",
                    plural_seconds(secs)
                )
            }
            ProviderError::AuthError(_) => {
                "The assistant could not authenticate with the language model service. \
                 Please check the configured API key."
                    .to_string()
            }
            ProviderError::ServerError(_) => {
                "The language model service is having trouble right now. Please try again in a moment."
                    .to_string()
            }
            _ => "Something went wrong while contacting the assistant. Please try again.".to_string(),
        }
    }

    /// Sections for one assistant message, segmented lazily and
    /// memoized so re-renders are free.
    pub fn sections_for(&self, message: &Message) -> Arc<Vec<Section>> {
        self.cache.sections_for(message.id, &message.text)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store.messages()
    }

    pub fn history(&self) -> Vec<crate::models::Conversation> {
        self.store.history()
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    // Switching or deleting does not cancel an in-flight call; when it
    // resolves, the reply attaches to whichever conversation is active.
    pub async fn new_conversation(&self) {
        self.store.start_new_conversation().await;
    }

    pub async fn switch_conversation(&self, id: &str) -> bool {
        self.store.load_conversation(id).await
    }

    pub async fn delete_conversation(&self, id: &str) {
        self.store.delete_conversation(id).await;
    }
}

fn spawn_cooldown_tick(cooldown: Arc<Mutex<CooldownController>>, token: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COOLDOWN_TICK);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if cooldown.lock().unwrap().tick() {
                        tracing::debug!("cooldown expired");
                    }
                }
            }
        }
    });
}

fn cooldown_notice(secs: u64) -> String {
    format!(
        "Please wait {} before sending another message.",
        plural_seconds(secs)
    )
}

fn plural_seconds(secs: u64) -> String {
    if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{} seconds", secs)
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
