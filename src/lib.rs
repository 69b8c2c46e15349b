//! Conversational assistant core for an admin analytics dashboard.
//!
//! The host UI renders messages and emits user intents; this crate owns
//! everything in between: segmenting freeform model output into
//! structured sections, the conversation store with its bounded context
//! window and persisted history, request pacing and cooldown against
//! the upstream API, and the orchestrator tying them together.

pub mod config;
pub mod models;
pub mod providers;
pub mod services;

pub use config::{AssistantConfig, ConfigService};
pub use models::{Conversation, ListBlock, ListKind, Message, ParagraphPart, Role, Section, Turn};
pub use providers::{CompletionProvider, GenerationOptions, OpenAiProvider, ProviderError};
pub use services::{ChatSession, ConversationStore, MemoryStore, SqliteStore, SubmitOutcome};
