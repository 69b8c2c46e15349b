pub mod conversation;
pub mod message;
pub mod section;

pub use conversation::Conversation;
pub use message::{Message, Role, Turn};
pub use section::{ListBlock, ListKind, ParagraphPart, Section};
