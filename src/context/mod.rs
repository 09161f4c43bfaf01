//! Context Builder (C9) — loads persona/preferences and recent
//! conversation history and renders them into system instructions.

pub mod builder;
pub mod store;
pub mod types;

pub use builder::{BuiltContext, ContextBuilder};
pub use store::{ContextStore, InMemoryContextStore};
pub use types::{Conversation, ConversationMessage, UserProfile};
