//! Persistence for profiles and conversation history.
//!
//! A store/retrieve trait over agent memory, narrowed from general
//! agent memory/knowledge-base concerns to the profile + message
//! history this crate actually needs.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::context::types::{Conversation, ConversationMessage, UserProfile};
use crate::error::ControllerError;
use crate::types::{ConversationId, UserId};

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get_or_create_profile(&self, user_id: UserId) -> Result<UserProfile, ControllerError>;

    async fn recent_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, ControllerError>;

    async fn append_message(&self, message: ConversationMessage) -> Result<(), ControllerError>;

    async fn touch_conversation(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ControllerError>;
}

#[derive(Default)]
struct Inner {
    profiles: HashMap<UserId, UserProfile>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<ConversationMessage>>,
}

/// In-memory store: used by default and in tests; a relational-store
/// backed implementation can satisfy the same trait (spec.md §6 — the
/// relational store collaborator covers Conversation/ConversationMessage/
/// UserProfile alongside the Function Registry's own tables).
#[derive(Default)]
pub struct InMemoryContextStore {
    inner: StdMutex<Inner>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get_or_create_profile(&self, user_id: UserId) -> Result<UserProfile, ControllerError> {
        let mut inner = self.inner.lock().unwrap();
        let profile = inner.profiles.entry(user_id).or_insert_with(|| UserProfile::new(user_id)).clone();
        Ok(profile)
    }

    async fn recent_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, ControllerError> {
        let inner = self.inner.lock().unwrap();
        let messages = inner.messages.get(&conversation_id).cloned().unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn append_message(&self, message: ConversationMessage) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.entry(message.conversation_id).or_default().push(message);
        Ok(())
    }

    async fn touch_conversation(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner
            .conversations
            .entry(conversation_id)
            .and_modify(|c| c.updated_at = now)
            .or_insert_with(|| Conversation { conversation_id, user_id, created_at: now, updated_at: now });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::ConversationMessage;
    use crate::types::{MessageId, Role};

    #[tokio::test]
    async fn get_or_create_profile_is_idempotent() {
        let store = InMemoryContextStore::new();
        let user_id = UserId::new();
        let first = store.get_or_create_profile(user_id).await.unwrap();
        let second = store.get_or_create_profile(user_id).await.unwrap();
        assert_eq!(first.user_id, second.user_id);
    }

    #[tokio::test]
    async fn recent_messages_respects_limit_and_order() {
        let store = InMemoryContextStore::new();
        let conversation_id = ConversationId::new();
        for i in 0..5 {
            store
                .append_message(ConversationMessage {
                    message_id: MessageId::new(),
                    conversation_id,
                    role: Role::User,
                    content: format!("message {i}"),
                    metadata: HashMap::new(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_messages(conversation_id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "message 2");
        assert_eq!(recent[2].content, "message 4");
    }
}
