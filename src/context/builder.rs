//! `build`/`save_interaction` — renders a profile and recent history into
//! the controller's system instructions (spec.md §4.9).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::context::store::ContextStore;
use crate::context::types::{ConversationMessage, UserProfile};
use crate::error::ControllerError;
use crate::types::{ConversationId, MessageId, Role, UserId};

const DEFAULT_HISTORY_LIMIT: usize = 10;

const PREAMBLE: &str = "You are a helpful assistant with access to a set of callable functions. \
Use them when they would help answer the user's query, and otherwise answer directly.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltContext {
    pub profile: UserProfile,
    pub history: Vec<ConversationMessage>,
    pub system_instructions: String,
    pub user_id: UserId,
    pub conversation_id: Option<ConversationId>,
    pub current_query: Option<String>,
}

pub struct ContextBuilder {
    store: Arc<dyn ContextStore>,
    history_limit: usize,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store, history_limit: DEFAULT_HISTORY_LIMIT }
    }

    pub async fn build(
        &self,
        user_id: UserId,
        conversation_id: Option<ConversationId>,
        current_query: Option<String>,
    ) -> Result<BuiltContext, ControllerError> {
        let profile = self.store.get_or_create_profile(user_id).await?;
        let history = match conversation_id {
            Some(id) => self.store.recent_messages(id, self.history_limit).await?,
            None => Vec::new(),
        };
        let system_instructions = render_instructions(&profile);
        Ok(BuiltContext { profile, history, system_instructions, user_id, conversation_id, current_query })
    }

    /// Appends the user/assistant turn in order and stamps the
    /// conversation's `updated_at`.
    pub async fn save_interaction(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        user_message: impl Into<String>,
        assistant_message: impl Into<String>,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(), ControllerError> {
        let now = Utc::now();
        self.store
            .append_message(ConversationMessage {
                message_id: MessageId::new(),
                conversation_id,
                role: Role::User,
                content: user_message.into(),
                metadata: metadata.clone(),
                created_at: now,
            })
            .await?;
        self.store
            .append_message(ConversationMessage {
                message_id: MessageId::new(),
                conversation_id,
                role: Role::Assistant,
                content: assistant_message.into(),
                metadata,
                created_at: now,
            })
            .await?;
        self.store.touch_conversation(conversation_id, user_id).await
    }
}

fn render_instructions(profile: &UserProfile) -> String {
    let mut sections = vec![PREAMBLE.to_string()];

    if let Some(custom) = &profile.custom_instructions {
        if !custom.is_empty() {
            sections.push(format!("User instructions: {custom}"));
        }
    }

    if !profile.preferences.is_empty() {
        let mut keys: Vec<&String> = profile.preferences.keys().collect();
        keys.sort();
        let prefs = keys
            .into_iter()
            .map(|k| format!("{k}={}", profile.preferences[k]))
            .collect::<Vec<_>>()
            .join(", ");
        sections.push(format!("Preferences: {prefs}"));
    }

    if !profile.api_permissions.is_empty() {
        let mut categories: Vec<&String> = profile.api_permissions.iter().collect();
        categories.sort();
        sections.push(format!(
            "You may only use functions from these categories: {}",
            categories.into_iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::store::InMemoryContextStore;

    #[tokio::test]
    async fn build_includes_custom_instructions_and_permissions() {
        let store = Arc::new(InMemoryContextStore::new());
        let builder = ContextBuilder::new(store.clone());
        let user_id = UserId::new();

        // seed a profile with custom instructions by round-tripping through the store
        let mut profile = store.get_or_create_profile(user_id).await.unwrap();
        profile.custom_instructions = Some("Be concise.".to_string());
        profile.api_permissions.insert("weather".to_string());
        // InMemoryContextStore has no update path exposed here; exercise render directly.
        let instructions = render_instructions(&profile);
        assert!(instructions.contains("Be concise."));
        assert!(instructions.contains("weather"));

        let built = builder.build(user_id, None, Some("hi".to_string())).await.unwrap();
        assert_eq!(built.user_id, user_id);
        assert!(built.history.is_empty());
    }

    #[tokio::test]
    async fn save_interaction_appends_both_turns_in_order() {
        let store = Arc::new(InMemoryContextStore::new());
        let builder = ContextBuilder::new(store.clone());
        let user_id = UserId::new();
        let conversation_id = ConversationId::new();

        builder
            .save_interaction(user_id, conversation_id, "hello", "hi there", Default::default())
            .await
            .unwrap();

        let built = builder.build(user_id, Some(conversation_id), None).await.unwrap();
        assert_eq!(built.history.len(), 2);
        assert_eq!(built.history[0].role, Role::User);
        assert_eq!(built.history[1].role, Role::Assistant);
    }
}
