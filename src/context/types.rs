//! Data types owned by the Context Builder (C9).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, Role, UserId};

/// Persona/preferences for one user (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub preferences: HashMap<String, String>,
    pub custom_instructions: Option<String>,
    /// Allowed function categories; empty set means all categories.
    pub api_permissions: HashSet<String>,
}

impl UserProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            preferences: HashMap::new(),
            custom_instructions: None,
            api_permissions: HashSet::new(),
        }
    }
}

/// One message in a conversation (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Conversation envelope tracked alongside its messages; `updated_at` is
/// stamped by every `save_interaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
