//! History store trait — per-user append-only chat log.
//!
//! The store seeds a room's context window when a participant joins and
//! receives every relayed turn and assistant reply. Writes from the room
//! path are fire-and-forget: failures are logged by the caller and never
//! degrade message relay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::MemoryError;
use crate::message::{Message, Role};

/// Numeric user identity assigned by the store.
pub type UserId = i64;

/// Optional profile fields supplied when a user is first created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A persisted user row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub last_online: DateTime<Utc>,
}

/// A persisted chat message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: UserId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`HistoryStore::save_full_history`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    /// Messages actually appended
    pub saved: usize,
    /// Messages offered by the caller
    pub total: usize,
    /// Messages skipped because an equivalent row already existed
    pub already_existed: usize,
}

/// Key used to recognise an already-persisted message: role plus the first
/// 100 characters of content.
pub fn dedup_key(role: Role, content: &str) -> String {
    let prefix: String = content.chars().take(100).collect();
    format!("{}:{}", role.as_str(), prefix)
}

/// The core HistoryStore trait.
///
/// Implementations: SQLite, in-memory (for testing), none (no-op).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory", "none").
    fn name(&self) -> &str;

    /// Find a user by username, creating it if needed. Touches `last_online`.
    async fn get_or_create_user(
        &self,
        username: &str,
        profile: &UserProfile,
    ) -> Result<UserId, MemoryError>;

    /// Look up a user without creating it.
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, MemoryError>;

    /// The user's messages in ascending creation order.
    async fn get_chat_history(&self, user_id: UserId) -> Result<Vec<Message>, MemoryError>;

    /// Append one message to the user's log.
    async fn save_message(
        &self,
        user_id: UserId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, MemoryError>;

    /// Append a batch of messages, preserving their order. Returns the count saved.
    async fn save_messages(
        &self,
        user_id: UserId,
        messages: &[Message],
    ) -> Result<usize, MemoryError>;

    /// Append only the messages of `history` that are not already persisted.
    async fn save_full_history(
        &self,
        user_id: UserId,
        history: &[Message],
    ) -> Result<SaveSummary, MemoryError> {
        if history.is_empty() {
            return Ok(SaveSummary::default());
        }

        let existing: HashSet<String> = self
            .get_chat_history(user_id)
            .await?
            .iter()
            .map(|m| dedup_key(m.role, &m.content))
            .collect();

        let fresh: Vec<Message> = history
            .iter()
            .filter(|m| !existing.contains(&dedup_key(m.role, &m.content)))
            .cloned()
            .collect();

        let saved = if fresh.is_empty() {
            0
        } else {
            self.save_messages(user_id, &fresh).await?
        };

        Ok(SaveSummary {
            saved,
            total: history.len(),
            already_existed: history.len() - fresh.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_uses_role_and_prefix() {
        let long = "x".repeat(150);
        let key = dedup_key(Role::User, &long);
        assert_eq!(key, format!("user:{}", "x".repeat(100)));
        assert_ne!(dedup_key(Role::User, "hi"), dedup_key(Role::Assistant, "hi"));
    }

    #[test]
    fn dedup_key_counts_chars_not_bytes() {
        let text = "é".repeat(120);
        let key = dedup_key(Role::User, &text);
        assert_eq!(key.chars().count(), "user:".len() + 100);
    }
}
