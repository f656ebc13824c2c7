//! No-op history backend — disables persistence entirely.

use async_trait::async_trait;
use chrono::Utc;
use parley_core::error::MemoryError;
use parley_core::history::{HistoryStore, StoredMessage, UserId, UserProfile, UserRecord};
use parley_core::message::{Message, Role};

/// Stores nothing and always reports an empty history.
pub struct NoopHistory;

#[async_trait]
impl HistoryStore for NoopHistory {
    fn name(&self) -> &str {
        "none"
    }

    async fn get_or_create_user(
        &self,
        _username: &str,
        _profile: &UserProfile,
    ) -> Result<UserId, MemoryError> {
        Ok(0)
    }

    async fn find_user(&self, _username: &str) -> Result<Option<UserRecord>, MemoryError> {
        Ok(None)
    }

    async fn get_chat_history(&self, _user_id: UserId) -> Result<Vec<Message>, MemoryError> {
        Ok(Vec::new())
    }

    async fn save_message(
        &self,
        user_id: UserId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, MemoryError> {
        Ok(StoredMessage {
            id: 0,
            user_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        })
    }

    async fn save_messages(
        &self,
        _user_id: UserId,
        messages: &[Message],
    ) -> Result<usize, MemoryError> {
        Ok(messages.len())
    }
}
