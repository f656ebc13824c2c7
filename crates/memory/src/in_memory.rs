//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use parley_core::error::MemoryError;
use parley_core::history::{HistoryStore, StoredMessage, UserId, UserProfile, UserRecord};
use parley_core::message::{Message, Role};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    users: Vec<UserRecord>,
    messages: Vec<StoredMessage>,
}

/// Keeps users and messages in process memory; lost on restart.
pub struct InMemoryHistory {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// Number of stored messages across all users.
    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn push_message(tables: &mut Tables, user_id: UserId, role: Role, content: &str) -> StoredMessage {
    let stored = StoredMessage {
        id: tables.messages.len() as i64 + 1,
        user_id,
        role,
        content: content.to_string(),
        created_at: Utc::now(),
    };
    tables.messages.push(stored.clone());
    stored
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_or_create_user(
        &self,
        username: &str,
        profile: &UserProfile,
    ) -> Result<UserId, MemoryError> {
        let mut tables = self.tables.write().await;

        if let Some(user) = tables.users.iter_mut().find(|u| u.username == username) {
            user.last_online = Utc::now();
            if user.email.is_none() {
                user.email = profile.email.clone();
            }
            if user.name.is_none() {
                user.name = profile.name.clone();
            }
            return Ok(user.id);
        }

        let id = tables.users.len() as UserId + 1;
        tables.users.push(UserRecord {
            id,
            username: username.to_string(),
            email: profile.email.clone(),
            name: profile.name.clone(),
            last_online: Utc::now(),
        });
        Ok(id)
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, MemoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.username == username).cloned())
    }

    async fn get_chat_history(&self, user_id: UserId) -> Result<Vec<Message>, MemoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| Message::new(m.role, m.content.clone()))
            .collect())
    }

    async fn save_message(
        &self,
        user_id: UserId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, MemoryError> {
        let mut tables = self.tables.write().await;
        Ok(push_message(&mut tables, user_id, role, content))
    }

    async fn save_messages(
        &self,
        user_id: UserId,
        messages: &[Message],
    ) -> Result<usize, MemoryError> {
        let mut tables = self.tables.write().await;
        for message in messages {
            push_message(&mut tables, user_id, message.role, &message.content);
        }
        Ok(messages.len())
    }
}
