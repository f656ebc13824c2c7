//! Fire-and-forget history writes, applied in order by one worker task.
//!
//! The room path never waits on storage: turns are queued here and a
//! failed write is logged and dropped.

use parley_core::history::{HistoryStore, UserId};
use parley_core::message::Role;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum PersistJob {
    Save {
        user_id: UserId,
        role: Role,
        content: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Queue in front of a [`HistoryStore`].
#[derive(Clone)]
pub struct HistoryWriter {
    tx: mpsc::UnboundedSender<PersistJob>,
}

impl HistoryWriter {
    /// Spawn the worker. It stops once every writer clone is dropped.
    pub fn spawn(store: Arc<dyn HistoryStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_worker(rx, store));
        Self { tx }
    }

    pub fn save(&self, user_id: UserId, role: Role, content: impl Into<String>) {
        let job = PersistJob::Save {
            user_id,
            role,
            content: content.into(),
        };
        if self.tx.send(job).is_err() {
            warn!(user_id, "History worker has stopped, message not saved");
        }
    }

    /// Wait until every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(PersistJob::Flush(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

async fn persist_worker(mut rx: mpsc::UnboundedReceiver<PersistJob>, store: Arc<dyn HistoryStore>) {
    while let Some(job) = rx.recv().await {
        match job {
            PersistJob::Save {
                user_id,
                role,
                content,
            } => match store.save_message(user_id, role, &content).await {
                Ok(saved) => debug!(user_id, id = saved.id, role = %role, "Saved chat message"),
                Err(e) => warn!(user_id, error = %e, "Failed to save chat message"),
            },
            PersistJob::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!("History worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::error::MemoryError;
    use parley_core::history::{StoredMessage, UserProfile, UserRecord};
    use parley_core::message::Message;
    use parley_memory::InMemoryHistory;

    struct FailingStore;

    #[async_trait]
    impl HistoryStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }

        async fn get_or_create_user(
            &self,
            _username: &str,
            _profile: &UserProfile,
        ) -> Result<UserId, MemoryError> {
            Err(MemoryError::Storage("disk full".into()))
        }

        async fn find_user(&self, _username: &str) -> Result<Option<UserRecord>, MemoryError> {
            Err(MemoryError::Storage("disk full".into()))
        }

        async fn get_chat_history(&self, _user_id: UserId) -> Result<Vec<Message>, MemoryError> {
            Err(MemoryError::Storage("disk full".into()))
        }

        async fn save_message(
            &self,
            _user_id: UserId,
            _role: Role,
            _content: &str,
        ) -> Result<StoredMessage, MemoryError> {
            Err(MemoryError::Storage("disk full".into()))
        }

        async fn save_messages(
            &self,
            _user_id: UserId,
            _messages: &[Message],
        ) -> Result<usize, MemoryError> {
            Err(MemoryError::Storage("disk full".into()))
        }
    }

    #[tokio::test]
    async fn writes_land_in_order() {
        let store = Arc::new(InMemoryHistory::new());
        let writer = HistoryWriter::spawn(store.clone());

        writer.save(1, Role::User, "first");
        writer.save(1, Role::Assistant, "second");
        writer.save(1, Role::User, "third");
        writer.flush().await;

        let history = store.get_chat_history(1).await.unwrap();
        assert_eq!(
            history,
            vec![
                Message::user("first"),
                Message::assistant("second"),
                Message::user("third"),
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let writer = HistoryWriter::spawn(Arc::new(FailingStore));
        writer.save(1, Role::User, "lost");
        writer.flush().await;
        // Still accepting work
        writer.save(1, Role::User, "also lost");
        writer.flush().await;
    }
}
