//! SQLite history backend.
//!
//! One database file with two tables:
//! - `users` — one row per username, with optional profile fields
//! - `chat_messages` — append-only log keyed by user, ordered by rowid

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::error::MemoryError;
use parley_core::history::{HistoryStore, StoredMessage, UserId, UserProfile, UserRecord};
use parley_core::message::{Message, Role};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed [`HistoryStore`].
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    /// Open (creating if needed) the database at `path`.
    ///
    /// `"sqlite::memory:"` gives an ephemeral database; the pool is then held
    /// to a single connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite history initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                username     TEXT UNIQUE NOT NULL,
                email        TEXT,
                name         TEXT,
                last_online  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("users table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("chat_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_user ON chat_messages(user_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("chat_messages index: {e}")))?;

        debug!("SQLite history migrations complete");
        Ok(())
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_user(row: &SqliteRow) -> Result<UserRecord, MemoryError> {
        let last_online: String = row
            .try_get("last_online")
            .map_err(|e| MemoryError::QueryFailed(format!("last_online column: {e}")))?;

        Ok(UserRecord {
            id: row
                .try_get("id")
                .map_err(|e| MemoryError::QueryFailed(format!("id column: {e}")))?,
            username: row
                .try_get("username")
                .map_err(|e| MemoryError::QueryFailed(format!("username column: {e}")))?,
            email: row
                .try_get("email")
                .map_err(|e| MemoryError::QueryFailed(format!("email column: {e}")))?,
            name: row
                .try_get("name")
                .map_err(|e| MemoryError::QueryFailed(format!("name column: {e}")))?,
            last_online: Self::parse_time(&last_online),
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, MemoryError> {
        let role: String = row
            .try_get("role")
            .map_err(|e| MemoryError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| MemoryError::QueryFailed(format!("content column: {e}")))?;
        let role = role.parse::<Role>().map_err(MemoryError::QueryFailed)?;
        Ok(Message::new(role, content))
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_or_create_user(
        &self,
        username: &str,
        profile: &UserProfile,
    ) -> Result<UserId, MemoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, email, name, last_online)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(username) DO UPDATE SET
                last_online = excluded.last_online,
                email = COALESCE(users.email, excluded.email),
                name = COALESCE(users.name, excluded.name)
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("upsert user: {e}")))?;

        row.try_get("id")
            .map_err(|e| MemoryError::QueryFailed(format!("id column: {e}")))
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, MemoryError> {
        let row = sqlx::query(
            "SELECT id, username, email, name, last_online FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("find user: {e}")))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn get_chat_history(&self, user_id: UserId) -> Result<Vec<Message>, MemoryError> {
        let rows = sqlx::query(
            "SELECT role, content FROM chat_messages WHERE user_id = ?1 ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("load history: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn save_message(
        &self,
        user_id: UserId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, MemoryError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO chat_messages (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("insert message: {e}")))?;

        Ok(StoredMessage {
            id: result.last_insert_rowid(),
            user_id,
            role,
            content: content.to_string(),
            created_at,
        })
    }

    async fn save_messages(
        &self,
        user_id: UserId,
        messages: &[Message],
    ) -> Result<usize, MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("begin transaction: {e}")))?;

        for message in messages {
            sqlx::query(
                "INSERT INTO chat_messages (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(user_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("insert message: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("commit: {e}")))?;

        Ok(messages.len())
    }
}
