//! Chat history persistence for Parley.
//!
//! All backends implement `parley_core::HistoryStore`. [`from_config`] picks
//! one from `[memory]` in the config.

pub mod in_memory;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryHistory;
pub use noop::NoopHistory;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHistory;

use parley_config::MemoryConfig;
use parley_core::HistoryStore;
use parley_core::error::MemoryError;
use std::sync::Arc;

/// Open the configured history backend.
pub async fn from_config(config: &MemoryConfig) -> Result<Arc<dyn HistoryStore>, MemoryError> {
    match config.backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MemoryError::Storage(format!("Failed to create {}: {e}", parent.display()))
                })?;
            }
            let store = SqliteHistory::new(&path.to_string_lossy()).await?;
            Ok(Arc::new(store))
        }
        "in_memory" => Ok(Arc::new(InMemoryHistory::new())),
        "none" => Ok(Arc::new(NoopHistory)),
        other => Err(MemoryError::Storage(format!(
            "Unknown history backend '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_each_backend() {
        let mut config = MemoryConfig {
            backend: "none".into(),
            path: None,
        };
        assert_eq!(from_config(&config).await.unwrap().name(), "none");

        config.backend = "in_memory".into();
        assert_eq!(from_config(&config).await.unwrap().name(), "in_memory");

        let dir = tempfile::tempdir().unwrap();
        config.backend = "sqlite".into();
        config.path = Some(dir.path().join("nested/history.db").to_string_lossy().into());
        assert_eq!(from_config(&config).await.unwrap().name(), "sqlite");
        assert!(dir.path().join("nested/history.db").exists());
    }

    #[tokio::test]
    async fn unknown_backend_is_an_error() {
        let config = MemoryConfig {
            backend: "redis".into(),
            path: None,
        };
        assert!(from_config(&config).await.is_err());
    }
}
