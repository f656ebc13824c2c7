//! Assistant backend implementations for Parley.
//!
//! All providers implement the `parley_core::Provider` trait. Parley talks
//! to one Ollama-compatible backend, selected by `[llm]` in the config.

pub mod ollama;

pub use ollama::OllamaProvider;

use parley_config::AppConfig;
use parley_core::Provider;
use std::sync::Arc;

/// Build the configured backend.
pub fn from_config(config: &AppConfig) -> Arc<dyn Provider> {
    Arc::new(OllamaProvider::new("ollama", &config.llm.base_url))
}
