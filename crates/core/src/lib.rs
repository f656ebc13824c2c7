//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley chat relay.
//! This crate has **zero framework dependencies** — it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the assistant backend
//! ([`Provider`]), persisted chat history ([`HistoryStore`]), and the metrics
//! sink ([`MetricsSink`]). Implementations live in their respective crates,
//! which keeps the room and session logic testable with in-process stubs.

pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod metrics;
pub mod provider;
pub mod validation;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, ProviderError, Result, RoomError};
pub use event::{DomainEvent, EventBus};
pub use history::{HistoryStore, SaveSummary, StoredMessage, UserId, UserProfile, UserRecord};
pub use message::{Message, Role};
pub use metrics::{MetricsSink, NoopMetrics};
pub use provider::{ByteStream, ChatRequest, Provider};
