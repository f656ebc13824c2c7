//! Bounded conversation context.
//!
//! A [`ContextWindow`] keeps the messages sent to the backend on each turn,
//! evicting the oldest non-system message whenever the count or estimated
//! token budget is exceeded. System messages are never evicted.

pub mod token;
pub mod window;

pub use window::{ContextWindow, DropNotice, DropReason};
