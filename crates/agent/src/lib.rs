//! The assistant side of a Parley room.
//!
//! - [`context`] — token estimation and the bounded [`ContextWindow`]
//! - [`assembler`] — reduces a newline-delimited JSON response body to text
//! - [`session`] — [`AssistantSession`], which owns one window and keeps at
//!   most one backend call in flight

pub mod assembler;
pub mod context;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use assembler::{ResponseAssembler, assemble};
pub use context::token::estimate_tokens;
pub use context::{ContextWindow, DropNotice, DropReason};
pub use session::{AssistantSession, GenerationTicket, SessionOptions};
