//! The context window: an ordered, bounded message log.

use super::token;
use parley_core::message::{Message, Role};
use serde::{Deserialize, Serialize};

/// Default cap on the number of messages in a window.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Default cap on estimated tokens across a window.
pub const DEFAULT_MAX_TOKENS: usize = 2048;

/// Which bound forced an eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MaxMessages,
    MaxTokens,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxMessages => "max_messages",
            Self::MaxTokens => "max_tokens",
        }
    }
}

/// Emitted once per evicted message.
#[derive(Debug, Clone)]
pub struct DropNotice {
    pub reason: DropReason,
    pub dropped: Message,
    pub tokens_dropped: usize,
    /// Messages left in the window after this eviction
    pub remaining_messages: usize,
}

pub type DropObserver = Box<dyn Fn(&DropNotice) + Send + Sync>;

/// Ordered message log bounded by count and estimated tokens.
///
/// After every append: `size() <= max_messages` and
/// `total_tokens() <= max_tokens`, unless only system messages remain.
pub struct ContextWindow {
    messages: Vec<Message>,
    max_messages: usize,
    max_tokens: usize,
    on_drop: Option<DropObserver>,
}

impl ContextWindow {
    pub fn new(max_messages: usize, max_tokens: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
            max_tokens,
            on_drop: None,
        }
    }

    /// Seed the window with `messages`, then apply the bounds.
    pub fn with_messages(max_messages: usize, max_tokens: usize, messages: Vec<Message>) -> Self {
        let mut window = Self::new(max_messages, max_tokens);
        window.extend(messages);
        window
    }

    /// Append a batch, then apply the bounds once. Drops are reported to the
    /// observer registered at the time of the call.
    pub fn extend(&mut self, messages: Vec<Message>) {
        self.messages
            .extend(messages.into_iter().filter(|m| !m.content.is_empty()));
        self.enforce_limits();
    }

    /// Register the callback told about every bounded drop.
    pub fn set_drop_observer(&mut self, observer: DropObserver) {
        self.on_drop = Some(observer);
    }

    /// Append a message and enforce the bounds. Empty content is ignored.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        let content = content.into();
        if content.is_empty() {
            return;
        }
        self.messages.push(Message::new(role, content));
        self.enforce_limits();
    }

    /// Evict oldest non-system messages until both bounds hold, or until no
    /// non-system message is left.
    pub fn enforce_limits(&mut self) {
        let (system, mut rest): (Vec<Message>, Vec<Message>) =
            std::mem::take(&mut self.messages)
                .into_iter()
                .partition(Message::is_system);

        // Evicting from the front of a Vec is O(n); windows are small.
        while system.len() + rest.len() > self.max_messages && !rest.is_empty() {
            let dropped = rest.remove(0);
            self.notify(DropReason::MaxMessages, dropped, system.len() + rest.len());
        }

        let mut total =
            token::estimate_messages_tokens(&system) + token::estimate_messages_tokens(&rest);
        while total > self.max_tokens && !rest.is_empty() {
            let dropped = rest.remove(0);
            total -= token::estimate_message_tokens(&dropped);
            self.notify(DropReason::MaxTokens, dropped, system.len() + rest.len());
        }

        self.messages = system;
        self.messages.extend(rest);
    }

    fn notify(&self, reason: DropReason, dropped: Message, remaining_messages: usize) {
        if let Some(observer) = &self.on_drop {
            let notice = DropNotice {
                reason,
                tokens_dropped: token::estimate_message_tokens(&dropped),
                dropped,
                remaining_messages,
            };
            observer(&notice);
        }
    }

    /// An independent copy of the current contents.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Remove everything, system messages included.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        token::estimate_messages_tokens(&self.messages)
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES, DEFAULT_MAX_TOKENS)
    }
}

impl std::fmt::Debug for ContextWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextWindow")
            .field("messages", &self.messages)
            .field("max_messages", &self.max_messages)
            .field("max_tokens", &self.max_tokens)
            .field("has_drop_observer", &self.on_drop.is_some())
            .finish()
    }
}
