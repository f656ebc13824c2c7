//! Assistant session — one context window and at most one backend call.
//!
//! A turn is appended to the window synchronously, before any suspension
//! point, so context order always matches arrival order. Generation is
//! split in two steps: [`AssistantSession::begin_turn`] appends and, when
//! allowed, claims the in-flight flag and snapshots the window;
//! [`AssistantSession::generate`] runs the backend call for that snapshot.
//! A turn that arrives while a call is in flight is appended but never
//! starts a second call, and it is not part of the in-flight snapshot.

use crate::assembler;
use crate::context::{ContextWindow, DropNotice};
use chrono::Utc;
use parley_config::AppConfig;
use parley_core::error::ProviderError;
use parley_core::event::{DomainEvent, EventBus};
use parley_core::message::{Message, Role};
use parley_core::metrics::{LLM_FAILURES_TOTAL, LLM_REQUESTS_TOTAL, MetricsSink, NoopMetrics};
use parley_core::provider::{ChatRequest, Provider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Backend settings shared by every session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    /// Deadline for one whole backend call
    pub deadline: Duration,
    pub max_messages: usize,
    pub max_tokens: usize,
    pub system_prompt: String,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            deadline: Duration::from_secs(config.llm.request_timeout_secs),
            max_messages: config.context.max_messages,
            max_tokens: config.context.max_tokens,
            system_prompt: config.llm.system_prompt.clone(),
        }
    }

    /// Persisted history verbatim when there is any, otherwise the system prompt.
    pub fn seed(&self, history: Vec<Message>) -> Vec<Message> {
        if history.is_empty() {
            vec![Message::system(self.system_prompt.clone())]
        } else {
            history
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Proof that the holder owns the session's in-flight slot.
///
/// Carries the snapshot the generation will send. Dropping the ticket
/// releases the slot, whether or not the generation ran.
pub struct GenerationTicket {
    snapshot: Vec<Message>,
    in_flight: Arc<AtomicBool>,
}

impl GenerationTicket {
    pub fn snapshot(&self) -> &[Message] {
        &self.snapshot
    }
}

impl Drop for GenerationTicket {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for GenerationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationTicket")
            .field("messages", &self.snapshot.len())
            .finish()
    }
}

pub struct AssistantSession {
    room_id: String,
    window: Mutex<ContextWindow>,
    in_flight: Arc<AtomicBool>,
    provider: Arc<dyn Provider>,
    model: String,
    deadline: Duration,
    metrics: Arc<dyn MetricsSink>,
    events: Arc<EventBus>,
}

impl AssistantSession {
    pub fn new(
        room_id: impl Into<String>,
        seed: Vec<Message>,
        provider: Arc<dyn Provider>,
        options: &SessionOptions,
    ) -> Self {
        Self::with_observers(
            room_id,
            seed,
            provider,
            options,
            Arc::new(NoopMetrics),
            Arc::new(EventBus::default()),
        )
    }

    pub fn with_observers(
        room_id: impl Into<String>,
        seed: Vec<Message>,
        provider: Arc<dyn Provider>,
        options: &SessionOptions,
        metrics: Arc<dyn MetricsSink>,
        events: Arc<EventBus>,
    ) -> Self {
        let room_id = room_id.into();
        let mut window = ContextWindow::new(options.max_messages, options.max_tokens);

        let observer_room = room_id.clone();
        let observer_events = events.clone();
        window.set_drop_observer(Box::new(move |notice: &DropNotice| {
            warn!(
                room_id = %observer_room,
                reason = notice.reason.as_str(),
                role = %notice.dropped.role,
                tokens = notice.tokens_dropped,
                remaining = notice.remaining_messages,
                "Evicted message from context window"
            );
            observer_events.publish(DomainEvent::ContextEvicted {
                room_id: observer_room.clone(),
                reason: notice.reason.as_str().to_string(),
                tokens_dropped: notice.tokens_dropped,
                remaining_messages: notice.remaining_messages,
                timestamp: Utc::now(),
            });
        }));
        // Seed after the observer is in place so evictions from a long history are reported
        window.extend(seed);

        Self {
            room_id,
            window: Mutex::new(window),
            in_flight: Arc::new(AtomicBool::new(false)),
            provider,
            model: options.model.clone(),
            deadline: options.deadline,
            metrics,
            events,
        }
    }

    fn window(&self) -> MutexGuard<'_, ContextWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.window().snapshot()
    }

    pub fn context_len(&self) -> usize {
        self.window().size()
    }

    /// Append a turn and, if `trigger` is set and no call is in flight,
    /// claim the in-flight slot with a snapshot of the updated window.
    pub fn begin_turn(
        &self,
        role: Role,
        content: &str,
        trigger: bool,
    ) -> Option<GenerationTicket> {
        let mut window = self.window();
        window.append(role, content);

        if !trigger {
            return None;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(room_id = %self.room_id, "Generation already in flight, turn appended only");
            return None;
        }

        Some(GenerationTicket {
            snapshot: window.snapshot(),
            in_flight: self.in_flight.clone(),
        })
    }

    /// Run the backend call for `ticket` and append the reply on success.
    ///
    /// Nothing is appended on failure, and an empty reply is returned without
    /// being appended. The in-flight slot is released when this returns.
    pub async fn generate(&self, ticket: GenerationTicket) -> Result<Message, ProviderError> {
        let started = Instant::now();
        self.metrics.increment(LLM_REQUESTS_TOTAL);
        self.events.publish(DomainEvent::GenerationStarted {
            room_id: self.room_id.clone(),
            context_messages: ticket.snapshot.len(),
            timestamp: Utc::now(),
        });
        debug!(
            room_id = %self.room_id,
            model = %self.model,
            messages = ticket.snapshot.len(),
            "Starting generation"
        );

        let request = ChatRequest::new(self.model.clone(), ticket.snapshot.clone());
        let call = async {
            let stream = self.provider.chat(request).await?;
            assembler::assemble(stream).await
        };

        let result = match tokio::time::timeout(self.deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.deadline)),
        };

        match result {
            Ok(text) => {
                let reply = Message::assistant(text);
                if reply.content.is_empty() {
                    debug!(room_id = %self.room_id, "Empty reply, context left unchanged");
                } else {
                    self.window().append(Role::Assistant, reply.content.clone());
                }
                drop(ticket);

                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    room_id = %self.room_id,
                    chars = reply.content.chars().count(),
                    duration_ms,
                    "Generation complete"
                );
                self.events.publish(DomainEvent::GenerationCompleted {
                    room_id: self.room_id.clone(),
                    reply_chars: reply.content.chars().count(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Ok(reply)
            }
            Err(e) => {
                drop(ticket);
                self.metrics.increment(LLM_FAILURES_TOTAL);
                error!(room_id = %self.room_id, kind = e.kind(), error = %e, "Generation failed");
                self.events.publish(DomainEvent::GenerationFailed {
                    room_id: self.room_id.clone(),
                    kind: e.kind().to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Append a turn and, when it starts a generation, wait for the reply.
    ///
    /// Returns `Ok(None)` when no generation was started.
    pub async fn submit_turn(
        &self,
        role: Role,
        content: &str,
        trigger: bool,
    ) -> Result<Option<Message>, ProviderError> {
        match self.begin_turn(role, content, trigger) {
            Some(ticket) => self.generate(ticket).await.map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for AssistantSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantSession")
            .field("room_id", &self.room_id)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("generating", &self.is_generating())
            .finish()
    }
}
