//! Room coordinator — membership, broadcast, and assistant turn policy.
//!
//! All room state lives in one actor task. Connections talk to it through a
//! cloneable [`RoomHandle`]; commands are applied one at a time in arrival
//! order, so broadcasts within a room keep the order the transport delivered
//! them. Backend calls run in their own tasks and report back to the actor
//! with a `GenerationFinished` command.
//!
//! Per room: `EMPTY → OPEN (1) → FULL (2)`, and back down as members leave.
//! A room and its assistant session outlive their members so the next joiner
//! continues the same conversation.

use crate::persist::HistoryWriter;
use crate::protocol::ServerEvent;
use chrono::Utc;
use parley_agent::{AssistantSession, SessionOptions};
use parley_core::error::{ProviderError, RoomError};
use parley_core::event::{DomainEvent, EventBus};
use parley_core::history::UserId;
use parley_core::message::{Message, Role};
use parley_core::metrics::MetricsSink;
use parley_core::provider::Provider;
use parley_core::validation;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum members per room.
pub const MAX_MEMBERS: usize = 2;

pub type ConnectionId = Uuid;

/// Where the coordinator sends events for one connection.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// What a connection asks for when it joins.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub room_id: String,
    pub display_name: String,
    /// Persisted identity, when the history store resolved one
    pub user_id: Option<UserId>,
    /// Persisted history; seeds the context window of a fresh room
    pub history: Vec<Message>,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub members: Vec<String>,
    pub generation_in_flight: bool,
    pub context_len: usize,
}

/// Shared collaborators handed to every room.
pub struct RoomServices {
    pub provider: Arc<dyn Provider>,
    pub options: SessionOptions,
    pub history: HistoryWriter,
    pub metrics: Arc<dyn MetricsSink>,
    pub events: Arc<EventBus>,
    pub max_message_length: usize,
}

enum Command {
    Join {
        connection: ConnectionId,
        request: JoinRequest,
        outbox: Outbox,
    },
    Relay {
        connection: ConnectionId,
        content: String,
        outbox: Outbox,
    },
    Leave {
        connection: ConnectionId,
    },
    GenerationFinished {
        room_id: String,
        user_id: Option<UserId>,
        result: Result<Message, ProviderError>,
    },
    Info {
        room_id: String,
        reply: oneshot::Sender<Option<RoomInfo>>,
    },
    Snapshot {
        room_id: String,
        reply: oneshot::Sender<Option<Vec<Message>>>,
    },
}

/// Cloneable front door to the coordinator task.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl RoomHandle {
    /// Start the coordinator. It stops once every handle is dropped.
    pub fn spawn(services: RoomServices) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = RoomCoordinator {
            rooms: HashMap::new(),
            connections: HashMap::new(),
            services,
            commands: tx.downgrade(),
        };
        tokio::spawn(coordinator.run(rx));
        Self { tx }
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Room coordinator has stopped");
        }
    }

    pub fn join(&self, connection: ConnectionId, request: JoinRequest, outbox: Outbox) {
        self.send(Command::Join {
            connection,
            request,
            outbox,
        });
    }

    /// Relay a chat message from `connection` to its room. Rejections go to
    /// `outbox` only.
    pub fn relay(&self, connection: ConnectionId, content: impl Into<String>, outbox: Outbox) {
        self.send(Command::Relay {
            connection,
            content: content.into(),
            outbox,
        });
    }

    pub fn leave(&self, connection: ConnectionId) {
        self.send(Command::Leave { connection });
    }

    pub async fn room_info(&self, room_id: &str) -> Option<RoomInfo> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Info {
            room_id: room_id.to_string(),
            reply,
        });
        rx.await.ok().flatten()
    }

    pub async fn context_snapshot(&self, room_id: &str) -> Option<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot {
            room_id: room_id.to_string(),
            reply,
        });
        rx.await.ok().flatten()
    }
}

struct Participant {
    connection: ConnectionId,
    display_name: String,
    user_id: Option<UserId>,
    outbox: Outbox,
}

struct Room {
    members: Vec<Participant>,
    session: Arc<AssistantSession>,
}

impl Room {
    fn broadcast(&self, event: &ServerEvent) {
        for member in &self.members {
            if member.outbox.send(event.clone()).is_err() {
                debug!(connection = %member.connection, "Dropping event for closed connection");
            }
        }
    }

    fn info(&self, room_id: &str) -> RoomInfo {
        RoomInfo {
            room_id: room_id.to_string(),
            members: self.members.iter().map(|m| m.display_name.clone()).collect(),
            generation_in_flight: self.session.is_generating(),
            context_len: self.session.context_len(),
        }
    }
}

struct RoomCoordinator {
    rooms: HashMap<String, Room>,
    connections: HashMap<ConnectionId, String>,
    services: RoomServices,
    commands: mpsc::WeakUnboundedSender<Command>,
}

fn reject(outbox: &Outbox, error: &RoomError) {
    warn!(error = %error, "Rejected room request");
    let _ = outbox.send(ServerEvent::error(error.to_string()));
}

impl RoomCoordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!("Room coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Join {
                connection,
                request,
                outbox,
            } => self.join(connection, request, outbox),
            Command::Relay {
                connection,
                content,
                outbox,
            } => self.relay(connection, content, &outbox),
            Command::Leave { connection } => self.leave(connection),
            Command::GenerationFinished {
                room_id,
                user_id,
                result,
            } => self.finish_generation(&room_id, user_id, result),
            Command::Info { room_id, reply } => {
                let _ = reply.send(self.rooms.get(&room_id).map(|r| r.info(&room_id)));
            }
            Command::Snapshot { room_id, reply } => {
                let _ = reply.send(self.rooms.get(&room_id).map(|r| r.session.snapshot()));
            }
        }
    }

    fn join(&mut self, connection: ConnectionId, request: JoinRequest, outbox: Outbox) {
        let valid = validation::validate_room_id(&request.room_id)
            .and_then(|_| validation::validate_username(&request.display_name));
        if let Err(e) = valid {
            reject(&outbox, &e);
            return;
        }

        if let Some(current) = self.connections.get(&connection)
            && *current == request.room_id
        {
            reject(
                &outbox,
                &RoomError::Validation(format!("Already in room '{current}'")),
            );
            return;
        }

        let JoinRequest {
            room_id,
            display_name,
            user_id,
            history,
        } = request;

        // Full rooms reject before the current room is left
        if self
            .rooms
            .get(&room_id)
            .is_some_and(|room| room.members.len() >= MAX_MEMBERS)
        {
            info!(room = %room_id, connection = %connection, "Join rejected, room is full");
            let _ = outbox.send(ServerEvent::RoomFull {
                room_id: room_id.clone(),
            });
            self.services.events.publish(DomainEvent::RoomFull {
                room_id,
                timestamp: Utc::now(),
            });
            return;
        }

        if self.connections.contains_key(&connection) {
            self.leave(connection);
        }

        let services = &self.services;
        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            let seeded_from_history = !history.is_empty();
            let session = AssistantSession::with_observers(
                room_id.clone(),
                services.options.seed(history),
                services.provider.clone(),
                &services.options,
                services.metrics.clone(),
                services.events.clone(),
            );
            info!(room = %room_id, seeded_from_history, "Room created");
            Room {
                members: Vec::new(),
                session: Arc::new(session),
            }
        });

        room.members.push(Participant {
            connection,
            display_name: display_name.clone(),
            user_id,
            outbox,
        });
        let member_count = room.members.len();
        room.broadcast(&ServerEvent::UserJoined {
            display_name: display_name.clone(),
            member_count,
        });
        self.connections.insert(connection, room_id.clone());

        info!(room = %room_id, connection = %connection, member_count, "Participant joined");
        self.services.events.publish(DomainEvent::MemberJoined {
            room_id,
            display_name,
            member_count,
            timestamp: Utc::now(),
        });
    }

    fn relay(&mut self, connection: ConnectionId, content: String, outbox: &Outbox) {
        let Some(room_id) = self.connections.get(&connection).cloned() else {
            reject(outbox, &RoomError::NotInRoom);
            return;
        };

        if let Err(e) =
            validation::validate_message_content(&content, self.services.max_message_length)
        {
            reject(outbox, &e);
            return;
        }

        let Some(room) = self.rooms.get(&room_id) else {
            reject(outbox, &RoomError::NotInRoom);
            return;
        };
        let Some(sender) = room.members.iter().find(|m| m.connection == connection) else {
            reject(outbox, &RoomError::NotInRoom);
            return;
        };
        let user_id = sender.user_id;

        room.broadcast(&ServerEvent::ChatMessage {
            display_name: sender.display_name.clone(),
            content: content.clone(),
            timestamp: Utc::now(),
        });

        if let Some(user_id) = user_id {
            self.services.history.save(user_id, Role::User, content.as_str());
        }

        // The assistant only answers a participant who is alone in the room
        let trigger = room.members.len() == 1;
        let Some(ticket) = room.session.begin_turn(Role::User, &content, trigger) else {
            return;
        };

        room.broadcast(&ServerEvent::LlmStart);
        debug!(room = %room_id, "Generation triggered");

        let session = room.session.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = session.generate(ticket).await;
            match commands.upgrade() {
                Some(tx) => {
                    let _ = tx.send(Command::GenerationFinished {
                        room_id,
                        user_id,
                        result,
                    });
                }
                None => debug!(room = %room_id, "Coordinator gone, generation result dropped"),
            }
        });
    }

    fn finish_generation(
        &mut self,
        room_id: &str,
        user_id: Option<UserId>,
        result: Result<Message, ProviderError>,
    ) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };

        match result {
            Ok(reply) => {
                if let Some(user_id) = user_id
                    && !reply.content.is_empty()
                {
                    self.services
                        .history
                        .save(user_id, Role::Assistant, reply.content.as_str());
                }
                room.broadcast(&ServerEvent::LlmEnd {
                    content: reply.content,
                });
            }
            Err(e) => {
                room.broadcast(&ServerEvent::LlmError {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn leave(&mut self, connection: ConnectionId) {
        let Some(room_id) = self.connections.remove(&connection) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let Some(pos) = room.members.iter().position(|m| m.connection == connection) else {
            return;
        };

        let participant = room.members.remove(pos);
        let member_count = room.members.len();
        room.broadcast(&ServerEvent::UserDisconnected {
            display_name: participant.display_name.clone(),
            member_count,
        });

        info!(room = %room_id, connection = %connection, member_count, "Participant left");
        self.services.events.publish(DomainEvent::MemberLeft {
            room_id,
            display_name: participant.display_name,
            member_count,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_agent::testing::{Script, ScriptedProvider};
    use parley_core::NoopMetrics;
    use parley_memory::InMemoryHistory;
    use std::time::Duration;

    struct Harness {
        rooms: RoomHandle,
        history: HistoryWriter,
        store: Arc<InMemoryHistory>,
    }

    fn harness(provider: Arc<ScriptedProvider>) -> Harness {
        let store = Arc::new(InMemoryHistory::new());
        let history = HistoryWriter::spawn(store.clone());
        let rooms = RoomHandle::spawn(RoomServices {
            provider,
            options: SessionOptions {
                model: "test".into(),
                deadline: Duration::from_secs(5),
                max_messages: 20,
                max_tokens: 2048,
                system_prompt: "system".into(),
            },
            history: history.clone(),
            metrics: Arc::new(NoopMetrics),
            events: Arc::new(EventBus::default()),
            max_message_length: 100,
        });
        Harness {
            rooms,
            history,
            store,
        }
    }

    struct Client {
        id: ConnectionId,
        tx: Outbox,
        rx: mpsc::UnboundedReceiver<ServerEvent>,
    }

    impl Client {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                id: Uuid::new_v4(),
                tx,
                rx,
            }
        }

        async fn next(&mut self) -> ServerEvent {
            tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("outbox closed")
        }

        fn join(&self, rooms: &RoomHandle, room_id: &str, name: &str, user_id: Option<UserId>) {
            rooms.join(
                self.id,
                JoinRequest {
                    room_id: room_id.into(),
                    display_name: name.into(),
                    user_id,
                    history: Vec::new(),
                },
                self.tx.clone(),
            );
        }

        fn say(&self, rooms: &RoomHandle, content: &str) {
            rooms.relay(self.id, content, self.tx.clone());
        }
    }

    #[tokio::test]
    async fn invalid_join_is_rejected_locally() {
        let h = harness(Arc::new(ScriptedProvider::new(vec![])));
        let mut alice = Client::new();

        alice.join(&h.rooms, "room one", "alice", None);
        assert!(matches!(alice.next().await, ServerEvent::Error { .. }));

        alice.join(&h.rooms, "r1", "not a username", None);
        assert!(matches!(alice.next().await, ServerEvent::Error { .. }));

        assert!(h.rooms.room_info("r1").await.is_none());
    }

    #[tokio::test]
    async fn relay_requires_membership_and_valid_content() {
        let h = harness(Arc::new(ScriptedProvider::new(vec![])));
        let mut alice = Client::new();

        alice.say(&h.rooms, "hello");
        match alice.next().await {
            ServerEvent::Error { message } => assert!(message.contains("not joined")),
            other => panic!("Expected error, got {other:?}"),
        }

        alice.join(&h.rooms, "r1", "alice", None);
        alice.next().await;

        alice.say(&h.rooms, "   ");
        assert!(matches!(alice.next().await, ServerEvent::Error { .. }));
        alice.say(&h.rooms, &"x".repeat(101));
        assert!(matches!(alice.next().await, ServerEvent::Error { .. }));

        // Nothing reached the context window
        assert_eq!(h.rooms.context_snapshot("r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn leave_notifies_remaining_member_and_keeps_the_room() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::reply("hey")]));
        let h = harness(provider);
        let mut alice = Client::new();
        let mut bob = Client::new();

        alice.join(&h.rooms, "r1", "alice", None);
        alice.next().await;
        alice.say(&h.rooms, "hello");
        alice.next().await; // chat_message
        alice.next().await; // llm_start
        alice.next().await; // llm_end

        bob.join(&h.rooms, "r1", "bob", None);
        alice.next().await;
        bob.next().await;

        h.rooms.leave(alice.id);
        assert_eq!(
            bob.next().await,
            ServerEvent::UserDisconnected {
                display_name: "alice".into(),
                member_count: 1
            }
        );

        h.rooms.leave(bob.id);
        let info = h.rooms.room_info("r1").await.unwrap();
        assert!(info.members.is_empty());
        // Conversation survives for the next joiner
        assert_eq!(info.context_len, 3);
    }

    #[tokio::test]
    async fn rejoining_the_same_room_is_an_error() {
        let h = harness(Arc::new(ScriptedProvider::new(vec![])));
        let mut alice = Client::new();

        alice.join(&h.rooms, "r1", "alice", None);
        alice.next().await;
        alice.join(&h.rooms, "r1", "alice", None);
        assert!(matches!(alice.next().await, ServerEvent::Error { .. }));
        assert_eq!(h.rooms.room_info("r1").await.unwrap().members.len(), 1);
    }

    #[tokio::test]
    async fn switching_rooms_leaves_the_old_one() {
        let h = harness(Arc::new(ScriptedProvider::new(vec![])));
        let mut alice = Client::new();

        alice.join(&h.rooms, "r1", "alice", None);
        alice.next().await;
        alice.join(&h.rooms, "r2", "alice", None);
        alice.next().await;

        assert!(h.rooms.room_info("r1").await.unwrap().members.is_empty());
        assert_eq!(
            h.rooms.room_info("r2").await.unwrap().members,
            vec!["alice".to_string()]
        );
    }

    #[tokio::test]
    async fn rejected_switch_keeps_the_current_room() {
        let h = harness(Arc::new(ScriptedProvider::new(vec![])));
        let mut alice = Client::new();
        let mut bob = Client::new();
        let mut carol = Client::new();
        let mut dave = Client::new();

        alice.join(&h.rooms, "full", "alice", None);
        alice.next().await;
        bob.join(&h.rooms, "full", "bob", None);
        alice.next().await;
        bob.next().await;

        carol.join(&h.rooms, "home", "carol", None);
        carol.next().await;
        dave.join(&h.rooms, "home", "dave", None);
        carol.next().await;
        dave.next().await;

        carol.join(&h.rooms, "full", "carol", None);
        assert_eq!(
            carol.next().await,
            ServerEvent::RoomFull {
                room_id: "full".into()
            }
        );

        assert_eq!(
            h.rooms.room_info("home").await.unwrap().members,
            vec!["carol".to_string(), "dave".to_string()]
        );
        assert_eq!(h.rooms.room_info("full").await.unwrap().members.len(), 2);
        assert!(dave.rx.try_recv().is_err(), "dave saw a spurious event");

        // Still a member: chat keeps flowing in the old room
        carol.say(&h.rooms, "still here");
        assert!(matches!(dave.next().await, ServerEvent::ChatMessage { .. }));
    }

    #[tokio::test]
    async fn fresh_room_is_seeded_from_history() {
        let h = harness(Arc::new(ScriptedProvider::new(vec![])));
        let alice = Client::new();

        h.rooms.join(
            alice.id,
            JoinRequest {
                room_id: "r1".into(),
                display_name: "alice".into(),
                user_id: Some(1),
                history: vec![Message::user("earlier"), Message::assistant("reply")],
            },
            alice.tx.clone(),
        );

        assert_eq!(
            h.rooms.context_snapshot("r1").await.unwrap(),
            vec![Message::user("earlier"), Message::assistant("reply")]
        );
    }

    #[tokio::test]
    async fn turns_and_replies_are_persisted() {
        use parley_core::HistoryStore;

        let provider = Arc::new(ScriptedProvider::new(vec![Script::reply("Hi alice")]));
        let h = harness(provider);
        let mut alice = Client::new();

        alice.join(&h.rooms, "r1", "alice", Some(7));
        alice.next().await;
        alice.say(&h.rooms, "hello");
        alice.next().await;
        alice.next().await;
        assert_eq!(
            alice.next().await,
            ServerEvent::LlmEnd {
                content: "Hi alice".into()
            }
        );

        h.history.flush().await;
        assert_eq!(
            h.store.get_chat_history(7).await.unwrap(),
            vec![Message::user("hello"), Message::assistant("Hi alice")]
        );
    }
}
