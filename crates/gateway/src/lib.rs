//! HTTP and WebSocket gateway for Parley.
//!
//! Hosts the room coordinator behind `GET /ws`, the chat history REST
//! routes, health and metrics endpoints, and an SSE feed of domain events.
//!
//! Built on Axum.

pub mod history;
pub mod persist;
pub mod protocol;
pub mod room;
pub mod ws;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{Json, Response};
use axum::routing::get;
use axum::Router;
use parley_agent::SessionOptions;
use parley_core::event::EventBus;
use parley_core::history::HistoryStore;
use parley_core::metrics::{MetricsSink, REQUESTS_TOTAL};
use parley_core::provider::Provider;
use parley_telemetry::{MetricsRegistry, MetricsSnapshot};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio_stream::StreamExt;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

pub use history::ErrorResponse;
pub use persist::HistoryWriter;
pub use room::{JoinRequest, RoomHandle, RoomInfo, RoomServices};

/// Shared application state.
pub struct AppState {
    pub rooms: RoomHandle,
    pub store: Arc<dyn HistoryStore>,
    pub history: HistoryWriter,
    pub metrics: Arc<MetricsRegistry>,
    pub events: Arc<EventBus>,
    pub open_sockets: AtomicU64,
    pub max_message_length: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the coordinator, the history writer, and the metrics registry
    /// around the given backend and store. Must be called inside a runtime.
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn HistoryStore>,
        options: SessionOptions,
        max_message_length: usize,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let events = Arc::new(EventBus::default());
        let history = HistoryWriter::spawn(store.clone());

        let rooms = RoomHandle::spawn(RoomServices {
            provider,
            options,
            history: history.clone(),
            metrics: metrics.clone(),
            events: events.clone(),
            max_message_length,
        });

        Self {
            rooms,
            store,
            history,
            metrics,
            events,
            open_sockets: AtomicU64::new(0),
            max_message_length,
        }
    }
}

/// Build the full router.
///
/// Layers, outermost first:
/// - HTTP trace logging
/// - CORS restricted to `socket_origin` (`*` allows any)
/// - Request counting
/// - Request body size limit (1 MiB)
pub fn build_router(state: SharedState, socket_origin: &str) -> Router {
    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/test/ping", get(ping_handler))
        .route("/v1/metrics", get(metrics_handler))
        .route("/v1/events", get(events_handler))
        .nest("/v1/chat", history::history_router());

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api)
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(cors_layer(socket_origin))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(socket_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if socket_origin == "*" {
        return cors.allow_origin(Any);
    }
    match socket_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(AllowOrigin::exact(origin)),
        Err(_) => {
            warn!(origin = %socket_origin, "Unusable socket origin, cross-origin requests disabled");
            cors
        }
    }
}

async fn count_requests(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    state.metrics.increment(REQUESTS_TOTAL);
    next.run(req).await
}

/// Start the gateway HTTP server.
pub async fn start(config: parley_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = parley_providers::from_config(&config);
    let store = parley_memory::from_config(&config.memory).await?;
    info!(
        backend = %store.name(),
        model = %config.llm.model,
        llm = %config.llm.base_url,
        "Subsystems ready"
    );

    let state = Arc::new(AppState::new(
        provider,
        store,
        SessionOptions::from_config(&config),
        config.limits.max_message_length,
    ));
    let app = build_router(state, &config.gateway.socket_origin);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    timestamp: String,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.metrics.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn ping_handler() -> &'static str {
    "pong"
}

async fn metrics_handler(State(state): State<SharedState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// `GET /api/v1/events` — SSE stream of domain events.
async fn events_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.event_type()).data(data))
        });

    Sse::new(stream)
}

async fn not_found_handler() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not found".into(),
            invalid_count: None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use parley_agent::testing::ScriptedProvider;
    use parley_core::message::{Message, Role};
    use parley_memory::InMemoryHistory;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state() -> (SharedState, Arc<InMemoryHistory>) {
        let store = Arc::new(InMemoryHistory::new());
        let state = Arc::new(AppState::new(
            Arc::new(ScriptedProvider::new(vec![])),
            store.clone(),
            SessionOptions::default(),
            100,
        ));
        (state, store)
    }

    fn app(state: &SharedState) -> Router {
        build_router(state.clone(), "*")
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _) = test_state();
        for path in ["/health", "/api/health"] {
            let (status, json) = send(app(&state), Method::GET, path, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["status"], "ok");
            assert!(json["uptime_secs"].is_u64());
            assert!(json["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn ping_pongs() {
        let (state, _) = test_state();
        let response = app(&state)
            .oneshot(Request::get("/api/v1/test/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (state, _) = test_state();
        let (status, json) = send(app(&state), Method::GET, "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Not found");
    }

    #[tokio::test]
    async fn requests_are_counted() {
        let (state, _) = test_state();
        send(app(&state), Method::GET, "/health", None).await;
        send(app(&state), Method::GET, "/nope", None).await;
        let (_, json) = send(app(&state), Method::GET, "/api/v1/metrics", None).await;
        // The metrics request itself is counted before the handler runs
        assert_eq!(json["metrics"]["requests_total"], 3);
        assert_eq!(json["metrics"]["active_sockets"], 0);
    }

    #[tokio::test]
    async fn save_single_message_then_read_back() {
        let (state, _) = test_state();
        let (status, json) = send(
            app(&state),
            Method::POST,
            "/api/v1/chat/save",
            Some(json!({
                "username": "alice",
                "email": "alice@example.com",
                "message": {"role": "user", "content": "hello"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert!(json["message_id"].is_i64());

        let (status, json) =
            send(app(&state), Method::GET, "/api/v1/chat/history?username=alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["username"], "alice");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn save_batch_counts_messages() {
        let (state, store) = test_state();
        let (status, json) = send(
            app(&state),
            Method::POST,
            "/api/v1/chat/save",
            Some(json!({
                "username": "bob",
                "messages": [
                    {"role": "user", "content": "one"},
                    {"role": "assistant", "content": "two"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["messages_saved"], 2);

        let user = store.find_user("bob").await.unwrap().unwrap();
        let history = store.get_chat_history(user.id).await.unwrap();
        assert_eq!(
            history,
            vec![Message::user("one"), Message::assistant("two")]
        );
    }

    #[tokio::test]
    async fn save_rejects_bad_input() {
        let (state, store) = test_state();
        let cases = [
            json!({"message": {"role": "user", "content": "x"}}),
            json!({"username": "has space", "message": {"role": "user", "content": "x"}}),
            json!({"username": "carol"}),
            json!({"username": "carol", "messages": []}),
            json!({"username": "carol", "message": {"content": "x"}}),
            json!({"username": "carol", "message": {"role": "robot", "content": "x"}}),
            json!({"username": "carol", "message": {"role": "user", "content": "   "}}),
            json!({"username": "carol", "message": {"role": "user", "content": "x".repeat(101)}}),
        ];
        for body in cases {
            let (status, json) =
                send(app(&state), Method::POST, "/api/v1/chat/save", Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {body}");
            assert!(json["error"].is_string());
        }
        // Nothing was created along the way
        assert!(store.find_user("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_batch_reports_invalid_count() {
        let (state, _) = test_state();
        let (status, json) = send(
            app(&state),
            Method::POST,
            "/api/v1/chat/save",
            Some(json!({
                "username": "dave",
                "messages": [
                    {"role": "user", "content": "fine"},
                    {"role": "user"},
                    {"role": "nobody", "content": "x"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["invalid_count"], 2);
    }

    #[tokio::test]
    async fn history_requires_known_user() {
        let (state, _) = test_state();
        let (status, _) = send(app(&state), Method::GET, "/api/v1/chat/history", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) =
            send(app(&state), Method::GET, "/api/v1/chat/history?username=ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "User not found");
    }

    #[tokio::test]
    async fn save_full_skips_existing_messages() {
        let (state, store) = test_state();
        let id = store
            .get_or_create_user("erin", &Default::default())
            .await
            .unwrap();
        store.save_message(id, Role::User, "hello").await.unwrap();

        let (status, json) = send(
            app(&state),
            Method::POST,
            "/api/v1/chat/save-full",
            Some(json!({
                "username": "erin",
                "history": [
                    {"role": "user", "content": "hello"},
                    {"role": "assistant", "content": "hi there"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["saved"], 1);
        assert_eq!(json["total"], 2);
        assert_eq!(json["already_existed"], 1);
        assert_eq!(store.get_chat_history(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn save_full_requires_history() {
        let (state, _) = test_state();
        let (status, _) = send(
            app(&state),
            Method::POST,
            "/api/v1/chat/save-full",
            Some(json!({"username": "frank"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn cors_accepts_any_origin_string() {
        let _ = cors_layer("*");
        let _ = cors_layer("http://localhost:5173");
        let _ = cors_layer("bad\norigin");
    }
}
