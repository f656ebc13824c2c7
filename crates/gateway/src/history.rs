//! Chat history REST routes.
//!
//! - `POST /api/v1/chat/save`       — append one message or a batch
//! - `GET  /api/v1/chat/history`    — a user's messages, oldest first
//! - `POST /api/v1/chat/save-full`  — append only messages not already stored

use crate::SharedState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use parley_core::history::{UserId, UserProfile};
use parley_core::message::{Message, Role};
use parley_core::validation;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub fn history_router() -> Router<SharedState> {
    Router::new()
        .route("/save", post(save_handler))
        .route("/history", get(history_handler))
        .route("/save-full", post(save_full_handler))
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_count: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
            invalid_count: None,
        }),
    )
}

fn server_error(e: impl std::fmt::Display) -> ApiError {
    warn!(error = %e, "History request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
            invalid_count: None,
        }),
    )
}

/// A message as clients send it; every field is checked before use.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl IncomingMessage {
    fn parse(&self, max_len: usize) -> Result<Message, String> {
        let (Some(role), Some(content)) = (&self.role, &self.content) else {
            return Err("message must have role and content fields".into());
        };
        let role: Role = role.parse()?;
        validation::validate_message_content(content, max_len).map_err(|e| e.to_string())?;
        Ok(Message::new(role, content.clone()))
    }
}

fn check_username(username: Option<&str>) -> Result<&str, ApiError> {
    let username = username.ok_or_else(|| bad_request("username is required"))?;
    validation::validate_username(username).map_err(|e| bad_request(e.to_string()))?;
    Ok(username)
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<IncomingMessage>,
    #[serde(default)]
    messages: Option<Vec<IncomingMessage>>,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    success: bool,
    user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages_saved: Option<usize>,
    message: String,
}

async fn save_handler(
    State(state): State<SharedState>,
    Json(req): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, ApiError> {
    let username = check_username(req.username.as_deref())?;
    let max_len = state.max_message_length;

    // Validate everything before touching storage
    enum Payload {
        One(Message),
        Batch(Vec<Message>),
    }
    let payload = if let Some(message) = &req.message {
        Payload::One(message.parse(max_len).map_err(bad_request)?)
    } else if let Some(messages) = &req.messages {
        if messages.is_empty() {
            return Err(bad_request("messages array cannot be empty"));
        }
        let parsed: Vec<Result<Message, String>> =
            messages.iter().map(|m| m.parse(max_len)).collect();
        let invalid = parsed.iter().filter(|p| p.is_err()).count();
        if invalid > 0 {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "All messages must have a valid role and content".into(),
                    invalid_count: Some(invalid),
                }),
            ));
        }
        Payload::Batch(parsed.into_iter().filter_map(Result::ok).collect())
    } else {
        return Err(bad_request("Either message or messages (array) is required"));
    };

    let profile = UserProfile {
        email: req.email.clone(),
        name: req.name.clone(),
    };
    let user_id = state
        .store
        .get_or_create_user(username, &profile)
        .await
        .map_err(server_error)?;

    let response = match payload {
        Payload::One(message) => {
            let saved = state
                .store
                .save_message(user_id, message.role, &message.content)
                .await
                .map_err(server_error)?;
            SaveResponse {
                success: true,
                user_id,
                message_id: Some(saved.id),
                messages_saved: None,
                message: "Message appended to chat history successfully".into(),
            }
        }
        Payload::Batch(messages) => {
            let count = state
                .store
                .save_messages(user_id, &messages)
                .await
                .map_err(server_error)?;
            SaveResponse {
                success: true,
                user_id,
                message_id: None,
                messages_saved: Some(count),
                message: format!("Successfully appended {count} message(s) to chat history"),
            }
        }
    };

    info!(user_id, "Chat history saved");
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    success: bool,
    user_id: UserId,
    username: String,
    last_online: DateTime<Utc>,
    messages: Vec<Message>,
}

async fn history_handler(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Some(username) = query.username.as_deref() else {
        return Err(bad_request("username query parameter is required"));
    };

    let user = state
        .store
        .find_user(username)
        .await
        .map_err(server_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "User not found".into(),
                    invalid_count: None,
                }),
            )
        })?;

    let messages = state
        .store
        .get_chat_history(user.id)
        .await
        .map_err(server_error)?;

    Ok(Json(HistoryResponse {
        success: true,
        user_id: user.id,
        username: user.username,
        last_online: user.last_online,
        messages,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SaveFullRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    history: Option<Vec<IncomingMessage>>,
}

#[derive(Debug, Serialize)]
pub struct SaveFullResponse {
    success: bool,
    user_id: UserId,
    saved: usize,
    total: usize,
    already_existed: usize,
    message: String,
}

async fn save_full_handler(
    State(state): State<SharedState>,
    Json(req): Json<SaveFullRequest>,
) -> Result<Json<SaveFullResponse>, ApiError> {
    let username = check_username(req.username.as_deref())?;
    let Some(history) = &req.history else {
        return Err(bad_request("history (array) is required"));
    };

    let history: Vec<Message> = history
        .iter()
        .map(|m| m.parse(state.max_message_length))
        .collect::<Result<_, _>>()
        .map_err(bad_request)?;

    let profile = UserProfile {
        email: req.email.clone(),
        name: req.name.clone(),
    };
    let user_id = state
        .store
        .get_or_create_user(username, &profile)
        .await
        .map_err(server_error)?;

    let summary = state
        .store
        .save_full_history(user_id, &history)
        .await
        .map_err(server_error)?;

    let message = if summary.total == 0 {
        "No history to save".to_string()
    } else if summary.saved == 0 {
        "All messages already exist in database".to_string()
    } else {
        format!(
            "Saved {} new message(s), {} already existed",
            summary.saved, summary.already_existed
        )
    };

    Ok(Json(SaveFullResponse {
        success: true,
        user_id,
        saved: summary.saved,
        total: summary.total,
        already_existed: summary.already_existed,
        message,
    }))
}
