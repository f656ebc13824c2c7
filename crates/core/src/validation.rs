//! Input validation for socket events and history routes.
//!
//! Every check returns [`RoomError::Validation`] with a human-readable reason;
//! callers reject locally and never broadcast invalid input.

use crate::error::RoomError;

/// Default cap on relayed message length, in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 10_000;

/// Usernames (and room display names) are at most this many characters.
pub const MAX_USERNAME_LENGTH: usize = 50;

/// Room ids are at most this many characters.
pub const MAX_ROOM_ID_LENGTH: usize = 64;

/// Message content must be non-blank and at most `max_len` characters.
pub fn validate_message_content(content: &str, max_len: usize) -> Result<(), RoomError> {
    if content.is_empty() {
        return Err(RoomError::Validation(
            "Content must be a non-empty string".into(),
        ));
    }
    if content.trim().is_empty() {
        return Err(RoomError::Validation(
            "Content cannot be empty or whitespace only".into(),
        ));
    }
    if content.chars().count() > max_len {
        return Err(RoomError::Validation(format!(
            "Content exceeds maximum length of {max_len} characters"
        )));
    }
    Ok(())
}

/// Usernames are 1–50 characters of `[A-Za-z0-9_-]`.
pub fn validate_username(username: &str) -> Result<(), RoomError> {
    if username.trim().is_empty() {
        return Err(RoomError::Validation(
            "Username cannot be empty or whitespace only".into(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(RoomError::Validation(format!(
            "Username exceeds maximum length of {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RoomError::Validation(
            "Username can only contain letters, numbers, underscores, and hyphens".into(),
        ));
    }
    Ok(())
}

pub fn validate_room_id(room_id: &str) -> Result<(), RoomError> {
    if room_id.is_empty() {
        return Err(RoomError::Validation("Room id must be non-empty".into()));
    }
    if room_id.chars().count() > MAX_ROOM_ID_LENGTH {
        return Err(RoomError::Validation(format!(
            "Room id exceeds maximum length of {MAX_ROOM_ID_LENGTH} characters"
        )));
    }
    if room_id.chars().any(char::is_whitespace) {
        return Err(RoomError::Validation(
            "Room id cannot contain whitespace".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_rules() {
        assert!(validate_message_content("hello", 10).is_ok());
        assert!(validate_message_content("", 10).is_err());
        assert!(validate_message_content("   \n", 10).is_err());
        assert!(validate_message_content("12345678901", 10).is_err());
        // Length is measured in characters
        assert!(validate_message_content("ééééé", 5).is_ok());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("alice_01-b").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username(&"a".repeat(50)).is_ok());
    }

    #[test]
    fn room_id_rules() {
        assert!(validate_room_id("r1").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("room one").is_err());
        assert!(validate_room_id(&"r".repeat(65)).is_err());
    }
}
