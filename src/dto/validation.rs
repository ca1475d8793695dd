//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::models::{CardValue, DeckType};

/// Longest accepted room identifier.
pub const ROOM_ID_MAX_LEN: usize = 64;
/// Longest accepted room or participant display name.
pub const DISPLAY_NAME_MAX_LEN: usize = 100;
/// Largest custom deck accepted at room creation.
pub const CUSTOM_DECK_MAX_CARDS: usize = 50;

/// Validates that a room ID is 1 to 64 URL-safe characters (ASCII letters, digits, `-`, `_`).
///
/// # Examples
///
/// ```ignore
/// validate_room_id("x7Kp2QmZ0a") // Ok
/// validate_room_id("team-alpha") // Ok
/// validate_room_id("team alpha") // Err - space
/// validate_room_id("")           // Err - empty
/// ```
pub fn validate_room_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > ROOM_ID_MAX_LEN {
        let mut err = ValidationError::new("room_id_length");
        err.message = Some(
            format!(
                "Room ID must be between 1 and {ROOM_ID_MAX_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("room_id_format");
        err.message =
            Some("Room ID may only contain ASCII letters, digits, '-' and '_'".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a display name has visible content and a reasonable length.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }

    let length = name.chars().count();
    if length > DISPLAY_NAME_MAX_LEN {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Name must be at most {DISPLAY_NAME_MAX_LEN} characters (got {length})").into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a custom deck is supplied exactly when the deck type asks for one.
pub fn validate_deck(
    deck_type: DeckType,
    custom_deck: Option<&[CardValue]>,
) -> Result<(), ValidationError> {
    match (deck_type, custom_deck) {
        (DeckType::Custom, None) | (DeckType::Custom, Some([])) => {
            let mut err = ValidationError::new("custom_deck_missing");
            err.message = Some("A custom deck needs at least one card".into());
            Err(err)
        }
        (DeckType::Custom, Some(cards)) if cards.len() > CUSTOM_DECK_MAX_CARDS => {
            let mut err = ValidationError::new("custom_deck_length");
            err.message = Some(
                format!(
                    "A custom deck holds at most {CUSTOM_DECK_MAX_CARDS} cards (got {})",
                    cards.len()
                )
                .into(),
            );
            Err(err)
        }
        _ => Ok(()),
    }
}
