//! Request body validation for the aggregation endpoints.
//! Messages are returned to clients verbatim, so they are part of the API.

use serde_json::Value;

use crate::error::AppError;
use crate::types::{GameTarget, PlayerIdentity};

pub const NO_DATA: &str = "No data provided";
pub const BAD_PLAYER_NAME: &str = "Player name is required and must be a non-empty string";
pub const ALIASES_NOT_LIST: &str = "Aliases must be a list of strings";
pub const ALIAS_NOT_STRING: &str = "All aliases must be strings";
pub const NO_GAMES: &str = "At least one game URL is required";
pub const GAME_MISSING_FIELDS: &str = "Each game must have a url and isInCents field";
pub const GAME_BAD_TYPES: &str = "Game url must be a string and isInCents must be a boolean";
pub const MISSING_TRACKING_FIELDS: &str = "Missing game URLs or player name";

/// A validated aggregation request.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRequest {
    pub identity: PlayerIdentity,
    pub games: Vec<GameTarget>,
}

/// Validate an on-demand `/api/get_results` body. Checks run in a fixed
/// order and the first failure is reported.
pub fn validate_request(body: Option<&Value>) -> Result<AggregationRequest, AppError> {
    let invalid = |msg: &str| AppError::Validation(msg.to_string());

    let obj = match body {
        Some(Value::Object(obj)) if !obj.is_empty() => obj,
        _ => return Err(invalid(NO_DATA)),
    };

    let player_name = match obj.get("playerName") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => return Err(invalid(BAD_PLAYER_NAME)),
    };

    let aliases = match obj.get("aliases") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|a| a.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| invalid(ALIAS_NOT_STRING))?,
        Some(_) => return Err(invalid(ALIASES_NOT_LIST)),
    };

    let raw_games = match obj.get("games") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(invalid(NO_GAMES)),
    };

    let mut games = Vec::with_capacity(raw_games.len());
    for game in raw_games {
        let Some(g) = game.as_object() else {
            return Err(invalid(GAME_MISSING_FIELDS));
        };
        let (Some(url), Some(in_cents)) = (g.get("url"), g.get("isInCents")) else {
            return Err(invalid(GAME_MISSING_FIELDS));
        };
        match (url, in_cents) {
            (Value::String(url), Value::Bool(in_cents)) => {
                games.push(GameTarget::new(url.clone(), *in_cents))
            }
            _ => return Err(invalid(GAME_BAD_TYPES)),
        }
    }

    Ok(AggregationRequest {
        identity: PlayerIdentity::new(player_name, aliases),
        games,
    })
}

/// Validate a `/start_tracking` body: a player name and at least one game
/// are required up front, then the full on-demand checks apply.
pub fn validate_tracking_request(body: Option<&Value>) -> Result<AggregationRequest, AppError> {
    let has_name = body
        .and_then(|b| b.get("playerName"))
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    let has_games = body
        .and_then(|b| b.get("games"))
        .and_then(Value::as_array)
        .is_some_and(|g| !g.is_empty());

    if !has_name || !has_games {
        return Err(AppError::Validation(MISSING_TRACKING_FIELDS.to_string()));
    }
    validate_request(body)
}
