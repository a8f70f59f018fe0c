use std::str::FromStr;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{ErrorKind, PlayerIdentity, SessionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("player not found")]
    NotFound,

    #[error("{0}")]
    Parse(String),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::NotFound => ErrorKind::PlayerNotFound,
            ResolveError::Parse(_) => ErrorKind::ParseError,
        }
    }
}

/// Find the player's net result among a game's session records.
///
/// A record matches when any of its display names, lowercased, equals the
/// lowercased primary name or one of the aliases. Exact equality only.
/// Records are scanned in upstream order and the first match wins; a second
/// matching record (which well-formed data never has) is ignored.
pub fn resolve_player(
    records: &[SessionRecord],
    identity: &PlayerIdentity,
) -> Result<Decimal, ResolveError> {
    let search_names = identity.search_names();
    debug!(?search_names, "Searching for names");

    let matched = records.iter().find(|r| {
        r.display_names
            .iter()
            .any(|n| search_names.contains(&n.to_lowercase()))
    });

    let Some(record) = matched else {
        return Err(ResolveError::NotFound);
    };

    let net = parse_net(&record.net).map_err(ResolveError::Parse)?;
    info!(
        participant_id = %record.participant_id,
        names = ?record.display_names,
        %net,
        "Found player with net result: {net}"
    );
    Ok(net)
}

/// Accepts a JSON number or a numeric string (plain or scientific notation).
///
/// A JSON number with more than 28 fractional digits is rounded to 28. Values
/// beyond `Decimal`'s range (about ±7.9e28) are rejected.
pub fn parse_net(value: &serde_json::Value) -> Result<Decimal, String> {
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        other => return Err(format!("net is not numeric: {other}")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .or_else(|e| match value {
            serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64).ok_or(e),
            _ => Err(e),
        })
        .map_err(|e| format!("could not parse net value {text:?}: {e}"))
}
