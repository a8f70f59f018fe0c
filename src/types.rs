use std::collections::HashSet;

use indexmap::IndexMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One tracked game. `is_in_cents` is carried through untouched; amounts are
/// reported in whatever unit the upstream uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTarget {
    pub url: String,
    pub is_in_cents: bool,
}

impl GameTarget {
    pub fn new(url: impl Into<String>, is_in_cents: bool) -> Self {
        Self {
            url: url.into(),
            is_in_cents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub primary_name: String,
    pub aliases: Vec<String>,
}

impl PlayerIdentity {
    pub fn new(primary_name: impl Into<String>, aliases: Vec<String>) -> Self {
        Self {
            primary_name: primary_name.into(),
            aliases,
        }
    }

    /// Lowercased primary name plus every lowercased alias.
    pub fn search_names(&self) -> HashSet<String> {
        std::iter::once(&self.primary_name)
            .chain(self.aliases.iter())
            .map(|n| n.to_lowercase())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Upstream session data
// ---------------------------------------------------------------------------

/// One participant's row from the upstream `players_sessions` payload.
/// `net` is kept as the raw JSON value; the resolver parses it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub participant_id: String,
    pub display_names: Vec<String>,
    pub net: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidUrl,
    Timeout,
    NetworkError,
    FormatError,
    PlayerNotFound,
    ParseError,
    Unexpected,
}

impl ErrorKind {
    /// Human-readable category used in the `ERROR: ...` wire string.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "Invalid game URL format",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::NetworkError => "Network error",
            ErrorKind::FormatError => "Invalid response format",
            ErrorKind::PlayerNotFound => "Player not found in game",
            ErrorKind::ParseError => "Invalid net result",
            ErrorKind::Unexpected => "Unexpected error",
        }
    }

    /// Kinds whose wire string carries the failure detail.
    fn has_detail(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::FormatError
                | ErrorKind::ParseError
                | ErrorKind::Unexpected
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::FormatError => "format_error",
            ErrorKind::PlayerNotFound => "player_not_found",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Unexpected => "unexpected",
        };
        write!(f, "{s}")
    }
}

/// Result of one game in one cycle. Serialises as a bare number on success
/// and as an `ERROR: ...` string on failure.
#[derive(Debug, Clone, PartialEq)]
pub enum GameOutcome {
    Success(Decimal),
    Failure { kind: ErrorKind, detail: String },
}

impl GameOutcome {
    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        GameOutcome::Failure {
            kind,
            detail: detail.into(),
        }
    }

    pub fn profit(&self) -> Option<Decimal> {
        match self {
            GameOutcome::Success(v) => Some(*v),
            GameOutcome::Failure { .. } => None,
        }
    }

    #[cfg(test)]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            GameOutcome::Success(_) => None,
            GameOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// `ERROR: <category>[ - <detail>]`, or None for a success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            GameOutcome::Success(_) => None,
            GameOutcome::Failure { kind, detail } => {
                if kind.has_detail() && !detail.is_empty() {
                    Some(format!("ERROR: {} - {}", kind.label(), detail))
                } else {
                    Some(format!("ERROR: {}", kind.label()))
                }
            }
        }
    }
}

impl Serialize for GameOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GameOutcome::Success(v) => Serialize::serialize(v, serializer),
            GameOutcome::Failure { .. } => {
                serializer.serialize_str(&self.error_message().unwrap_or_default())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultBundle {
    /// game URL → outcome, in target order
    pub results: IndexMap<String, GameOutcome>,
    pub total_profit: Decimal,
    pub has_errors: bool,
}

impl ResultBundle {
    /// The "nothing to report" bundle: no games, flagged as erroneous.
    pub fn empty() -> Self {
        Self {
            results: IndexMap::new(),
            total_profit: Decimal::ZERO,
            has_errors: true,
        }
    }
}
