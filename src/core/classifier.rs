//! Decides which player event a matched profile request represents.

use serde::Serialize;

use crate::config;
use crate::core::matcher::{contains, extract_identifier};

/// The two player-identification events the client's traffic reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// An opponent appeared on the match loading screen.
    OpponentLoaded,
    /// The user opened a player's profile in-game.
    ProfileSelected,
}

impl EventKind {
    /// Short tag used in the history log.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::OpponentLoaded => "match",
            EventKind::ProfileSelected => "selected",
        }
    }
}

/// A classified, decoded detection ready for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub kind: EventKind,
    pub player_id: String,
}

impl Detection {
    pub fn new(kind: EventKind, player_id: impl Into<String>) -> Self {
        Self {
            kind,
            player_id: player_id.into(),
        }
    }
}

/// Classify a payload whose request line already matched as a profile request.
///
/// The URL shape alone is not enough; one of the client markers must be present
/// somewhere in the payload. The opponent marker is checked first.
pub fn classify(payload: &[u8], url: &str) -> Option<Detection> {
    if url.is_empty() {
        return None;
    }

    let kind = if contains(payload, config::OPPONENT_LOADED_MARKER) {
        EventKind::OpponentLoaded
    } else if contains(payload, config::PROFILE_SELECTED_MARKER) {
        EventKind::ProfileSelected
    } else {
        return None;
    };

    let player_id = extract_identifier(url)?;
    Some(Detection { kind, player_id })
}
