//! Suppresses repeated detections within one capture session.
//!
//! Opponent announcements are matched case-sensitively against the previous
//! opponent, but case-insensitively against the currently selected profile.
//! Profile selections only de-duplicate against themselves, case-sensitively.

use crate::core::classifier::EventKind;

/// Last admitted identifier per event kind. Starts empty every session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Deduplicator {
    last_opponent: Option<String>,
    last_selected: Option<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the detection should reach its handler, recording it.
    pub fn admit(&mut self, kind: EventKind, player_id: &str) -> bool {
        match kind {
            EventKind::OpponentLoaded => {
                if let Some(selected) = &self.last_selected {
                    if selected.to_lowercase() == player_id.to_lowercase() {
                        return false;
                    }
                }
                if self.last_opponent.as_deref() == Some(player_id) {
                    return false;
                }
                self.last_opponent = Some(player_id.to_owned());
                true
            }
            EventKind::ProfileSelected => {
                if self.last_selected.as_deref() == Some(player_id) {
                    return false;
                }
                self.last_selected = Some(player_id.to_owned());
                true
            }
        }
    }

    pub fn last_opponent(&self) -> Option<&str> {
        self.last_opponent.as_deref()
    }

    pub fn last_selected(&self) -> Option<&str> {
        self.last_selected.as_deref()
    }
}
