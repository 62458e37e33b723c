//! Tracks the player a chat command should reference.
//!
//! Whichever event was admitted last wins: a fresh loading-screen opponent or a
//! profile the user just opened.

use crate::config;
use crate::core::classifier::{Detection, EventKind};

/// Chat commands the consumer can issue for the pending player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Ignore,
    Unignore,
}

impl ChatAction {
    fn verb(self) -> &'static str {
        match self {
            ChatAction::Ignore => config::IGNORE_COMMAND,
            ChatAction::Unignore => config::UNIGNORE_COMMAND,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct TargetTracker {
    pending: Option<String>,
    opponent: Option<String>,
    selected: Option<String>,
}

impl TargetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, detection: &Detection) {
        let id = detection.player_id.clone();
        match detection.kind {
            EventKind::OpponentLoaded => self.opponent = Some(id.clone()),
            EventKind::ProfileSelected => self.selected = Some(id.clone()),
        }
        self.pending = Some(id);
    }

    /// Most recently detected identifier of either kind.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn opponent(&self) -> Option<&str> {
        self.opponent.as_deref()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// `/ignore {id}` or `/unignore {id}` for the pending player, if any.
    pub fn chat_command(&self, action: ChatAction) -> Option<String> {
        self.pending()
            .map(|id| format!("{} {id}", action.verb()))
    }
}

/// One history log line, e.g. `[match]    Abc` or `[selected] Abc`.
pub fn history_line(detection: &Detection) -> String {
    format!(
        "{:<10} {}",
        format!("[{}]", detection.kind.label()),
        detection.player_id
    )
}
