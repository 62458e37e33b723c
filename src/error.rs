//! Unified error type surfaced by `Session::start` and the host.
//!
//! Only fatal-at-start conditions become an `AppError`; per-packet problems are
//! absorbed inside the capture loop. `AppError` serializes as
//! `{ "kind": "...", "message": "..." }` so a consumer can branch on the category.

use serde::ser::SerializeStruct;

/// Application-level error returned when a capture session cannot start.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The process lacks the privilege needed to open the packet tap.
    #[error("{0}")]
    Privilege(String),

    /// A capture session is already active (on this instance or elsewhere in the process).
    #[error("{0}")]
    AlreadyRunning(String),

    /// The tap could not be opened under any configured filter.
    #[error("{0}")]
    Capture(String),

    /// I/O and OS-level errors (thread spawning, stdout).
    #[error("{0}")]
    Io(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Privilege(_) => "Privilege",
            AppError::AlreadyRunning(_) => "AlreadyRunning",
            AppError::Capture(_) => "Capture",
            AppError::Io(_) => "Io",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}
