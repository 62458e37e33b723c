//! Detection consumer for the headless host.
//!
//! Receives admitted detections off the capture thread, keeps the pending
//! chat target, writes the history log and prints one JSON line per detection
//! so another process can pick up the identifier.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::classifier::{Detection, EventKind};
use crate::core::target::{history_line, ChatAction, TargetTracker};

/// What the host reports for each detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    pub kind: EventKind,
    pub player_id: String,
    pub ignore_command: String,
    pub unignore_command: String,
}

/// Owns the consumer task spawned for a running session.
pub struct DetectionConsumer;

impl DetectionConsumer {
    /// Drain `detections` until every sender is gone.
    pub fn spawn(
        mut detections: UnboundedReceiver<Detection>,
        tracker: Arc<Mutex<TargetTracker>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(detection) = detections.recv().await {
                let report = record_detection(&tracker, &detection);
                tracing::info!("{}", history_line(&detection));

                let mut stdout = std::io::stdout().lock();
                if let Err(e) = emit_report(&mut stdout, &report) {
                    tracing::warn!("Failed to write detection report: {e}");
                }
            }
            tracing::debug!("Detection channel closed");
        })
    }
}

/// Update the pending target and build the report for one detection.
pub fn record_detection(tracker: &Mutex<TargetTracker>, detection: &Detection) -> DetectionReport {
    let mut tracker = tracker.lock().unwrap_or_else(|e| e.into_inner());
    tracker.record(detection);

    let command = |action| tracker.chat_command(action).unwrap_or_default();
    DetectionReport {
        kind: detection.kind,
        player_id: detection.player_id.clone(),
        ignore_command: command(ChatAction::Ignore),
        unignore_command: command(ChatAction::Unignore),
    }
}

/// Write `report` as a single JSON line.
pub fn emit_report<W: Write>(out: &mut W, report: &DetectionReport) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, report)?;
    out.write_all(b"\n")?;
    out.flush()
}
