//! Per-packet detection pipeline: matcher, classifier, de-duplicator, handler.
//!
//! Runs on the capture thread, one payload at a time. Handlers are invoked
//! inline, so they must be fast and must not block. A panicking handler is
//! contained to the packet that triggered it.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;

use crate::core::classifier::{self, Detection, EventKind};
use crate::core::dedup::Deduplicator;
use crate::core::matcher;

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is currently running a detection handler.
///
/// The process panic hook uses this to stay quiet about panics that the
/// pipeline contains.
pub fn in_handler() -> bool {
    IN_HANDLER.with(Cell::get)
}

/// Handler invoked with the decoded player identifier.
pub type PlayerHandler = Box<dyn Fn(&str) + Send + 'static>;

/// The two outbound slots: one per event kind. Either may be empty.
#[derive(Default)]
pub struct DetectionHandlers {
    on_opponent_loaded: Option<PlayerHandler>,
    on_profile_selected: Option<PlayerHandler>,
}

impl DetectionHandlers {
    pub fn new<F, G>(on_opponent_loaded: F, on_profile_selected: G) -> Self
    where
        F: Fn(&str) + Send + 'static,
        G: Fn(&str) + Send + 'static,
    {
        Self {
            on_opponent_loaded: Some(Box::new(on_opponent_loaded)),
            on_profile_selected: Some(Box::new(on_profile_selected)),
        }
    }

    /// Forward every admitted detection into an unbounded channel.
    ///
    /// Lets an async consumer handle detections off the capture thread. Sends
    /// after the receiver is dropped are discarded.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Detection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opponent_tx = tx.clone();
        let handlers = Self::new(
            move |id| {
                let _ = opponent_tx.send(Detection::new(EventKind::OpponentLoaded, id));
            },
            move |id| {
                let _ = tx.send(Detection::new(EventKind::ProfileSelected, id));
            },
        );
        (handlers, rx)
    }

    fn dispatch(&self, detection: &Detection) {
        let slot = match detection.kind {
            EventKind::OpponentLoaded => &self.on_opponent_loaded,
            EventKind::ProfileSelected => &self.on_profile_selected,
        };
        if let Some(handler) = slot {
            handler(&detection.player_id);
        }
    }
}

impl std::fmt::Debug for DetectionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionHandlers")
            .field("on_opponent_loaded", &self.on_opponent_loaded.is_some())
            .field("on_profile_selected", &self.on_profile_selected.is_some())
            .finish()
    }
}

/// Owns the session's de-duplication state and its handlers.
#[derive(Debug)]
pub struct DetectionPipeline {
    dedup: Deduplicator,
    handlers: DetectionHandlers,
}

impl DetectionPipeline {
    /// Fresh pipeline with empty detection state.
    pub fn new(handlers: DetectionHandlers) -> Self {
        Self {
            dedup: Deduplicator::new(),
            handlers,
        }
    }

    /// Run one payload through the pipeline.
    ///
    /// Returns the detection if it was admitted and handed to its handler.
    pub fn process(&mut self, payload: &[u8]) -> Option<Detection> {
        let request = matcher::match_payload(payload)?;
        let detection = classifier::classify(payload, request.url)?;

        if !self.dedup.admit(detection.kind, &detection.player_id) {
            tracing::debug!(
                "Suppressed duplicate {:?} for {}",
                detection.kind,
                detection.player_id
            );
            return None;
        }

        tracing::info!("Detected {:?}: {}", detection.kind, detection.player_id);

        let handlers = &self.handlers;
        IN_HANDLER.with(|flag| flag.set(true));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handlers.dispatch(&detection)));
        IN_HANDLER.with(|flag| flag.set(false));
        if outcome.is_err() {
            tracing::trace!("Handler for {:?} panicked; continuing capture", detection.kind);
        }

        Some(detection)
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }
}
