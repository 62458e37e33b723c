//! In-memory tap for tests. Payloads may be queued before or after the tap is
//! opened; closing the tap wakes a reader blocked on an empty queue. Each
//! reopen after the first starts a fresh queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CaptureFilter, OpenedTap, PacketTap, TapCloser, TapError, TapProvider};

enum TapMsg {
    Payload(Vec<u8>),
    Skip,
    Fail(String),
    Close,
}

pub(crate) struct ScriptedProvider {
    rejected: Vec<CaptureFilter>,
    attempts: Mutex<Vec<CaptureFilter>>,
    inbox: Mutex<Option<Receiver<TapMsg>>>,
    outbox: Mutex<Sender<TapMsg>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Arc<Self> {
        Self::rejecting(&[])
    }

    /// Provider that refuses to open the given filters.
    pub(crate) fn rejecting(rejected: &[CaptureFilter]) -> Arc<Self> {
        let (outbox, inbox) = mpsc::channel();
        Arc::new(Self {
            rejected: rejected.to_vec(),
            attempts: Mutex::new(Vec::new()),
            inbox: Mutex::new(Some(inbox)),
            outbox: Mutex::new(outbox),
        })
    }

    pub(crate) fn feed(&self, payload: Vec<u8>) {
        self.send(TapMsg::Payload(payload));
    }

    /// Queue a packet that carries no TCP payload.
    pub(crate) fn skip(&self) {
        self.send(TapMsg::Skip);
    }

    pub(crate) fn fail_read(&self, reason: &str) {
        self.send(TapMsg::Fail(reason.to_string()));
    }

    fn send(&self, msg: TapMsg) {
        let _ = self.outbox.lock().unwrap().send(msg);
    }

    /// Filters passed to `open`, in call order.
    pub(crate) fn attempts(&self) -> Vec<CaptureFilter> {
        self.attempts.lock().unwrap().clone()
    }
}

impl TapProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, filter: CaptureFilter) -> Result<OpenedTap, TapError> {
        self.attempts.lock().unwrap().push(filter);
        if self.rejected.contains(&filter) {
            return Err(TapError::Open {
                filter: filter.to_string(),
                reason: "rejected by script".into(),
            });
        }

        let mut outbox = self.outbox.lock().unwrap();
        let inbox = match self.inbox.lock().unwrap().take() {
            Some(inbox) => inbox,
            None => {
                let (tx, rx) = mpsc::channel();
                *outbox = tx;
                rx
            }
        };

        Ok(OpenedTap {
            tap: Box::new(ScriptedTap {
                inbox,
                current: Vec::new(),
            }),
            closer: Arc::new(ScriptedCloser(outbox.clone())),
        })
    }
}

struct ScriptedTap {
    inbox: Receiver<TapMsg>,
    current: Vec<u8>,
}

impl PacketTap for ScriptedTap {
    fn next_payload(&mut self) -> Result<Option<&[u8]>, TapError> {
        match self.inbox.recv() {
            Ok(TapMsg::Payload(payload)) => {
                self.current = payload;
                Ok(Some(&self.current))
            }
            Ok(TapMsg::Skip) => Ok(None),
            Ok(TapMsg::Fail(reason)) => Err(TapError::Recv(reason)),
            Ok(TapMsg::Close) | Err(_) => Err(TapError::Closed),
        }
    }
}

struct ScriptedCloser(Sender<TapMsg>);

impl TapCloser for ScriptedCloser {
    fn close(&self) {
        let _ = self.0.send(TapMsg::Close);
    }
}

/// Provider whose tap blocks for `stall` on its first read and ignores close,
/// like a driver read that nothing wakes.
pub(crate) struct StallingProvider {
    stall: Duration,
    live: Arc<AtomicUsize>,
}

impl StallingProvider {
    pub(crate) fn new(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            stall,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Taps opened and not yet dropped.
    pub(crate) fn live_taps(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl TapProvider for StallingProvider {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn open(&self, _filter: CaptureFilter) -> Result<OpenedTap, TapError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(OpenedTap {
            tap: Box::new(StallingTap {
                stall: self.stall,
                live: Arc::clone(&self.live),
            }),
            closer: Arc::new(IgnoredCloser),
        })
    }
}

struct StallingTap {
    stall: Duration,
    live: Arc<AtomicUsize>,
}

impl PacketTap for StallingTap {
    fn next_payload(&mut self) -> Result<Option<&[u8]>, TapError> {
        std::thread::sleep(self.stall);
        Err(TapError::Closed)
    }
}

impl Drop for StallingTap {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct IgnoredCloser;

impl TapCloser for IgnoredCloser {
    fn close(&self) {}
}
