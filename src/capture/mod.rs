//! Read-only packet capture and the loop that drives detection.
//!
//! Platform backends implement [`TapProvider`]:
//! - Windows: WinDivert 2.x in SNIFF mode (`windivert_backend`)
//! - Other Unix hosts: libpcap, behind the `pcap` feature (`pcap_backend`)
//!
//! A tap only ever observes traffic. Nothing here reinjects, delays or drops a
//! packet, so a stalled or crashed capture thread cannot affect the game client.

#[cfg(target_os = "windows")]
pub mod windivert_backend;

#[cfg(all(unix, feature = "pcap"))]
pub mod pcap_backend;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config;
use crate::core::pipeline::DetectionPipeline;
use crate::error::AppError;

const IPPROTO_TCP: u8 = 6;

/// Traffic scope a tap is opened with. Tried in [`DEFAULT_FILTERS`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFilter {
    /// Loopback TCP segments that carry a payload.
    LoopbackTcpPayload,
    /// Any TCP segment that carries a payload.
    AnyTcpPayload,
}

/// Preferred filter first; later entries are fallbacks.
pub const DEFAULT_FILTERS: [CaptureFilter; 2] = [
    CaptureFilter::LoopbackTcpPayload,
    CaptureFilter::AnyTcpPayload,
];

impl CaptureFilter {
    /// WinDivert filter language form.
    pub fn windivert_expr(self) -> &'static str {
        match self {
            CaptureFilter::LoopbackTcpPayload => config::WINDIVERT_LOOPBACK_FILTER,
            CaptureFilter::AnyTcpPayload => config::WINDIVERT_ANY_TCP_FILTER,
        }
    }

    pub fn is_loopback_only(self) -> bool {
        matches!(self, CaptureFilter::LoopbackTcpPayload)
    }
}

impl fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFilter::LoopbackTcpPayload => f.write_str("loopback tcp with payload"),
            CaptureFilter::AnyTcpPayload => f.write_str("any tcp with payload"),
        }
    }
}

/// Errors at the tap boundary.
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("filter `{filter}` rejected: {reason}")]
    Open { filter: String, reason: String },

    #[error("read failed: {0}")]
    Recv(String),

    /// The tap was closed; the capture loop ends.
    #[error("tap closed")]
    Closed,

    #[error("{0}")]
    Unsupported(String),
}

/// A live, read-only packet source.
pub trait PacketTap: Send {
    /// Block until the next packet arrives.
    ///
    /// `Ok(Some(payload))` is a TCP payload, `Ok(None)` a packet without one.
    /// `Err(TapError::Closed)` once the tap has been closed.
    fn next_payload(&mut self) -> Result<Option<&[u8]>, TapError>;
}

/// Closes a tap from outside the capture thread, unblocking its reader.
pub trait TapCloser: Send + Sync {
    fn close(&self);
}

/// Opens taps for one capture facility.
pub trait TapProvider: Send + Sync {
    /// Facility name used in logs and error messages.
    fn name(&self) -> &'static str;

    fn open(&self, filter: CaptureFilter) -> Result<OpenedTap, TapError>;
}

pub struct OpenedTap {
    pub tap: Box<dyn PacketTap>,
    pub closer: Arc<dyn TapCloser>,
}

/// Shared close flag for backends whose reads return periodically.
#[derive(Debug, Clone, Default)]
pub struct CloseFlag(Arc<AtomicBool>);

impl CloseFlag {
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl TapCloser for CloseFlag {
    fn close(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Fallback provider for builds without a capture backend.
pub struct UnsupportedProvider;

impl TapProvider for UnsupportedProvider {
    fn name(&self) -> &'static str {
        "packet capture"
    }

    fn open(&self, _filter: CaptureFilter) -> Result<OpenedTap, TapError> {
        Err(TapError::Unsupported(format!(
            "no packet capture backend built for {} (enable the `pcap` feature)",
            std::env::consts::OS
        )))
    }
}

#[cfg(target_os = "windows")]
pub fn default_provider() -> Arc<dyn TapProvider> {
    Arc::new(windivert_backend::WinDivertProvider)
}

#[cfg(all(unix, feature = "pcap"))]
pub fn default_provider() -> Arc<dyn TapProvider> {
    Arc::new(pcap_backend::PcapProvider)
}

#[cfg(not(any(target_os = "windows", all(unix, feature = "pcap"))))]
pub fn default_provider() -> Arc<dyn TapProvider> {
    Arc::new(UnsupportedProvider)
}

/// Owns the tap closer and the single background capture thread.
/// Implements Drop so an abandoned engine still releases its tap.
pub struct CaptureEngine {
    closer: Arc<dyn TapCloser>,
    filter: CaptureFilter,
    capture_thread: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Open a tap with the first filter the provider accepts and start the
    /// pull loop. If every filter fails no thread is spawned.
    pub fn start(
        provider: &dyn TapProvider,
        filters: &[CaptureFilter],
        pipeline: DetectionPipeline,
    ) -> Result<Self, AppError> {
        Self::start_holding(provider, filters, pipeline, ())
    }

    /// Like [`CaptureEngine::start`], but `held` is moved onto the capture
    /// thread and dropped only once the pull loop has exited, even if `stop`
    /// gave up waiting for it.
    pub fn start_holding<T: Send + 'static>(
        provider: &dyn TapProvider,
        filters: &[CaptureFilter],
        pipeline: DetectionPipeline,
        held: T,
    ) -> Result<Self, AppError> {
        let (opened, filter) = open_first(provider, filters)?;
        let OpenedTap { tap, closer } = opened;

        let spawned = std::thread::Builder::new()
            .name(config::CAPTURE_THREAD_NAME.into())
            .spawn(move || {
                run_capture_loop(tap, pipeline);
                drop(held);
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                closer.close();
                return Err(e.into());
            }
        };

        tracing::info!("{} capture started ({filter})", provider.name());
        Ok(Self {
            closer,
            filter,
            capture_thread: Some(thread),
        })
    }

    /// Filter the tap was opened with.
    pub fn filter(&self) -> CaptureFilter {
        self.filter
    }

    pub fn is_running(&self) -> bool {
        self.capture_thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Close the tap and wait (bounded) for the pull loop to exit. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.capture_thread.take() else {
            return;
        };
        self.closer.close();

        // Called from a handler: the loop exits once this packet returns.
        if thread.thread().id() == std::thread::current().id() {
            return;
        }

        let deadline = Instant::now() + config::STOP_JOIN_TIMEOUT;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Capture thread still blocked after {:?}; detaching it",
                    config::STOP_JOIN_TIMEOUT
                );
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if thread.join().is_err() {
            tracing::error!("Capture thread panicked");
        }
        tracing::info!("Capture stopped");
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.capture_thread.is_some() {
            tracing::warn!("CaptureEngine dropped while running, releasing tap");
            self.stop();
        }
    }
}

fn open_first(
    provider: &dyn TapProvider,
    filters: &[CaptureFilter],
) -> Result<(OpenedTap, CaptureFilter), AppError> {
    let mut last_err = None;
    for &filter in filters {
        match provider.open(filter) {
            Ok(opened) => return Ok((opened, filter)),
            Err(e) => {
                tracing::warn!("{} could not open tap ({filter}): {e}", provider.name());
                last_err = Some(e);
            }
        }
    }

    let reason = last_err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no capture filters configured".into());
    Err(AppError::Capture(format!(
        "{} failed to open: {reason}. Make sure the program is running as Administrator (or root).",
        provider.name()
    )))
}

/// Pull loop: one packet at a time, strictly in tap order.
fn run_capture_loop(mut tap: Box<dyn PacketTap>, mut pipeline: DetectionPipeline) {
    let mut consecutive_errors = 0u32;
    loop {
        match tap.next_payload() {
            Ok(Some(payload)) => {
                consecutive_errors = 0;
                pipeline.process(payload);
            }
            Ok(None) => consecutive_errors = 0,
            Err(TapError::Closed) => break,
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= config::MAX_CONSECUTIVE_RECV_ERRORS {
                    tracing::error!(
                        "Capture facility failed ({consecutive_errors} consecutive read errors): {e}"
                    );
                    break;
                }
                tracing::debug!("Tap read error: {e}");
                std::thread::sleep(config::RECV_ERROR_BACKOFF);
            }
        }
    }
    tracing::debug!("Capture loop exited");
}

/// Byte range of the TCP payload inside a raw IPv4/IPv6 packet.
///
/// Returns `None` for non-TCP, truncated, or payload-less packets. IPv6
/// extension headers are not walked.
pub fn tcp_payload_bounds(data: &[u8]) -> Option<Range<usize>> {
    let first = *data.first()?;
    let (header_len, ip_end) = match first >> 4 {
        4 => {
            if data.len() < 20 || data[9] != IPPROTO_TCP {
                return None;
            }
            let ihl = ((first & 0x0F) as usize) * 4;
            if ihl < 20 {
                return None;
            }
            (ihl, u16::from_be_bytes([data[2], data[3]]) as usize)
        }
        6 => {
            if data.len() < 40 || data[6] != IPPROTO_TCP {
                return None;
            }
            let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
            (40, 40 + payload_len)
        }
        _ => return None,
    };

    // Trailing link-layer padding beyond the IP length is not payload.
    let ip_end = ip_end.min(data.len());
    if ip_end < header_len + 20 {
        return None;
    }

    let data_offset = ((data[header_len + 12] >> 4) as usize) * 4;
    if data_offset < 20 {
        return None;
    }
    let start = header_len + data_offset;
    if start >= ip_end {
        return None;
    }
    Some(start..ip_end)
}
