//! Capture session lifecycle.
//!
//! A `Session` owns at most one running [`CaptureEngine`]. Only one capture
//! loop may exist per process; the claim is an explicit guard taken in `start`
//! and carried by the capture thread, so it is released only once that thread
//! has exited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::{self, CaptureEngine, CaptureFilter, TapProvider, DEFAULT_FILTERS};
use crate::core::pipeline::{DetectionHandlers, DetectionPipeline};
use crate::error::AppError;
use crate::privilege;

static CAPTURE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Process-wide claim on the capture facility. Released on drop.
struct CaptureClaim;

impl CaptureClaim {
    fn acquire() -> Option<Self> {
        CAPTURE_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CaptureClaim)
    }
}

impl Drop for CaptureClaim {
    fn drop(&mut self) {
        CAPTURE_CLAIMED.store(false, Ordering::Release);
    }
}

/// Reports whether the process may open a tap.
pub type PrivilegeCheck = fn() -> bool;

pub struct Session {
    provider: Arc<dyn TapProvider>,
    privileged: PrivilegeCheck,
    filters: Vec<CaptureFilter>,
    active: Option<CaptureEngine>,
}

impl Session {
    /// Session on this platform's capture backend.
    pub fn new() -> Self {
        Self::with_backend(capture::default_provider(), privilege::is_elevated)
    }

    pub fn with_backend(provider: Arc<dyn TapProvider>, privileged: PrivilegeCheck) -> Self {
        Self {
            provider,
            privileged,
            filters: DEFAULT_FILTERS.to_vec(),
            active: None,
        }
    }

    /// Replace the filter chain tried at start.
    pub fn with_filters(mut self, filters: Vec<CaptureFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// Start capturing with fresh detection state.
    ///
    /// Fails without side effects if this session is already running, another
    /// session holds the capture, the process lacks privilege, or no filter
    /// could be opened.
    pub fn start(&mut self, handlers: DetectionHandlers) -> Result<(), AppError> {
        if self.active.is_some() {
            return Err(AppError::AlreadyRunning(
                "Capture session is already running".into(),
            ));
        }
        if !(self.privileged)() {
            return Err(AppError::Privilege(privilege::elevation_hint().into()));
        }
        let claim = CaptureClaim::acquire().ok_or_else(|| {
            AppError::AlreadyRunning("Another capture session is active in this process".into())
        })?;

        let pipeline = DetectionPipeline::new(handlers);
        let engine =
            CaptureEngine::start_holding(self.provider.as_ref(), &self.filters, pipeline, claim)?;

        self.active = Some(engine);
        tracing::info!("Capture session started");
        Ok(())
    }

    /// Stop capturing. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut engine) = self.active.take() {
            engine.stop();
            tracing::info!("Capture session stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Filter the running tap was opened with.
    pub fn active_filter(&self) -> Option<CaptureFilter> {
        self.active.as_ref().map(CaptureEngine::filter)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, MutexGuard};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::capture::testing::{ScriptedProvider, StallingProvider};
    use crate::config;
    use crate::core::classifier::{Detection, EventKind};

    // The capture claim is process-wide, so session tests must not overlap.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn payload(id: &str, marker: &str) -> Vec<u8> {
        format!("GET /aurora-profile-by-toon/{id}/10?request_flags={marker} HTTP/1.1\r\n\r\n")
            .into_bytes()
    }

    fn scripted_session(provider: &Arc<ScriptedProvider>) -> Session {
        Session::with_backend(provider.clone(), || true)
    }

    #[test]
    fn test_start_without_privilege_fails_before_opening_tap() {
        let _serial = serial();
        let provider = ScriptedProvider::new();
        let mut session = Session::with_backend(provider.clone(), || false);

        let err = session.start(DetectionHandlers::default()).unwrap_err();
        assert_eq!(err.kind(), "Privilege");
        assert!(!session.is_running());
        assert!(provider.attempts().is_empty());

        // Nothing was claimed, so another session can start.
        let mut other = scripted_session(&ScriptedProvider::new());
        other.start(DetectionHandlers::default()).unwrap();
        other.stop();
    }

    #[test]
    fn test_double_start_is_rejected() {
        let _serial = serial();
        let provider = ScriptedProvider::new();
        let mut session = scripted_session(&provider);

        session.start(DetectionHandlers::default()).unwrap();
        let err = session.start(DetectionHandlers::default()).unwrap_err();
        assert_eq!(err.kind(), "AlreadyRunning");
        assert!(session.is_running());
        assert_eq!(provider.attempts().len(), 1);
        session.stop();
    }

    #[test]
    fn test_second_session_in_process_is_rejected() {
        let _serial = serial();
        let mut first = scripted_session(&ScriptedProvider::new());
        let second_provider = ScriptedProvider::new();
        let mut second = scripted_session(&second_provider);

        first.start(DetectionHandlers::default()).unwrap();
        let err = second.start(DetectionHandlers::default()).unwrap_err();
        assert_eq!(err.kind(), "AlreadyRunning");
        assert!(second_provider.attempts().is_empty());

        first.stop();
        second.start(DetectionHandlers::default()).unwrap();
        second.stop();
    }

    #[test]
    fn test_failed_open_releases_claim() {
        let _serial = serial();
        let provider = ScriptedProvider::rejecting(&DEFAULT_FILTERS);
        let mut session = scripted_session(&provider);

        let err = session.start(DetectionHandlers::default()).unwrap_err();
        assert_eq!(err.kind(), "Capture");
        assert!(!session.is_running());
        assert_eq!(session.active_filter(), None);

        let mut other = scripted_session(&ScriptedProvider::new());
        other.start(DetectionHandlers::default()).unwrap();
        other.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let _serial = serial();
        let mut session = scripted_session(&ScriptedProvider::new());
        session.stop();

        session.start(DetectionHandlers::default()).unwrap();
        assert_eq!(session.active_filter(), Some(CaptureFilter::LoopbackTcpPayload));
        session.stop();
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn test_custom_filter_chain() {
        let _serial = serial();
        let provider = ScriptedProvider::new();
        let mut session =
            scripted_session(&provider).with_filters(vec![CaptureFilter::AnyTcpPayload]);
        session.start(DetectionHandlers::default()).unwrap();
        assert_eq!(session.active_filter(), Some(CaptureFilter::AnyTcpPayload));
        session.stop();
    }

    #[test]
    fn test_detections_reach_channel_consumer() {
        let _serial = serial();
        let provider = ScriptedProvider::new();
        let mut session = scripted_session(&provider);
        let (handlers, mut rx) = DetectionHandlers::channel();

        session.start(handlers).unwrap();
        provider.feed(b"POST /telemetry HTTP/1.1\r\n\r\n".to_vec());
        provider.feed(payload("Abc", "scr_mmgameloading"));
        provider.feed(payload("Abc", "scr_mmgameloading"));
        provider.feed(payload("PlayerX", "scr_tooninfo"));
        provider.feed(payload("playerx", "scr_mmgameloading"));
        provider.feed(payload("playerx", "scr_tooninfo"));
        session.stop();

        let mut seen = Vec::new();
        while let Ok(detection) = rx.try_recv() {
            seen.push(detection);
        }
        assert_eq!(
            seen,
            vec![
                Detection::new(EventKind::OpponentLoaded, "Abc"),
                Detection::new(EventKind::ProfileSelected, "PlayerX"),
                Detection::new(EventKind::ProfileSelected, "playerx"),
            ]
        );
    }

    #[test]
    fn test_restart_resets_detection_state() {
        let _serial = serial();
        let provider = ScriptedProvider::new();
        let mut session = scripted_session(&provider);
        let calls = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let sink = Arc::clone(&calls);
            session
                .start(DetectionHandlers::new(
                    move |id| sink.lock().unwrap().push(id.to_string()),
                    |_| {},
                ))
                .unwrap();
            provider.feed(payload("Abc", "scr_mmgameloading"));
            session.stop();
        }

        assert_eq!(*calls.lock().unwrap(), vec!["Abc", "Abc"]);
    }

    #[test]
    fn test_claim_held_until_stalled_loop_exits() {
        let _serial = serial();
        let stalled = StallingProvider::new(config::STOP_JOIN_TIMEOUT + Duration::from_secs(1));
        let mut first = Session::with_backend(stalled.clone(), || true);
        first.start(DetectionHandlers::default()).unwrap();
        first.stop();
        assert!(!first.is_running());
        assert_eq!(stalled.live_taps(), 1);

        // The detached loop still owns its tap, so nobody may start another.
        let mut second = scripted_session(&ScriptedProvider::new());
        let err = second.start(DetectionHandlers::default()).unwrap_err();
        assert_eq!(err.kind(), "AlreadyRunning");
        let err = first.start(DetectionHandlers::default()).unwrap_err();
        assert_eq!(err.kind(), "AlreadyRunning");

        let deadline = Instant::now() + Duration::from_secs(5);
        while second.start(DetectionHandlers::default()).is_err() {
            assert!(Instant::now() < deadline, "capture claim never released");
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(stalled.live_taps(), 0);
        second.stop();
    }
}
