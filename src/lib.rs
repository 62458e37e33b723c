pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod privilege;
pub mod services;
pub mod session;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;

use crate::core::{pipeline, ChatAction, DetectionHandlers, TargetTracker};
use crate::session::Session;

pub use error::AppError;

/// Headless entry point: capture until Ctrl-C, reporting detections on stdout.
pub fn run() {
    install_panic_hook();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config::DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = try_run() {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

/// Report panics through tracing, except those a detection handler raised:
/// the pipeline contains those and the session carries on silently.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if pipeline::in_handler() {
            tracing::trace!("Contained handler panic: {info}");
            return;
        }
        tracing::error!("PANIC in scr-ignore: {info}");
        default_hook(info);
    }));
}

fn try_run() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        if !privilege::is_elevated() {
            tracing::warn!("Not running elevated; capture will fail. {}", privilege::elevation_hint());
        }

        let mut session = Session::new();
        let (handlers, detections) = DetectionHandlers::channel();
        if let Err(e) = session.start(handlers) {
            println!("{}", serde_json::to_string(&e)?);
            return Err(anyhow::Error::new(e).context("failed to start capture"));
        }
        tracing::info!("Monitoring loopback traffic. Press Ctrl-C to stop.");

        let tracker = Arc::new(Mutex::new(TargetTracker::new()));
        let consumer = services::DetectionConsumer::spawn(detections, Arc::clone(&tracker));

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        session.stop();

        // The channel closes once the capture thread has dropped its handlers.
        if tokio::time::timeout(Duration::from_secs(1), consumer).await.is_err() {
            tracing::debug!("Detection consumer still draining at shutdown");
        }

        let tracker = tracker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(command) = tracker.chat_command(ChatAction::Ignore) {
            tracing::info!("Last target: {command}");
        }
        Ok::<(), anyhow::Error>(())
    })
}
