//! Detection logic: pure pipeline stages plus the consumer-side target tracker.
//!
//! - [`matcher`]: request-line parsing and profile URL matching
//! - [`classifier`]: [`EventKind`] from payload markers
//! - [`dedup`]: per-session [`Deduplicator`]
//! - [`pipeline`]: [`DetectionPipeline`] and [`DetectionHandlers`]
//! - [`target`]: [`TargetTracker`] and chat command formatting

pub mod classifier;
pub mod dedup;
pub mod matcher;
pub mod pipeline;
pub mod target;

pub use classifier::{Detection, EventKind};
pub use dedup::Deduplicator;
pub use pipeline::{DetectionHandlers, DetectionPipeline};
pub use target::{ChatAction, TargetTracker};
