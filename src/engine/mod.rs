//! # engine: the ingestion pipeline
//!
//! - [`clock`]: broker/UTC offset
//! - [`normalizer`]: raw record → UTC [`crate::models::Tick`]
//! - [`batch`]: buffer + transactional flush
//! - [`tracker`]: the polling loop tying them together

pub mod batch;
pub mod clock;
pub mod normalizer;
pub mod tracker;

pub use batch::BatchWriter;
pub use clock::ClockReconciler;
pub use normalizer::TickNormalizer;
pub use tracker::{CycleReport, Tracker, Watermark};
