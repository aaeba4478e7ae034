#![warn(clippy::unwrap_used)]

//! Experiment lifecycle engine — variant discovery, sticky assignment,
//! event accounting, and winner determination.
//!
//! # Modules
//!
//! - [`engine`] — [`ExperimentEngine`], the instance every operation runs on
//! - [`registry`] — declaration validation and catalog discovery
//! - [`assignment`] — visitor → variant resolution and forced overrides
//! - [`tracker`] — impression, click, and conversion counters
//! - [`stats`] — CTR/CVR, ranking, and the minimum-sample winner gate

pub mod assignment;
pub mod engine;
pub mod registry;
pub mod stats;
pub mod tracker;

pub use assignment::{ForcedAssignment, Visitor};
pub use engine::{ExperimentEngine, MergeSummary};
pub use registry::{Declaration, DiscoveryReport};
pub use stats::{Confidence, EvaluationResult, VariantStanding, Winner};
pub use tracker::Counter;
