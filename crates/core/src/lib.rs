pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::EngineConfig;
pub use error::{SplitlaneError, SplitlaneResult};
pub use event_bus::{EventKind, EventSink, ExperimentEvent};
pub use types::{AssignmentEntry, CatalogState, Experiment, SelectionMode, Variant};
