//! Outbound notification bus — trait for forwarding experiment events to an
//! external analytics sink.
//!
//! The engine accepts an `Arc<dyn EventSink>` and emits one
//! [`ExperimentEvent`] per assignment, impression, click, conversion, forced
//! assignment, and reset. Sinks are a pure side channel: an `Err` from
//! [`EventSink::emit`] is logged by the caller and never touches core state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Assignment,
    Impression,
    Click,
    Conversion,
    ForcedAssignment,
    Reset,
}

/// A tracked experiment event as seen by outbound sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentEvent {
    pub event_id: Uuid,
    pub kind: EventKind,
    pub experiment_id: String,
    pub variant_id: Option<String>,
    pub visitor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for forwarding experiment events to an analytics platform.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExperimentEvent) -> anyhow::Result<()>;
}

/// No-op sink for engines that don't forward events.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: ExperimentEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<ExperimentEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<ExperimentEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: ExperimentEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Convenience builder for creating an `ExperimentEvent` with minimal boilerplate.
pub fn make_event(
    kind: EventKind,
    experiment_id: impl Into<String>,
    variant_id: Option<String>,
    visitor_id: Option<String>,
) -> ExperimentEvent {
    ExperimentEvent {
        event_id: Uuid::new_v4(),
        kind,
        experiment_id: experiment_id.into(),
        variant_id,
        visitor_id,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
