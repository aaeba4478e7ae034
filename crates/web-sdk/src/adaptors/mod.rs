//! Adaptors for translating experiment events into third-party analytics
//! formats.
//!
//! Each adaptor implements [`AnalyticsAdaptor`] to turn an
//! [`ExperimentEvent`] into the JSON payload its platform expects. Delivery
//! is left to the host; adaptors only build payloads.

pub mod ga;

use anyhow::Result;
use splitlane_core::ExperimentEvent;

pub trait AnalyticsAdaptor: Send + Sync {
    /// Platform identifier (e.g. "ga4").
    fn platform(&self) -> &str;

    /// Whether this platform receives events of the given kind at all.
    fn forwards(&self, event: &ExperimentEvent) -> bool;

    fn transform(&self, event: &ExperimentEvent) -> Result<serde_json::Value>;

    /// Transform a batch of events. Default implementation transforms one-by-one.
    fn transform_batch(&self, events: &[ExperimentEvent]) -> Result<Vec<serde_json::Value>> {
        events.iter().map(|e| self.transform(e)).collect()
    }

    fn validate_config(&self) -> Result<()>;
}
