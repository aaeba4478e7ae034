//! Google Analytics 4 (GA4) Measurement Protocol adaptor — turns experiment
//! events into GA4 event payloads, and a sink that queues them for the
//! host's transport.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use splitlane_core::config::AnalyticsConfig;
use splitlane_core::{EventKind, EventSink, ExperimentEvent};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use super::AnalyticsAdaptor;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaConfig {
    /// GA4 Measurement ID, e.g. "G-XXXXXXXXXX".
    pub measurement_id: String,
    /// API secret for Measurement Protocol server-side hits.
    pub api_secret: String,
    pub debug_mode: bool,
}

impl From<&AnalyticsConfig> for GaConfig {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            measurement_id: config.measurement_id.clone(),
            api_secret: config.api_secret.clone(),
            debug_mode: config.debug_mode,
        }
    }
}

pub struct GaAdaptor {
    config: GaConfig,
}

impl GaAdaptor {
    pub fn new(config: GaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GaConfig {
        &self.config
    }

    /// GA4 event name per tracked kind. Forced assignments and resets are
    /// operator actions and stay out of analytics.
    fn ga4_event_name(kind: EventKind) -> Option<&'static str> {
        match kind {
            EventKind::Assignment => Some("experiment_assignment"),
            EventKind::Impression => Some("experiment_impression"),
            EventKind::Click => Some("experiment_click"),
            EventKind::Conversion => Some("experiment_conversion"),
            EventKind::ForcedAssignment | EventKind::Reset => None,
        }
    }
}

impl AnalyticsAdaptor for GaAdaptor {
    fn platform(&self) -> &str {
        "ga4"
    }

    fn forwards(&self, event: &ExperimentEvent) -> bool {
        Self::ga4_event_name(event.kind).is_some()
    }

    fn transform(&self, event: &ExperimentEvent) -> Result<serde_json::Value> {
        let event_name = Self::ga4_event_name(event.kind)
            .ok_or_else(|| anyhow!("{:?} events are not forwarded to GA4", event.kind))?;

        let mut params = serde_json::json!({
            "experiment_id": event.experiment_id,
            "event_id": event.event_id.to_string(),
        });
        if let Some(ref variant_id) = event.variant_id {
            params["variant_id"] = serde_json::json!(variant_id);
        }
        if self.config.debug_mode {
            params["debug_mode"] = serde_json::json!(true);
        }

        let payload = serde_json::json!({
            "client_id": event.visitor_id.as_deref().unwrap_or("anonymous"),
            "timestamp_micros": event.timestamp.timestamp_micros().to_string(),
            "events": [{
                "name": event_name,
                "params": params,
            }],
        });

        debug!(
            event_name,
            measurement_id = %self.config.measurement_id,
            "GA4 event transformed"
        );
        Ok(payload)
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.measurement_id.is_empty() {
            return Err(anyhow!("GA4 measurement_id must not be empty"));
        }
        if !self.config.measurement_id.starts_with("G-") {
            return Err(anyhow!(
                "GA4 measurement_id must start with 'G-', got '{}'",
                self.config.measurement_id
            ));
        }
        if self.config.api_secret.is_empty() {
            return Err(anyhow!("GA4 api_secret must not be empty"));
        }
        Ok(())
    }
}

/// Event sink that converts forwarded events into GA4 payloads and queues
/// them until the host drains the queue.
pub struct GaSink {
    adaptor: GaAdaptor,
    queue: Mutex<Vec<serde_json::Value>>,
}

impl GaSink {
    pub fn new(config: GaConfig) -> Result<Self> {
        let adaptor = GaAdaptor::new(config);
        adaptor.validate_config()?;
        Ok(Self {
            adaptor,
            queue: Mutex::new(Vec::new()),
        })
    }

    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Take every queued payload.
    pub fn drain(&self) -> Vec<serde_json::Value> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for GaSink {
    fn emit(&self, event: ExperimentEvent) -> Result<()> {
        if !self.adaptor.forwards(&event) {
            return Ok(());
        }
        let payload = self.adaptor.transform(&event)?;
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }
}
