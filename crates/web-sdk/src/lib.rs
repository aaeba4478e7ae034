#![warn(clippy::unwrap_used)]

//! Page-side glue for the experiment engine — markup declarations, render
//! and interaction wiring, preview links, and analytics forwarding.
//!
//! # Modules
//!
//! - [`declarations`] — reads `data-ab-test` style attributes into declarations
//! - [`binder`] — couples rendering to impressions and interactions to counters
//! - [`adaptors`] — outbound analytics adaptors (GA4)

pub mod adaptors;
pub mod binder;
pub mod declarations;

pub use adaptors::ga::{GaAdaptor, GaConfig, GaSink};
pub use adaptors::AnalyticsAdaptor;
pub use binder::{PageBinder, RenderedVariant};
pub use declarations::{parse_declaration, scan_elements, MarkupElement};
