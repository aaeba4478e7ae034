#![warn(clippy::unwrap_used)]

//! Operator-facing reporting — console tables, CSV, and export/import of the
//! full experiment state.

pub mod console;
pub mod transfer;

pub use console::{display_results, render_table, summary_line, to_csv};
pub use transfer::{export_data, import_data, import_json, ExportDocument};
