//! Output formatters for synthesis reports.
//!
//! - Stylish: human-readable with colors
//! - JSON: machine-readable

pub mod json;
pub mod stylish;

use crate::synth::SynthesisReport;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON format for machine parsing
    Json,
    /// Human-readable format with colors
    #[default]
    Stylish,
}

/// Format a report to a string.
pub fn format_report(report: &SynthesisReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json::format(report),
        OutputFormat::Stylish => stylish::format(report),
    }
}
