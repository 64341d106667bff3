//! Stylish formatter for synthesis reports.
//!
//! Produces human-readable colored output. Colors follow `colored`'s global
//! override.

use std::collections::BTreeMap;

use colored::Colorize;

use crate::synth::SynthesisReport;

/// Format a report in stylish format.
pub fn format(report: &SynthesisReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{} chart {} in {}\n",
        "✔".green().bold(),
        report.chart_name.bold(),
        report.output_dir.display().to_string().underline()
    ));
    output.push_str(&format!(
        "  {} document(s), {} template(s), {} value(s), {} relationship(s)\n",
        report.documents,
        report.templates.len(),
        report.values_fields,
        report.relationships
    ));

    if !report.templates.is_empty() {
        output.push('\n');
        output.push_str(&format!("{}\n", "Templates".bold()));
        for template in &report.templates {
            output.push_str(&format!("  {}\n", template.display().to_string().dimmed()));
        }
    }

    if !report.required_values.is_empty() {
        output.push('\n');
        output.push_str(&format!("{}\n", "Required values (supply at install time)".bold()));
        for path in &report.required_values {
            output.push_str(&format!("  {} {}\n", "•".yellow(), path));
        }
    }

    // Group warnings by file
    let mut by_file: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for warning in &report.warnings {
        by_file
            .entry(warning.source_path.display().to_string())
            .or_default()
            .push(warning);
    }

    for (file, warnings) in &by_file {
        output.push_str(&format!("\n{}\n", file.underline().bold()));
        for warning in warnings {
            output.push_str(&format!(
                "  {}  {}  {}\n",
                "warning".yellow(),
                warning.message,
                warning.code.to_string().dimmed()
            ));
        }
    }

    let total = report.warnings.len();
    if total > 0 {
        output.push_str(&format!(
            "\n{}\n",
            format!(
                "⚠ {} {}",
                total,
                if total == 1 { "warning" } else { "warnings" }
            )
            .yellow()
            .bold()
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::types::{ResourceId, Warning};
    use std::path::PathBuf;

    #[test]
    fn test_stylish_lists_required_values_and_warnings() {
        colored::control::set_override(false);
        let report = SynthesisReport {
            chart_name: "shop".to_string(),
            output_dir: PathBuf::from("out/shop"),
            documents: 2,
            templates: vec![PathBuf::from("templates/secret-db.yaml")],
            values_fields: 1,
            required_values: vec!["db.password".to_string()],
            relationships: 0,
            warnings: vec![Warning::ambiguous(
                ResourceId::new("Service", "orphan"),
                PathBuf::from("svc.yaml"),
                "matches no workload",
            )],
        };
        let text = format(&report);
        assert!(text.contains("chart shop in out/shop"));
        assert!(text.contains("db.password"));
        assert!(text.contains("svc.yaml"));
        assert!(text.contains("AmbiguousReferenceWarning"));
        assert!(text.contains("1 warning"));
    }
}
