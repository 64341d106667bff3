//! JSON formatter for synthesis reports.

use serde::Serialize;

use crate::synth::SynthesisReport;

#[derive(Serialize)]
struct JsonWarning {
    code: String,
    resource: String,
    file: String,
    message: String,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    chart_name: &'a str,
    output_dir: String,
    documents: usize,
    templates: Vec<String>,
    values_fields: usize,
    required_values: &'a [String],
    relationships: usize,
    warning_count: usize,
    warnings: Vec<JsonWarning>,
}

/// Format a report as JSON.
pub fn format(report: &SynthesisReport) -> String {
    let output = JsonOutput {
        chart_name: &report.chart_name,
        output_dir: report.output_dir.display().to_string(),
        documents: report.documents,
        templates: report
            .templates
            .iter()
            .map(|t| t.display().to_string())
            .collect(),
        values_fields: report.values_fields,
        required_values: &report.required_values,
        relationships: report.relationships,
        warning_count: report.warnings.len(),
        warnings: report
            .warnings
            .iter()
            .map(|w| JsonWarning {
                code: w.code.to_string(),
                resource: w.resource.to_string(),
                file: w.source_path.display().to_string(),
                message: w.message.clone(),
            })
            .collect(),
    };

    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::types::{ResourceId, Warning};
    use std::path::PathBuf;

    fn report() -> SynthesisReport {
        SynthesisReport {
            chart_name: "shop".to_string(),
            output_dir: PathBuf::from("shop"),
            documents: 3,
            templates: vec![PathBuf::from("templates/deployment-web.yaml")],
            values_fields: 4,
            required_values: vec!["dbSecret.password".to_string()],
            relationships: 2,
            warnings: vec![Warning::ambiguous(
                ResourceId::new("Service", "orphan"),
                PathBuf::from("svc.yaml"),
                "selector app=gone of Service/orphan matches no workload",
            )],
        }
    }

    #[test]
    fn test_json_format() {
        let json = format(&report());
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["chart_name"], "shop");
        assert_eq!(parsed["warning_count"], 1);
        assert_eq!(parsed["warnings"][0]["code"], "AmbiguousReferenceWarning");
        assert_eq!(parsed["warnings"][0]["resource"], "Service/orphan");
        assert_eq!(parsed["required_values"][0], "dbSecret.password");
        assert_eq!(parsed["templates"][0], "templates/deployment-web.yaml");
    }
}
