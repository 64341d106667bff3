//! Library-level properties of synthesized charts

use std::path::Path;

use chartify::config::types::Config;
use chartify::synth::emit::{HELPERS_FILE, VALUES_FILE};
use chartify::synth::template::{ChartInfo, ReleaseInfo, RenderError, Renderer, go_quote};
use chartify::synth::values::camel_key;
use chartify::synth::yaml::{self, Quoting};
use chartify::synth::{SynthesisOptions, SynthesizedChart, Synthesizer};
use proptest::prelude::*;
use serde_yaml::Value;

fn synthesize(fixture: &str, chart: &str) -> SynthesizedChart {
    let options = SynthesisOptions::new(Path::new("tests/fixtures").join(fixture), chart);
    Synthesizer::new(Config::default())
        .synthesize(&options)
        .unwrap_or_else(|e| panic!("{}: {}", fixture, e))
}

fn renderer(chart: &SynthesizedChart, values: Value, release: &str) -> Renderer {
    let helpers = chart.chart.file(HELPERS_FILE).unwrap();
    Renderer::new(
        &[(HELPERS_FILE, helpers)],
        values,
        &ReleaseInfo {
            name: release.to_string(),
            namespace: "default".to_string(),
        },
        &ChartInfo {
            name: "shop".to_string(),
            version: "0.1.0".to_string(),
            app_version: None,
        },
    )
    .unwrap()
}

fn emitted_values(chart: &SynthesizedChart) -> Value {
    serde_yaml::from_str(chart.chart.file(VALUES_FILE).unwrap()).unwrap()
}

#[test]
fn test_flask_mysql_report() {
    let chart = synthesize("flask-mysql", "shop");
    let report = &chart.report;
    assert_eq!(report.documents, 6);
    assert_eq!(report.templates.len(), 6);
    assert_eq!(report.required_values, vec!["mysqlSecret.password".to_string()]);
    assert_eq!(report.relationships, 7);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_synthesis_is_idempotent() {
    let first = synthesize("flask-mysql", "shop");
    let second = synthesize("flask-mysql", "shop");
    assert_eq!(first.chart.files, second.chart.files);
}

#[test]
fn test_names_follow_release() {
    let chart = synthesize("flask-mysql", "shop");
    let renderer = renderer(&chart, emitted_values(&chart), "prod");
    let text = chart.chart.file("templates/deployment-app.yaml").unwrap();
    let rendered: Value = serde_yaml::from_str(&renderer.render(text, "deployment").unwrap()).unwrap();

    assert_eq!(rendered["metadata"]["name"].as_str(), Some("prod-app"));
    assert_eq!(
        rendered["spec"]["selector"]["matchLabels"]["app"].as_str(),
        Some("prod-app")
    );
    let container = &rendered["spec"]["template"]["spec"]["containers"][0];
    assert_eq!(container["image"].as_str(), Some("registry.example.com/shop/flask:1.4.2"));
    assert_eq!(container["ports"][0]["containerPort"].as_u64(), Some(5000));
    assert_eq!(
        container["envFrom"][0]["configMapRef"]["name"].as_str(),
        Some("prod-app-config")
    );
}

#[test]
fn test_fullname_override_applies() {
    let chart = synthesize("flask-mysql", "shop");
    let mut values = emitted_values(&chart);
    values["fullnameOverride"] = Value::String("store".to_string());
    let renderer = renderer(&chart, values, "prod");
    let text = chart.chart.file("templates/service-mysql.yaml").unwrap();
    let rendered: Value = serde_yaml::from_str(&renderer.render(text, "service").unwrap()).unwrap();
    assert_eq!(rendered["metadata"]["name"].as_str(), Some("store-mysql"));
}

#[test]
fn test_secret_requires_value() {
    let chart = synthesize("flask-mysql", "shop");
    let text = chart.chart.file("templates/secret-mysql-secret.yaml").unwrap();

    let err = renderer(&chart, emitted_values(&chart), "prod")
        .render(text, "secret")
        .unwrap_err();
    assert!(matches!(err, RenderError::Required { .. }));

    let mut values = emitted_values(&chart);
    values["mysqlSecret"]["password"] = Value::String("hunter2".to_string());
    let rendered: Value = serde_yaml::from_str(
        &renderer(&chart, values, "prod").render(text, "secret").unwrap(),
    )
    .unwrap();
    assert_eq!(rendered["data"]["password"].as_str(), Some("aHVudGVyMg=="));
}

#[test]
fn test_exported_values_keep_their_types_under_helm() {
    let chart = synthesize("exported", "shop");
    let values = chart.chart.file(VALUES_FILE).unwrap();
    assert!(values.contains("featureSwitch: \"on\""), "{}", values);
    assert!(values.contains("flaskApp: \"app.py\""), "{}", values);
    assert!(values.contains("memory: 134217728"), "{}", values);
    assert!(yaml::ambiguous_scalars(values).is_empty());

    let deployment = chart.chart.file("templates/deployment-app.yaml").unwrap();
    assert!(deployment.contains("memory: {{ .Values.app.api.resources.limits.memory | int64 }}"));
    assert!(deployment.contains("replicas: {{ .Values.app.replicaCount | int64 }}"));
    assert!(deployment.contains("value: {{ .Values.app.api.env.flaskApp | quote }}"));
    assert!(deployment.contains("value: {{ .Values.app.api.env.featureSwitch | quote }}"));
    assert!(!deployment.contains("-app.py"), "file name rewritten as a service reference");
}

#[test]
fn test_large_integers_render_without_exponent() {
    let chart = synthesize("exported", "shop");
    let text = chart.chart.file("templates/deployment-app.yaml").unwrap();
    let rendered = renderer(&chart, emitted_values(&chart), "prod")
        .render(text, "deployment")
        .unwrap();
    assert!(rendered.contains("memory: 134217728"), "{}", rendered);
    assert!(!rendered.contains("e+08"));
}

#[test]
fn test_secret_literals_never_reach_chart_files() {
    let chart = synthesize("exported", "shop");
    for (path, content) in &chart.chart.files {
        for literal in ["c2VjcmV0LXRva2Vu", "secret-token", "last-applied-configuration"] {
            assert!(!content.contains(literal), "{} contains {}", path.display(), literal);
        }
    }
    assert_eq!(chart.report.required_values, vec!["appCredentials.apiKey".to_string()]);
}

proptest! {
    #[test]
    fn camel_keys_are_identifiers(name in "\\PC{0,24}") {
        let key = camel_key(&name);
        prop_assert!(!key.is_empty());
        prop_assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        prop_assert!(!key.starts_with(|c: char| c.is_ascii_digit()));
    }

    #[test]
    fn yaml_writer_keeps_strings_strings(text in "[ -~]{0,12}") {
        let mut map = serde_yaml::Mapping::new();
        map.insert("value".into(), Value::String(text));
        let value = Value::Mapping(map);
        let written = yaml::to_string(&value, Quoting::WhenNeeded);
        prop_assert!(yaml::ambiguous_scalars(&written).is_empty(), "{}", written);
        prop_assert_eq!(serde_yaml::from_str::<Value>(&written).unwrap(), value);
    }

    #[test]
    fn go_quote_reads_back_as_yaml(text in "[ -~\t\n]{0,40}") {
        let parsed: String = serde_yaml::from_str(&go_quote(&text)).unwrap();
        prop_assert_eq!(parsed, text);
    }
}
