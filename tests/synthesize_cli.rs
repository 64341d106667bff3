//! End-to-end tests for the chartify binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const FIXTURES: &str = "tests/fixtures";

fn chartify(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("chartify").unwrap();
    cmd.env("HOME", home).env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    let temp = TempDir::new().unwrap();
    chartify(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Helm chart"));
}

#[test]
fn test_cli_version() {
    let temp = TempDir::new().unwrap();
    chartify(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_synthesize_flask_mysql() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("shop");

    chartify(temp.path())
        .arg("synthesize")
        .arg(Path::new(FIXTURES).join("flask-mysql"))
        .arg("shop")
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("mysqlSecret.password"));

    for file in [
        "Chart.yaml",
        "values.yaml",
        ".helmignore",
        "templates/_helpers.tpl",
        "templates/deployment-app.yaml",
        "templates/service-app.yaml",
        "templates/service-mysql.yaml",
        "templates/statefulset-mysql.yaml",
        "templates/secret-mysql-secret.yaml",
        "templates/configmap-app-config.yaml",
    ] {
        assert!(output.join(file).is_file(), "missing {}", file);
    }

    let chart = fs::read_to_string(output.join("Chart.yaml")).unwrap();
    assert!(chart.contains("apiVersion: v2"));
    assert!(chart.contains("name: shop"));

    let values = fs::read_to_string(output.join("values.yaml")).unwrap();
    assert!(values.contains("replicaCount: 2"));
    assert!(values.contains("repository: \"registry.example.com/shop/flask\""));
    assert!(!values.contains("czNjcjN0"), "secret data leaked into values.yaml");
    assert!(!values.contains("s3cr3t"), "secret data leaked into values.yaml");

    let deployment = fs::read_to_string(output.join("templates/deployment-app.yaml")).unwrap();
    assert!(deployment.contains("name: {{ include \"shop.fullname\" . }}-app"));
    assert!(deployment.contains("replicas: {{ .Values.app.replicaCount | int64 }}"));
    assert!(deployment.contains(
        "image: \"{{ .Values.app.flask.image.repository }}:{{ .Values.app.flask.image.tag }}\""
    ));
    assert!(deployment.contains("value: {{ include \"shop.fullname\" . }}-mysql"));

    let secret = fs::read_to_string(output.join("templates/secret-mysql-secret.yaml")).unwrap();
    assert!(secret.contains(
        "{{ required \"mysqlSecret.password is required\" .Values.mysqlSecret.password | b64enc | quote }}"
    ));
    assert!(!secret.contains("czNjcjN0"));
}

#[test]
fn test_json_report() {
    let temp = TempDir::new().unwrap();
    let assert = chartify(temp.path())
        .arg("synthesize")
        .arg(Path::new(FIXTURES).join("flask-mysql"))
        .arg("shop")
        .arg("--output")
        .arg(temp.path().join("out"))
        .arg("--format")
        .arg("json")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["chart_name"], "shop");
    assert_eq!(report["documents"], 6);
    assert_eq!(report["warning_count"], 0);
    assert_eq!(report["required_values"][0], "mysqlSecret.password");
}

#[test]
fn test_zero_match_selector_warns_and_stays_literal() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("jobs");

    chartify(temp.path())
        .arg("synthesize")
        .arg(Path::new(FIXTURES).join("orphan-service"))
        .arg("jobs")
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("AmbiguousReferenceWarning"))
        .stdout(predicate::str::contains("matches no workload"));

    let service = fs::read_to_string(output.join("templates/service-legacy.yaml")).unwrap();
    assert!(service.contains("app: retired"));
    assert!(service.contains("name: {{ include \"jobs.fullname\" . }}-legacy"));
}

#[test]
fn test_duplicate_deployment_names_fail() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("input");
    fs::create_dir(&input).unwrap();
    let deployment = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 1\n";
    fs::write(input.join("a.yaml"), deployment).unwrap();
    fs::write(input.join("b.yaml"), deployment).unwrap();
    let output = temp.path().join("web");

    chartify(temp.path())
        .arg("synthesize")
        .arg(&input)
        .arg("web")
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[classifying]"))
        .stderr(predicate::str::contains("name collision"))
        .stderr(predicate::str::contains("a.yaml"))
        .stderr(predicate::str::contains("b.yaml"));

    assert!(!output.exists());
}

#[test]
fn test_parse_error_reports_line() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("input");
    fs::create_dir(&input).unwrap();
    fs::write(
        input.join("broken.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: bad: value\n",
    )
    .unwrap();

    chartify(temp.path())
        .arg("synthesize")
        .arg(&input)
        .arg("broken")
        .arg("--output")
        .arg(temp.path().join("broken"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[loading]"))
        .stderr(predicate::str::contains("broken.yaml at line 4"));
}

#[test]
fn test_missing_input_directory() {
    let temp = TempDir::new().unwrap();
    chartify(temp.path())
        .arg("synthesize")
        .arg(temp.path().join("nope"))
        .arg("shop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[loading]"))
        .stderr(predicate::str::contains("input directory not found"));
}

#[test]
fn test_invalid_chart_name() {
    let temp = TempDir::new().unwrap();
    chartify(temp.path())
        .arg("synthesize")
        .arg(Path::new(FIXTURES).join("flask-mysql"))
        .arg("My_Chart")
        .arg("--output")
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid chart name"));
}

#[test]
fn test_existing_output_requires_force() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("shop");
    fs::create_dir(&output).unwrap();
    fs::write(output.join("keep.txt"), "mine").unwrap();

    chartify(temp.path())
        .arg("synthesize")
        .arg(Path::new(FIXTURES).join("flask-mysql"))
        .arg("shop")
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[emitting]"))
        .stderr(predicate::str::contains("already exists"));
    assert!(output.join("keep.txt").is_file());

    chartify(temp.path())
        .arg("synthesize")
        .arg(Path::new(FIXTURES).join("flask-mysql"))
        .arg("shop")
        .arg("--output")
        .arg(&output)
        .arg("--force")
        .arg("--quiet")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(!output.join("keep.txt").exists());
    assert!(output.join("Chart.yaml").is_file());
}

#[test]
fn test_local_config_is_applied() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("input");
    fs::create_dir(&input).unwrap();
    fs::write(
        input.join("cm.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  LOG_LEVEL: debug\n",
    )
    .unwrap();
    fs::write(
        input.join(".chartify.toml"),
        "[extraction]\nconfig_map_data = true\n\n[chart]\nversion = \"2.3.4\"\n",
    )
    .unwrap();
    let output = temp.path().join("svc");

    chartify(temp.path())
        .arg("synthesize")
        .arg(&input)
        .arg("svc")
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let values = fs::read_to_string(output.join("values.yaml")).unwrap();
    assert!(values.contains("logLevel: \"debug\""));
    let chart = fs::read_to_string(output.join("Chart.yaml")).unwrap();
    assert!(chart.contains("version: 2.3.4"));
}
