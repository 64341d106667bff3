//! Template emission, round-trip verification and the atomic chart write.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;
use serde_yaml::Value;

use crate::config::types::VerifyConfig;
use crate::error::{Result, SynthError};
use crate::synth::chart::ChartDescriptor;
use crate::synth::document::{FieldPath, ManifestDocument};
use crate::synth::extract::{Extraction, verification_value};
use crate::synth::normalize::Normalization;
use crate::synth::template::{
    ChartInfo, ReleaseInfo, Renderer, fullname, fullname_helper, go_quote, parse_template,
    standard_helpers,
};
use crate::synth::types::{Placeholder, ResourceId, Segment, TemplateField};
use crate::synth::values::ValuesTree;
use crate::synth::yaml::{self, Quoting, ambiguous_scalars};

pub const CHART_FILE: &str = "Chart.yaml";
pub const VALUES_FILE: &str = "values.yaml";
pub const HELPERS_FILE: &str = "templates/_helpers.tpl";
pub const HELMIGNORE_FILE: &str = ".helmignore";

const SENTINEL_PREFIX: &str = "__chartify_placeholder_";

static SENTINEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__chartify_placeholder_(\d+)__").unwrap());

static BARE_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]*$").unwrap());

const HELMIGNORE: &str = "# Patterns to ignore when building packages.
.DS_Store
.git/
.gitignore
.bzr/
.bzrignore
.hg/
.hgignore
.svn/
*.swp
*.bak
*.tmp
*.orig
*~
.project
.idea/
*.tmproj
.vscode/
";

/// Everything the emitter reads.
pub struct ChartPlan<'a> {
    pub chart_name: &'a str,
    pub docs: &'a [ManifestDocument],
    pub extraction: &'a Extraction,
    pub normalization: &'a Normalization,
    pub descriptor: &'a ChartDescriptor,
}

/// One emitted resource template.
#[derive(Debug, Clone)]
pub struct EmittedTemplate {
    /// Path relative to the chart root.
    pub path: PathBuf,
    pub resource: ResourceId,
    pub doc: usize,
}

/// The chart's files, keyed by path relative to the chart root.
#[derive(Debug, Clone, Default)]
pub struct EmittedChart {
    pub files: BTreeMap<PathBuf, String>,
    pub templates: Vec<EmittedTemplate>,
}

impl EmittedChart {
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(Path::new(path)).map(String::as_str)
    }
}

/// Produce every chart file in memory.
pub fn emit(plan: &ChartPlan<'_>) -> Result<EmittedChart> {
    let mut chart = EmittedChart::default();

    let mut per_doc: Vec<Vec<&Placeholder>> = vec![Vec::new(); plan.docs.len()];
    for placeholder in plan
        .normalization
        .placeholders
        .iter()
        .chain(plan.extraction.placeholders.iter())
    {
        let slot = &mut per_doc[placeholder.doc];
        if slot.iter().any(|p| p.path == placeholder.path) {
            debug!(
                "{}: keeping first placeholder at {}",
                plan.docs[placeholder.doc].id(),
                placeholder.path
            );
            continue;
        }
        slot.push(placeholder);
    }

    let mut used_names = BTreeSet::new();
    for (i, doc) in plan.docs.iter().enumerate() {
        let path = template_path(doc, plan.normalization.suffixes[i].as_deref(), &mut used_names);
        let text = render_template(
            doc,
            &path,
            &per_doc[i],
            &plan.extraction.fields,
            plan.chart_name,
        )?;
        debug!("Emitted {} for {}", path.display(), doc.id());
        chart.files.insert(path.clone(), text);
        chart.templates.push(EmittedTemplate {
            path,
            resource: doc.id(),
            doc: i,
        });
    }

    chart
        .files
        .insert(PathBuf::from(CHART_FILE), plan.descriptor.to_yaml()?);
    chart.files.insert(
        PathBuf::from(VALUES_FILE),
        plan.extraction.values.to_yaml(plan.chart_name),
    );
    chart
        .files
        .insert(PathBuf::from(HELPERS_FILE), standard_helpers(plan.chart_name));
    chart
        .files
        .insert(PathBuf::from(HELMIGNORE_FILE), HELMIGNORE.to_string());

    info!("Emitted {} template(s)", chart.templates.len());
    Ok(chart)
}

/// `templates/<kind>-<suffix>.yaml`, made unique within the chart.
fn template_path(doc: &ManifestDocument, suffix: Option<&str>, used: &mut BTreeSet<String>) -> PathBuf {
    let kind = doc.kind.to_ascii_lowercase();
    let stem = match suffix {
        Some("") => kind,
        Some(suffix) => format!("{}-{}", kind, file_safe(suffix)),
        None => format!("{}-{}", kind, file_safe(&doc.name)),
    };
    let mut candidate = stem.clone();
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}-{}", stem, n);
        n += 1;
    }
    PathBuf::from("templates").join(format!("{}.yaml", candidate))
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Serialize one document with its placeholders substituted.
pub fn render_template(
    doc: &ManifestDocument,
    template: &Path,
    placeholders: &[&Placeholder],
    fields: &[TemplateField],
    chart_name: &str,
) -> Result<String> {
    let template_name = template.display().to_string();
    let mut tree = doc.tree.clone();
    for (n, placeholder) in placeholders.iter().enumerate() {
        let sentinel = Value::String(format!("{}{}__", SENTINEL_PREFIX, n));
        if !placeholder.path.set(&mut tree, sentinel) {
            return Err(SynthError::RoundTrip {
                template: template_name,
                detail: format!("placeholder path {} does not exist", placeholder.path),
            });
        }
    }

    let serialized = yaml::to_string(&tree, Quoting::WhenNeeded);
    // Literal `{{` in manifest text must survive template evaluation.
    let escaped = serialized.replace("{{", "{{ \"{{\" }}");

    let mut substituted = 0;
    let text = SENTINEL.replace_all(&escaped, |caps: &regex::Captures<'_>| {
        substituted += 1;
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|n| placeholders.get(n))
            .map(|p| expression(p, fields, chart_name))
            .unwrap_or_default()
    });
    let text = text.into_owned();

    if substituted != placeholders.len() {
        return Err(SynthError::RoundTrip {
            template: template_name,
            detail: format!(
                "expected {} placeholder(s), substituted {}",
                placeholders.len(),
                substituted
            ),
        });
    }
    Ok(text)
}

/// Template text for a placeholder.
pub fn expression(placeholder: &Placeholder, fields: &[TemplateField], chart_name: &str) -> String {
    let include = format!("{{{{ include \"{}\" . }}}}", fullname_helper(chart_name));
    match placeholder.segments.as_slice() {
        [Segment::Field(f)] => fields[*f].placeholder_expression.clone(),
        [Segment::Fullname] => {
            format!("{{{{ include \"{}\" . | quote }}}}", fullname_helper(chart_name))
        }
        segments => {
            let bare = matches!(segments.first(), Some(Segment::Fullname))
                && segments.iter().all(|s| match s {
                    Segment::Fullname => true,
                    Segment::Literal(text) => BARE_LITERAL.is_match(text),
                    Segment::Field(_) => false,
                });
            let body: String = segments
                .iter()
                .map(|s| match s {
                    Segment::Field(f) => fields[*f].inline_expression(),
                    Segment::Fullname => include.clone(),
                    Segment::Literal(text) if bare => text.clone(),
                    Segment::Literal(text) => yaml_escape(text),
                })
                .collect();
            if bare { body } else { format!("\"{}\"", body) }
        }
    }
}

/// Escape text for use inside a double-quoted YAML scalar.
fn yaml_escape(text: &str) -> String {
    let quoted = go_quote(text);
    quoted[1..quoted.len() - 1].to_string()
}

/// Render every template with the emitted values and compare against the
/// expected normalized documents.
pub fn verify(plan: &ChartPlan<'_>, chart: &EmittedChart, config: &VerifyConfig) -> Result<()> {
    let values_text = chart.file(VALUES_FILE).unwrap_or_default();
    let emitted_values: Value = serde_yaml::from_str(values_text).map_err(|e| SynthError::RoundTrip {
        template: VALUES_FILE.to_string(),
        detail: format!("does not parse: {}", e),
    })?;
    reject_ambiguous_scalars(VALUES_FILE, values_text)?;
    let values = &plan.extraction.values;
    if let Some((path, detail)) = first_difference(values.root(), &emitted_values, &FieldPath::root()) {
        return Err(SynthError::RoundTrip {
            template: VALUES_FILE.to_string(),
            detail: format!("{} at {}", detail, path),
        });
    }

    for field in plan.extraction.required_fields() {
        let entry = values.get(&field.values_path.to_string());
        if entry.and_then(Value::as_str) != Some("") {
            return Err(SynthError::RoundTrip {
                template: VALUES_FILE.to_string(),
                detail: format!("required value {} is not empty", field.values_path),
            });
        }
    }

    let overrides = plan
        .extraction
        .required_fields()
        .map(|f| (&f.values_path, verification_value(f)));
    let render_values = values.with_overrides(overrides);

    let helpers = chart.file(HELPERS_FILE).unwrap_or_default();
    let release = ReleaseInfo {
        name: config.release_name.clone(),
        namespace: config.namespace.clone(),
    };
    let chart_info = ChartInfo {
        name: plan.descriptor.name.clone(),
        version: plan.descriptor.version.clone(),
        app_version: plan.descriptor.app_version.clone(),
    };
    let renderer = Renderer::new(&[(HELPERS_FILE, helpers)], render_values, &release, &chart_info)
        .map_err(|e| SynthError::RoundTrip {
            template: HELPERS_FILE.to_string(),
            detail: e.to_string(),
        })?;

    let expected = plan
        .normalization
        .apply_concrete(plan.docs, &fullname(&config.release_name, ""));

    for template in &chart.templates {
        let name = template.path.display().to_string();
        let text = chart.file(&name).unwrap_or_default();
        lint_references(&name, text, values, &renderer)?;

        let rendered = renderer.render(text, &name).map_err(|e| SynthError::RoundTrip {
            template: name.clone(),
            detail: e.to_string(),
        })?;
        reject_ambiguous_scalars(&name, &rendered)?;
        let actual: Value = serde_yaml::from_str(&rendered).map_err(|e| SynthError::RoundTrip {
            template: name.clone(),
            detail: format!("rendered output does not parse: {}", e),
        })?;
        if let Some((path, detail)) =
            first_difference(&expected[template.doc].tree, &actual, &FieldPath::root())
        {
            return Err(SynthError::RoundTrip {
                template: name,
                detail: format!("{} at {}", detail, path),
            });
        }
    }

    info!(
        "Verified {} template(s) against release `{}`",
        chart.templates.len(),
        config.release_name
    );
    Ok(())
}

/// Plain scalars that Helm's YAML 1.1 loader reads differently would change
/// type on install.
fn reject_ambiguous_scalars(name: &str, text: &str) -> Result<()> {
    match ambiguous_scalars(text).into_iter().next() {
        Some(scalar) => Err(SynthError::RoundTrip {
            template: name.to_string(),
            detail: format!(
                "line {}: plain scalar `{}` reads differently under YAML 1.1",
                scalar.line, scalar.text
            ),
        }),
        None => Ok(()),
    }
}

/// Every `.Values` reference must exist and every include must name a helper.
fn lint_references(
    name: &str,
    text: &str,
    values: &ValuesTree,
    renderer: &Renderer,
) -> Result<()> {
    let parsed = parse_template(text, name);
    if let Some(error) = parsed.errors.first() {
        return Err(SynthError::RoundTrip {
            template: name.to_string(),
            detail: error.to_string(),
        });
    }
    for reference in parsed.values_references() {
        if values.get(reference).is_none() {
            return Err(SynthError::RoundTrip {
                template: name.to_string(),
                detail: format!(".Values.{} is not defined in {}", reference, VALUES_FILE),
            });
        }
    }
    for helper in &parsed.referenced_templates {
        if !renderer.helpers().has_helper(helper) {
            return Err(SynthError::RoundTrip {
                template: name.to_string(),
                detail: format!("include of undefined helper `{}`", helper),
            });
        }
    }
    Ok(())
}

/// First structural difference between two trees.
pub fn first_difference(expected: &Value, actual: &Value, path: &FieldPath) -> Option<(FieldPath, String)> {
    match (expected, actual) {
        (Value::Mapping(e), Value::Mapping(a)) => {
            for (key, e_value) in e {
                let child = match key.as_str() {
                    Some(k) => path.key(k),
                    None => path.key(format!("{:?}", key)),
                };
                match a.get(key) {
                    Some(a_value) => {
                        if let Some(diff) = first_difference(e_value, a_value, &child) {
                            return Some(diff);
                        }
                    }
                    None => return Some((child, "missing key".to_string())),
                }
            }
            a.keys()
                .find(|k| !e.contains_key(*k))
                .map(|k| (path.key(k.as_str().unwrap_or("?")), "unexpected key".to_string()))
        }
        (Value::Sequence(e), Value::Sequence(a)) => {
            if e.len() != a.len() {
                return Some((
                    path.clone(),
                    format!("expected {} item(s), got {}", e.len(), a.len()),
                ));
            }
            e.iter()
                .zip(a)
                .enumerate()
                .find_map(|(i, (ev, av))| first_difference(ev, av, &path.index(i)))
        }
        (e, a) if e == a => None,
        (e, a) => Some((
            path.clone(),
            format!("expected {}, got {}", describe(e), describe(a)),
        )),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        Value::Mapping(_) => "a mapping".to_string(),
        Value::Sequence(_) => "a sequence".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Write the chart under `output`, replacing it only when `force` is set.
///
/// Files are staged in a sibling temporary directory and renamed into place,
/// so `output` is never left partially written.
pub fn write_chart(chart: &EmittedChart, output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(SynthError::OutputExists(output.to_path_buf()));
    }

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| SynthError::io(&parent, e))?;

    let staging = tempfile::Builder::new()
        .prefix(".chartify-")
        .tempdir_in(&parent)
        .map_err(|e| SynthError::io(&parent, e))?;

    for (relative, content) in &chart.files {
        let path = staging.path().join(relative);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| SynthError::io(dir, e))?;
        }
        fs::write(&path, content).map_err(|e| SynthError::io(&path, e))?;
    }
    debug!("Staged {} file(s) in {}", chart.files.len(), staging.path().display());

    if !output.exists() {
        fs::rename(staging.path(), output).map_err(|e| SynthError::io(output, e))?;
        return Ok(());
    }

    let backup_dir = tempfile::Builder::new()
        .prefix(".chartify-old-")
        .tempdir_in(&parent)
        .map_err(|e| SynthError::io(&parent, e))?;
    let backup = backup_dir.path().join("previous");
    fs::rename(output, &backup).map_err(|e| SynthError::io(output, e))?;

    if let Err(e) = fs::rename(staging.path(), output) {
        if let Err(restore) = fs::rename(&backup, output) {
            warn!(
                "Could not restore {} from {}: {}",
                output.display(),
                backup.display(),
                restore
            );
        }
        return Err(SynthError::io(output, e));
    }
    info!("Replaced existing {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::types::ValuesPath;
    use tempfile::TempDir;

    fn field(value: Value, path: &str) -> TemplateField {
        TemplateField::literal(
            0,
            FieldPath::root(),
            ValuesPath::new(path.split('.').map(String::from).collect()),
            value,
        )
    }

    #[test]
    fn test_expression_forms() {
        let fields = vec![
            field("nginx".into(), "web.image.repository"),
            field("1.25".into(), "web.image.tag"),
        ];
        let single = Placeholder {
            doc: 0,
            path: FieldPath::root(),
            segments: vec![Segment::Field(1)],
        };
        assert_eq!(expression(&single, &fields, "shop"), "{{ .Values.web.image.tag | quote }}");

        let image = Placeholder {
            segments: vec![
                Segment::Field(0),
                Segment::Literal(":".to_string()),
                Segment::Field(1),
            ],
            ..single.clone()
        };
        assert_eq!(
            expression(&image, &fields, "shop"),
            "\"{{ .Values.web.image.repository }}:{{ .Values.web.image.tag }}\""
        );

        let name = Placeholder {
            segments: vec![Segment::Fullname, Segment::Literal("-web".to_string())],
            ..single.clone()
        };
        assert_eq!(expression(&name, &fields, "shop"), "{{ include \"shop.fullname\" . }}-web");

        let bare = Placeholder {
            segments: vec![Segment::Fullname],
            ..single.clone()
        };
        assert_eq!(
            expression(&bare, &fields, "shop"),
            "{{ include \"shop.fullname\" . | quote }}"
        );

        let dns = Placeholder {
            segments: vec![Segment::Fullname, Segment::Literal("-db:3306".to_string())],
            ..single
        };
        assert_eq!(
            expression(&dns, &fields, "shop"),
            "\"{{ include \"shop.fullname\" . }}-db:3306\""
        );
    }

    #[test]
    fn test_template_paths_are_unique() {
        let yaml = "kind: ConfigMap\nmetadata:\n  name: a_b\n---\nkind: ConfigMap\nmetadata:\n  name: a-b\n";
        let docs = crate::synth::loader::parse_documents(yaml, Path::new("c.yaml")).unwrap();
        let mut used = BTreeSet::new();
        let first = template_path(&docs[0], None, &mut used);
        let second = template_path(&docs[1], None, &mut used);
        assert_eq!(first, PathBuf::from("templates/configmap-a-b.yaml"));
        assert_eq!(second, PathBuf::from("templates/configmap-a-b-2.yaml"));
        assert_eq!(
            template_path(&docs[0], Some(""), &mut used),
            PathBuf::from("templates/configmap.yaml")
        );
    }

    #[test]
    fn test_literal_braces_are_escaped() {
        let yaml = "kind: ConfigMap\nmetadata:\n  name: tpl\ndata:\n  greeting: hello {{ name }}\n";
        let docs = crate::synth::loader::parse_documents(yaml, Path::new("c.yaml")).unwrap();
        let text = render_template(&docs[0], Path::new("t.yaml"), &[], &[], "shop").unwrap();
        assert!(text.contains("{{ \"{{\" }}"));
    }

    #[test]
    fn test_yaml11_ambiguous_text_is_rejected() {
        let err = reject_ambiguous_scalars("values.yaml", "app:\n  switch: on\n").unwrap_err();
        assert!(
            matches!(err, SynthError::RoundTrip { ref template, ref detail } if template == "values.yaml" && detail.contains("line 2"))
        );
        assert!(reject_ambiguous_scalars("values.yaml", "app:\n  switch: \"on\"\n  port: 80\n").is_ok());
    }

    #[test]
    fn test_template_keeps_yaml11_strings_quoted() {
        let yaml = "kind: ConfigMap\nmetadata:\n  name: flags\ndata:\n  switch: \"on\"\n  mode: \"0755\"\n  name: web\n";
        let docs = crate::synth::loader::parse_documents(yaml, Path::new("c.yaml")).unwrap();
        let text = render_template(&docs[0], Path::new("t.yaml"), &[], &[], "shop").unwrap();
        assert!(text.contains("switch: \"on\""));
        assert!(text.contains("mode: \"0755\""));
        assert!(text.contains("name: web"));
    }

    #[test]
    fn test_first_difference_reports_path() {
        let expected: Value = serde_yaml::from_str("a:\n  b: [1, 2]\n").unwrap();
        let actual: Value = serde_yaml::from_str("a:\n  b: [1, 3]\n").unwrap();
        let (path, detail) = first_difference(&expected, &actual, &FieldPath::root()).unwrap();
        assert_eq!(path.to_string(), "a.b[1]");
        assert!(detail.contains("expected 2"));

        let reordered: Value = serde_yaml::from_str("a:\n  b: [1, 2]\n").unwrap();
        assert!(first_difference(&expected, &reordered, &FieldPath::root()).is_none());
    }

    fn chart_with(files: &[(&str, &str)]) -> EmittedChart {
        EmittedChart {
            files: files
                .iter()
                .map(|(p, c)| (PathBuf::from(p), c.to_string()))
                .collect(),
            templates: Vec::new(),
        }
    }

    #[test]
    fn test_write_refuses_existing_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("shop");
        fs::create_dir(&output).unwrap();
        let err = write_chart(&chart_with(&[("Chart.yaml", "name: shop\n")]), &output, false).unwrap_err();
        assert!(matches!(err, SynthError::OutputExists(_)));
    }

    #[test]
    fn test_write_force_replaces_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("shop");
        fs::create_dir(&output).unwrap();
        fs::write(output.join("stale.txt"), "old").unwrap();

        let chart = chart_with(&[("Chart.yaml", "name: shop\n"), ("templates/cm.yaml", "kind: ConfigMap\n")]);
        write_chart(&chart, &output, true).unwrap();

        assert!(!output.join("stale.txt").exists());
        assert_eq!(fs::read_to_string(output.join("Chart.yaml")).unwrap(), "name: shop\n");
        assert!(output.join("templates/cm.yaml").is_file());
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".chartify-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
