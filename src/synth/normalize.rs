//! Name normalization.
//!
//! Every resource name becomes `<fullname>-<suffix>`, where the fullname is
//! the chart's release-scoped helper. References found by the classifier and
//! name labels are rewritten to match, so the rendered chart keeps the same
//! relationship graph as the input.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info};
use serde_yaml::Value;

use crate::config::types::NamingConfig;
use crate::error::{Result, SynthError};
use crate::synth::classify::{Classification, classify, dns_suffix};
use crate::synth::document::{FieldPath, ManifestDocument, WORKLOAD_KINDS};
use crate::synth::types::{Placeholder, RelationKind, Segment};

/// Kinds whose names are left untouched.
pub const EXEMPT_KINDS: &[&str] = &["Namespace", "CustomResourceDefinition"];

/// Result of normalizing resource names.
#[derive(Debug, Clone)]
pub struct Normalization {
    /// Per document: the suffix appended to the fullname, or `None` when the
    /// name is kept as-is.
    pub suffixes: Vec<Option<String>>,
    /// Name placeholders: `metadata.name`, references and name labels.
    pub placeholders: Vec<Placeholder>,
}

impl Normalization {
    /// Segments a reference to document `doc` renders to.
    pub fn name_segments(&self, doc: usize) -> Option<Vec<Segment>> {
        let suffix = self.suffixes.get(doc)?.as_ref()?;
        let mut segments = vec![Segment::Fullname];
        if !suffix.is_empty() {
            segments.push(Segment::Literal(format!("-{}", suffix)));
        }
        Some(segments)
    }

    /// The name document `doc` carries after rendering with `fullname`.
    pub fn concrete_name(&self, docs: &[ManifestDocument], doc: usize, fullname: &str) -> String {
        match self.name_segments(doc) {
            Some(segments) => render_segments(&segments, fullname),
            None => docs[doc].name.clone(),
        }
    }

    /// The documents as a render with `fullname` produces them.
    pub fn apply_concrete(&self, docs: &[ManifestDocument], fullname: &str) -> Vec<ManifestDocument> {
        let mut normalized: Vec<ManifestDocument> = docs.to_vec();
        for placeholder in &self.placeholders {
            let text = render_segments(&placeholder.segments, fullname);
            placeholder
                .path
                .set(&mut normalized[placeholder.doc].tree, Value::String(text));
        }
        for (i, doc) in normalized.iter_mut().enumerate() {
            doc.name = self.concrete_name(docs, i, fullname);
        }
        normalized
    }
}

/// Concatenate name segments with a concrete fullname. Field segments never
/// appear in name placeholders.
fn render_segments(segments: &[Segment], fullname: &str) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Fullname => fullname.to_string(),
            Segment::Literal(text) => text.clone(),
            Segment::Field(_) => String::new(),
        })
        .collect()
}

/// Suffix for a resource name under a chart.
pub fn name_suffix(name: &str, chart_name: &str, strip_chart_prefix: bool) -> String {
    if name == chart_name {
        return String::new();
    }
    if strip_chart_prefix {
        if let Some(rest) = name.strip_prefix(chart_name).and_then(|r| r.strip_prefix('-')) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    name.to_string()
}

/// Plan the renames for a document set.
pub fn normalize(
    docs: &[ManifestDocument],
    classification: &Classification,
    chart_name: &str,
    naming: &NamingConfig,
) -> Result<Normalization> {
    let mut suffixes = Vec::with_capacity(docs.len());
    let mut seen: HashMap<(&str, String), usize> = HashMap::new();

    for (i, doc) in docs.iter().enumerate() {
        if EXEMPT_KINDS.contains(&doc.kind.as_str()) {
            suffixes.push(None);
            continue;
        }
        let suffix = name_suffix(&doc.name, chart_name, naming.strip_chart_prefix);
        if let Some(&first) = seen.get(&(doc.kind.as_str(), suffix.clone())) {
            return Err(SynthError::NameCollision {
                kind: doc.kind.clone(),
                name: display_name(chart_name, &suffix),
                first: docs[first].source_path.clone(),
                second: doc.source_path.clone(),
            });
        }
        seen.insert((doc.kind.as_str(), suffix.clone()), i);
        suffixes.push(Some(suffix));
    }

    let mut normalization = Normalization {
        suffixes,
        placeholders: Vec::new(),
    };

    for i in 0..docs.len() {
        if let Some(segments) = normalization.name_segments(i) {
            normalization.placeholders.push(Placeholder {
                doc: i,
                path: FieldPath::from_keys("metadata.name"),
                segments,
            });
        }
    }

    let mut reference_placeholders = Vec::new();
    for relationship in &classification.relationships {
        if !relationship.kind.is_name_reference() {
            continue;
        }
        let Some(mut segments) = normalization.name_segments(relationship.to) else {
            continue;
        };
        if relationship.kind == RelationKind::ServiceDns {
            let value = docs[relationship.from].get_str(&relationship.path).unwrap_or_default();
            let target = &docs[relationship.to];
            let rest = dns_suffix(value, &target.name, target.namespace.as_deref()).unwrap_or_default();
            if !rest.is_empty() {
                push_literal(&mut segments, rest);
            }
        }
        reference_placeholders.push(Placeholder {
            doc: relationship.from,
            path: relationship.path.clone(),
            segments,
        });
    }
    normalization.placeholders.extend(reference_placeholders);

    let label_placeholders = label_rewrites(docs, classification, naming, &normalization);
    normalization.placeholders.extend(label_placeholders);

    info!(
        "Normalized {} name(s) with {} placeholder(s)",
        normalization.suffixes.iter().filter(|s| s.is_some()).count(),
        normalization.placeholders.len()
    );
    Ok(normalization)
}

fn display_name(chart_name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{{{{ {}.fullname }}}}", chart_name)
    } else {
        format!("{{{{ {}.fullname }}}}-{}", chart_name, suffix)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if let Some(Segment::Literal(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Literal(text.to_string()));
    }
}

/// Placeholders for name labels that follow workload renames.
fn label_rewrites(
    docs: &[ManifestDocument],
    classification: &Classification,
    naming: &NamingConfig,
    normalization: &Normalization,
) -> Vec<Placeholder> {
    let keys: BTreeSet<&str> = naming.name_label_keys.iter().map(String::as_str).collect();
    if keys.is_empty() {
        return Vec::new();
    }

    // workload name -> document, only for names held by exactly one workload
    let mut workloads: BTreeMap<&str, Option<usize>> = BTreeMap::new();
    for (i, doc) in docs.iter().enumerate() {
        if WORKLOAD_KINDS.contains(&doc.kind.as_str()) {
            workloads
                .entry(doc.name.as_str())
                .and_modify(|slot| *slot = None)
                .or_insert(Some(i));
        }
    }

    let selector = FieldPath::from_keys("spec.selector");
    let mut pinned: BTreeSet<String> = BTreeSet::new();
    for &service in &classification.unresolved_selectors {
        if let Some(Value::Mapping(map)) = selector.resolve(&docs[service].tree) {
            for (k, v) in map {
                if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                    if keys.contains(k) {
                        pinned.insert(v.to_string());
                    }
                }
            }
        }
    }

    let mut placeholders = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        let mut label_maps = Vec::new();
        collect_label_maps(&doc.tree, &FieldPath::root(), &mut label_maps);
        if doc.kind == "Service" && classification.selected_workload(i).is_some() {
            label_maps.push(selector.clone());
        }

        for map_path in label_maps {
            let Some(Value::Mapping(map)) = map_path.resolve(&doc.tree) else {
                continue;
            };
            for (k, v) in map {
                let (Some(k), Some(v)) = (k.as_str(), v.as_str()) else {
                    continue;
                };
                if !keys.contains(k) || pinned.contains(v) {
                    continue;
                }
                let Some(Some(workload)) = workloads.get(v) else {
                    continue;
                };
                if let Some(segments) = normalization.name_segments(*workload) {
                    let path = map_path.key(k);
                    debug!("{}: label {} follows {}", doc.id(), path, docs[*workload].id());
                    placeholders.push(Placeholder { doc: i, path, segments });
                }
            }
        }
    }
    placeholders
}

/// Paths of every `labels` / `matchLabels` mapping in a tree.
fn collect_label_maps(node: &Value, path: &FieldPath, out: &mut Vec<FieldPath>) {
    match node {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = k.as_str() else {
                    continue;
                };
                let child = path.key(key);
                if matches!(key, "labels" | "matchLabels") && v.is_mapping() {
                    out.push(child.clone());
                }
                collect_label_maps(v, &child, out);
            }
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_label_maps(item, &path.index(i), out);
            }
        }
        _ => {}
    }
}

/// Check that classifying the normalized documents yields the same edges.
pub fn check_fixed_point(original: &Classification, normalized: &[ManifestDocument]) -> Result<()> {
    let reclassified = classify(normalized)?;
    let before = original.edge_signature();
    let after = reclassified.edge_signature();
    if before == after {
        return Ok(());
    }

    let describe = |(from, to, kind, path): &(usize, usize, RelationKind, String)| {
        format!(
            "{} -> {} ({}) at {}",
            normalized[*from].id(),
            normalized[*to].id(),
            kind,
            path
        )
    };
    let detail = match before.difference(&after).next() {
        Some(lost) => format!("relationship lost after renaming: {}", describe(lost)),
        None => match after.difference(&before).next() {
            Some(added) => format!("relationship introduced by renaming: {}", describe(added)),
            None => "relationship set changed".to_string(),
        },
    };
    Err(SynthError::RoundTrip {
        template: "<relationships>".to_string(),
        detail,
    })
}
