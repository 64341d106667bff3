//! Resource classification.
//!
//! Groups documents by kind and derives the relationships between them:
//! Service selectors matched against pod labels, and every place a manifest
//! names another resource (env refs, volumes, bindings, ingress backends...).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use serde_yaml::Value;

use crate::error::{Result, SynthError};
use crate::synth::document::{FieldPath, ManifestDocument, SELECTABLE_KINDS, string_map};
use crate::synth::types::{RelationKind, Relationship, Warning};

/// What may follow a service name in a DNS-style env value:
/// `.<namespace>`, `.<namespace>.svc` or `.<namespace>.svc.cluster.local`,
/// then an optional port.
static DNS_REST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\.([a-z0-9](?:[-a-z0-9]*[a-z0-9])?)(\.svc(?:\.cluster\.local)?)?)?(?::[0-9]{1,5})?$").unwrap()
});

/// Documents of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub kind: String,
    /// Indices into the document list, in load order.
    pub members: Vec<usize>,
}

/// Result of classifying a document set.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub groups: BTreeMap<String, ResourceGroup>,
    pub relationships: Vec<Relationship>,
    pub warnings: Vec<Warning>,
    /// Services whose selector matched zero or several workloads.
    pub unresolved_selectors: BTreeSet<usize>,
}

impl Classification {
    /// The workload a Service selects, when exactly one matched.
    pub fn selected_workload(&self, service: usize) -> Option<usize> {
        self.relationships
            .iter()
            .find(|r| r.from == service && r.kind == RelationKind::ServiceSelector)
            .map(|r| r.to)
    }

    /// Edges with the referencing document's index first, for comparison
    /// across runs over documents in the same order.
    pub fn edge_signature(&self) -> BTreeSet<(usize, usize, RelationKind, String)> {
        self.relationships
            .iter()
            .map(|r| (r.from, r.to, r.kind, r.path.to_string()))
            .collect()
    }
}

/// Lookup of documents by kind and name.
struct ResourceIndex<'a> {
    docs: &'a [ManifestDocument],
    by_id: HashMap<(String, String), usize>,
}

impl<'a> ResourceIndex<'a> {
    fn build(docs: &'a [ManifestDocument]) -> Result<Self> {
        let mut by_id: HashMap<(String, String), usize> = HashMap::new();
        for (i, doc) in docs.iter().enumerate() {
            let key = (doc.kind.clone(), doc.name.clone());
            if let Some(&first) = by_id.get(&key) {
                return Err(SynthError::NameCollision {
                    kind: doc.kind.clone(),
                    name: doc.name.clone(),
                    first: docs[first].source_path.clone(),
                    second: doc.source_path.clone(),
                });
            }
            by_id.insert(key, i);
        }
        Ok(Self { docs, by_id })
    }

    fn find(&self, kind: &str, name: &str) -> Option<usize> {
        self.by_id
            .get(&(kind.to_string(), name.to_string()))
            .copied()
    }

    /// The Service a DNS-style value points at, with the text following the
    /// service name.
    fn service_for_dns<'v>(&self, value: &'v str) -> Option<(usize, &'v str)> {
        let split = value.find(['.', ':']).unwrap_or(value.len());
        let host = &value[..split];
        let service = self.find("Service", host)?;
        let namespace = self.docs[service].namespace.as_deref();
        dns_suffix(value, host, namespace).map(|rest| (service, rest))
    }
}

/// Classify documents and derive their relationships.
pub fn classify(docs: &[ManifestDocument]) -> Result<Classification> {
    let index = ResourceIndex::build(docs)?;
    let mut classification = Classification::default();

    for (i, doc) in docs.iter().enumerate() {
        classification
            .groups
            .entry(doc.kind.clone())
            .or_insert_with(|| ResourceGroup {
                kind: doc.kind.clone(),
                members: Vec::new(),
            })
            .members
            .push(i);
    }

    let mut builder = EdgeBuilder {
        index: &index,
        out: &mut classification,
    };

    for (i, doc) in docs.iter().enumerate() {
        match doc.kind.as_str() {
            "Service" => builder.service_selector(i),
            "StatefulSet" => {
                builder.reference(i, FieldPath::from_keys("spec.serviceName"), "Service", RelationKind::GoverningService);
            }
            "Ingress" => builder.ingress_backends(i),
            "RoleBinding" | "ClusterRoleBinding" => builder.binding(i),
            "HorizontalPodAutoscaler" => builder.scale_target(i),
            _ => {}
        }
        if doc.pod_spec_path().is_some() {
            builder.pod_references(i);
        }
    }

    info!(
        "Classified {} document(s) into {} kind(s); {} relationship(s), {} warning(s)",
        docs.len(),
        classification.groups.len(),
        classification.relationships.len(),
        classification.warnings.len()
    );
    Ok(classification)
}

struct EdgeBuilder<'a, 'b> {
    index: &'a ResourceIndex<'a>,
    out: &'b mut Classification,
}

impl<'a> EdgeBuilder<'a, '_> {
    fn doc(&self, i: usize) -> &'a ManifestDocument {
        &self.index.docs[i]
    }

    fn push(&mut self, from: usize, to: usize, kind: RelationKind, path: FieldPath) {
        debug!(
            "{} -> {} ({}) at {}",
            self.doc(from).id(),
            self.doc(to).id(),
            kind,
            path
        );
        self.out.relationships.push(Relationship { from, to, kind, path });
    }

    fn warn(&mut self, from: usize, message: String) {
        let doc = self.doc(from);
        let warning = Warning::ambiguous(doc.id(), doc.source_path.clone(), message);
        self.out.warnings.push(warning);
    }

    /// Record a name reference at `path` when it holds a string.
    fn reference(&mut self, from: usize, path: FieldPath, target_kind: &str, kind: RelationKind) {
        let Some(name) = self.doc(from).get_str(&path).map(String::from) else {
            return;
        };
        match self.index.find(target_kind, &name) {
            Some(to) => self.push(from, to, kind, path),
            None => self.warn(
                from,
                format!(
                    "{} references {} `{}` at {}, which is not part of the input; left unchanged",
                    self.doc(from).id(),
                    target_kind,
                    name,
                    path
                ),
            ),
        }
    }

    fn service_selector(&mut self, service: usize) {
        let path = FieldPath::from_keys("spec.selector");
        let selector = string_map(path.resolve(&self.doc(service).tree));
        if selector.is_empty() {
            return;
        }

        let matches: Vec<usize> = self
            .index
            .docs
            .iter()
            .enumerate()
            .filter(|(_, d)| SELECTABLE_KINDS.contains(&d.kind.as_str()))
            .filter(|(_, d)| {
                let labels = d.pod_labels();
                selector.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .map(|(i, _)| i)
            .collect();

        let rendered = selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        match matches.as_slice() {
            [only] => self.push(service, *only, RelationKind::ServiceSelector, path),
            [] => {
                self.out.unresolved_selectors.insert(service);
                let message = format!(
                    "selector {} of {} matches no workload; selector left literal",
                    rendered,
                    self.doc(service).id()
                );
                self.warn(service, message);
            }
            many => {
                self.out.unresolved_selectors.insert(service);
                let names = many
                    .iter()
                    .map(|&i| self.doc(i).id().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let message = format!(
                    "selector {} of {} matches {} workloads ({}); selector left literal",
                    rendered,
                    self.doc(service).id(),
                    many.len(),
                    names
                );
                self.warn(service, message);
            }
        }
    }

    fn pod_references(&mut self, from: usize) {
        let doc = self.doc(from);
        let Some(pod_spec) = doc.pod_spec_path() else {
            return;
        };
        let tree = &doc.tree;

        for container in doc.container_paths() {
            let env = container.key("env");
            if let Some(Value::Sequence(entries)) = env.resolve(tree) {
                for (i, entry) in entries.iter().enumerate() {
                    let entry_path = env.index(i);
                    if entry.get("valueFrom").is_some() {
                        let value_from = entry_path.key("valueFrom");
                        self.reference(from, value_from.key("configMapKeyRef").key("name"), "ConfigMap", RelationKind::ConfigMapKeyRef);
                        self.reference(from, value_from.key("secretKeyRef").key("name"), "Secret", RelationKind::SecretKeyRef);
                    } else if let Some(value) = entry.get("value").and_then(Value::as_str) {
                        if let Some((service, _)) = self.index.service_for_dns(value) {
                            self.push(from, service, RelationKind::ServiceDns, entry_path.key("value"));
                        }
                    }
                }
            }

            let env_from = container.key("envFrom");
            if let Some(Value::Sequence(entries)) = env_from.resolve(tree) {
                for i in 0..entries.len() {
                    let entry = env_from.index(i);
                    self.reference(from, entry.key("configMapRef").key("name"), "ConfigMap", RelationKind::ConfigMapEnvFrom);
                    self.reference(from, entry.key("secretRef").key("name"), "Secret", RelationKind::SecretEnvFrom);
                }
            }
        }

        let volumes = pod_spec.key("volumes");
        if let Some(Value::Sequence(entries)) = volumes.resolve(tree) {
            for i in 0..entries.len() {
                let volume = volumes.index(i);
                self.reference(from, volume.key("configMap").key("name"), "ConfigMap", RelationKind::ConfigMapVolume);
                self.reference(from, volume.key("secret").key("secretName"), "Secret", RelationKind::SecretVolume);
                self.reference(
                    from,
                    volume.key("persistentVolumeClaim").key("claimName"),
                    "PersistentVolumeClaim",
                    RelationKind::ClaimVolume,
                );
            }
        }

        let pull_secrets = pod_spec.key("imagePullSecrets");
        if let Some(Value::Sequence(entries)) = pull_secrets.resolve(tree) {
            for i in 0..entries.len() {
                self.reference(from, pull_secrets.index(i).key("name"), "Secret", RelationKind::ImagePullSecret);
            }
        }

        let account = pod_spec.key("serviceAccountName");
        if account.resolve(tree).and_then(Value::as_str) != Some("default") {
            self.reference(from, account, "ServiceAccount", RelationKind::ServiceAccount);
        }
    }

    fn ingress_backends(&mut self, from: usize) {
        let tree = &self.doc(from).tree;
        let default_backend = FieldPath::from_keys("spec.defaultBackend.service.name");
        self.reference(from, default_backend, "Service", RelationKind::IngressBackend);

        let tls = FieldPath::from_keys("spec.tls");
        if let Some(Value::Sequence(entries)) = tls.resolve(tree) {
            for t in 0..entries.len() {
                self.reference(from, tls.index(t).key("secretName"), "Secret", RelationKind::IngressTls);
            }
        }

        let rules = FieldPath::from_keys("spec.rules");
        let Some(Value::Sequence(rule_list)) = rules.resolve(tree) else {
            return;
        };
        for r in 0..rule_list.len() {
            let paths = rules.index(r).key("http").key("paths");
            let Some(Value::Sequence(path_list)) = paths.resolve(tree) else {
                continue;
            };
            for p in 0..path_list.len() {
                let name = paths.index(p).key("backend").key("service").key("name");
                self.reference(from, name, "Service", RelationKind::IngressBackend);
            }
        }
    }

    fn binding(&mut self, from: usize) {
        let tree = &self.doc(from).tree;
        let role_kind = FieldPath::from_keys("roleRef.kind")
            .resolve(tree)
            .and_then(Value::as_str)
            .unwrap_or("Role")
            .to_string();
        self.reference(from, FieldPath::from_keys("roleRef.name"), &role_kind, RelationKind::RoleRef);

        let subjects = FieldPath::from_keys("subjects");
        if let Some(Value::Sequence(list)) = subjects.resolve(tree) {
            for (i, subject) in list.iter().enumerate() {
                if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                    self.reference(from, subjects.index(i).key("name"), "ServiceAccount", RelationKind::BindingSubject);
                }
            }
        }
    }

    fn scale_target(&mut self, from: usize) {
        let kind = FieldPath::from_keys("spec.scaleTargetRef.kind")
            .resolve(&self.doc(from).tree)
            .and_then(Value::as_str)
            .map(String::from);
        if let Some(kind) = kind {
            self.reference(from, FieldPath::from_keys("spec.scaleTargetRef.name"), &kind, RelationKind::ScaleTarget);
        }
    }
}

/// Text following the service name in a DNS-style value, if `value` points at
/// a Service named `service` living in `namespace`.
///
/// A bare `<service>.<label>` is only a namespace reference when the label is
/// the Service's own namespace; `app.py` next to a Service `app` is a file
/// name.
pub fn dns_suffix<'v>(value: &'v str, service: &str, namespace: Option<&str>) -> Option<&'v str> {
    let rest = value.strip_prefix(service)?;
    let caps = DNS_REST.captures(rest)?;
    match (caps.get(1), caps.get(2)) {
        (Some(label), None) if Some(label.as_str()) != namespace => None,
        _ => Some(rest),
    }
}
