//! Value extraction.
//!
//! Walks each document with a fixed policy and lifts the fields a chart user
//! is expected to tune (images, replicas, resources, storage, ports, env) into
//! the values tree. Secret material becomes required values with an empty
//! default. Each lifted field gets a placeholder at its manifest location.

use std::collections::{BTreeMap, HashSet};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info, warn};
use serde_yaml::Value;

use crate::config::types::ExtractionPolicy;
use crate::synth::classify::Classification;
use crate::synth::document::{FieldPath, ManifestDocument};
use crate::synth::types::{
    FieldEncoding, Placeholder, RelationKind, Segment, TemplateField, ValuesPath,
};
use crate::synth::values::{ValuesTree, camel_key};

/// Everything the extractor produced.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub fields: Vec<TemplateField>,
    pub placeholders: Vec<Placeholder>,
    pub values: ValuesTree,
}

impl Extraction {
    pub fn required_fields(&self) -> impl Iterator<Item = &TemplateField> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// Container image reference split for templating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef<'a> {
    Tagged { repository: &'a str, tag: &'a str },
    Digest { repository: &'a str, digest: &'a str },
    Bare { repository: &'a str },
}

/// Split `registry:5000/team/app:1.2` into repository and tag; `@` starts a digest.
pub fn split_image(image: &str) -> ImageRef<'_> {
    if let Some((repository, digest)) = image.split_once('@') {
        if !repository.is_empty() && !digest.is_empty() {
            return ImageRef::Digest { repository, digest };
        }
        return ImageRef::Bare { repository: image };
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(offset) => {
            let colon = name_start + offset;
            let (repository, tag) = (&image[..colon], &image[colon + 1..]);
            if repository.is_empty() || tag.is_empty() {
                ImageRef::Bare { repository: image }
            } else {
                ImageRef::Tagged { repository, tag }
            }
        }
        None => ImageRef::Bare { repository: image },
    }
}

/// Plain text behind a Secret `data` value, when the value is canonical
/// base64 of UTF-8 text.
pub fn decode_canonical_base64(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    if STANDARD.encode(text.as_bytes()) == encoded {
        Some(text)
    } else {
        None
    }
}

/// What a field must be set to for a render to reproduce the input.
///
/// Required fields carry an empty default; verification supplies this value
/// in memory instead.
pub fn verification_value(field: &TemplateField) -> Value {
    match (field.encoding, field.original_value.as_str()) {
        (FieldEncoding::Base64, Some(encoded)) => decode_canonical_base64(encoded)
            .map(Value::String)
            .unwrap_or_else(|| field.original_value.clone()),
        _ => field.original_value.clone(),
    }
}

/// Where a Service's numeric `targetPort` lands on its workload.
#[derive(Debug, Clone)]
struct PortTarget {
    service: usize,
    service_port: FieldPath,
}

/// Run extraction over the loaded documents.
pub fn extract(
    docs: &[ManifestDocument],
    classification: &Classification,
    policy: &ExtractionPolicy,
) -> Extraction {
    let mut extractor = Extractor {
        docs,
        policy,
        fields: Vec::new(),
        placeholders: Vec::new(),
        values: ValuesTree::new(),
        dns_paths: classification
            .relationships
            .iter()
            .filter(|r| r.kind == RelationKind::ServiceDns)
            .map(|r| (r.from, r.path.clone()))
            .collect(),
        port_targets: if policy.ports {
            port_targets(docs, classification)
        } else {
            BTreeMap::new()
        },
    };

    for (i, doc) in docs.iter().enumerate() {
        let resource = ValuesPath::new(vec![camel_key(&doc.name)]);
        match doc.kind.as_str() {
            "Secret" => extractor.secret(i, &resource),
            "ConfigMap" if policy.config_map_data => extractor.config_map(i, &resource),
            "PersistentVolumeClaim" if policy.storage => {
                let path = FieldPath::from_keys("spec.resources.requests.storage");
                extractor.scalar(i, path, resource.child("storage"));
            }
            _ => {}
        }
        if doc.pod_spec_path().is_some() {
            extractor.workload(i, &resource);
        }
    }

    info!(
        "Extracted {} value(s), {} required",
        extractor.fields.len(),
        extractor.fields.iter().filter(|f| f.required).count()
    );

    Extraction {
        fields: extractor.fields,
        placeholders: extractor.placeholders,
        values: extractor.values,
    }
}

/// Numeric Service target ports keyed by `(workload, container path, port index)`.
fn port_targets(
    docs: &[ManifestDocument],
    classification: &Classification,
) -> BTreeMap<(usize, FieldPath, usize), Vec<PortTarget>> {
    let mut targets: BTreeMap<(usize, FieldPath, usize), Vec<PortTarget>> = BTreeMap::new();

    for relationship in &classification.relationships {
        if relationship.kind != RelationKind::ServiceSelector {
            continue;
        }
        let (service, workload) = (relationship.from, relationship.to);
        let ports = FieldPath::from_keys("spec.ports");
        let Some(Value::Sequence(service_ports)) = ports.resolve(&docs[service].tree) else {
            continue;
        };

        for (j, service_port) in service_ports.iter().enumerate() {
            let Some(target) = service_port.get("targetPort").and_then(Value::as_u64) else {
                continue;
            };
            if let Some((container, index)) = find_container_port(&docs[workload], target) {
                targets
                    .entry((workload, container, index))
                    .or_default()
                    .push(PortTarget {
                        service,
                        service_port: ports.index(j).key("targetPort"),
                    });
            }
        }
    }
    targets
}

fn find_container_port(doc: &ManifestDocument, port: u64) -> Option<(FieldPath, usize)> {
    for container in doc.container_paths() {
        if let Some(Value::Sequence(ports)) = container.key("ports").resolve(&doc.tree) {
            for (index, p) in ports.iter().enumerate() {
                if p.get("containerPort").and_then(Value::as_u64) == Some(port) {
                    return Some((container, index));
                }
            }
        }
    }
    None
}

struct Extractor<'a> {
    docs: &'a [ManifestDocument],
    policy: &'a ExtractionPolicy,
    fields: Vec<TemplateField>,
    placeholders: Vec<Placeholder>,
    values: ValuesTree,
    dns_paths: HashSet<(usize, FieldPath)>,
    port_targets: BTreeMap<(usize, FieldPath, usize), Vec<PortTarget>>,
}

impl<'a> Extractor<'a> {
    /// Add a field and return its index.
    fn add_field(&mut self, field: TemplateField) -> usize {
        debug!("{} <- {}[{}]", field.values_path, self.docs[field.doc].id(), field.path);
        self.fields.push(field);
        self.fields.len() - 1
    }

    fn add_placeholder(&mut self, doc: usize, path: FieldPath, segments: Vec<Segment>) {
        self.placeholders.push(Placeholder { doc, path, segments });
    }

    /// Lift a scalar at `path` into a plain field with its own placeholder.
    fn scalar(&mut self, doc: usize, path: FieldPath, values_path: ValuesPath) -> Option<usize> {
        let value = path.resolve(&self.docs[doc].tree)?.clone();
        if !is_scalar(&value) {
            return None;
        }
        let used = self.values.insert_unique(values_path, value.clone());
        let index = self.add_field(TemplateField::literal(doc, path.clone(), used, value));
        self.add_placeholder(doc, path, vec![Segment::Field(index)]);
        Some(index)
    }

    fn workload(&mut self, doc: usize, resource: &ValuesPath) {
        let docs: &'a [ManifestDocument] = self.docs;
        let document = &docs[doc];

        if self.policy.replicas
            && matches!(document.kind.as_str(), "Deployment" | "StatefulSet" | "ReplicaSet")
        {
            self.scalar(doc, FieldPath::from_keys("spec.replicas"), resource.child("replicaCount"));
        }

        for (i, container) in document.container_paths().into_iter().enumerate() {
            let name = container
                .key("name")
                .resolve(&document.tree)
                .and_then(Value::as_str)
                .map(camel_key)
                .unwrap_or_else(|| format!("container{}", i));
            let prefix = resource.child(name);

            if self.policy.image {
                self.image(doc, container.key("image"), &prefix);
            }
            if self.policy.resources {
                self.resources(doc, &container, &prefix);
            }
            if self.policy.ports {
                self.ports(doc, &container, &prefix);
            }
            if self.policy.env {
                self.env(doc, &container, &prefix);
            }
        }

        if self.policy.storage && document.kind == "StatefulSet" {
            let templates = FieldPath::from_keys("spec.volumeClaimTemplates");
            if let Some(Value::Sequence(claims)) = templates.resolve(&document.tree) {
                for (i, claim) in claims.iter().enumerate() {
                    let key = claim
                        .get("metadata")
                        .and_then(|m| m.get("name"))
                        .and_then(Value::as_str)
                        .map(camel_key)
                        .unwrap_or_else(|| format!("claim{}", i));
                    let path = templates.index(i).join(&FieldPath::from_keys("spec.resources.requests.storage"));
                    self.scalar(doc, path, resource.child("volumeClaims").child(key).child("storage"));
                }
            }
        }
    }

    fn image(&mut self, doc: usize, path: FieldPath, prefix: &ValuesPath) {
        let docs: &'a [ManifestDocument] = self.docs;
        let Some(image) = path.resolve(&docs[doc].tree).and_then(Value::as_str) else {
            return;
        };
        if image.is_empty() {
            return;
        }
        let prefix = prefix.child("image");
        let (repository, second) = match split_image(image) {
            ImageRef::Tagged { repository, tag } => (repository, Some(("tag", ":", tag))),
            ImageRef::Digest { repository, digest } => (repository, Some(("digest", "@", digest))),
            ImageRef::Bare { repository } => (repository, None),
        };

        let repo_value = Value::String(repository.to_string());
        let repo_path = self.values.insert_unique(prefix.child("repository"), repo_value.clone());
        let repo_field = self.add_field(TemplateField::literal(doc, path.clone(), repo_path, repo_value));

        let mut segments = vec![Segment::Field(repo_field)];
        if let Some((key, separator, text)) = second {
            let value = Value::String(text.to_string());
            let values_path = self.values.insert_unique(prefix.child(key), value.clone());
            let field = self.add_field(TemplateField::literal(doc, path.clone(), values_path, value));
            segments.push(Segment::Literal(separator.to_string()));
            segments.push(Segment::Field(field));
        }
        self.add_placeholder(doc, path, segments);
    }

    fn resources(&mut self, doc: usize, container: &FieldPath, prefix: &ValuesPath) {
        for section in ["limits", "requests"] {
            let section_path = container.key("resources").key(section);
            let Some(Value::Mapping(entries)) = section_path.resolve(&self.docs[doc].tree) else {
                continue;
            };
            let keys: Vec<String> = entries.keys().filter_map(|k| k.as_str().map(String::from)).collect();
            for key in keys {
                let values_path = prefix.child("resources").child(section).child(camel_key(&key));
                self.scalar(doc, section_path.key(key), values_path);
            }
        }
    }

    fn ports(&mut self, doc: usize, container: &FieldPath, prefix: &ValuesPath) {
        let ports_path = container.key("ports");
        let Some(Value::Sequence(ports)) = ports_path.resolve(&self.docs[doc].tree) else {
            return;
        };
        let ports = ports.clone();
        for (index, port) in ports.iter().enumerate() {
            let Some(targets) = self.port_targets.get(&(doc, container.clone(), index)).cloned() else {
                continue;
            };
            let Some(number) = port.get("containerPort").and_then(Value::as_u64) else {
                continue;
            };
            let key = port
                .get("name")
                .and_then(Value::as_str)
                .map(camel_key)
                .unwrap_or_else(|| format!("port{}", number));
            let container_port = ports_path.index(index).key("containerPort");
            let Some(field) = self.scalar(doc, container_port, prefix.child("ports").child(key)) else {
                continue;
            };
            for target in targets {
                self.add_placeholder(target.service, target.service_port, vec![Segment::Field(field)]);
            }
        }
    }

    fn env(&mut self, doc: usize, container: &FieldPath, prefix: &ValuesPath) {
        let env_path = container.key("env");
        let Some(Value::Sequence(entries)) = env_path.resolve(&self.docs[doc].tree) else {
            return;
        };
        let entries = entries.clone();
        for (i, entry) in entries.iter().enumerate() {
            if entry.get("valueFrom").is_some() {
                continue;
            }
            let value_path = env_path.index(i).key("value");
            if self.dns_paths.contains(&(doc, value_path.clone())) {
                continue;
            }
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            self.scalar(doc, value_path, prefix.child("env").child(camel_key(name)));
        }
    }

    fn secret(&mut self, doc: usize, resource: &ValuesPath) {
        for section in ["data", "stringData"] {
            let section_path = FieldPath::from_keys(section);
            let Some(Value::Mapping(entries)) = section_path.resolve(&self.docs[doc].tree) else {
                continue;
            };
            let entries: Vec<(String, Value)> = entries
                .iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.clone())))
                .collect();

            for (key, value) in entries {
                let Some(text) = value.as_str() else {
                    warn!(
                        "{}: {}.{} is not a string and stays literal",
                        self.docs[doc].id(),
                        section,
                        key
                    );
                    continue;
                };
                let encoding = if section == "data" && decode_canonical_base64(text).is_some() {
                    FieldEncoding::Base64
                } else {
                    FieldEncoding::Plain
                };
                let path = section_path.key(key.as_str());
                let used = self
                    .values
                    .insert_unique(resource.child(camel_key(&key)), Value::String(String::new()));
                let field = self.add_field(TemplateField::required(doc, path.clone(), used, value.clone(), encoding));
                self.add_placeholder(doc, path, vec![Segment::Field(field)]);
            }
        }
    }

    fn config_map(&mut self, doc: usize, resource: &ValuesPath) {
        let data = FieldPath::from_keys("data");
        let Some(Value::Mapping(entries)) = data.resolve(&self.docs[doc].tree) else {
            return;
        };
        let keys: Vec<String> = entries.keys().filter_map(|k| k.as_str().map(String::from)).collect();
        for key in keys {
            let values_path = resource.child(camel_key(&key));
            self.scalar(doc, data.key(key), values_path);
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::classify::classify;
    use crate::synth::loader::parse_documents;
    use std::path::Path;

    const FLASK: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: app
spec:
  replicas: 2
  selector:
    matchLabels:
      app: app
  template:
    metadata:
      labels:
        app: app
    spec:
      containers:
        - name: flask
          image: registry.local:5000/team/app:1.0
          ports:
            - containerPort: 5000
          env:
            - name: DATABASE_URL
              value: mysql://db/app
            - name: MYSQL_HOST
              value: mysql
          resources:
            limits:
              cpu: 500m
---
apiVersion: v1
kind: Service
metadata:
  name: app
spec:
  selector:
    app: app
  ports:
    - port: 80
      targetPort: 5000
---
apiVersion: v1
kind: Service
metadata:
  name: mysql
spec:
  clusterIP: None
---
apiVersion: v1
kind: Secret
metadata:
  name: mysql-secret
data:
  password: cGFzc3dvcmQ=
  blob: //79/A==
stringData:
  user: admin
"#;

    fn run(policy: &ExtractionPolicy) -> (Vec<ManifestDocument>, Extraction) {
        let docs = parse_documents(FLASK, Path::new("flask.yaml")).unwrap();
        let classification = classify(&docs).unwrap();
        let extraction = extract(&docs, &classification, policy);
        (docs, extraction)
    }

    fn paths(extraction: &Extraction) -> Vec<String> {
        extraction.fields.iter().map(|f| f.values_path.to_string()).collect()
    }

    #[test]
    fn test_split_image() {
        assert_eq!(
            split_image("nginx:1.25"),
            ImageRef::Tagged { repository: "nginx", tag: "1.25" }
        );
        assert_eq!(
            split_image("registry.local:5000/team/app"),
            ImageRef::Bare { repository: "registry.local:5000/team/app" }
        );
        assert_eq!(
            split_image("app@sha256:abc"),
            ImageRef::Digest { repository: "app", digest: "sha256:abc" }
        );
        assert_eq!(split_image("nginx:"), ImageRef::Bare { repository: "nginx:" });
    }

    #[test]
    fn test_decode_canonical_base64() {
        assert_eq!(decode_canonical_base64("cGFzc3dvcmQ="), Some("password".to_string()));
        assert_eq!(decode_canonical_base64("//79/A=="), None);
        assert_eq!(decode_canonical_base64("not base64!"), None);
    }

    #[test]
    fn test_workload_fields() {
        let (_, extraction) = run(&ExtractionPolicy::default());
        let p = paths(&extraction);
        for expected in [
            "app.replicaCount",
            "app.flask.image.repository",
            "app.flask.image.tag",
            "app.flask.resources.limits.cpu",
            "app.flask.ports.port5000",
            "app.flask.env.databaseUrl",
        ] {
            assert!(p.contains(&expected.to_string()), "missing {}", expected);
        }
        // service DNS value is a name reference, not a value
        assert!(!p.contains(&"app.flask.env.mysqlHost".to_string()));
        assert_eq!(
            extraction.values.get("app.flask.image.repository").and_then(Value::as_str),
            Some("registry.local:5000/team/app")
        );
    }

    #[test]
    fn test_port_field_is_shared_with_service() {
        let (docs, extraction) = run(&ExtractionPolicy::default());
        let port_field = extraction
            .fields
            .iter()
            .position(|f| f.values_path.to_string() == "app.flask.ports.port5000")
            .unwrap();
        let users: Vec<_> = extraction
            .placeholders
            .iter()
            .filter(|p| p.segments == vec![Segment::Field(port_field)])
            .map(|p| docs[p.doc].kind.as_str())
            .collect();
        assert_eq!(users, vec!["Deployment", "Service"]);
    }

    #[test]
    fn test_secret_values_are_required_and_empty() {
        let (_, extraction) = run(&ExtractionPolicy::default());
        let required: Vec<_> = extraction.required_fields().collect();
        assert_eq!(required.len(), 3);
        for field in &required {
            assert_eq!(
                extraction.values.get(&field.values_path.to_string()),
                Some(&Value::String(String::new()))
            );
        }
        let password = required
            .iter()
            .find(|f| f.values_path.to_string() == "mysqlSecret.password")
            .unwrap();
        assert_eq!(password.encoding, FieldEncoding::Base64);
        assert_eq!(verification_value(password), Value::String("password".into()));

        let blob = required
            .iter()
            .find(|f| f.values_path.to_string() == "mysqlSecret.blob")
            .unwrap();
        assert_eq!(blob.encoding, FieldEncoding::Plain);
    }

    #[test]
    fn test_policy_toggles() {
        let policy = ExtractionPolicy {
            image: false,
            env: false,
            ..ExtractionPolicy::default()
        };
        let (_, extraction) = run(&policy);
        let p = paths(&extraction);
        assert!(!p.iter().any(|x| x.contains("image")));
        assert!(!p.iter().any(|x| x.contains(".env.")));
        assert!(p.contains(&"app.replicaCount".to_string()));
    }

    #[test]
    fn test_config_map_data_is_opt_in() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app-config\ndata:\n  LOG_LEVEL: info\n";
        let docs = parse_documents(yaml, Path::new("cm.yaml")).unwrap();
        let classification = classify(&docs).unwrap();

        let off = extract(&docs, &classification, &ExtractionPolicy::default());
        assert!(off.fields.is_empty());

        let policy = ExtractionPolicy {
            config_map_data: true,
            ..ExtractionPolicy::default()
        };
        let on = extract(&docs, &classification, &policy);
        assert_eq!(paths(&on), vec!["appConfig.logLevel".to_string()]);
        assert!(!on.fields[0].required);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let (_, first) = run(&ExtractionPolicy::default());
        let (_, second) = run(&ExtractionPolicy::default());
        assert_eq!(paths(&first), paths(&second));
        assert_eq!(first.placeholders, second.placeholders);
    }
}
