//! Manifest documents and path addressing inside their trees.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde_yaml::Value;

use crate::synth::types::ResourceId;

/// Kinds that run pods and carry a pod template.
pub const WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Job",
    "CronJob",
    "Pod",
];

/// Kinds a Service selector can match.
pub const SELECTABLE_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Pod"];

/// One step into a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a node inside a document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The empty path, addressing the document root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from dotted keys (`spec.template.spec`).
    pub fn from_keys(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|k| !k.is_empty())
                .map(|k| PathSegment::Key(k.to_string()))
                .collect(),
        )
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Append every segment of `other`.
    pub fn join(&self, other: &FieldPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn resolve<'a>(&self, tree: &'a Value) -> Option<&'a Value> {
        let mut current = tree;
        for segment in &self.0 {
            current = match segment {
                PathSegment::Key(k) => current.as_mapping()?.get(k.as_str())?,
                PathSegment::Index(i) => current.as_sequence()?.get(*i)?,
            };
        }
        Some(current)
    }

    pub fn resolve_mut<'a>(&self, tree: &'a mut Value) -> Option<&'a mut Value> {
        let mut current = tree;
        for segment in &self.0 {
            current = match segment {
                PathSegment::Key(k) => current.as_mapping_mut()?.get_mut(k.as_str())?,
                PathSegment::Index(i) => current.as_sequence_mut()?.get_mut(*i)?,
            };
        }
        Some(current)
    }

    /// Replace the node at this path. Returns false when the path does not resolve.
    pub fn set(&self, tree: &mut Value, value: Value) -> bool {
        match self.resolve_mut(tree) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{}", k)?,
                PathSegment::Key(k) => write!(f, ".{}", k)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// One YAML document from the input directory.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub source_path: PathBuf,
    /// First line of the document in its file (1-based).
    pub line: usize,
    /// Position of the document inside its file.
    pub doc_index: usize,
    /// The full document.
    pub tree: Value,
}

impl ManifestDocument {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind.clone(), self.name.clone())
    }

    /// Path of the pod spec for kinds that run pods.
    pub fn pod_spec_path(&self) -> Option<FieldPath> {
        match self.kind.as_str() {
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" => {
                Some(FieldPath::from_keys("spec.template.spec"))
            }
            "CronJob" => Some(FieldPath::from_keys("spec.jobTemplate.spec.template.spec")),
            "Pod" => Some(FieldPath::from_keys("spec")),
            _ => None,
        }
    }

    /// Path of the labels a Service selector is matched against.
    pub fn pod_labels_path(&self) -> Option<FieldPath> {
        match self.kind.as_str() {
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" => {
                Some(FieldPath::from_keys("spec.template.metadata.labels"))
            }
            "CronJob" => Some(FieldPath::from_keys(
                "spec.jobTemplate.spec.template.metadata.labels",
            )),
            "Pod" => Some(FieldPath::from_keys("metadata.labels")),
            _ => None,
        }
    }

    pub fn pod_labels(&self) -> BTreeMap<String, String> {
        self.pod_labels_path()
            .map(|p| string_map(p.resolve(&self.tree)))
            .unwrap_or_default()
    }

    /// Paths of every container (init containers included) in the pod spec.
    pub fn container_paths(&self) -> Vec<FieldPath> {
        let Some(pod_spec) = self.pod_spec_path() else {
            return Vec::new();
        };
        let mut paths = Vec::new();
        for key in ["initContainers", "containers"] {
            let list = pod_spec.key(key);
            if let Some(Value::Sequence(items)) = list.resolve(&self.tree) {
                for i in 0..items.len() {
                    paths.push(list.index(i));
                }
            }
        }
        paths
    }

    /// Read a string at `path`.
    pub fn get_str(&self, path: &FieldPath) -> Option<&str> {
        path.resolve(&self.tree)?.as_str()
    }
}

/// Scalar mapping entries rendered as strings.
pub fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(Value::Mapping(m)) = value {
        for (k, v) in m {
            if let (Some(k), Some(v)) = (k.as_str(), scalar_string(v)) {
                map.insert(k.to_string(), v);
            }
        }
    }
    map
}

/// String form of a scalar YAML value.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> ManifestDocument {
        let tree: Value = serde_yaml::from_str(yaml).unwrap();
        ManifestDocument {
            api_version: tree.get("apiVersion").and_then(|v| v.as_str()).map(String::from),
            kind: tree["kind"].as_str().unwrap().to_string(),
            name: tree["metadata"]["name"].as_str().unwrap().to_string(),
            namespace: None,
            source_path: PathBuf::from("test.yaml"),
            line: 1,
            doc_index: 0,
            tree,
        }
    }

    #[test]
    fn test_field_path_display_and_resolve() {
        let d = doc(
            "kind: Deployment\nmetadata:\n  name: web\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          image: app:1.0\n",
        );
        let path = d.pod_spec_path().unwrap().key("containers").index(0).key("image");
        assert_eq!(path.to_string(), "spec.template.spec.containers[0].image");
        assert_eq!(d.get_str(&path), Some("app:1.0"));
        assert!(FieldPath::from_keys("spec.missing").resolve(&d.tree).is_none());
    }

    #[test]
    fn test_set_replaces_node() {
        let mut d = doc("kind: Service\nmetadata:\n  name: web\n");
        assert!(FieldPath::from_keys("metadata.name").set(&mut d.tree, "api".into()));
        assert_eq!(d.tree["metadata"]["name"].as_str(), Some("api"));
        assert!(!FieldPath::from_keys("spec.ports").set(&mut d.tree, Value::Null));
    }

    #[test]
    fn test_cronjob_paths() {
        let d = doc(
            "kind: CronJob\nmetadata:\n  name: nightly\nspec:\n  jobTemplate:\n    spec:\n      template:\n        metadata:\n          labels:\n            app: nightly\n        spec:\n          containers:\n            - name: job\n",
        );
        assert_eq!(d.container_paths().len(), 1);
        assert_eq!(d.pod_labels().get("app").map(String::as_str), Some("nightly"));
    }

    #[test]
    fn test_container_paths_include_init_containers() {
        let d = doc(
            "kind: Pod\nmetadata:\n  name: p\nspec:\n  initContainers:\n    - name: init\n  containers:\n    - name: main\n",
        );
        let paths: Vec<String> = d.container_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["spec.initContainers[0]", "spec.containers[0]"]);
    }
}
