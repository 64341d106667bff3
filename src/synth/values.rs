//! The values tree written to `values.yaml`.

use serde_yaml::{Mapping, Value};

use crate::synth::types::ValuesPath;
use crate::synth::yaml::{self, Quoting};

/// Top-level keys consumed by the generated helpers.
pub const NAME_OVERRIDE: &str = "nameOverride";
pub const FULLNAME_OVERRIDE: &str = "fullnameOverride";

/// Ordered values mapping, grouped by resource.
#[derive(Debug, Clone)]
pub struct ValuesTree {
    root: Value,
}

impl Default for ValuesTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuesTree {
    /// A tree holding only the name overrides.
    pub fn new() -> Self {
        let mut root = Mapping::new();
        root.insert(NAME_OVERRIDE.into(), Value::String(String::new()));
        root.insert(FULLNAME_OVERRIDE.into(), Value::String(String::new()));
        Self {
            root: Value::Mapping(root),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Get a value by dotted path (e.g., "web.image.tag").
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for part in path.split('.') {
            current = current.as_mapping()?.get(part)?;
        }
        Some(current)
    }

    /// Insert a leaf, renaming the first clashing segment with a numeric
    /// suffix until the path is free. Returns the path actually used.
    pub fn insert_unique(&mut self, path: ValuesPath, value: Value) -> ValuesPath {
        let mut segments = path.segments().to_vec();
        loop {
            match first_conflict(&self.root, &segments) {
                None => break,
                Some(k) => {
                    let base = segments[k].clone();
                    let mut n = 2;
                    loop {
                        let mut candidate = segments.clone();
                        candidate[k] = format!("{}{}", base, n);
                        if first_conflict(&self.root, &candidate[..=k]).is_none() {
                            segments = candidate;
                            break;
                        }
                        n += 1;
                    }
                }
            }
        }

        insert_at(&mut self.root, &segments, value);

        ValuesPath::new(segments)
    }

    /// A copy of the tree with some leaves replaced. Used for verification
    /// renders; the overrides never reach `values.yaml`.
    pub fn with_overrides<'a>(
        &self,
        overrides: impl IntoIterator<Item = (&'a ValuesPath, Value)>,
    ) -> Value {
        let mut root = self.root.clone();
        for (path, value) in overrides {
            if let Some(slot) = leaf_mut(&mut root, path.segments()) {
                *slot = value;
            }
        }
        root
    }

    /// Render as `values.yaml`. Every string is quoted so Helm's YAML 1.1
    /// loader cannot turn `on` or `0755` into another type.
    pub fn to_yaml(&self, chart_name: &str) -> String {
        let body = yaml::to_string(&self.root, Quoting::Always);
        format!(
            "# Default values for {}.\n# Empty entries are required and must be supplied at install time.\n{}",
            chart_name, body
        )
    }
}

fn insert_at(node: &mut Value, segments: &[String], value: Value) {
    let Some(map) = node.as_mapping_mut() else {
        return;
    };
    match segments {
        [] => {}
        [last] => {
            map.insert(Value::String(last.clone()), value);
        }
        [first, rest @ ..] => {
            let child = map
                .entry(Value::String(first.clone()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            insert_at(child, rest, value);
        }
    }
}

fn leaf_mut<'v>(root: &'v mut Value, segments: &[String]) -> Option<&'v mut Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_mapping_mut()?.get_mut(segment.as_str())?;
    }
    Some(current)
}

/// Index of the first segment that cannot be used as-is: an intermediate
/// segment holding a scalar, or a final segment that already exists.
fn first_conflict(root: &Value, segments: &[String]) -> Option<usize> {
    let mut current = root;
    for (k, segment) in segments.iter().enumerate() {
        let map = current.as_mapping()?;
        let next = map.get(segment.as_str())?;
        if k == segments.len() - 1 || !next.is_mapping() {
            return Some(k);
        }
        current = next;
    }
    None
}

/// camelCase identifier for a resource, container or env name.
///
/// Splits on anything that is not an ASCII letter or digit; all-caps words
/// (`DATABASE_URL`) are lowered first. Keys never start with a digit.
pub fn camel_key(name: &str) -> String {
    let mut key = String::new();
    for word in name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = if word.chars().any(|c| c.is_ascii_lowercase()) {
            word.to_string()
        } else {
            word.to_ascii_lowercase()
        };
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if key.is_empty() {
                key.push(first.to_ascii_lowercase());
            } else {
                key.push(first.to_ascii_uppercase());
            }
            key.push_str(chars.as_str());
        }
    }
    if key.is_empty() {
        return "value".to_string();
    }
    if key.starts_with(|c: char| c.is_ascii_digit()) {
        key.insert(0, '_');
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(dotted: &str) -> ValuesPath {
        ValuesPath::new(dotted.split('.').map(String::from).collect())
    }

    #[test]
    fn test_new_tree_has_overrides() {
        let tree = ValuesTree::new();
        assert_eq!(tree.get("nameOverride"), Some(&Value::String(String::new())));
        assert_eq!(tree.get("fullnameOverride"), Some(&Value::String(String::new())));
    }

    #[test]
    fn test_insert_builds_nested_mappings() {
        let mut tree = ValuesTree::new();
        let used = tree.insert_unique(path("web.app.image.tag"), "1.0".into());
        assert_eq!(used.to_string(), "web.app.image.tag");
        assert_eq!(tree.get("web.app.image.tag").and_then(Value::as_str), Some("1.0"));
    }

    #[test]
    fn test_insert_clash_appends_suffix() {
        let mut tree = ValuesTree::new();
        tree.insert_unique(path("web.replicaCount"), 2.into());
        let used = tree.insert_unique(path("web.replicaCount"), 3.into());
        assert_eq!(used.to_string(), "web.replicaCount2");
        let used = tree.insert_unique(path("web.replicaCount"), 4.into());
        assert_eq!(used.to_string(), "web.replicaCount3");
    }

    #[test]
    fn test_insert_clash_on_scalar_parent() {
        let mut tree = ValuesTree::new();
        tree.insert_unique(path("web.storage"), "1Gi".into());
        let used = tree.insert_unique(path("web.storage.size"), "2Gi".into());
        assert_eq!(used.to_string(), "web.storage2.size");
        assert_eq!(tree.get("web.storage").and_then(Value::as_str), Some("1Gi"));
    }

    #[test]
    fn test_overrides_do_not_touch_tree() {
        let mut tree = ValuesTree::new();
        let p = tree.insert_unique(path("db.password"), "".into());
        let rendered = tree.with_overrides([(&p, Value::String("s3cret".into()))]);
        assert_eq!(rendered["db"]["password"].as_str(), Some("s3cret"));
        assert_eq!(tree.get("db.password").and_then(Value::as_str), Some(""));
    }

    #[test]
    fn test_camel_key() {
        assert_eq!(camel_key("mysql-secret"), "mysqlSecret");
        assert_eq!(camel_key("DATABASE_URL"), "databaseUrl");
        assert_eq!(camel_key("web"), "web");
        assert_eq!(camel_key("myApp"), "myApp");
        assert_eq!(camel_key("flask.app-v2"), "flaskAppV2");
        assert_eq!(camel_key("5000"), "_5000");
        assert_eq!(camel_key("--"), "value");
    }
}
