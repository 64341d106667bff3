//! Core types shared by the synthesis stages.
//!
//! - `Stage` - pipeline states of one synthesis run
//! - `ResourceId` - a resource's kind and name
//! - `Relationship` - a derived edge between two documents
//! - `TemplateField` / `Placeholder` - what gets lifted into values and where
//! - `Warning` - non-fatal findings reported at the end of a run

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use serde_yaml::Value;

use crate::synth::document::FieldPath;

/// Pipeline stage of a synthesis run.
///
/// Transitions are linear: `Loading → Classifying → Extracting → Normalizing →
/// Emitting → Done`. Any stage may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Loading,
    Classifying,
    Extracting,
    Normalizing,
    Emitting,
    Done,
    Failed,
}

impl Stage {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Classifying => "classifying",
            Self::Extracting => "extracting",
            Self::Normalizing => "normalizing",
            Self::Emitting => "emitting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// The stage that follows this one on success.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Loading => Some(Self::Classifying),
            Self::Classifying => Some(Self::Extracting),
            Self::Extracting => Some(Self::Normalizing),
            Self::Normalizing => Some(Self::Emitting),
            Self::Emitting => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Check whether `next` is a legal transition from this stage.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        next == Stage::Failed && !self.is_terminal() || self.next() == Some(next)
    }

    /// Done and Failed accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind and name of a Kubernetes resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Kind of a derived relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    /// Service label selector matches a workload's pod labels.
    ServiceSelector,
    /// `env[].valueFrom.configMapKeyRef`
    ConfigMapKeyRef,
    /// `env[].valueFrom.secretKeyRef`
    SecretKeyRef,
    /// `envFrom[].configMapRef`
    ConfigMapEnvFrom,
    /// `envFrom[].secretRef`
    SecretEnvFrom,
    /// `volumes[].configMap`
    ConfigMapVolume,
    /// `volumes[].secret`
    SecretVolume,
    /// `volumes[].persistentVolumeClaim`
    ClaimVolume,
    /// `imagePullSecrets[]`
    ImagePullSecret,
    /// `serviceAccountName`
    ServiceAccount,
    /// StatefulSet `spec.serviceName`
    GoverningService,
    /// An env literal holding a Service DNS name.
    ServiceDns,
    /// Ingress backend service.
    IngressBackend,
    /// Ingress `tls[].secretName`.
    IngressTls,
    /// RoleBinding `roleRef`.
    RoleRef,
    /// RoleBinding `subjects[]` service account.
    BindingSubject,
    /// HorizontalPodAutoscaler `scaleTargetRef`.
    ScaleTarget,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceSelector => "service-selector",
            Self::ConfigMapKeyRef => "config-map-key-ref",
            Self::SecretKeyRef => "secret-key-ref",
            Self::ConfigMapEnvFrom => "config-map-env-from",
            Self::SecretEnvFrom => "secret-env-from",
            Self::ConfigMapVolume => "config-map-volume",
            Self::SecretVolume => "secret-volume",
            Self::ClaimVolume => "claim-volume",
            Self::ImagePullSecret => "image-pull-secret",
            Self::ServiceAccount => "service-account",
            Self::GoverningService => "governing-service",
            Self::ServiceDns => "service-dns",
            Self::IngressBackend => "ingress-backend",
            Self::IngressTls => "ingress-tls",
            Self::RoleRef => "role-ref",
            Self::BindingSubject => "binding-subject",
            Self::ScaleTarget => "scale-target",
        }
    }

    /// Whether the edge's path holds the target's name as a scalar.
    ///
    /// Selector edges point at a label mapping instead; their rewrite goes
    /// through the label values.
    pub fn is_name_reference(&self) -> bool {
        !matches!(self, Self::ServiceSelector)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed edge between two documents, identified by their index in the
/// loaded document list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    pub from: usize,
    pub to: usize,
    pub kind: RelationKind,
    /// Location of the referencing field inside `from`.
    pub path: FieldPath,
}

/// Dotted location inside the values tree (e.g. `app.image.tag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct ValuesPath(Vec<String>);

impl ValuesPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// A new path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// `.Values.<path>` reference usable inside template actions.
    pub fn reference(&self) -> String {
        format!(".Values.{}", self)
    }
}

impl fmt::Display for ValuesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<ValuesPath> for String {
    fn from(path: ValuesPath) -> Self {
        path.to_string()
    }
}

/// How a field's value travels between the values file and the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// Rendered as-is.
    Plain,
    /// The consumer supplies plain text; the template base64-encodes it.
    Base64,
}

/// A manifest field lifted into the values tree.
#[derive(Debug, Clone)]
pub struct TemplateField {
    /// Index of the document owning the field.
    pub doc: usize,
    pub path: FieldPath,
    pub values_path: ValuesPath,
    /// The literal found in the input. For required fields this never leaves
    /// memory.
    pub original_value: Value,
    pub placeholder_expression: String,
    /// Secret material: the values file carries an empty entry and rendering
    /// fails until the consumer supplies one.
    pub required: bool,
    pub encoding: FieldEncoding,
}

impl TemplateField {
    /// Build a field whose default is the original literal.
    pub fn literal(doc: usize, path: FieldPath, values_path: ValuesPath, original: Value) -> Self {
        let reference = values_path.reference();
        // Helm reads numbers from values files as float64, so integers are
        // converted back before printing.
        let placeholder_expression = if original.is_string() {
            format!("{{{{ {} | quote }}}}", reference)
        } else if is_integer(&original) {
            format!("{{{{ {} | int64 }}}}", reference)
        } else {
            format!("{{{{ {} }}}}", reference)
        };
        Self {
            doc,
            path,
            values_path,
            original_value: original,
            placeholder_expression,
            required: false,
            encoding: FieldEncoding::Plain,
        }
    }

    /// Build a required field whose value must be supplied at install time.
    pub fn required(
        doc: usize,
        path: FieldPath,
        values_path: ValuesPath,
        original: Value,
        encoding: FieldEncoding,
    ) -> Self {
        let encode = match encoding {
            FieldEncoding::Plain => "",
            FieldEncoding::Base64 => " | b64enc",
        };
        let placeholder_expression = format!(
            "{{{{ required \"{} is required\" {}{} | quote }}}}",
            values_path,
            values_path.reference(),
            encode
        );
        Self {
            doc,
            path,
            values_path,
            original_value: original,
            placeholder_expression,
            required: true,
            encoding,
        }
    }

    /// The expression as it appears inside a larger quoted string.
    pub fn inline_expression(&self) -> String {
        if is_integer(&self.original_value) && !self.required {
            format!("{{{{ {} | int64 }}}}", self.values_path.reference())
        } else {
            format!("{{{{ {} }}}}", self.values_path.reference())
        }
    }

    /// The value written to the values file.
    pub fn default_value(&self) -> Value {
        if self.required {
            Value::String(String::new())
        } else {
            self.original_value.clone()
        }
    }
}

fn is_integer(value: &Value) -> bool {
    value.as_i64().is_some() || value.as_u64().is_some()
}

/// One piece of a placeholder's rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Index into the extracted field list.
    Field(usize),
    /// The chart's fullname helper (release-name based).
    Fullname,
    Literal(String),
}

/// A scalar location in a document that the emitter replaces with template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub doc: usize,
    pub path: FieldPath,
    pub segments: Vec<Segment>,
}

/// Warning codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WarningCode {
    AmbiguousReference,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmbiguousReference => "AmbiguousReferenceWarning",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A non-fatal finding, summarized after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub code: WarningCode,
    pub resource: ResourceId,
    pub source_path: PathBuf,
    pub message: String,
}

impl Warning {
    pub fn ambiguous(resource: ResourceId, source_path: PathBuf, message: impl Into<String>) -> Self {
        Self {
            code: WarningCode::AmbiguousReference,
            resource,
            source_path,
            message: message.into(),
        }
    }
}
