use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionPolicy,
    pub naming: NamingConfig,
    pub chart: ChartConfig,
    pub verify: VerifyConfig,
}

/// Which manifest fields are lifted into `values.yaml`.
///
/// Secret data is always lifted as required values and has no toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPolicy {
    /// Container images, split into repository and tag/digest
    pub image: bool,
    /// `spec.replicas` of Deployments, StatefulSets and ReplicaSets
    pub replicas: bool,
    /// Container resource limits and requests
    pub resources: bool,
    /// Storage requests of claims and claim templates
    pub storage: bool,
    /// Container ports targeted by a Service
    pub ports: bool,
    /// Literal container env values
    pub env: bool,
    /// ConfigMap `data` entries
    pub config_map_data: bool,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            image: true,
            replicas: true,
            resources: true,
            storage: true,
            ports: true,
            env: true,
            config_map_data: false,
        }
    }
}

/// Resource naming configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Drop a leading `<chart>-` from resource names before prefixing the release name
    pub strip_chart_prefix: bool,
    /// Label keys whose values follow workload renames
    pub name_label_keys: Vec<String>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            strip_chart_prefix: true,
            name_label_keys: vec!["app".to_string()],
        }
    }
}

/// Chart.yaml metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub version: String,
    pub app_version: Option<String>,
    pub description: Option<String>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            app_version: None,
            description: None,
        }
    }
}

/// Release used when rendering the chart for verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub release_name: String,
    pub namespace: String,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            release_name: "release-name".to_string(),
            namespace: "default".to_string(),
        }
    }
}
