//! Chart.yaml metadata.

use serde::{Deserialize, Serialize};

use crate::config::types::ChartConfig;
use crate::error::{Result, SynthError};
use crate::synth::yaml::{self, Quoting};

/// Helm Chart API version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApiVersion {
    /// Helm 2 style charts
    V1,
    /// Helm 3 style charts
    #[default]
    V2,
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "v1" => Ok(ApiVersion::V1),
            "v2" => Ok(ApiVersion::V2),
            other => Err(serde::de::Error::custom(format!(
                "unsupported chart apiVersion `{}`",
                other
            ))),
        }
    }
}

impl Serialize for ApiVersion {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ApiVersion::V1 => serializer.serialize_str("v1"),
            ApiVersion::V2 => serializer.serialize_str("v2"),
        }
    }
}

/// Chart type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    /// Standard application chart
    #[default]
    Application,
    /// Library chart (no templates rendered directly)
    Library,
}

/// The emitted Chart.yaml.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChartDescriptor {
    #[serde(rename = "apiVersion")]
    pub api_version: ApiVersion,

    pub name: String,

    /// A single-sentence description of this project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub chart_type: ChartType,

    /// A SemVer 2 version
    pub version: String,

    /// The version of the app that this contains
    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

impl ChartDescriptor {
    /// Descriptor for a new application chart.
    pub fn new(name: &str, config: &ChartConfig) -> Self {
        Self {
            api_version: ApiVersion::V2,
            name: name.to_string(),
            description: Some(
                config
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("A Helm chart for {}", name)),
            ),
            chart_type: ChartType::Application,
            version: config.version.clone(),
            app_version: config.app_version.clone(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        let value = serde_yaml::to_value(self).map_err(|e| SynthError::Serialize {
            what: "Chart.yaml".to_string(),
            source: e,
        })?;
        Ok(yaml::to_string(&value, Quoting::WhenNeeded))
    }
}
