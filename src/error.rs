//! Error types for chart synthesis.

use std::path::PathBuf;

use thiserror::Error;

use crate::synth::types::Stage;

/// Errors that abort a synthesis run.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The input directory does not exist or is not a directory.
    #[error("input directory not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// Malformed YAML in one of the input files.
    #[error("parse error in {} at line {line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A document is missing a required Kubernetes field.
    #[error("schema error in {} at line {line}: {message}", .path.display())]
    Schema {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Two resources of the same kind end up with the same name.
    #[error(
        "name collision: {kind} `{name}` is declared by both {} and {}",
        .first.display(),
        .second.display()
    )]
    NameCollision {
        kind: String,
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Emitted templates rendered with the emitted values do not reproduce the input.
    #[error("round-trip violation in {template}: {detail}")]
    RoundTrip { template: String, detail: String },

    /// The chart name is not a valid Helm chart name.
    #[error("invalid chart name `{0}`: use lowercase letters, digits and dashes, starting with a letter")]
    InvalidChartName(String),

    /// The output directory already exists and `--force` was not given.
    #[error("output directory {} already exists (use --force to replace it)", .0.display())]
    OutputExists(PathBuf),

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The run was cancelled before emission.
    #[error("synthesis cancelled")]
    Cancelled,

    /// Filesystem error.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization of an emitted file failed.
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl SynthError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A fatal error tagged with the pipeline stage it occurred in.
#[derive(Debug, Error)]
#[error("error[{stage}]: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: SynthError,
}

impl StageError {
    pub fn new(stage: Stage, source: SynthError) -> Self {
        Self { stage, source }
    }
}

/// Result type alias using SynthError
pub type Result<T> = std::result::Result<T, SynthError>;
