//! # chartify
//!
//! Converts a directory of raw Kubernetes manifests into a parameterized Helm
//! chart.
//!
//! - **Extraction**: images, replica counts, resources, Service-targeted
//!   ports and env literals move into `values.yaml`
//! - **Secrets**: secret data becomes required values and is never written
//! - **Naming**: resource names and their references follow the release name
//! - **Verification**: every chart is rendered and compared with its input
//!   before anything is written
//!
//! ## Example
//!
//! ```rust,no_run
//! use chartify::config::types::Config;
//! use chartify::synth::{SynthesisOptions, Synthesizer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SynthesisOptions::new("./manifests", "shop");
//! let report = Synthesizer::new(Config::default()).run(&options)?;
//! println!("wrote {} template(s)", report.templates.len());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod synth;

// Re-export commonly used types and functions
pub use error::{Result, StageError, SynthError};
pub use synth::{SynthesisOptions, SynthesisReport, Synthesizer};

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
