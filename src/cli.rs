use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::synth::formatter::OutputFormat;

#[derive(Parser)]
#[command(name = "chartify")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turn a directory of Kubernetes manifests into a Helm chart")]
#[command(long_about = "Reads raw Kubernetes manifests, lifts images, replicas, resources, ports, env values and secrets into values.yaml, rewrites resource names to the release-prefixed convention, and writes a chart that renders back to the input.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize a Helm chart from a directory of manifests
    Synthesize {
        /// Directory containing .yaml/.yml manifest files
        #[arg(value_name = "INPUT_DIR")]
        input_dir: PathBuf,

        /// Name of the chart to create
        #[arg(value_name = "CHART_NAME")]
        chart_name: String,

        /// Include manifests in subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Output directory for the chart (defaults to ./<CHART_NAME>)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Replace an existing output directory
        #[arg(long)]
        force: bool,

        /// Report format
        #[arg(long, value_enum, default_value = "stylish")]
        format: ReportFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Stylish,
    Json,
}

impl From<ReportFormat> for OutputFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Stylish => OutputFormat::Stylish,
            ReportFormat::Json => OutputFormat::Json,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}
