//! Helm chart synthesis.
//!
//! A run moves through `Loading → Classifying → Extracting → Normalizing →
//! Emitting → Done`:
//!
//! - `loader` - reads and splits manifest files
//! - `classify` - groups documents and derives relationship edges
//! - `extract` - lifts configurable fields into the values tree
//! - `normalize` - rewrites names to the release-prefixed convention
//! - `emit` - writes templates, values and chart metadata, verified by rendering

pub mod chart;
pub mod classify;
pub mod document;
pub mod emit;
pub mod extract;
pub mod formatter;
pub mod loader;
pub mod normalize;
pub mod template;
pub mod types;
pub mod values;
pub mod yaml;

use std::path::PathBuf;
use std::sync::LazyLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use regex::Regex;
use serde::Serialize;

use crate::config::types::Config;
use crate::error::{StageError, SynthError};
use crate::synth::chart::ChartDescriptor;
use crate::synth::emit::{ChartPlan, EmittedChart};
use crate::synth::template::fullname;
use crate::synth::types::{Stage, Warning};

static CHART_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap());

static RELEASE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub input_dir: PathBuf,
    pub chart_name: String,
    /// Descend into subdirectories of the input directory.
    pub recursive: bool,
    /// Defaults to `./<chart_name>`.
    pub output_dir: Option<PathBuf>,
    /// Replace an existing output directory.
    pub force: bool,
}

impl SynthesisOptions {
    pub fn new(input_dir: impl Into<PathBuf>, chart_name: impl Into<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            chart_name: chart_name.into(),
            recursive: false,
            output_dir: None,
            force: false,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.chart_name))
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisReport {
    pub chart_name: String,
    pub output_dir: PathBuf,
    pub documents: usize,
    /// Template files, relative to the chart root.
    pub templates: Vec<PathBuf>,
    pub values_fields: usize,
    /// Values paths that must be supplied at install time.
    pub required_values: Vec<String>,
    pub relationships: usize,
    pub warnings: Vec<Warning>,
}

/// A synthesized chart held in memory.
#[derive(Debug, Clone)]
pub struct SynthesizedChart {
    pub chart: EmittedChart,
    pub report: SynthesisReport,
}

type StageCallback = Box<dyn Fn(Stage) + Send + Sync>;

/// Runs the synthesis pipeline.
pub struct Synthesizer {
    config: Config,
    cancel: Arc<AtomicBool>,
    on_stage: Option<StageCallback>,
}

impl Synthesizer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            on_stage: None,
        }
    }

    /// Share a cancellation flag; setting it stops the run before the next stage.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Called whenever the run enters a new stage.
    pub fn on_stage(mut self, callback: impl Fn(Stage) + Send + Sync + 'static) -> Self {
        self.on_stage = Some(Box::new(callback));
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Synthesize and write the chart.
    pub fn run(&self, options: &SynthesisOptions) -> Result<SynthesisReport, StageError> {
        let synthesized = self.synthesize(options)?;
        let output = options.output_dir();
        let mut tracker = StageTracker::resume(Stage::Emitting);
        self.checkpoint(&mut tracker)?;
        emit::write_chart(&synthesized.chart, &output, options.force)
            .map_err(|e| tracker.fail(e))?;
        tracker.advance(self, Stage::Done);
        info!("Wrote chart `{}` to {}", options.chart_name, output.display());
        Ok(synthesized.report)
    }

    /// Run every stage up to and including verification, without touching
    /// the filesystem beyond reading the input.
    pub fn synthesize(&self, options: &SynthesisOptions) -> Result<SynthesizedChart, StageError> {
        let mut tracker = StageTracker::new();
        self.notify(Stage::Loading);

        if !CHART_NAME.is_match(&options.chart_name) {
            return Err(tracker.fail(SynthError::InvalidChartName(options.chart_name.clone())));
        }
        let verify = &self.config.verify;
        if !RELEASE_NAME.is_match(&verify.release_name) {
            return Err(tracker.fail(SynthError::Config(format!(
                "verify.release_name `{}` is not a valid release name",
                verify.release_name
            ))));
        }

        let docs = loader::load_manifests(&options.input_dir, options.recursive)
            .map_err(|e| tracker.fail(e))?;

        tracker.advance(self, Stage::Classifying);
        self.checkpoint(&mut tracker)?;
        let classification = classify::classify(&docs).map_err(|e| tracker.fail(e))?;

        tracker.advance(self, Stage::Extracting);
        self.checkpoint(&mut tracker)?;
        let extraction = extract::extract(&docs, &classification, &self.config.extraction);

        tracker.advance(self, Stage::Normalizing);
        self.checkpoint(&mut tracker)?;
        let normalization = normalize::normalize(
            &docs,
            &classification,
            &options.chart_name,
            &self.config.naming,
        )
        .map_err(|e| tracker.fail(e))?;
        let expected = normalization.apply_concrete(&docs, &fullname(&verify.release_name, ""));
        normalize::check_fixed_point(&classification, &expected).map_err(|e| tracker.fail(e))?;

        tracker.advance(self, Stage::Emitting);
        self.checkpoint(&mut tracker)?;
        let descriptor = ChartDescriptor::new(&options.chart_name, &self.config.chart);
        let plan = ChartPlan {
            chart_name: &options.chart_name,
            docs: &docs,
            extraction: &extraction,
            normalization: &normalization,
            descriptor: &descriptor,
        };
        let chart = emit::emit(&plan).map_err(|e| tracker.fail(e))?;
        emit::verify(&plan, &chart, verify).map_err(|e| tracker.fail(e))?;

        let report = SynthesisReport {
            chart_name: options.chart_name.clone(),
            output_dir: options.output_dir(),
            documents: docs.len(),
            templates: chart.templates.iter().map(|t| t.path.clone()).collect(),
            values_fields: extraction.fields.len(),
            required_values: extraction
                .required_fields()
                .map(|f| f.values_path.to_string())
                .collect(),
            relationships: classification.relationships.len(),
            warnings: classification.warnings.clone(),
        };
        Ok(SynthesizedChart { chart, report })
    }

    fn notify(&self, stage: Stage) {
        if let Some(callback) = &self.on_stage {
            callback(stage);
        }
    }

    fn checkpoint(&self, tracker: &mut StageTracker) -> Result<(), StageError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(tracker.fail(SynthError::Cancelled));
        }
        Ok(())
    }
}

/// Tracks the current stage and tags failures with it.
struct StageTracker {
    current: Stage,
}

impl StageTracker {
    fn new() -> Self {
        info!("Stage: {}", Stage::Loading);
        Self {
            current: Stage::Loading,
        }
    }

    fn resume(stage: Stage) -> Self {
        Self { current: stage }
    }

    fn advance(&mut self, synthesizer: &Synthesizer, next: Stage) {
        debug_assert!(self.current.can_advance_to(next));
        debug!("Stage: {} -> {}", self.current, next);
        info!("Stage: {}", next);
        self.current = next;
        synthesizer.notify(next);
    }

    /// Move to `Failed`, returning the error tagged with the stage it happened in.
    fn fail(&mut self, error: SynthError) -> StageError {
        let stage = self.current;
        debug!("Stage: {} -> {}", stage, Stage::Failed);
        self.current = Stage::Failed;
        StageError::new(stage, error)
    }
}
