use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

use crate::config;
use crate::error::StageError;
use crate::synth::formatter::{self, OutputFormat};
use crate::synth::types::Stage;
use crate::synth::{SynthesisOptions, SynthesisReport, Synthesizer};

/// Arguments of the `synthesize` command.
#[derive(Debug, Clone)]
pub struct SynthesizeArgs {
    pub input_dir: PathBuf,
    pub chart_name: String,
    pub recursive: bool,
    pub output: Option<PathBuf>,
    pub force: bool,
    pub format: OutputFormat,
    pub config: Option<PathBuf>,
    pub quiet: bool,
}

/// Run a synthesis and print its report.
pub fn handle_synthesize(args: SynthesizeArgs) -> Result<SynthesisReport, StageError> {
    let config = config::load_config(args.config.as_deref(), Some(&args.input_dir))
        .map_err(|e| StageError::new(Stage::Loading, e))?;
    debug!("Configuration: {:?}", config);

    let options = SynthesisOptions {
        input_dir: args.input_dir.clone(),
        chart_name: args.chart_name.clone(),
        recursive: args.recursive,
        output_dir: args.output.clone(),
        force: args.force,
    };

    let spinner = (args.format == OutputFormat::Stylish && !args.quiet).then(stage_spinner);
    let mut synthesizer = Synthesizer::new(config);
    if let Some(spinner) = &spinner {
        let spinner = spinner.clone();
        synthesizer = synthesizer.on_stage(move |stage| {
            spinner.set_message(format!("{}...", stage));
        });
    }

    let result = synthesizer.run(&options);
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = result?;

    if args.format == OutputFormat::Json || !args.quiet {
        println!("{}", formatter::format_report(&report, args.format));
    }
    Ok(report)
}

fn stage_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✔"])
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("loading...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}
