use clap::Parser;
use colored::Colorize;
use std::process;

use chartify::cli::{Cli, Commands};
use chartify::handlers::{SynthesizeArgs, handle_synthesize};

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    cli.init_logging();

    let result = match cli.command {
        Commands::Synthesize {
            input_dir,
            chart_name,
            recursive,
            output,
            force,
            format,
        } => handle_synthesize(SynthesizeArgs {
            input_dir,
            chart_name,
            recursive,
            output,
            force,
            format: format.into(),
            config: cli.config,
            quiet: cli.quiet,
        }),
    };

    if let Err(e) = result {
        eprintln!("{}", e.to_string().red());
        process::exit(1);
    }
}
