mod cli;
mod config;
mod convert;
mod demux;
mod errors;
mod file_pairs;
mod globals;
mod job;
mod logger;
mod os_utils;
mod pipeline;
mod prep;
mod project;
mod qc_filter;
mod run_dir_scanner;
mod sample_files;
mod sample_sheet;
mod seq_counts;
mod signals;

use std::process;

use hhmmss::Hhmmss;
use log::{error, info};

use crate::cli::Commands;
use crate::demux::run_demux_command;
use crate::errors::PipelineResult;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::logger::setup_output_dir_and_logger;
use crate::pipeline::run_pipeline;
use crate::prep::{run_format_amplicon_prep_files, run_format_prep_files};
use crate::run_dir_scanner::run_scan;
use crate::seq_counts::run_count_sequences;

fn run(settings: &cli::Settings) -> PipelineResult<()> {
    info!("Starting {PROGRAM_NAME} {PROGRAM_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );
    info!("Running on {} threads", settings.shared.thread_count);

    let start = std::time::Instant::now();

    match &settings.command {
        Commands::Run(x) => run_pipeline(&settings.shared, x)?,
        Commands::Scan(x) => run_scan(x),
        Commands::FormatPreparationFiles(x) => run_format_prep_files(x)?,
        Commands::FormatPreparationFilesAmplicon(x) => run_format_amplicon_prep_files(x)?,
        Commands::Demux(x) => run_demux_command(&settings.shared, x)?,
        Commands::CountSequences(x) => run_count_sequences(&settings.shared, x)?,
    }

    info!(
        "{PROGRAM_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    let settings = cli::validate_and_fix_settings(cli::parse_settings());

    // Setup logger, including creation of the output directory for the log file:
    setup_output_dir_and_logger(
        settings.get_output_dir(),
        settings.shared.clobber || settings.reuses_output_dir(),
        settings.shared.debug,
    );

    if let Err(err) = run(&settings) {
        error!("{err}");
        process::exit(err.exit_code());
    }
}
