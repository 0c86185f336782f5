use camino::Utf8PathBuf;
use clap::Args;
use simple_error::SimpleResult;

use super::utils::{check_optional_filename, check_required_dirname, check_required_filename};

#[derive(Args)]
pub struct PrepSettings {
    /// QC output directory of the run, holding one directory per project
    #[arg(value_name = "RUN_DIR")]
    pub run_dir: Utf8PathBuf,

    /// Sample sheet used to process the run
    #[arg(value_name = "SAMPLE_SHEET")]
    pub sample_sheet: Utf8PathBuf,

    /// Directory for the preparation files (must not already exist)
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: Utf8PathBuf,

    /// Sequence counts in JSON format, as written by the count-sequences command. When given, read
    /// count columns are added to each preparation file.
    ///
    #[arg(long = "counts", value_name = "FILE")]
    pub counts_filename: Option<Utf8PathBuf>,

    /// Run identifier, if the run directory is not named after the run
    #[arg(long, value_name = "RUN_ID")]
    pub run_id: Option<String>,

    /// Pipeline configuration in JSON format, providing the center name and study fixups
    #[arg(long = "config", value_name = "FILE")]
    pub config_filename: Option<Utf8PathBuf>,

    /// Print the study id and absolute path of every preparation file written
    #[arg(long)]
    pub verbose: bool,
}

pub fn validate_and_fix_prep_settings(settings: PrepSettings) -> SimpleResult<PrepSettings> {
    check_required_dirname(&settings.run_dir, "run")?;
    check_required_filename(&settings.sample_sheet, "sample sheet")?;
    check_optional_filename(settings.counts_filename.as_deref(), "sequence counts")?;
    check_optional_filename(settings.config_filename.as_deref(), "pipeline configuration")?;
    Ok(settings)
}

#[derive(Args)]
pub struct AmpliconPrepSettings {
    /// Run directory, searched for the pooled sample fastq files
    #[arg(value_name = "RUN_DIR")]
    pub run_dir: Utf8PathBuf,

    /// Tab-separated amplicon mapping file
    #[arg(value_name = "MAPPING_FILE")]
    pub mapping_file: Utf8PathBuf,

    /// Directory for the preparation files (must not already exist)
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: Utf8PathBuf,

    /// Run identifier, if the run directory is not named after the run
    #[arg(long, value_name = "RUN_ID")]
    pub run_id: Option<String>,

    /// Pipeline configuration in JSON format, providing the study fixups
    #[arg(long = "config", value_name = "FILE")]
    pub config_filename: Option<Utf8PathBuf>,

    /// Print the study id and absolute path of every preparation file written
    #[arg(long)]
    pub verbose: bool,
}

pub fn validate_and_fix_amplicon_prep_settings(
    settings: AmpliconPrepSettings,
) -> SimpleResult<AmpliconPrepSettings> {
    check_required_dirname(&settings.run_dir, "run")?;
    check_required_filename(&settings.mapping_file, "mapping")?;
    check_optional_filename(settings.config_filename.as_deref(), "pipeline configuration")?;
    Ok(settings)
}
