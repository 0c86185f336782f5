use camino::Utf8PathBuf;
use clap::Args;
use const_format::concatcp;
use simple_error::{SimpleResult, bail};

use super::utils::{check_optional_filename, check_required_dirname};

/// Runs completed more recently than this many hours ago are left for a later invocation
pub const DEFAULT_YOUNGER_HOURS: u64 = 1;

/// Runs completed this many hours ago or earlier are not processed
pub const DEFAULT_OLDER_HOURS: u64 = 48;

#[derive(Args)]
pub struct RunSettings {
    /// Directory searched for completed sequencing run directories
    #[arg(long, value_name = "DIR")]
    pub input_root: Utf8PathBuf,

    /// Directory holding one '<run_id>.csv' sample sheet per run
    #[arg(long, value_name = "DIR")]
    pub sample_sheet_dir: Utf8PathBuf,

    /// Directory for all pipeline output. Unlike other commands this directory may already exist,
    /// processed runs in it are skipped.
    ///
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_output"))]
    pub output_dir: Utf8PathBuf,

    /// Pipeline configuration in JSON format. Built-in defaults are used for any value not given.
    #[arg(long = "config", value_name = "FILE")]
    pub config_filename: Option<Utf8PathBuf>,

    /// Skip runs completed fewer than this many hours ago
    #[arg(long = "younger", value_name = "HOURS", default_value_t = DEFAULT_YOUNGER_HOURS)]
    pub younger_hours: u64,

    /// Skip runs completed this many hours ago or earlier
    #[arg(long = "older", value_name = "HOURS", default_value_t = DEFAULT_OLDER_HOURS)]
    pub older_hours: u64,

    /// Report the runs which would be processed without submitting any job
    #[arg(long)]
    pub dry_run: bool,
}

pub fn validate_and_fix_run_settings(settings: RunSettings) -> SimpleResult<RunSettings> {
    check_required_dirname(&settings.input_root, "run input root")?;
    check_required_dirname(&settings.sample_sheet_dir, "sample sheet")?;
    check_optional_filename(settings.config_filename.as_deref(), "pipeline configuration")?;
    check_age_window(settings.younger_hours, settings.older_hours)?;
    Ok(settings)
}

pub(super) fn check_age_window(younger_hours: u64, older_hours: u64) -> SimpleResult<()> {
    if younger_hours >= older_hours {
        bail!(
            "--younger value ({younger_hours}) must be less than the --older value ({older_hours})"
        );
    }
    Ok(())
}
