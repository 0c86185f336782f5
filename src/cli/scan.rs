use camino::Utf8PathBuf;
use clap::Args;
use simple_error::SimpleResult;

use super::run::{DEFAULT_OLDER_HOURS, DEFAULT_YOUNGER_HOURS, check_age_window};
use super::utils::check_required_dirname;

#[derive(Args)]
pub struct ScanSettings {
    /// Directory searched for completed sequencing run directories
    #[arg(value_name = "DIR")]
    pub root: Utf8PathBuf,

    /// Skip runs completed fewer than this many hours ago
    #[arg(long = "younger", value_name = "HOURS", default_value_t = DEFAULT_YOUNGER_HOURS)]
    pub younger_hours: u64,

    /// Skip runs completed this many hours ago or earlier
    #[arg(long = "older", value_name = "HOURS", default_value_t = DEFAULT_OLDER_HOURS)]
    pub older_hours: u64,
}

pub fn validate_and_fix_scan_settings(settings: ScanSettings) -> SimpleResult<ScanSettings> {
    check_required_dirname(&settings.root, "run input root")?;
    check_age_window(settings.younger_hours, settings.older_hours)?;
    Ok(settings)
}
