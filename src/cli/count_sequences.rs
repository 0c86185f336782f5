use camino::Utf8PathBuf;
use clap::Args;
use simple_error::{SimpleResult, bail};

use super::utils::check_required_dirname;

#[derive(Args)]
pub struct CountSequencesSettings {
    /// Directory searched for fastq files
    #[arg(value_name = "DIR")]
    pub dir: Utf8PathBuf,

    /// Sequence counts output file, in JSON format
    #[arg(value_name = "OUTPUT_JSON")]
    pub output_filename: Utf8PathBuf,
}

pub fn validate_and_fix_count_sequences_settings(
    settings: CountSequencesSettings,
) -> SimpleResult<CountSequencesSettings> {
    check_required_dirname(&settings.dir, "fastq")?;
    if settings.output_filename.exists() {
        bail!(
            "Sequence counts output file already exists: '{}'",
            settings.output_filename
        );
    }
    Ok(settings)
}
