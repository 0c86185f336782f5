mod count_sequences;
mod demux;
mod prep;
mod run;
mod scan;
mod shared;
mod utils;

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use simple_error::{SimpleResult, bail};

use self::count_sequences::validate_and_fix_count_sequences_settings;
pub use self::count_sequences::CountSequencesSettings;
use self::demux::validate_and_fix_demux_settings;
pub use self::demux::DemuxSettings;
use self::prep::{validate_and_fix_amplicon_prep_settings, validate_and_fix_prep_settings};
pub use self::prep::{AmpliconPrepSettings, PrepSettings};
use self::run::validate_and_fix_run_settings;
pub use self::run::RunSettings;
use self::scan::validate_and_fix_scan_settings;
pub use self::scan::ScanSettings;
use self::shared::validate_and_fix_shared_settings;
pub use self::shared::SharedSettings;

#[derive(Subcommand)]
pub enum Commands {
    /// Find completed sequencing runs and take each through conversion, QC, read counting and
    /// preparation file generation
    Run(RunSettings),

    /// List the completed sequencing runs within the age window
    Scan(ScanSettings),

    /// Write preparation files for a processed metagenomic or metatranscriptomic run
    FormatPreparationFiles(PrepSettings),

    /// Write preparation files for an amplicon run from its mapping file
    FormatPreparationFilesAmplicon(AmpliconPrepSettings),

    /// Split interleaved host filtered fastq into per-sample gzipped fastq pairs
    Demux(DemuxSettings),

    /// Count the sequences and base pairs of every fastq file below a directory
    CountSequences(CountSequencesSettings),
}

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(propagate_version = true, rename_all = "kebab_case")]
pub struct Settings {
    #[command(flatten)]
    pub shared: SharedSettings,

    #[command(subcommand)]
    pub command: Commands,
}

impl Settings {
    /// Output directory owned by the command, which also receives the log file
    ///
    /// Commands returning None log to stderr only.
    ///
    pub fn get_output_dir(&self) -> Option<&Utf8Path> {
        match &self.command {
            Commands::Run(x) => Some(&x.output_dir),
            Commands::FormatPreparationFiles(x) => Some(&x.output_dir),
            Commands::FormatPreparationFilesAmplicon(x) => Some(&x.output_dir),
            Commands::Scan(_) | Commands::Demux(_) | Commands::CountSequences(_) => None,
        }
    }

    /// True if the command may write into an existing output directory without --clobber
    pub fn reuses_output_dir(&self) -> bool {
        matches!(self.command, Commands::Run(_))
    }
}

/// Checks if a directory does not exist
///
pub fn check_novel_dirname(dirname: &Utf8Path, label: &str) -> SimpleResult<()> {
    if dirname.exists() {
        bail!("{label} already exists: '{dirname}'");
    }
    Ok(())
}

/// Validate settings and update parameters that can't be processed by clap
///
pub fn validate_and_fix_settings_impl(mut settings: Settings) -> SimpleResult<Settings> {
    settings.shared = validate_and_fix_shared_settings(settings.shared)?;

    settings.command = match settings.command {
        Commands::Run(x) => Commands::Run(validate_and_fix_run_settings(x)?),
        Commands::Scan(x) => Commands::Scan(validate_and_fix_scan_settings(x)?),
        Commands::FormatPreparationFiles(x) => {
            Commands::FormatPreparationFiles(validate_and_fix_prep_settings(x)?)
        }
        Commands::FormatPreparationFilesAmplicon(x) => {
            Commands::FormatPreparationFilesAmplicon(validate_and_fix_amplicon_prep_settings(x)?)
        }
        Commands::Demux(x) => Commands::Demux(validate_and_fix_demux_settings(x)?),
        Commands::CountSequences(x) => {
            Commands::CountSequences(validate_and_fix_count_sequences_settings(x)?)
        }
    };

    Ok(settings)
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
pub fn validate_and_fix_settings(settings: Settings) -> Settings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("Invalid command-line setting: {msg}");
            std::process::exit(exitcode::USAGE);
        }
    }
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path().to_str().unwrap();
        let settings = Settings::try_parse_from([
            "seqproc",
            "run",
            "--input-root",
            dir,
            "--sample-sheet-dir",
            dir,
            "--threads",
            "4",
        ])
        .unwrap();
        let settings = validate_and_fix_settings_impl(settings).unwrap();
        assert_eq!(settings.shared.thread_count, 4);
        assert!(settings.reuses_output_dir());
        match &settings.command {
            Commands::Run(x) => {
                assert_eq!(x.younger_hours, run::DEFAULT_YOUNGER_HOURS);
                assert_eq!(x.older_hours, run::DEFAULT_OLDER_HOURS);
                assert!(!x.dry_run);
                assert_eq!(x.output_dir, "seqproc_output");
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_invalid_age_window() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path().to_str().unwrap();
        let settings =
            Settings::try_parse_from(["seqproc", "scan", dir, "--younger", "5", "--older", "5"])
                .unwrap();
        assert!(validate_and_fix_settings_impl(settings).is_err());
    }

    #[test]
    fn test_output_dir_per_command() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let sheet = dir.join("sheet.csv");
        std::fs::write(&sheet, "x").unwrap();
        let out = dir.join("prep_out");
        let settings = Settings::try_parse_from([
            "seqproc",
            "format-preparation-files",
            dir.as_str(),
            sheet.as_str(),
            out.as_str(),
        ])
        .unwrap();
        let settings = validate_and_fix_settings_impl(settings).unwrap();
        assert_eq!(settings.get_output_dir(), Some(out.as_path()));
        assert!(!settings.reuses_output_dir());

        let settings = Settings::try_parse_from(["seqproc", "scan", dir.as_str()]).unwrap();
        assert_eq!(settings.get_output_dir(), None);
    }

    #[test]
    fn test_missing_input_is_rejected() {
        let settings = Settings::try_parse_from([
            "seqproc",
            "count-sequences",
            "/nonexistent/fastq/dir",
            "counts.json",
        ])
        .unwrap();
        assert!(validate_and_fix_settings_impl(settings).is_err());
    }
}
