//! Preparation file generation
//!
//! A preparation file describes the samples of one project on one lane of a run, combining the
//! sample sheet columns with run metadata and read counts, for ingestion into the study database.
//!

pub mod amplicon;
pub mod builder;
pub mod read_counts;
pub mod run_id;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use csv::WriterBuilder;
use log::info;
use regex::Regex;

use self::amplicon::{build_amplicon_tables, find_run_prefix};
use self::builder::PrepBuilder;
use self::read_counts::ReadCounts;
use self::run_id::RunInfo;
use crate::cli::{AmpliconPrepSettings, PrepSettings};
use crate::config::load_config;
use crate::errors::{PipelineError, PipelineResult};
use crate::project::Project;
use crate::sample_sheet::{self, Assay, mapping_file};
use crate::seq_counts::read_seq_counts;

pub const PREP_FILE_EXTENSION: &str = "tsv";

static LANE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_L(\d{3})_").unwrap());

/// Lane number encoded in an Illumina fastq filename, defaulting to lane 1
pub fn file_lane(file_name: &str) -> u32 {
    LANE_TOKEN
        .captures_iter(file_name)
        .last()
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(1)
}

/// Order prep columns: carried columns in their source order, then all others alphabetised
pub fn order_columns<'a>(
    carried: &[String],
    all_columns: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    let mut columns = carried.to_vec();
    let mut rest = all_columns
        .into_iter()
        .filter(|x| !carried.contains(x))
        .cloned()
        .collect::<Vec<_>>();
    rest.sort();
    rest.dedup();
    columns.extend(rest);
    columns
}

/// Rows of one preparation file, before it is written
#[derive(Clone, Debug, PartialEq)]
pub struct PrepTable {
    pub project: Project,
    pub lane: u32,
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl PrepTable {
    pub fn file_name(&self, run_id: &str) -> String {
        format!(
            "{run_id}.{}.{}.{PREP_FILE_EXTENSION}",
            self.project.name, self.lane
        )
    }

    /// Write the table as tab-separated text, with every row carrying every column
    pub fn write(&self, filename: &Utf8Path) -> PipelineResult<()> {
        let to_err = |e: csv::Error| {
            PipelineError::io(
                format!("Unable to write preparation file '{filename}'"),
                e.into(),
            )
        };
        let mut wtr = WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(filename)
            .map_err(to_err)?;
        wtr.write_record(&self.columns).map_err(to_err)?;
        for row in self.rows.iter() {
            wtr.write_record(
                self.columns
                    .iter()
                    .map(|c| row.get(c).map_or("", |x| x.as_str())),
            )
            .map_err(to_err)?;
        }
        wtr.flush().map_err(|e| {
            PipelineError::io(format!("Unable to write preparation file '{filename}'"), e)
        })
    }
}

/// A preparation file written to disk
#[derive(Clone, Debug, PartialEq)]
pub struct PrepFile {
    pub project: Project,
    pub lane: u32,
    pub path: Utf8PathBuf,
    pub row_count: usize,
}

/// Write each table into `output_dir` under its conventional name
pub fn write_prep_files(
    tables: &[PrepTable],
    run_id: &str,
    output_dir: &Utf8Path,
) -> PipelineResult<Vec<PrepFile>> {
    crate::os_utils::create_dir_all(output_dir, "preparation file output")?;
    let mut prep_files = Vec::new();
    for table in tables.iter() {
        let path = output_dir.join(table.file_name(run_id));
        info!(
            "Writing {} preparation rows to file: '{path}'",
            table.rows.len()
        );
        table.write(&path)?;
        prep_files.push(PrepFile {
            project: table.project.clone(),
            lane: table.lane,
            path,
            row_count: table.rows.len(),
        });
    }
    Ok(prep_files)
}

/// Run id given on the command line, or else the name of the run directory
fn resolve_run_info(run_id: Option<&str>, run_dir: &Utf8Path) -> PipelineResult<RunInfo> {
    let run_id = match run_id {
        Some(x) => x,
        None => run_dir.file_name().ok_or_else(|| {
            PipelineError::Config(format!(
                "Unable to take a run id from run directory '{run_dir}', specify one with --run-id"
            ))
        })?,
    };
    Ok(RunInfo::parse(run_id)?)
}

/// Print the study id and absolute path of each written file to stdout
fn report_prep_files(prep_files: &[PrepFile]) -> PipelineResult<()> {
    for prep_file in prep_files.iter() {
        let path = prep_file.path.canonicalize_utf8().map_err(|e| {
            PipelineError::io(
                format!("Unable to resolve preparation file path '{}'", prep_file.path),
                e,
            )
        })?;
        println!("{}\t{path}", prep_file.project.study_id_label());
    }
    Ok(())
}

/// Entry point of the format-preparation-files command
pub fn run_format_prep_files(settings: &PrepSettings) -> PipelineResult<()> {
    let config = load_config(settings.config_filename.as_deref())?;
    let run = resolve_run_info(settings.run_id.as_deref(), &settings.run_dir)?;
    let sheet = sample_sheet::validate(sample_sheet::load(&settings.sample_sheet)?)?;
    if sheet.assay()? == Assay::Amplicon {
        return Err(PipelineError::Config(format!(
            "Sample sheet '{}' is for an amplicon run, use the format-preparation-files-amplicon command",
            settings.sample_sheet
        )));
    }

    let read_counts = match settings.counts_filename.as_deref() {
        Some(x) => {
            let counts = read_seq_counts(x)?;
            let read_counts = ReadCounts::from_seq_counts(&counts, &sheet.samples);
            info!("Read counts found for {} sample lanes", read_counts.len());
            Some(read_counts)
        }
        None => None,
    };

    let mut builder = PrepBuilder::new(&run, &config);
    builder.read_counts = read_counts.as_ref();
    let tables = builder.build(&sheet, &settings.run_dir)?;
    let prep_files = write_prep_files(&tables, &run.run_id, &settings.output_dir)?;
    if settings.verbose {
        report_prep_files(&prep_files)?;
    }
    Ok(())
}

/// Entry point of the format-preparation-files-amplicon command
pub fn run_format_amplicon_prep_files(settings: &AmpliconPrepSettings) -> PipelineResult<()> {
    let config = load_config(settings.config_filename.as_deref())?;
    let run = resolve_run_info(settings.run_id.as_deref(), &settings.run_dir)?;
    let mapping = mapping_file::load(&settings.mapping_file)?;
    let run_prefix = find_run_prefix(&settings.run_dir)?;
    info!("Amplicon run prefix: '{run_prefix}'");

    let tables = build_amplicon_tables(&run, &mapping, &run_prefix, &config)?;
    let prep_files = write_prep_files(&tables, &run.run_id, &settings.output_dir)?;
    if settings.verbose {
        report_prep_files(&prep_files)?;
    }
    Ok(())
}
