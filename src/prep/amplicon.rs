//! Preparation tables for amplicon runs
//!
//! Amplicon runs are converted as a single pooled sample, so every sample of the mapping file
//! shares the run prefix of the pooled `SMPL1` fastq files, on lane 1.
//!

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use log::warn;

use super::builder::{apply_study_fixup, warn_on_sample_names};
use super::run_id::RunInfo;
use super::{PrepTable, order_columns};
use crate::config::PipelineConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::sample_sheet::mapping_file::MappingFile;

/// Name token of the pooled sample of an amplicon run
pub const POOLED_SAMPLE_TOKEN: &str = "_SMPL1";

pub const AMPLICON_LANE: u32 = 1;

/// Find the pooled sample fastq files below `run_dir`
fn find_pooled_files(run_dir: &Utf8Path) -> PipelineResult<Vec<Utf8PathBuf>> {
    let pattern = format!(
        "{}/**/*{POOLED_SAMPLE_TOKEN}_S*_R?_*.fastq.gz",
        Pattern::escape(run_dir.as_str())
    );
    let paths = glob::glob(&pattern).map_err(|e| {
        PipelineError::Config(format!("Invalid pooled sample search pattern '{pattern}': {e}"))
    })?;
    let mut files = Vec::new();
    for path in paths {
        match path {
            Ok(x) => match Utf8PathBuf::from_path_buf(x) {
                Ok(x) => files.push(x),
                Err(x) => warn!("Skipping non UTF-8 path '{}'", x.display()),
            },
            Err(e) => warn!("Unable to read path while searching '{run_dir}': {e}"),
        }
    }
    Ok(files)
}

/// Run prefix shared by every sample of an amplicon run
///
/// This is the portion of the pooled sample filename before the pooled sample token. All pooled
/// files must agree on it.
///
pub fn find_run_prefix(run_dir: &Utf8Path) -> PipelineResult<String> {
    let files = find_pooled_files(run_dir)?;
    let prefixes = files
        .iter()
        .filter_map(|x| x.file_name())
        .filter_map(|x| x.find(POOLED_SAMPLE_TOKEN).map(|pos| x[..pos].to_string()))
        .collect::<BTreeSet<_>>();
    let mut prefixes = prefixes.into_iter();
    match (prefixes.next(), prefixes.next()) {
        (Some(x), None) => Ok(x),
        (None, _) => Err(PipelineError::Resolver(format!(
            "No pooled '{POOLED_SAMPLE_TOKEN}' fastq file found below '{run_dir}'"
        ))),
        (Some(x), Some(y)) => Err(PipelineError::Resolver(format!(
            "Pooled fastq files below '{run_dir}' disagree on the run prefix, found '{x}' and '{y}'"
        ))),
    }
}

/// Build one lane 1 table per project of the mapping file
pub fn build_amplicon_tables(
    run: &RunInfo,
    mapping: &MappingFile,
    run_prefix: &str,
    config: &PipelineConfig,
) -> PipelineResult<Vec<PrepTable>> {
    let mut carried = mapping.carried_prep_columns()?;
    carried.sort_by_key(|c| {
        mapping
            .columns
            .iter()
            .position(|x| x == c)
            .unwrap_or(usize::MAX)
    });

    let run_columns = BTreeMap::from([
        ("run_prefix", run_prefix.to_string()),
        ("runid", run.run_id.clone()),
        ("run_date", run.run_date_label()),
        ("instrument_model", run.instrument.model.to_string()),
        ("run_center", run.instrument.run_center.to_string()),
        ("lane", AMPLICON_LANE.to_string()),
    ]);

    let mut tables = Vec::new();
    for project in mapping.projects() {
        let project_name = project.name_without_study_id().to_string();
        let fixup = project.study_id.and_then(|x| config.study_fixups.get(&x));
        let mut rows = Vec::new();
        for mapping_row in mapping.rows.iter().filter(|x| x.project == project) {
            let mut row = carried
                .iter()
                .map(|c| {
                    let value = mapping_row.columns.get(c).cloned().unwrap_or_default();
                    (c.clone(), value)
                })
                .collect::<BTreeMap<_, _>>();
            for (column, value) in run_columns.iter() {
                row.insert(column.to_string(), value.clone());
            }
            row.insert("center_project_name".to_string(), project_name.clone());
            if let Some(fixup) = fixup {
                apply_study_fixup(&mut row, fixup);
            }
            rows.push(row);
        }

        let columns = order_columns(&carried, rows.iter().flat_map(|x| x.keys()));
        let table = PrepTable {
            project,
            lane: AMPLICON_LANE,
            columns,
            rows,
        };
        warn_on_sample_names(&table);
        tables.push(table);
    }
    Ok(tables)
}
