//! Preparation tables for metagenomic and metatranscriptomic runs
//!

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use log::{error, info, warn};

use super::read_counts::{READ_COUNT_COLUMNS, ReadCounts};
use super::run_id::RunInfo;
use super::{PrepTable, file_lane, order_columns};
use crate::config::{PipelineConfig, StudyFixup};
use crate::errors::{PipelineError, PipelineResult, Recovery};
use crate::os_utils::walk_files;
use crate::project::{Project, strip_study_id};
use crate::qc_filter::{FILTERED_DIR, TRIMMED_DIR, ZERO_FILES_DIR};
use crate::sample_files::{get_run_prefix, map_files};
use crate::sample_sheet::SampleSheet;
use crate::seq_counts::is_fastq;

pub const PLATFORM: &str = "Illumina";
pub const SEQUENCING_METHOD: &str = "sequencing by synthesis";

/// Fastq files of one project's QC output
///
/// Host filtered reads are preferred, falling back to the trimmed reads of projects without host
/// filtering. A fastq file anywhere outside the expected output directories is an error, since it
/// indicates an incomplete move of the QC output.
///
pub fn locate_project_files(project_dir: &Utf8Path) -> PipelineResult<Vec<Utf8PathBuf>> {
    if !project_dir.is_dir() {
        return Err(PipelineError::Resolver(format!(
            "No QC output directory found at '{project_dir}'"
        )));
    }
    let mut filtered = Vec::new();
    let mut trimmed = Vec::new();
    let files = walk_files(project_dir, &mut |path, e| {
        warn!("Unable to read QC output directory '{path}': {e}");
    });
    for file in files.into_iter().filter(|x| is_fastq(x)) {
        let parent = file.parent().unwrap_or(project_dir);
        let dir_name = if parent.parent() == Some(project_dir) {
            parent.file_name()
        } else {
            None
        };
        match dir_name {
            Some(FILTERED_DIR) => filtered.push(file),
            Some(TRIMMED_DIR) => trimmed.push(file),
            Some(ZERO_FILES_DIR) => {}
            _ => {
                return Err(PipelineError::Resolver(format!(
                    "Unexpected fastq file '{file}' outside of the '{FILTERED_DIR}', '{TRIMMED_DIR}' and '{ZERO_FILES_DIR}' directories"
                )));
            }
        }
    }
    Ok(if filtered.is_empty() { trimmed } else { filtered })
}

/// Rewrite one prep row according to its study's fixup
pub(crate) fn apply_study_fixup(row: &mut BTreeMap<String, String>, fixup: &StudyFixup) {
    if let Some(width) = fixup.zero_pad_sample_names {
        if let Some(name) = row.get_mut("sample_name") {
            let is_numeric = !name.trim().is_empty() && name.chars().all(|c| c.is_ascii_digit());
            if is_numeric {
                *name = format!("{name:0>width$}");
            }
        }
    }
    for (column, value) in fixup.column_defaults.iter() {
        row.insert(column.clone(), value.clone());
    }
}

/// Warn about sample names outside of the characters accepted by the study database
pub(crate) fn warn_on_sample_names(table: &PrepTable) {
    let bad_names = table
        .rows
        .iter()
        .filter_map(|x| x.get("sample_name"))
        .filter(|x| !x.chars().all(|c| c.is_ascii_alphanumeric() || c == '.'))
        .unique()
        .join(", ");
    if !bad_names.is_empty() {
        warn!(
            "Project '{}' lane {} has sample names containing characters other than letters, digits and periods: {}",
            table.project,
            table.lane,
            bad_names
        );
    }
}

/// Columns shared by every table of a run
#[derive(Clone, Copy)]
struct ColumnLayout<'a> {
    carried: &'a [String],
    well_column: &'a str,
    run_columns: &'a BTreeMap<String, String>,
}

/// Builds the preparation tables of one run from its sample sheet and QC output
pub struct PrepBuilder<'a> {
    pub run: &'a RunInfo,
    pub config: &'a PipelineConfig,
    pub read_counts: Option<&'a ReadCounts>,

    /// Projects left out of the preparation files, such as those which failed QC
    pub excluded_projects: BTreeSet<String>,
}

impl<'a> PrepBuilder<'a> {
    pub fn new(run: &'a RunInfo, config: &'a PipelineConfig) -> Self {
        Self {
            run,
            config,
            read_counts: None,
            excluded_projects: BTreeSet::new(),
        }
    }

    /// Columns which are the same on every row of the run
    fn run_columns(&self) -> BTreeMap<String, String> {
        [
            ("platform", PLATFORM),
            ("sequencing_meth", SEQUENCING_METHOD),
            ("center_name", self.config.center_name.as_str()),
            ("run_center", self.run.instrument.run_center),
            ("instrument_model", self.run.instrument.model),
            ("runid", self.run.run_id.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain([("run_date".to_string(), self.run.run_date_label())])
        .collect()
    }

    /// One table per project and lane with at least one sample producing output
    pub fn build(&self, sheet: &SampleSheet, qc_output: &Utf8Path) -> PipelineResult<Vec<PrepTable>> {
        let well_column = sheet.well_column()?;
        let mut carried = sheet.carried_prep_columns()?;
        carried.sort_by_key(|c| {
            sheet
                .data_columns
                .iter()
                .position(|x| x == c)
                .unwrap_or(usize::MAX)
        });
        let run_columns = self.run_columns();
        let generated = sheet.generated_prep_columns();
        for column in sheet.data_columns.iter().filter(|x| generated.contains(x)) {
            warn!("Sample sheet column '{column}' is ignored, preparation files use the derived value");
        }

        let mut tables = Vec::new();
        for params in sheet.project_params()? {
            let project = params.project;
            if self.excluded_projects.contains(&project.name) {
                info!("Skipping preparation files for excluded project '{project}'");
                continue;
            }
            if project.study_id.is_none() {
                warn!("Project '{project}' does not end in a study id, its study id is unknown");
            }
            let layout = ColumnLayout {
                carried: &carried,
                well_column,
                run_columns: &run_columns,
            };
            match self.build_project(sheet, &project, &layout, qc_output) {
                Ok(x) => tables.extend(x),
                Err(e) if e.recovery() == Recovery::SkipProject => {
                    error!("No preparation files are written for project '{project}': {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tables)
    }

    /// Tables of one project, one per lane with at least one sample producing output
    fn build_project(
        &self,
        sheet: &SampleSheet,
        project: &Project,
        layout: &ColumnLayout,
        qc_output: &Utf8Path,
    ) -> PipelineResult<Vec<PrepTable>> {
        let ColumnLayout {
            carried,
            well_column,
            run_columns,
        } = *layout;
        let mut tables = Vec::new();
        let project_name = strip_study_id(&project.name).to_string();
        let files = locate_project_files(&qc_output.join(&project.name))?;

        for lane in sheet.lanes() {
            let samples = sheet
                .samples_for_project(&project.name)
                .filter(|x| x.lane == lane)
                .collect::<Vec<_>>();
            if samples.is_empty() {
                continue;
            }
            let sample_ids = samples
                .iter()
                .map(|x| x.sample_id.clone())
                .collect::<Vec<_>>();
            let lane_files = files
                .iter()
                .filter(|x| file_lane(x.file_name().unwrap_or_default()) == lane)
                .cloned()
                .collect::<Vec<_>>();
            let pairs = map_files(&sample_ids, &lane_files)?;

            let mut rows = Vec::new();
            for sample in samples {
                let Some(pair) = pairs.get(&sample.sample_id) else {
                    warn!(
                        "Sample '{}' of project '{project}' has no QC output on lane {lane}, leaving it out of the preparation file",
                        sample.sample_name
                    );
                    continue;
                };

                let mut row = BTreeMap::new();
                for column in carried.iter() {
                    let Some(value) = sample.get(column) else {
                        return Err(PipelineError::Config(format!(
                            "Sample '{}' is missing the column '{column}'",
                            sample.sample_name
                        )));
                    };
                    row.insert(column.clone(), value.to_string());
                }
                row.extend(run_columns.clone());

                let forward_name = pair.forward.file_name().unwrap_or_default();
                let run_prefix = get_run_prefix(forward_name).ok_or_else(|| {
                    PipelineError::Resolver(format!(
                        "Unable to find a run prefix in filename '{forward_name}'"
                    ))
                })?;
                row.insert("run_prefix".to_string(), run_prefix);
                row.insert("lane".to_string(), lane.to_string());
                row.insert(
                    "well_description".to_string(),
                    format!(
                        "{}.{}.{}",
                        sample.get("sample_plate").unwrap_or_default(),
                        sample.sample_name,
                        sample.get(well_column).unwrap_or_default()
                    ),
                );

                if let Some(read_counts) = self.read_counts {
                    match read_counts.get(&sample.sample_name, lane) {
                        Some(stats) => row.extend(stats.columns()),
                        None => {
                            for column in READ_COUNT_COLUMNS {
                                row.insert(column.to_string(), String::new());
                            }
                        }
                    }
                }

                row.insert("sample_project".to_string(), project_name.clone());
                row.insert("center_project_name".to_string(), project_name.clone());

                if let Some(fixup) = project
                    .study_id
                    .and_then(|x| self.config.study_fixups.get(&x))
                {
                    apply_study_fixup(&mut row, fixup);
                }
                rows.push(row);
            }

            if rows.is_empty() {
                warn!("Project '{project}' has no samples with output on lane {lane}, no preparation file is written");
                continue;
            }

            let columns = order_columns(&carried, rows.iter().flat_map(|x| x.keys()));
            let table = PrepTable {
                project: project.clone(),
                lane,
                columns,
                rows,
            };
            warn_on_sample_names(&table);
            tables.push(table);
        }
        Ok(tables)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::prep::write_prep_files;
    use crate::sample_sheet::tests::two_project_sheet;
    use crate::seq_counts::{FileCounts, SeqCounts};
    use std::fs;

    /// QC output of the two project sheet, with trimmed reads for Proj_1000 and host filtered
    /// reads for Proj_2000
    pub(crate) fn write_qc_output(qc_output: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut files = Vec::new();
        for (project, dir, suffix, samples) in [
            (
                "Proj_1000",
                TRIMMED_DIR,
                ".fastp.fastq.gz",
                [("S1", 1), ("S1_B", 2)],
            ),
            (
                "Proj_2000",
                FILTERED_DIR,
                ".trimmed.fastq.gz",
                [("S2", 3), ("S3", 4)],
            ),
        ] {
            let dir = qc_output.join(project).join(dir);
            fs::create_dir_all(&dir).unwrap();
            for (sample_id, index) in samples {
                for read in ["R1", "R2"] {
                    let path = dir.join(format!("{sample_id}_S{index}_L001_{read}_001{suffix}"));
                    fs::write(&path, vec![b'@'; 4000]).unwrap();
                    files.push(path);
                }
            }
        }
        files
    }

    fn run_info() -> RunInfo {
        RunInfo::parse("220101_A00953_0001_FC").unwrap()
    }

    #[test]
    fn test_happy_path_prep_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let qc_output = root.join("qc");
        write_qc_output(&qc_output);

        let run = run_info();
        let config = PipelineConfig::default();
        let builder = PrepBuilder::new(&run, &config);
        let tables = builder.build(&two_project_sheet(), &qc_output).unwrap();
        assert_eq!(tables.len(), 2);

        let output_dir = root.join("prep");
        let prep_files = write_prep_files(&tables, &run.run_id, &output_dir).unwrap();
        assert_eq!(prep_files.len(), 2);
        assert_eq!(
            prep_files[0].path.file_name().unwrap(),
            "220101_A00953_0001_FC.Proj_1000.1.tsv"
        );
        assert_eq!(
            prep_files[1].path.file_name().unwrap(),
            "220101_A00953_0001_FC.Proj_2000.1.tsv"
        );
        assert!(prep_files.iter().all(|x| x.row_count == 2));

        let table = &tables[0];
        assert_eq!(
            &table.columns[..3],
            &["sample_name", "sample_plate", "well_id_384"]
        );
        assert_eq!(table.columns.len(), 21);
        let derived = &table.columns[10..];
        let mut sorted = derived.to_vec();
        sorted.sort();
        assert_eq!(derived, &sorted[..]);

        let row = &table.rows[1];
        assert_eq!(row["sample_name"], "S1.B");
        assert_eq!(row["run_date"], "2022-01-01");
        assert_eq!(row["instrument_model"], "Illumina NovaSeq 6000");
        assert_eq!(row["run_center"], "IGM");
        assert_eq!(row["center_name"], "UCSDMI");
        assert_eq!(row["platform"], "Illumina");
        assert_eq!(row["sequencing_meth"], "sequencing by synthesis");
        assert_eq!(row["runid"], "220101_A00953_0001_FC");
        assert_eq!(row["lane"], "1");
        assert_eq!(row["run_prefix"], "S1_B_S2_L001");
        assert_eq!(row["well_description"], "Plate_1.S1.B.A3");
        assert_eq!(row["sample_project"], "Proj");
        assert_eq!(row["center_project_name"], "Proj");

        assert_eq!(tables[1].rows[0]["run_prefix"], "S2_S3_L001");

        let text = fs::read_to_string(&prep_files[1].path).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("sample_name\tsample_plate\twell_id_384\t"));
        assert!(lines.iter().skip(1).all(|x| x.split('\t').count() == 21));
    }

    #[test]
    fn test_zero_size_sample_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let qc_output = Utf8Path::from_path(dir.path()).unwrap();
        write_qc_output(qc_output);

        let zero_dir = qc_output.join("Proj_2000").join(ZERO_FILES_DIR);
        fs::create_dir_all(&zero_dir).unwrap();
        for read in ["R1", "R2"] {
            let name = format!("S3_S4_L001_{read}_001.trimmed.fastq.gz");
            fs::rename(
                qc_output.join("Proj_2000").join(FILTERED_DIR).join(&name),
                zero_dir.join(&name),
            )
            .unwrap();
        }

        let run = run_info();
        let config = PipelineConfig::default();
        let tables = PrepBuilder::new(&run, &config)
            .build(&two_project_sheet(), qc_output)
            .unwrap();
        assert_eq!(tables[1].rows.len(), 1);
        assert_eq!(tables[1].rows[0]["sample_name"], "S2");
    }

    #[test]
    fn test_stray_fastq_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let qc_output = Utf8Path::from_path(dir.path()).unwrap();
        write_qc_output(qc_output);
        fs::write(
            qc_output.join("Proj_1000").join("S1_S1_L001_R1_001.fastq.gz"),
            "x",
        )
        .unwrap();

        let err = locate_project_files(&qc_output.join("Proj_1000")).unwrap_err();
        assert!(matches!(err, PipelineError::Resolver(ref m) if m.contains("Unexpected fastq")));
    }

    #[test]
    fn test_unresolved_project_does_not_block_other_projects() {
        let dir = tempfile::tempdir().unwrap();
        let qc_output = Utf8Path::from_path(dir.path()).unwrap();
        write_qc_output(qc_output);
        fs::write(
            qc_output.join("Proj_1000").join("S1_S1_L001_R1_001.fastq.gz"),
            "x",
        )
        .unwrap();

        let run = run_info();
        let config = PipelineConfig::default();
        let builder = PrepBuilder::new(&run, &config);
        let tables = builder.build(&two_project_sheet(), qc_output).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].project.name, "Proj_2000");
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0]["run_prefix"], "S2_S3_L001");
    }

    #[test]
    fn test_missing_project_output_does_not_block_other_projects() {
        let dir = tempfile::tempdir().unwrap();
        let qc_output = Utf8Path::from_path(dir.path()).unwrap();
        write_qc_output(qc_output);
        fs::remove_dir_all(qc_output.join("Proj_2000")).unwrap();

        let run = run_info();
        let config = PipelineConfig::default();
        let builder = PrepBuilder::new(&run, &config);
        let tables = builder.build(&two_project_sheet(), qc_output).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].project.name, "Proj_1000");
    }

    #[test]
    fn test_excluded_project_and_read_counts() {
        let dir = tempfile::tempdir().unwrap();
        let qc_output = Utf8Path::from_path(dir.path()).unwrap();
        let files = write_qc_output(qc_output);
        let sheet = two_project_sheet();

        let mut counts = SeqCounts::new();
        for file in files.iter() {
            let dir = counts.entry(file.parent().unwrap().to_string()).or_default();
            dir.insert(
                file.file_name().unwrap().to_string(),
                FileCounts {
                    seq_counts: 40,
                    base_pairs: 6000,
                },
            );
            let raw_name = file
                .file_name()
                .unwrap()
                .replace(".trimmed.fastq.gz", ".fastq.gz");
            counts
                .entry("/convert/Proj_2000".to_string())
                .or_default()
                .insert(
                    raw_name,
                    FileCounts {
                        seq_counts: 50,
                        base_pairs: 7500,
                    },
                );
        }
        let read_counts = ReadCounts::from_seq_counts(&counts, &sheet.samples);

        let run = run_info();
        let config = PipelineConfig::default();
        let mut builder = PrepBuilder::new(&run, &config);
        builder.read_counts = Some(&read_counts);
        builder.excluded_projects.insert("Proj_1000".to_string());
        let tables = builder.build(&sheet, qc_output).unwrap();

        assert_eq!(tables.len(), 1);
        let row = &tables[0].rows[0];
        assert_eq!(row["raw_reads_r1r2"], "100");
        assert_eq!(row["quality_filtered_reads_r1r2"], "80");
        assert_eq!(row["fraction_passing_quality_filter"], "0.8000");
        assert_eq!(tables[0].columns.len(), 24);
    }

    #[test]
    fn test_study_fixup() {
        let fixup = PipelineConfig::default().study_fixups[&10317].clone();

        let mut row = BTreeMap::from([
            ("sample_name".to_string(), "12345".to_string()),
            ("center_name".to_string(), "OTHER".to_string()),
        ]);
        apply_study_fixup(&mut row, &fixup);
        assert_eq!(row["sample_name"], "000012345");
        assert_eq!(row["center_name"], "UCSDMI");
        assert_eq!(row["library_construction_protocol"], "Knight Lab KHP");

        let mut row = BTreeMap::from([("sample_name".to_string(), "10317.X12".to_string())]);
        apply_study_fixup(&mut row, &fixup);
        assert_eq!(row["sample_name"], "10317.X12");

        let mut row = BTreeMap::from([("sample_name".to_string(), String::new())]);
        apply_study_fixup(&mut row, &fixup);
        assert_eq!(row["sample_name"], "");
    }
}
