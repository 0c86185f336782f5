//! Pipeline driver
//!
//! Each eligible run directory is taken through conversion, QC, sequence counting and preparation
//! file generation in turn. A failure is contained to the run it occurred in unless its recovery
//! policy requires the whole driver to stop.
//!

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::{error, info, warn};

use crate::cli::{RunSettings, SharedSettings};
use crate::config::{PipelineConfig, load_config, write_config};
use crate::convert::ConvertJob;
use crate::errors::{PipelineError, PipelineResult, Recovery};
use crate::job::scheduler::Slurm;
use crate::job::stage::{Stage, StageRunner, StageStatus};
use crate::os_utils::{create_dir_all, walk_files};
use crate::prep::builder::PrepBuilder;
use crate::prep::read_counts::ReadCounts;
use crate::prep::run_id::RunInfo;
use crate::prep::write_prep_files;
use crate::qc_filter::{QcFilterJob, project_read_files};
use crate::run_dir_scanner::{RunDirectory, scan};
use crate::sample_sheet::{self, Assay, SampleSheet};
use crate::seq_counts::{SeqCountsJob, is_fastq};
use crate::signals;

/// Written into a run's output directory once every stage has completed
pub const COMPLETION_MARKER: &str = "seqproc.complete";

pub const CONVERT_DIR: &str = "ConvertJob";
pub const QC_DIR: &str = "QCJob";
pub const SEQ_COUNTS_DIR: &str = "SeqCounts";
pub const PREP_DIR: &str = "PrepFiles";

/// Run selection and output locations for one driver invocation
#[derive(Clone, Debug)]
pub struct DriverSettings {
    pub input_root: Utf8PathBuf,

    /// Directory holding one `<run_id>.csv` sample sheet per run
    pub sample_sheet_dir: Utf8PathBuf,

    pub output_dir: Utf8PathBuf,
    pub younger_hours: u64,
    pub older_hours: u64,

    /// Report the runs which would be processed without submitting any job
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed { prep_file_count: usize },
    AlreadyProcessed,
    Planned,
    Failed(PipelineError),
}

/// Log every stage status change
fn log_transition(stage: &Stage, previous: StageStatus, status: StageStatus) {
    info!(
        "Stage '{}' job {}: {previous} -> {status}",
        stage.name,
        stage.job_id().unwrap_or("-")
    );
}

pub struct Pipeline<'a> {
    pub settings: DriverSettings,
    pub config: &'a PipelineConfig,
    pub runner: StageRunner<'a>,
}

impl Pipeline<'_> {
    pub fn run_output_dir(&self, run_id: &str) -> Utf8PathBuf {
        self.settings.output_dir.join(run_id)
    }

    pub fn sample_sheet_path(&self, run_id: &str) -> Utf8PathBuf {
        self.settings.sample_sheet_dir.join(format!("{run_id}.csv"))
    }

    fn is_processed(&self, run_id: &str) -> bool {
        self.run_output_dir(run_id).join(COMPLETION_MARKER).exists()
    }

    /// Load and check the sample sheet of one run
    fn load_sample_sheet(&self, run_id: &str) -> PipelineResult<(Utf8PathBuf, SampleSheet)> {
        let path = self.sample_sheet_path(run_id);
        if !path.is_file() {
            return Err(PipelineError::Config(format!(
                "No sample sheet found for run '{run_id}' at '{path}'"
            )));
        }
        let sheet = sample_sheet::validate(sample_sheet::load(&path)?)?;
        if sheet.assay()? == Assay::Amplicon {
            return Err(PipelineError::Config(format!(
                "Sample sheet '{path}' is for an amplicon run, which is formatted with the amplicon preparation command"
            )));
        }
        Ok((path, sheet))
    }

    /// Process every eligible run below the input root
    ///
    /// Returns the outcome of each run considered. An error is returned only when a failure's
    /// recovery policy requires the driver to stop.
    ///
    pub fn run(&self) -> PipelineResult<Vec<(String, RunOutcome)>> {
        let runs = scan(
            &self.settings.input_root,
            self.settings.younger_hours,
            self.settings.older_hours,
        );
        info!(
            "Found {} completed run directories below '{}'",
            runs.len(),
            self.settings.input_root
        );

        let mut outcomes = Vec::new();
        for run in runs.iter() {
            let run_id = run.run_id().to_string();
            if self.runner.cancel_flag.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(PipelineError::Cancelled(format!(
                    "Stopped before processing run '{run_id}'"
                )));
            }
            if self.is_processed(&run_id) {
                info!("Skipping run '{run_id}', it has already been processed");
                outcomes.push((run_id, RunOutcome::AlreadyProcessed));
                continue;
            }

            let outcome = if self.settings.dry_run {
                self.plan_run(run).map(|_| RunOutcome::Planned)
            } else {
                self.process_run(run)
                    .map(|prep_file_count| RunOutcome::Completed { prep_file_count })
            };
            match outcome {
                Ok(x) => outcomes.push((run_id, x)),
                Err(e) if e.recovery() == Recovery::Abort => {
                    error!("Stopping pipeline while processing run '{run_id}': {e}");
                    return Err(e);
                }
                Err(e) => {
                    error!("Processing of run '{run_id}' failed: {e}");
                    outcomes.push((run_id, RunOutcome::Failed(e)));
                }
            }
        }
        Ok(outcomes)
    }

    /// Check that a run could be processed, without submitting anything
    pub fn plan_run(&self, run: &RunDirectory) -> PipelineResult<()> {
        let run_id = run.run_id();
        RunInfo::parse(run_id)?;
        let (path, sheet) = self.load_sample_sheet(run_id)?;
        let projects = sheet.project_params()?;
        info!(
            "Would process run '{run_id}' with sample sheet '{path}': {} samples in {} projects, output to '{}'",
            sheet.samples.len(),
            projects.len(),
            self.run_output_dir(run_id)
        );
        Ok(())
    }

    /// Take one run through every stage, returning the number of preparation files written
    pub fn process_run(&self, run: &RunDirectory) -> PipelineResult<usize> {
        let run_id = run.run_id();
        info!("Processing run '{run_id}' from '{}'", run.path);

        let run_info = RunInfo::parse(run_id)?;
        let (sheet_path, sheet) = self.load_sample_sheet(run_id)?;
        let output_dir = self.run_output_dir(run_id);
        create_dir_all(&output_dir, "run output")?;

        let retries = self.config.retries;
        let mut callback = log_transition;

        let convert_dir = output_dir.join(CONVERT_DIR);
        let mut convert = ConvertJob::new(&run.path, &sheet_path, &sheet, &convert_dir, self.config)?;
        convert.run(&self.runner, retries, Some(&mut callback))?;

        let qc_dir = output_dir.join(QC_DIR);
        let mut qc = QcFilterJob::new(&convert_dir, &sheet, &qc_dir, self.config)?;
        let qc_summary = qc.run(&self.runner, Some(&mut callback))?;
        if qc_summary.completed.is_empty() {
            return Err(PipelineError::JobFailed {
                summary: format!("No project of run '{run_id}' completed QC"),
                log_tail: Vec::new(),
            });
        }

        let mut count_files = Vec::new();
        for project in qc_summary.completed.iter() {
            count_files.extend(project_read_files(&convert_dir, project));
            count_files.extend(
                walk_files(&qc_dir.join(project), &mut |path, e| {
                    warn!("Unable to read QC output directory '{path}': {e}");
                })
                .into_iter()
                .filter(|x| is_fastq(x)),
            );
        }
        let mut seq_counts = SeqCountsJob::new(count_files, &output_dir.join(SEQ_COUNTS_DIR), self.config)?;
        let (_, counts) = seq_counts.run(&self.runner, retries, Some(&mut callback))?;
        let read_counts = ReadCounts::from_seq_counts(&counts, &sheet.samples);

        let mut builder = PrepBuilder::new(&run_info, self.config);
        builder.read_counts = Some(&read_counts);
        for (project, e) in qc_summary.skipped.iter() {
            warn!("No preparation file is written for project '{project}', which failed QC: {e}");
            builder.excluded_projects.insert(project.clone());
        }
        let tables = builder.build(&sheet, &qc_dir)?;
        let prep_files = write_prep_files(&tables, run_id, &output_dir.join(PREP_DIR))?;

        write_completion_marker(&output_dir)?;
        info!(
            "Run '{run_id}' completed with {} preparation files",
            prep_files.len()
        );
        Ok(prep_files.len())
    }
}

/// Summarize the run outcomes, returning an error if any run failed
fn summarize_outcomes(outcomes: &[(String, RunOutcome)]) -> PipelineResult<()> {
    let mut failed = Vec::new();
    for (run_id, outcome) in outcomes.iter() {
        match outcome {
            RunOutcome::Completed { prep_file_count } => {
                info!("Run '{run_id}': completed, {prep_file_count} preparation files written")
            }
            RunOutcome::AlreadyProcessed => info!("Run '{run_id}': already processed"),
            RunOutcome::Planned => info!("Run '{run_id}': ready to process"),
            RunOutcome::Failed(e) => {
                info!("Run '{run_id}': failed");
                failed.push((run_id.as_str(), e));
            }
        }
    }
    match failed.first() {
        None => Ok(()),
        Some((run_id, e)) => Err(PipelineError::JobFailed {
            summary: format!(
                "{} of {} runs failed, first failure in run '{run_id}': {e}",
                failed.len(),
                outcomes.len()
            ),
            log_tail: Vec::new(),
        }),
    }
}

/// Entry point of the run command
pub fn run_pipeline(shared: &SharedSettings, settings: &RunSettings) -> PipelineResult<()> {
    let config = load_config(settings.config_filename.as_deref())?;
    config.validate()?;
    write_config(&settings.output_dir, &config)?;
    info!(
        "Local helpers will use up to {} threads",
        shared.thread_count
    );

    let cancel_flag = signals::install_handlers();
    let scheduler = Slurm;
    let pipeline = Pipeline {
        settings: DriverSettings {
            input_root: settings.input_root.clone(),
            sample_sheet_dir: settings.sample_sheet_dir.clone(),
            output_dir: settings.output_dir.clone(),
            younger_hours: settings.younger_hours,
            older_hours: settings.older_hours,
            dry_run: settings.dry_run,
        },
        config: &config,
        runner: StageRunner {
            scheduler: &scheduler,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            log_tail_lines: config.log_tail_lines,
            cancel_flag,
        },
    };

    let outcomes = pipeline.run()?;
    summarize_outcomes(&outcomes)
}

fn write_completion_marker(output_dir: &Utf8Path) -> PipelineResult<()> {
    let filename = output_dir.join(COMPLETION_MARKER);
    let content = format!("{}\n", chrono::Local::now().to_rfc3339());
    fs::write(&filename, content).map_err(|e| {
        PipelineError::io(format!("Unable to write completion marker '{filename}'"), e)
    })
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::job::scheduler::{JobRecord, JobState, QueryError, Scheduler};
    use crate::qc_filter::tests::{stub_tool_config, write_convert_output};
    use crate::run_dir_scanner::{BASE_CALLS_SUBPATH, COMPLETION_SENTINEL};
    use crate::sample_sheet::tests::two_project_sheet_text;

    /// Scheduler which produces each stage's expected output on submission, then reports success
    #[derive(Default)]
    struct SimulatedCluster {
        submitted: RefCell<Vec<String>>,
        fail_stage: Option<String>,

        /// Number of submissions refused before the queue accepts work
        refused_submissions: Cell<usize>,

        /// Project whose QC job leaves a fastq file outside the sorted layout
        stray_fastq_project: Option<String>,
    }

    impl SimulatedCluster {
        fn write_qc_output(&self, script: &Utf8Path, project: &str) {
            let qc_dir = script.parent().unwrap();
            let convert_dir = qc_dir.parent().unwrap().join(CONVERT_DIR);
            let filtering = fs::read_to_string(script).unwrap().contains("::MUX::");
            let project_dir = qc_dir.join(project);
            fs::create_dir_all(&project_dir).unwrap();
            for file in project_read_files(&convert_dir, project) {
                let base = file.file_name().unwrap().strip_suffix(".fastq.gz").unwrap();
                let name = if filtering {
                    format!("{base}.fastq.gz")
                } else {
                    format!("{base}.fastp.fastq.gz")
                };
                fs::write(project_dir.join(name), vec![b'@'; 4000]).unwrap();
                if file.as_str().contains("_R1_") {
                    fs::write(project_dir.join(format!("{base}.json")), "{}").unwrap();
                }
            }
            if self.stray_fastq_project.as_deref() == Some(project) {
                let partial_dir = project_dir.join("partial");
                fs::create_dir_all(&partial_dir).unwrap();
                fs::write(partial_dir.join("S1_S1_L001_R1_001.fastq.gz"), "x").unwrap();
            }
        }

        fn write_counts(&self, script: &Utf8Path) {
            let text = fs::read_to_string(script).unwrap();
            let prefix = text
                .lines()
                .find_map(|x| x.strip_prefix("manifest="))
                .and_then(|x| x.strip_suffix("-${SLURM_ARRAY_TASK_ID}"))
                .unwrap();
            let mut counts = String::new();
            for i in 1.. {
                let Ok(manifest) = fs::read_to_string(format!("{prefix}-{i}")) else {
                    break;
                };
                for file in manifest.lines() {
                    let n = if file.contains(QC_DIR) { 80 } else { 100 };
                    counts += &format!("{file}\t{n}\t{}\n", n * 151);
                }
            }
            fs::write(script.parent().unwrap().join("counts_1.tsv"), counts).unwrap();
        }
    }

    impl Scheduler for SimulatedCluster {
        fn submit(&self, script: &Utf8Path, _log_dir: &Utf8Path) -> PipelineResult<String> {
            let name = script.file_stem().unwrap().to_string();
            let refused = self.refused_submissions.get();
            if refused > 0 {
                self.refused_submissions.set(refused - 1);
                return Err(PipelineError::Schedule(format!(
                    "Submission of job script '{script}' was refused: queue closed"
                )));
            }
            if self.fail_stage.as_deref() != Some(name.as_str()) {
                if name == "convert" {
                    write_convert_output(script.parent().unwrap());
                } else if let Some(project) = name.strip_prefix("qc_filter_") {
                    self.write_qc_output(script, project);
                } else if name == "seq_counts" {
                    self.write_counts(script);
                }
            }
            let mut submitted = self.submitted.borrow_mut();
            submitted.push(name);
            Ok(submitted.len().to_string())
        }

        fn show_job(&self, _job_id: &str) -> Result<Vec<JobRecord>, QueryError> {
            Err(QueryError::UnknownJob)
        }

        fn accounting(&self, job_id: &str) -> PipelineResult<Vec<JobRecord>> {
            let index = job_id.parse::<usize>().unwrap() - 1;
            let failed = self.fail_stage.as_deref() == Some(self.submitted.borrow()[index].as_str());
            Ok(vec![JobRecord {
                job_id: format!("{job_id}_1"),
                state: if failed { JobState::Failed } else { JobState::Completed },
                exit_code: Some(if failed { 1 } else { 0 }),
            }])
        }

        fn cancel(&self, _job_id: &str) -> PipelineResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        settings: DriverSettings,
        config: PipelineConfig,
    }

    fn fixture(run_ids: &[&str]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap().to_path_buf();
        let config = stub_tool_config(&root);

        let input_root = root.join("runs");
        let sample_sheet_dir = root.join("sheets");
        fs::create_dir_all(&sample_sheet_dir).unwrap();
        for run_id in run_ids {
            let run_dir = input_root.join(run_id);
            let lane_dir = run_dir.join(BASE_CALLS_SUBPATH).join("L001");
            fs::create_dir_all(&lane_dir).unwrap();
            fs::write(lane_dir.join("s_1_1101.cbcl"), "x").unwrap();
            fs::write(run_dir.join(COMPLETION_SENTINEL), "").unwrap();
            fs::write(
                sample_sheet_dir.join(format!("{run_id}.csv")),
                two_project_sheet_text(),
            )
            .unwrap();
        }

        let settings = DriverSettings {
            input_root,
            sample_sheet_dir,
            output_dir: root.join("output"),
            younger_hours: 0,
            older_hours: 48,
            dry_run: false,
        };
        Fixture {
            _tmp: tmp,
            settings,
            config,
        }
    }

    fn runner<'a>(scheduler: &'a dyn Scheduler, cancel_flag: &'a AtomicBool) -> StageRunner<'a> {
        StageRunner {
            scheduler,
            poll_interval: Duration::ZERO,
            log_tail_lines: 10,
            cancel_flag,
        }
    }

    #[test]
    fn test_pipeline_happy_path() {
        let f = fixture(&["220101_A00953_0001_FC"]);
        let cluster = SimulatedCluster::default();
        let cancel_flag = AtomicBool::new(false);
        let pipeline = Pipeline {
            settings: f.settings.clone(),
            config: &f.config,
            runner: runner(&cluster, &cancel_flag),
        };

        let outcomes = pipeline.run().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].1,
            RunOutcome::Completed { prep_file_count: 2 }
        ));
        assert_eq!(
            *cluster.submitted.borrow(),
            vec!["convert", "qc_filter_Proj_1000", "qc_filter_Proj_2000", "seq_counts"]
        );

        let output_dir = pipeline.run_output_dir("220101_A00953_0001_FC");
        assert!(output_dir.join(COMPLETION_MARKER).exists());
        assert!(
            output_dir
                .join(QC_DIR)
                .join("Proj_2000")
                .join("filtered_sequences")
                .join("S2_S1_L001_R1_001.trimmed.fastq.gz")
                .exists()
        );

        let prep = output_dir
            .join(PREP_DIR)
            .join("220101_A00953_0001_FC.Proj_1000.1.tsv");
        let text = fs::read_to_string(prep).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap().split('\t').collect::<Vec<_>>();
        let row = lines.next().unwrap().split('\t').collect::<Vec<_>>();
        let value = |column: &str| row[header.iter().position(|x| *x == column).unwrap()];
        assert_eq!(value("run_date"), "2022-01-01");
        assert_eq!(value("raw_reads_r1r2"), "200");
        assert_eq!(value("quality_filtered_reads_r1r2"), "160");
        assert_eq!(value("fraction_passing_quality_filter"), "0.8000");
        assert_eq!(lines.count(), 1);

        // A second invocation skips the processed run
        let outcomes = pipeline.run().unwrap();
        assert!(matches!(outcomes[0].1, RunOutcome::AlreadyProcessed));
        assert_eq!(cluster.submitted.borrow().len(), 4);
    }

    #[test]
    fn test_failed_run_is_contained() {
        let f = fixture(&["220101_A00953_0001_FC", "220102_A00953_0002_FC"]);
        let cluster = SimulatedCluster {
            fail_stage: Some("convert".to_string()),
            ..Default::default()
        };
        let cancel_flag = AtomicBool::new(false);
        let pipeline = Pipeline {
            settings: f.settings.clone(),
            config: &f.config,
            runner: runner(&cluster, &cancel_flag),
        };

        let outcomes = pipeline.run().unwrap();
        assert_eq!(outcomes.len(), 2);
        for (run_id, outcome) in outcomes.iter() {
            assert!(matches!(outcome, RunOutcome::Failed(PipelineError::JobFailed { .. })));
            assert!(!pipeline.run_output_dir(run_id).join(COMPLETION_MARKER).exists());
        }
        assert_eq!(*cluster.submitted.borrow(), vec!["convert", "convert"]);
    }

    #[test]
    fn test_refused_submission_skips_only_its_run() {
        let f = fixture(&["220101_A00953_0001_FC", "220102_A00953_0002_FC"]);
        let cluster = SimulatedCluster {
            refused_submissions: Cell::new(1),
            ..Default::default()
        };
        let cancel_flag = AtomicBool::new(false);
        let pipeline = Pipeline {
            settings: f.settings.clone(),
            config: &f.config,
            runner: runner(&cluster, &cancel_flag),
        };

        let outcomes = pipeline.run().unwrap();
        assert_eq!(outcomes.len(), 2);
        let outcome = |run_id: &str| &outcomes.iter().find(|x| x.0 == run_id).unwrap().1;
        assert!(matches!(
            outcome("220101_A00953_0001_FC"),
            RunOutcome::Failed(PipelineError::Schedule(_))
        ));
        assert!(matches!(
            outcome("220102_A00953_0002_FC"),
            RunOutcome::Completed { prep_file_count: 2 }
        ));
        assert!(
            !pipeline
                .run_output_dir("220101_A00953_0001_FC")
                .join(COMPLETION_MARKER)
                .exists()
        );
        assert!(
            pipeline
                .run_output_dir("220102_A00953_0002_FC")
                .join(COMPLETION_MARKER)
                .exists()
        );
        assert_eq!(
            *cluster.submitted.borrow(),
            vec!["convert", "qc_filter_Proj_1000", "qc_filter_Proj_2000", "seq_counts"]
        );
        assert!(matches!(
            summarize_outcomes(&outcomes),
            Err(PipelineError::JobFailed { .. })
        ));
    }

    #[test]
    fn test_unresolved_project_still_writes_other_prep_files() {
        let f = fixture(&["220101_A00953_0001_FC"]);
        let cluster = SimulatedCluster {
            stray_fastq_project: Some("Proj_1000".to_string()),
            ..Default::default()
        };
        let cancel_flag = AtomicBool::new(false);
        let pipeline = Pipeline {
            settings: f.settings.clone(),
            config: &f.config,
            runner: runner(&cluster, &cancel_flag),
        };

        let outcomes = pipeline.run().unwrap();
        assert!(matches!(
            outcomes[0].1,
            RunOutcome::Completed { prep_file_count: 1 }
        ));

        let output_dir = pipeline.run_output_dir("220101_A00953_0001_FC");
        let prep_dir = output_dir.join(PREP_DIR);
        assert!(
            !prep_dir
                .join("220101_A00953_0001_FC.Proj_1000.1.tsv")
                .exists()
        );
        assert!(
            prep_dir
                .join("220101_A00953_0001_FC.Proj_2000.1.tsv")
                .exists()
        );
        assert!(output_dir.join(COMPLETION_MARKER).exists());
    }

    #[test]
    fn test_dry_run_and_missing_sheet() {
        let mut f = fixture(&["220101_A00953_0001_FC", "220102_A00953_0002_FC"]);
        fs::remove_file(f.settings.sample_sheet_dir.join("220102_A00953_0002_FC.csv")).unwrap();
        f.settings.dry_run = true;

        let cluster = SimulatedCluster::default();
        let cancel_flag = AtomicBool::new(false);
        let pipeline = Pipeline {
            settings: f.settings.clone(),
            config: &f.config,
            runner: runner(&cluster, &cancel_flag),
        };
        let outcomes = pipeline.run().unwrap();
        assert!(matches!(outcomes[0].1, RunOutcome::Planned));
        assert!(matches!(
            outcomes[1].1,
            RunOutcome::Failed(PipelineError::Config(_))
        ));
        assert!(cluster.submitted.borrow().is_empty());
    }

    #[test]
    fn test_cancellation_stops_driver() {
        let f = fixture(&["220101_A00953_0001_FC"]);
        let cluster = SimulatedCluster::default();
        let cancel_flag = AtomicBool::new(true);
        let pipeline = Pipeline {
            settings: f.settings.clone(),
            config: &f.config,
            runner: runner(&cluster, &cancel_flag),
        };
        assert!(matches!(pipeline.run(), Err(PipelineError::Cancelled(_))));
        assert!(cluster.submitted.borrow().is_empty());
    }

    #[test]
    fn test_summarize_outcomes() {
        let mut outcomes = vec![
            ("run_a".to_string(), RunOutcome::Completed { prep_file_count: 2 }),
            ("run_b".to_string(), RunOutcome::AlreadyProcessed),
        ];
        assert!(summarize_outcomes(&outcomes).is_ok());

        outcomes.push((
            "run_c".to_string(),
            RunOutcome::Failed(PipelineError::Resolver("no files".to_string())),
        ));
        match summarize_outcomes(&outcomes) {
            Err(PipelineError::JobFailed { summary, .. }) => {
                assert!(summary.starts_with("1 of 3 runs failed"));
                assert!(summary.contains("run_c"));
            }
            x => panic!("unexpected summary result: {x:?}"),
        }
    }
}
