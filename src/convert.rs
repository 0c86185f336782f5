//! Base-call conversion stage
//!
//! Converts the instrument's base-call tree into per-sample fastq files, partitioned by project,
//! with either bcl-convert or bcl2fastq.
//!

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use strum::Display;

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::job::find_executable;
use crate::job::stage::{FailureLog, JobInfo, Stage, StageRunner, StatusCallback, run_with_retries};
use crate::job::template::{CONVERT_TEMPLATE, JobScriptOptions, shell_quote};
use crate::os_utils::walk_files;
use crate::run_dir_scanner::BASE_CALLS_SUBPATH;
use crate::sample_sheet::SampleSheet;

const BASE_CALL_SUFFIXES: [&str; 3] = [".bcl", ".bcl.gz", ".cbcl"];

pub const STAGE_NAME: &str = "convert";

/// Error log written by the converter, relative to its output directory
pub const ERROR_LOG_SUBPATH: &str = "Logs/Errors.log";

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ConverterKind {
    #[strum(to_string = "bcl-convert")]
    BclConvert,
    #[strum(to_string = "bcl2fastq")]
    Bcl2Fastq,
}

impl ConverterKind {
    /// Identify the converter from its executable name
    pub fn detect(executable: &Utf8Path) -> PipelineResult<Self> {
        let name = executable.file_name().unwrap_or(executable.as_str());
        if name.contains("bcl-convert") {
            Ok(Self::BclConvert)
        } else if name.contains("bcl2fastq") {
            Ok(Self::Bcl2Fastq)
        } else {
            Err(PipelineError::Config(format!(
                "Unrecognised base-call converter '{executable}', expected bcl-convert or bcl2fastq"
            )))
        }
    }

    pub fn command_line(
        &self,
        executable: &Utf8Path,
        run_dir: &Utf8Path,
        sample_sheet: &Utf8Path,
        output_dir: &Utf8Path,
        threads: u32,
    ) -> String {
        let executable = shell_quote(executable.as_str());
        let run_dir = shell_quote(run_dir.as_str());
        let sample_sheet = shell_quote(sample_sheet.as_str());
        let output_dir = shell_quote(output_dir.as_str());
        match self {
            Self::BclConvert => format!(
                "{executable} --sample-sheet {sample_sheet} \
--output-directory {output_dir} \
--bcl-input-directory {run_dir} \
--bcl-num-decompression-threads {threads} \
--bcl-num-conversion-threads {threads} \
--bcl-num-compression-threads {threads} \
--bcl-num-parallel-tiles {threads} \
--bcl-sampleproject-subdirectories true \
--force"
            ),
            Self::Bcl2Fastq => format!(
                "{executable} --sample-sheet {sample_sheet} \
--minimum-trimmed-read-length 1 \
--mask-short-adapter-reads 1 \
-R {run_dir} \
-o {output_dir} \
--loading-threads {threads} \
--processing-threads {threads} \
--writing-threads {threads} \
--create-fastq-for-index-reads \
--ignore-missing-positions"
            ),
        }
    }
}

fn is_base_call_file(path: &Utf8Path) -> bool {
    let name = path.file_name().unwrap_or_default();
    BASE_CALL_SUFFIXES.iter().any(|x| name.ends_with(x))
}

/// Check that the run directory holds a base-call tree with at least one base-call file
pub fn check_base_calls(run_dir: &Utf8Path) -> PipelineResult<()> {
    let base_calls = run_dir.join(BASE_CALLS_SUBPATH);
    if !base_calls.is_dir() {
        return Err(PipelineError::io(
            format!("Run directory '{run_dir}' has no base-call directory '{BASE_CALLS_SUBPATH}'"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }

    let mut unreadable = None;
    let files = walk_files(&base_calls, &mut |dir, e| {
        unreadable.get_or_insert_with(|| format!("{dir}: {e}"));
    });
    if files.iter().any(|x| is_base_call_file(x)) {
        return Ok(());
    }
    let detail = unreadable.map_or(String::new(), |x| format!(" (unreadable {x})"));
    Err(PipelineError::io(
        format!("No base-call files found under '{base_calls}'{detail}"),
        std::io::Error::from(std::io::ErrorKind::NotFound),
    ))
}

pub struct ConvertJob {
    pub stage: Stage,
    pub kind: ConverterKind,
    pub output_dir: Utf8PathBuf,
    projects: Vec<String>,
}

impl ConvertJob {
    pub fn new(
        run_dir: &Utf8Path,
        sample_sheet_path: &Utf8Path,
        sheet: &SampleSheet,
        output_dir: &Utf8Path,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let executable = find_executable(&config.tools.bcl_converter)?;
        let kind = ConverterKind::detect(&executable)?;
        check_base_calls(run_dir)?;
        if !sample_sheet_path.is_file() {
            return Err(PipelineError::io(
                format!("Sample sheet '{sample_sheet_path}' does not exist"),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        let mut options = JobScriptOptions::new(STAGE_NAME, &config.convert);
        options.run_dir = run_dir.to_string();
        options.sample_sheet_path = sample_sheet_path.to_string();
        options.cmd_line = kind.command_line(
            &executable,
            run_dir,
            sample_sheet_path,
            output_dir,
            config.convert.cores_per_task,
        );

        let stage = Stage::new(
            STAGE_NAME,
            output_dir,
            CONVERT_TEMPLATE,
            &options,
            None,
            FailureLog::File(output_dir.join(ERROR_LOG_SUBPATH)),
        )?;

        let mut projects = Vec::new();
        for sample in sheet.samples.iter() {
            if !projects.contains(&sample.project.name) {
                projects.push(sample.project.name.clone());
            }
        }

        Ok(Self {
            stage,
            kind,
            output_dir: output_dir.to_path_buf(),
            projects,
        })
    }

    pub fn run(
        &mut self,
        runner: &StageRunner,
        retries: u32,
        callback: Option<StatusCallback>,
    ) -> PipelineResult<JobInfo> {
        info!(
            "Converting base calls with {} into '{}'",
            self.kind, self.output_dir
        );
        let info = run_with_retries(&mut self.stage, runner, retries, callback)?;
        self.check_output()?;
        Ok(info)
    }

    /// Fastq files written for one project
    pub fn project_fastqs(&self, project: &str) -> Vec<Utf8PathBuf> {
        let dir = self.output_dir.join(project);
        walk_files(&dir, &mut |_, _| {})
            .into_iter()
            .filter(|x| x.as_str().ends_with(".fastq.gz"))
            .collect()
    }

    /// Every project of the sample sheet must have produced at least one fastq file
    pub fn check_output(&self) -> PipelineResult<()> {
        let missing = self
            .projects
            .iter()
            .filter(|x| self.project_fastqs(x).is_empty())
            .cloned()
            .collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok(());
        }
        Err(PipelineError::JobFailed {
            summary: format!(
                "Conversion completed but produced no fastq files for projects: {}",
                missing.join(", ")
            ),
            log_tail: self.stage.failure_log_lines(10),
        })
    }
}
