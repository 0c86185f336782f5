//! Submission and tracking of one pipeline stage as a scheduler job
//!

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use strum::Display;

use super::scheduler::{JobRecord, QueryError, Scheduler};
use super::template::{JobScriptOptions, render};
use crate::errors::{PipelineError, PipelineResult};
use crate::os_utils::{create_dir_all, write_executable};

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Submitted,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Where to find the diagnostic log of a failed stage
#[derive(Clone, Debug)]
pub enum FailureLog {
    /// A tool-specific error log, falling back to the scheduler logs if absent or empty
    File(Utf8PathBuf),

    /// The stderr logs written by the scheduler for each job element
    SchedulerLogs,
}

/// Final scheduler state of a stage's job
#[derive(Clone, Debug)]
pub struct JobInfo {
    pub job_id: String,
    pub status: StageStatus,
    pub elements: Vec<JobRecord>,
}

/// Shared services used to drive stage jobs
pub struct StageRunner<'a> {
    pub scheduler: &'a dyn Scheduler,
    pub poll_interval: Duration,

    /// Number of trailing scheduler stderr lines attached to a job failure
    pub log_tail_lines: usize,

    /// Set when the process has been asked to terminate
    pub cancel_flag: &'a AtomicBool,
}

impl StageRunner<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Sleep for one poll interval, waking early on cancellation
    fn wait(&self) {
        let step = Duration::from_millis(200);
        let start = Instant::now();
        while !self.is_cancelled() {
            let elapsed = start.elapsed();
            if elapsed >= self.poll_interval {
                break;
            }
            thread::sleep(step.min(self.poll_interval - elapsed));
        }
    }
}

pub type StatusCallback<'a> = &'a mut dyn FnMut(&Stage, StageStatus, StageStatus);

/// One pipeline stage, rendered as a job script in the stage's output root
#[derive(Debug)]
pub struct Stage {
    pub name: String,
    pub output_root: Utf8PathBuf,
    pub script_path: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,

    /// Number of elements for array jobs
    pub array_size: Option<usize>,

    pub failure_log: FailureLog,
    status: StageStatus,
    job_id: Option<String>,
}

impl Stage {
    /// Render the stage's job script into the output root
    ///
    /// The output root and the log directory below it are created if required.
    ///
    pub fn new(
        name: &str,
        output_root: &Utf8Path,
        template: &str,
        options: &JobScriptOptions,
        array_size: Option<usize>,
        failure_log: FailureLog,
    ) -> PipelineResult<Self> {
        create_dir_all(output_root, "stage output")?;
        let log_dir = output_root.join("logs");
        create_dir_all(&log_dir, "stage log")?;

        let mut options = options.clone();
        if let Some(array_size) = array_size {
            if array_size == 0 {
                return Err(PipelineError::Config(format!(
                    "Stage '{name}' has an empty job array"
                )));
            }
            options.array_bounds = format!("1-{array_size}");
        }
        let script = render(template, &options)?;
        let script_path = output_root.join(format!("{name}.sh"));
        write_executable(&script_path, &script)?;
        debug!("Wrote job script for stage '{name}' to '{script_path}'");

        Ok(Self {
            name: name.to_string(),
            output_root: output_root.to_path_buf(),
            script_path,
            log_dir,
            array_size,
            failure_log,
            status: StageStatus::Pending,
            job_id: None,
        })
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    fn transition(&mut self, status: StageStatus, callback: &mut Option<StatusCallback>) {
        if status == self.status {
            return;
        }
        let previous = self.status;
        self.status = status;
        debug!("Stage '{}' status {previous} -> {status}", self.name);
        if let Some(callback) = callback.as_mut() {
            callback(self, previous, status);
        }
    }

    /// Submit the job and poll until it reaches a terminal state
    ///
    /// Once the live query reports the job as finished or unknown, the accounting history decides
    /// the final status. An array job completes only if every element exits 0.
    ///
    pub fn run(
        &mut self,
        runner: &StageRunner,
        mut callback: Option<StatusCallback>,
    ) -> PipelineResult<JobInfo> {
        if self.status != StageStatus::Pending {
            return Err(PipelineError::Schedule(format!(
                "Stage '{}' cannot be submitted from status {}",
                self.name, self.status
            )));
        }
        if runner.is_cancelled() {
            return Err(PipelineError::Cancelled(format!(
                "Stage '{}' was not submitted",
                self.name
            )));
        }

        let job_id = runner.scheduler.submit(&self.script_path, &self.log_dir)?;
        info!("Submitted stage '{}' as job {job_id}", self.name);
        self.job_id = Some(job_id.clone());
        self.transition(StageStatus::Submitted, &mut callback);

        loop {
            runner.wait();
            if runner.is_cancelled() {
                warn!("Cancelling job {job_id} of stage '{}'", self.name);
                if let Err(e) = runner.scheduler.cancel(&job_id) {
                    warn!("{e}");
                }
                self.transition(StageStatus::Failed, &mut callback);
                return Err(PipelineError::Cancelled(format!(
                    "Stage '{}' job {job_id} was cancelled",
                    self.name
                )));
            }

            // The live queue carries no exit codes, final states always come from accounting
            match runner.scheduler.show_job(&job_id) {
                Ok(records) if records.iter().all(|x| x.state.is_terminal()) => {
                    debug!("Job {job_id} has finished, checking accounting history");
                }
                Ok(records) => {
                    if records.iter().any(|x| x.state.is_running()) {
                        self.transition(StageStatus::Running, &mut callback);
                    }
                    continue;
                }
                Err(QueryError::UnknownJob) => {
                    debug!("Job {job_id} left the live queue, checking accounting history");
                }
                Err(QueryError::Other(msg)) => {
                    self.transition(StageStatus::Failed, &mut callback);
                    return Err(PipelineError::Schedule(msg));
                }
            }
            let elements = runner.scheduler.accounting(&job_id)?;
            if elements.is_empty() || elements.iter().any(|x| !x.state.is_terminal()) {
                continue;
            }

            return self.finish(job_id, elements, runner, &mut callback);
        }
    }

    fn finish(
        &mut self,
        job_id: String,
        elements: Vec<JobRecord>,
        runner: &StageRunner,
        callback: &mut Option<StatusCallback>,
    ) -> PipelineResult<JobInfo> {
        let failed = elements
            .iter()
            .filter(|x| !x.succeeded())
            .collect::<Vec<_>>();

        if failed.is_empty() {
            // A job is never observed as completed without having run
            self.transition(StageStatus::Running, callback);
            self.transition(StageStatus::Completed, callback);
            info!("Stage '{}' job {job_id} completed", self.name);
            return Ok(JobInfo {
                job_id,
                status: self.status,
                elements,
            });
        }

        let failed_elements = failed
            .iter()
            .map(|x| {
                format!(
                    "{} {} exit {}",
                    x.job_id,
                    x.state,
                    x.exit_code.map_or("unknown".to_string(), |c| c.to_string())
                )
            })
            .collect::<Vec<_>>();
        self.transition(StageStatus::Failed, callback);

        Err(PipelineError::JobFailed {
            summary: format!(
                "Stage '{}' job {job_id} failed: {} of {} job elements did not complete successfully ({})",
                self.name,
                failed.len(),
                elements.len(),
                failed_elements.join(", ")
            ),
            log_tail: self.failure_log_lines(runner.log_tail_lines),
        })
    }

    /// Return the stage to pending so that it can be submitted again
    pub fn reset_for_retry(&mut self) {
        self.status = StageStatus::Pending;
        self.job_id = None;
    }

    /// Lines of the stage's diagnostic log
    ///
    /// A tool log is reported in full. Scheduler stderr logs hold the noise of every array
    /// element, so only their last `max_scheduler_lines` lines are kept.
    ///
    pub fn failure_log_lines(&self, max_scheduler_lines: usize) -> Vec<String> {
        if let FailureLog::File(path) = &self.failure_log {
            let lines = read_log_lines(path);
            if !lines.is_empty() {
                return lines;
            }
        }

        // Otherwise report the most recently written non-empty scheduler stderr log
        let pattern = self.log_dir.join("*.err");
        let mut logs = glob::glob(pattern.as_str())
            .map(|paths| {
                paths
                    .filter_map(Result::ok)
                    .filter_map(|p| Utf8PathBuf::from_path_buf(p).ok())
                    .filter_map(|p| fs::metadata(&p).ok().map(|m| (m, p)))
                    .filter(|(m, _)| m.len() > 0)
                    .map(|(m, p)| (m.modified().ok(), p))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        logs.sort();
        match logs.last() {
            Some((_, path)) => {
                let lines = read_log_lines(path);
                let start = lines.len().saturating_sub(max_scheduler_lines);
                lines[start..].to_vec()
            }
            None => Vec::new(),
        }
    }
}

/// Non-empty lines of a text file, or nothing if it cannot be read
fn read_log_lines(path: &Utf8Path) -> Vec<String> {
    let text = match fs::read_to_string(path) {
        Ok(x) => x,
        Err(_) => return Vec::new(),
    };
    text.lines()
        .filter(|x| !x.trim().is_empty())
        .map(|x| x.to_string())
        .collect()
}

/// Run a stage, resubmitting it up to `retries` times after a job failure
pub fn run_with_retries(
    stage: &mut Stage,
    runner: &StageRunner,
    retries: u32,
    mut callback: Option<StatusCallback>,
) -> PipelineResult<JobInfo> {
    let mut attempt = 0;
    loop {
        let result = match callback.as_mut() {
            Some(cb) => stage.run(runner, Some(&mut **cb)),
            None => stage.run(runner, None),
        };
        match result {
            Err(PipelineError::JobFailed { summary, .. }) if attempt < retries => {
                attempt += 1;
                warn!(
                    "Resubmitting stage '{}' after failure (attempt {attempt} of {retries}): {summary}",
                    stage.name
                );
                stage.reset_for_retry();
            }
            result => return result,
        }
    }
}
