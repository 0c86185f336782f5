//! Cluster scheduler access
//!
//! The pipeline only needs four scheduler operations: submit a script, query the live state of a
//! job, query the accounting history of a job, and cancel a job. A job that has left the live
//! queue must be distinguishable from other query failures, so that the accounting history can be
//! consulted for its final exit status.
//!

use std::process::{Command, Output};
use std::str::FromStr;

use camino::Utf8Path;
use log::debug;
use strum::{Display, EnumString};

use crate::errors::{PipelineError, PipelineResult};

/// Job state tokens reported by the scheduler
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Configuring,
    Running,
    Completing,
    Suspended,
    Requeued,
    Resizing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    OutOfMemory,
    NodeFail,
    BootFail,
    Deadline,
    Preempted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Cancelled
                | Self::Timeout
                | Self::OutOfMemory
                | Self::NodeFail
                | Self::BootFail
                | Self::Deadline
                | Self::Preempted
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Completing)
    }
}

/// State of one job, or one element of an array job
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub state: JobState,

    /// Only known once the job is terminal
    pub exit_code: Option<i32>,
}

impl JobRecord {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed && self.exit_code.unwrap_or(0) == 0
    }
}

#[derive(Debug)]
pub enum QueryError {
    /// The job is no longer in the live queue
    UnknownJob,
    Other(String),
}

pub trait Scheduler {
    /// Submit a job script, returning the new job id
    ///
    /// Scheduler stdout and stderr for the job are directed into `log_dir`.
    ///
    fn submit(&self, script: &Utf8Path, log_dir: &Utf8Path) -> PipelineResult<String>;

    /// Live state of every element of the job
    fn show_job(&self, job_id: &str) -> Result<Vec<JobRecord>, QueryError>;

    /// Final state of every element of the job from the accounting history
    fn accounting(&self, job_id: &str) -> PipelineResult<Vec<JobRecord>>;

    fn cancel(&self, job_id: &str) -> PipelineResult<()>;
}

/// Parse a scheduler state token such as `CANCELLED by 1234` or `COMPLETED`
pub fn parse_state(token: &str) -> Option<JobState> {
    let token = token.split_whitespace().next()?.trim_end_matches('+');
    JobState::from_str(token).ok()
}

/// Parse an `exit:signal` pair into an exit status
fn parse_exit_code(token: &str) -> Option<i32> {
    let mut fields = token.split(':');
    let exit = fields.next()?.trim().parse::<i32>().ok()?;
    let signal = fields
        .next()
        .and_then(|x| x.trim().parse::<i32>().ok())
        .unwrap_or(0);
    Some(if exit == 0 && signal != 0 { 128 + signal } else { exit })
}

/// Parse `jobid|state` lines from a live queue query
pub fn parse_queue_lines(text: &str) -> Result<Vec<JobRecord>, String> {
    let mut records = Vec::new();
    for line in text.lines().map(|x| x.trim()).filter(|x| !x.is_empty()) {
        let fields = line.split('|').collect::<Vec<_>>();
        let (job_id, state) = match fields.as_slice() {
            [job_id, state, ..] => (job_id, state),
            _ => return Err(format!("Unexpected queue query line: '{line}'")),
        };
        let state = parse_state(state).ok_or(format!("Unknown job state in line: '{line}'"))?;
        records.push(JobRecord {
            job_id: job_id.to_string(),
            state,
            exit_code: None,
        });
    }
    Ok(records)
}

/// Parse `jobid|state|exit:signal` lines from an accounting query
pub fn parse_accounting_lines(text: &str) -> Result<Vec<JobRecord>, String> {
    let mut records = Vec::new();
    for line in text.lines().map(|x| x.trim()).filter(|x| !x.is_empty()) {
        let fields = line.split('|').collect::<Vec<_>>();
        let (job_id, state, exit_code) = match fields.as_slice() {
            [job_id, state, exit_code, ..] => (job_id, state, exit_code),
            _ => return Err(format!("Unexpected accounting line: '{line}'")),
        };
        let state = parse_state(state).ok_or(format!("Unknown job state in line: '{line}'"))?;
        records.push(JobRecord {
            job_id: job_id.to_string(),
            state,
            exit_code: parse_exit_code(exit_code),
        });
    }
    Ok(records)
}

/// Slurm command-line client
#[derive(Clone, Debug, Default)]
pub struct Slurm;

fn run_command(mut cmd: Command, label: &str) -> PipelineResult<Output> {
    debug!("Running scheduler command: {cmd:?}");
    cmd.output()
        .map_err(|e| PipelineError::Schedule(format!("Unable to run {label}: {e}")))
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

impl Scheduler for Slurm {
    fn submit(&self, script: &Utf8Path, log_dir: &Utf8Path) -> PipelineResult<String> {
        let mut cmd = Command::new("sbatch");
        cmd.arg("--parsable")
            .arg("--output")
            .arg(log_dir.join("%x_%A_%a.out"))
            .arg("--error")
            .arg(log_dir.join("%x_%A_%a.err"))
            .arg(script);
        let output = run_command(cmd, "sbatch")?;
        if !output.status.success() {
            return Err(PipelineError::Schedule(format!(
                "Submission of job script '{script}' was refused: {}",
                stderr_text(&output)
            )));
        }

        // Parsable output is `jobid[;cluster]`
        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.trim().split(';').next() {
            Some(job_id) if !job_id.is_empty() => Ok(job_id.to_string()),
            _ => Err(PipelineError::Schedule(format!(
                "Submission of job script '{script}' returned no job id"
            ))),
        }
    }

    fn show_job(&self, job_id: &str) -> Result<Vec<JobRecord>, QueryError> {
        let mut cmd = Command::new("squeue");
        cmd.args(["--noheader", "--array", "--format", "%i|%T", "--jobs", job_id]);
        let output = run_command(cmd, "squeue").map_err(|e| QueryError::Other(e.to_string()))?;
        if !output.status.success() {
            let msg = stderr_text(&output);
            return if msg.contains("Invalid job id") {
                Err(QueryError::UnknownJob)
            } else {
                Err(QueryError::Other(format!(
                    "Live query of job {job_id} failed: {msg}"
                )))
            };
        }
        let records = parse_queue_lines(&String::from_utf8_lossy(&output.stdout))
            .map_err(QueryError::Other)?;
        if records.is_empty() {
            Err(QueryError::UnknownJob)
        } else {
            Ok(records)
        }
    }

    fn accounting(&self, job_id: &str) -> PipelineResult<Vec<JobRecord>> {
        let mut cmd = Command::new("sacct");
        cmd.args([
            "--noheader",
            "--parsable2",
            "--allocations",
            "--format",
            "JobID,State,ExitCode",
            "--jobs",
            job_id,
        ]);
        let output = run_command(cmd, "sacct")?;
        if !output.status.success() {
            return Err(PipelineError::Schedule(format!(
                "Accounting query of job {job_id} failed: {}",
                stderr_text(&output)
            )));
        }
        parse_accounting_lines(&String::from_utf8_lossy(&output.stdout))
            .map_err(PipelineError::Schedule)
    }

    fn cancel(&self, job_id: &str) -> PipelineResult<()> {
        let mut cmd = Command::new("scancel");
        cmd.arg(job_id);
        let output = run_command(cmd, "scancel")?;
        if !output.status.success() {
            return Err(PipelineError::Schedule(format!(
                "Unable to cancel job {job_id}: {}",
                stderr_text(&output)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use camino::Utf8PathBuf;

    use super::*;

    /// One scripted response to a live query
    pub(crate) enum Poll {
        States(Vec<JobState>),
        Unknown,
        Error(String),
    }

    /// Scheduler replaying scripted poll responses, for stage tests
    #[derive(Default)]
    pub(crate) struct ScriptedScheduler {
        pub polls: RefCell<VecDeque<Poll>>,
        pub accounting: RefCell<Vec<JobRecord>>,
        pub submitted: RefCell<Vec<Utf8PathBuf>>,
        pub accounting_queries: RefCell<usize>,
        pub cancelled: RefCell<Vec<String>>,
        pub refuse_submit: bool,
    }

    impl ScriptedScheduler {
        pub(crate) fn new(polls: Vec<Poll>, accounting: Vec<(JobState, i32)>) -> Self {
            let accounting = accounting
                .into_iter()
                .enumerate()
                .map(|(i, (state, exit_code))| JobRecord {
                    job_id: format!("100_{}", i + 1),
                    state,
                    exit_code: Some(exit_code),
                })
                .collect();
            Self {
                polls: RefCell::new(polls.into()),
                accounting: RefCell::new(accounting),
                ..Default::default()
            }
        }

        /// A scheduler whose jobs all finish immediately with the given exit code
        pub(crate) fn finishing(exit_code: i32) -> Self {
            let state = if exit_code == 0 {
                JobState::Completed
            } else {
                JobState::Failed
            };
            Self::new(vec![Poll::Unknown], vec![(state, exit_code)])
        }
    }

    impl Scheduler for ScriptedScheduler {
        fn submit(&self, script: &Utf8Path, _log_dir: &Utf8Path) -> PipelineResult<String> {
            if self.refuse_submit {
                return Err(PipelineError::Schedule("queue closed".to_string()));
            }
            self.submitted.borrow_mut().push(script.to_path_buf());
            Ok("100".to_string())
        }

        fn show_job(&self, job_id: &str) -> Result<Vec<JobRecord>, QueryError> {
            match self.polls.borrow_mut().pop_front() {
                Some(Poll::States(states)) => Ok(states
                    .into_iter()
                    .enumerate()
                    .map(|(i, state)| JobRecord {
                        job_id: format!("{job_id}_{}", i + 1),
                        state,
                        exit_code: None,
                    })
                    .collect()),
                Some(Poll::Error(msg)) => Err(QueryError::Other(msg)),
                Some(Poll::Unknown) | None => Err(QueryError::UnknownJob),
            }
        }

        fn accounting(&self, _job_id: &str) -> PipelineResult<Vec<JobRecord>> {
            *self.accounting_queries.borrow_mut() += 1;
            Ok(self.accounting.borrow().clone())
        }

        fn cancel(&self, job_id: &str) -> PipelineResult<()> {
            self.cancelled.borrow_mut().push(job_id.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("COMPLETED"), Some(JobState::Completed));
        assert_eq!(parse_state("CANCELLED by 1234"), Some(JobState::Cancelled));
        assert_eq!(parse_state("OUT_OF_MEMORY"), Some(JobState::OutOfMemory));
        assert_eq!(parse_state("RUNNING"), Some(JobState::Running));
        assert_eq!(parse_state("NOT_A_STATE"), None);
        assert!(JobState::Timeout.is_terminal());
        assert!(!JobState::Pending.is_terminal());
    }

    #[test]
    fn test_parse_accounting_lines() {
        let text = "200_1|COMPLETED|0:0\n200_2|FAILED|1:0\n200_3|CANCELLED by 7|0:15\n";
        let records = parse_accounting_lines(text).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].succeeded());
        assert_eq!(records[1].exit_code, Some(1));
        assert!(!records[1].succeeded());
        assert_eq!(records[2].exit_code, Some(143));

        assert!(parse_accounting_lines("garbage").is_err());
    }

    #[test]
    fn test_parse_queue_lines() {
        let records = parse_queue_lines("300_1|RUNNING\n300_2|PENDING\n\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state, JobState::Pending);
        assert!(parse_queue_lines("300_1|SLEEPING").is_err());
    }
}
