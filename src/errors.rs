//! Error kinds raised by the pipeline core
//!
//! Each kind maps onto a recovery policy, which the pipeline driver uses to decide how much work to
//! abandon when the error is observed.
//!

use simple_error::SimpleError;
use strum::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad sample sheet structure, bad settings, unrecognised tool, etc.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A produced file cannot be mapped back onto exactly one sample
    #[error("Sample file resolution error: {0}")]
    Resolver(String),

    /// The scheduler refused a submission or returned an unrecoverable error while polling
    #[error("Scheduler error: {0}")]
    Schedule(String),

    /// The scheduler reported a non-zero exit status
    #[error("{summary}{}", format_log_tail(.log_tail))]
    JobFailed {
        summary: String,
        log_tail: Vec<String>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A termination signal was received while a stage was in flight
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

fn format_log_tail(log_tail: &[String]) -> String {
    if log_tail.is_empty() {
        String::new()
    } else {
        format!("\n{}", log_tail.join("\n"))
    }
}

/// How much pending work is abandoned when an error of a given kind is raised
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum Recovery {
    SkipProject,
    SkipRun,
    Abort,
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Resolver(_) => Recovery::SkipProject,
            Self::Config(_) | Self::Schedule(_) | Self::JobFailed { .. } | Self::Io { .. } => {
                Recovery::SkipRun
            }
            Self::Cancelled(_) => Recovery::Abort,
        }
    }

    /// Process exit code used when this error terminates the program
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Resolver(_) => exitcode::DATAERR,
            Self::Schedule(_) | Self::JobFailed { .. } => exitcode::SOFTWARE,
            Self::Io { .. } => exitcode::IOERR,
            Self::Cancelled(_) => exitcode::TEMPFAIL,
        }
    }
}

impl From<SimpleError> for PipelineError {
    fn from(err: SimpleError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_failed_display_includes_log_tail() {
        let err = PipelineError::JobFailed {
            summary: "Convert job 12 failed".to_string(),
            log_tail: vec!["line a".to_string(), "line b".to_string()],
        };
        assert_eq!(err.to_string(), "Convert job 12 failed\nline a\nline b");

        let err = PipelineError::JobFailed {
            summary: "Convert job 12 failed".to_string(),
            log_tail: Vec::new(),
        };
        assert_eq!(err.to_string(), "Convert job 12 failed");
    }

    #[test]
    fn test_recovery_policy() {
        assert_eq!(
            PipelineError::Resolver("x".into()).recovery(),
            Recovery::SkipProject
        );
        assert_eq!(PipelineError::Config("x".into()).recovery(), Recovery::SkipRun);
        assert_eq!(PipelineError::Schedule("x".into()).recovery(), Recovery::SkipRun);
        assert_eq!(
            PipelineError::JobFailed {
                summary: "x".into(),
                log_tail: Vec::new()
            }
            .recovery(),
            Recovery::SkipRun
        );
        assert_eq!(PipelineError::Cancelled("x".into()).recovery(), Recovery::Abort);
        assert_eq!(Recovery::SkipProject.to_string(), "skip_project");
    }

    #[test]
    fn test_from_simple_error() {
        let err: PipelineError = SimpleError::new("bad column").into();
        assert!(matches!(err, PipelineError::Config(ref m) if m == "bad column"));
    }
}
