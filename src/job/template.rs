//! Job script templates
//!
//! Templates are plain text with `{{option}}` placeholders. The rendered scripts are compared by
//! operators across runs, so the template text is kept stable.
//!

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::SchedulerParams;
use crate::errors::{PipelineError, PipelineResult};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Every option name a template may reference
pub const RECOGNISED_OPTIONS: [&str; 11] = [
    "job_name",
    "queue",
    "node_count",
    "cores_per_task",
    "wall_time",
    "mem",
    "run_dir",
    "sample_sheet_path",
    "modules",
    "cmd_line",
    "array_bounds",
];

pub const CONVERT_TEMPLATE: &str = "#!/bin/bash
#SBATCH --job-name {{job_name}}
#SBATCH -p {{queue}}
#SBATCH -N {{node_count}}
#SBATCH -c {{cores_per_task}}
#SBATCH --time {{wall_time}}
#SBATCH --mem {{mem}}G
set -x
set -e
date
hostname
{{modules}}
echo Converting run {{run_dir}} with sample sheet {{sample_sheet_path}}
cd {{run_dir}}
{{cmd_line}}
";

pub const ARRAY_TEMPLATE: &str = "#!/bin/bash
#SBATCH --job-name {{job_name}}
#SBATCH -p {{queue}}
#SBATCH -N {{node_count}}
#SBATCH -c {{cores_per_task}}
#SBATCH --time {{wall_time}}
#SBATCH --mem {{mem}}G
#SBATCH --array {{array_bounds}}
set -x
set -o pipefail
set -e
date
hostname
echo ${SLURM_JOBID} ${SLURM_ARRAY_TASK_ID}
{{modules}}
{{cmd_line}}
";

/// Values substituted into a job script template
#[derive(Clone, Debug, Default)]
pub struct JobScriptOptions {
    pub job_name: String,
    pub queue: String,
    pub node_count: u32,
    pub cores_per_task: u32,

    /// Wall-clock limit in minutes
    pub wall_time: u32,

    /// Memory limit in GiB
    pub mem: u32,

    /// Paths are shell quoted when rendered
    pub run_dir: String,
    pub sample_sheet_path: String,
    pub modules: Vec<String>,
    pub cmd_line: String,

    /// Array index range, such as `1-12`
    pub array_bounds: String,
}

impl JobScriptOptions {
    /// Fill the scheduler resource options from a stage's configured parameters
    pub fn new(job_name: &str, params: &SchedulerParams) -> Self {
        Self {
            job_name: job_name.to_string(),
            queue: params.queue.clone(),
            node_count: params.node_count,
            cores_per_task: params.cores_per_task,
            wall_time: params.wall_time_limit,
            mem: params.mem_gb,
            modules: params.modules.clone(),
            ..Default::default()
        }
    }

    fn to_map(&self) -> BTreeMap<&'static str, String> {
        let modules = if self.modules.is_empty() {
            String::new()
        } else {
            format!("module load {}", self.modules.join(" "))
        };
        BTreeMap::from([
            ("job_name", self.job_name.clone()),
            ("queue", self.queue.clone()),
            ("node_count", self.node_count.to_string()),
            ("cores_per_task", self.cores_per_task.to_string()),
            ("wall_time", self.wall_time.to_string()),
            ("mem", self.mem.to_string()),
            ("run_dir", shell_quote(&self.run_dir)),
            ("sample_sheet_path", shell_quote(&self.sample_sheet_path)),
            ("modules", modules),
            ("cmd_line", self.cmd_line.clone()),
            ("array_bounds", self.array_bounds.clone()),
        ])
    }
}

/// Quote a word for a POSIX shell command line, if required
pub fn shell_quote(word: &str) -> String {
    let is_plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+%@,".contains(c));
    if is_plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Substitute every `{{option}}` placeholder in `template`
///
/// Any placeholder which is not a recognised option is an error, so that a typo in a site
/// template is caught before submission rather than rendered as an empty string.
///
pub fn render(template: &str, options: &JobScriptOptions) -> PipelineResult<String> {
    let unknown = PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .filter(|x| !RECOGNISED_OPTIONS.contains(&x.as_str()))
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        return Err(PipelineError::Config(format!(
            "Job script template uses unrecognised options: {}",
            unknown.join(", ")
        )));
    }

    let values = options.to_map();
    let rendered = PLACEHOLDER.replace_all(template, |c: &Captures| {
        values.get(&c[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_array_template() {
        let mut options = JobScriptOptions::new("qc_Proj_1000", &SchedulerParams::default());
        options.array_bounds = "1-3".to_string();
        options.cmd_line = "echo hi".to_string();
        options.modules = vec!["fastp_0.23".to_string(), "samtools".to_string()];

        let script = render(ARRAY_TEMPLATE, &options).unwrap();
        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name qc_Proj_1000\n"));
        assert!(script.contains("#SBATCH --array 1-3\n"));
        assert!(script.contains("#SBATCH --mem 64G\n"));
        assert!(script.contains("#SBATCH --time 1440\n"));
        assert!(script.contains("#SBATCH -c 16\n"));
        assert!(!script.contains("#SBATCH -n "));
        assert!(script.contains("set -o pipefail\n"));
        assert!(!script.contains("+o pipefail"));
        assert!(script.contains("module load fastp_0.23 samtools\n"));
        assert!(script.ends_with("echo hi\n"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn test_unrecognised_option_rejected() {
        let options = JobScriptOptions::default();
        let err = render("#SBATCH -p {{queue}}\n{{qeue}}\n", &options).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref m) if m.contains("qeue")));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/data/run_1/SampleSheet.csv"), "/data/run_1/SampleSheet.csv");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_render_convert_template_quotes_paths() {
        let mut options = JobScriptOptions::new("convert", &SchedulerParams::default());
        options.cores_per_task = 16;
        options.run_dir = "/data/runs/run one".to_string();
        options.sample_sheet_path = "/data/sheets/it's.csv".to_string();

        let script = render(CONVERT_TEMPLATE, &options).unwrap();
        assert!(script.contains("#SBATCH -c 16\n"));
        assert!(script.contains("\ncd '/data/runs/run one'\n"));
        assert!(script.contains(
            "echo Converting run '/data/runs/run one' with sample sheet '/data/sheets/it'\\''s.csv'\n"
        ));
        assert!(!script.contains("cd /data/runs/run one"));
    }

    #[test]
    fn test_render_is_stable() {
        let options = JobScriptOptions::new("convert", &SchedulerParams::default());
        assert_eq!(
            render(CONVERT_TEMPLATE, &options).unwrap(),
            render(CONVERT_TEMPLATE, &options).unwrap()
        );
    }
}
