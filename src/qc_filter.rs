//! Adapter trimming and host read filtering stage
//!
//! Each project of the run becomes one array job. Every array element trims the file pairs listed
//! in its batch manifest with fastp, and for projects requiring host filtering streams the trimmed
//! reads through minimap2 and `samtools fastq`, splitting the surviving reads back into per-pair
//! files with `seqproc demux`.
//!
//! Once the array is terminal, the flat per-project output is sorted into the fixed project layout.
//!

use std::collections::BTreeSet;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use const_format::concatcp;
use log::{debug, info, warn};
use regex::Regex;
use tempfile::TempDir;

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, PipelineResult, Recovery};
use crate::file_pairs::{bin, manifest_path, pair_files};
use crate::job::find_executable;
use crate::job::stage::{FailureLog, JobInfo, Stage, StageRunner, StatusCallback, run_with_retries};
use crate::job::template::{ARRAY_TEMPLATE, JobScriptOptions, shell_quote};
use crate::os_utils::{create_dir_all, file_size, move_file, walk_files};
use crate::sample_sheet::{ProjectParams, SampleSheet};

pub const STAGE_NAME: &str = "qc_filter";

pub const FILTERED_DIR: &str = "filtered_sequences";
pub const TRIMMED_DIR: &str = "trimmed_sequences";
pub const REPORTS_DIR: &str = "fastp_reports_dir";
pub const ZERO_FILES_DIR: &str = "zero_files";

pub const FASTQ_SUFFIX: &str = ".fastq.gz";
pub const TRIMMED_SUFFIX: &str = concatcp!(".fastp", FASTQ_SUFFIX);
pub const FILTERED_SUFFIX: &str = concatcp!(".trimmed", FASTQ_SUFFIX);

/// Conventional Illumina fastq name, capturing the sample id
static ILLUMINA_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)_S\d+_L\d{3}_[RI][12]_001").unwrap());

/// Resolved paths of the tools used in the array script
#[derive(Clone, Debug)]
struct QcTools {
    fastp: Utf8PathBuf,
    filtering: Option<FilterTools>,
}

#[derive(Clone, Debug)]
struct FilterTools {
    minimap2: Utf8PathBuf,
    samtools: Utf8PathBuf,
    seqproc: Utf8PathBuf,
    minimap2_db: Utf8PathBuf,
}

fn find_filter_tools(config: &PipelineConfig) -> PipelineResult<FilterTools> {
    if config.minimap2_db.is_empty() {
        return Err(PipelineError::Config(
            "Host read filtering is requested but no minimap2_db is configured".to_string(),
        ));
    }
    let minimap2_db = Utf8PathBuf::from(&config.minimap2_db);
    if !minimap2_db.is_file() {
        return Err(PipelineError::Config(format!(
            "Host filtering reference '{minimap2_db}' does not exist"
        )));
    }
    Ok(FilterTools {
        minimap2: find_executable(&config.tools.minimap2)?,
        samtools: find_executable(&config.tools.samtools)?,
        seqproc: find_executable(&config.tools.seqproc)?,
        minimap2_db,
    })
}

/// R1/R2 fastq files written by the converter for one project
pub fn project_read_files(convert_output: &Utf8Path, project: &str) -> Vec<Utf8PathBuf> {
    let dir = convert_output.join(project);
    let mut files = walk_files(&dir, &mut |path, e| {
        warn!("Unable to read converter output directory '{path}': {e}");
    });
    files.retain(|x| {
        let name = x.file_name().unwrap_or_default();
        name.ends_with(FASTQ_SUFFIX)
            && ["_R1_", "_R2_", ".R1.", ".R2."]
                .iter()
                .any(|token| name.contains(token))
    });
    files
}

/// Shell commands run by one array element over the pairs of its manifest
fn batch_command(
    params: &ProjectParams,
    tools: &QcTools,
    manifest_prefix: &Utf8Path,
    output_root: &Utf8Path,
    threads: u32,
    min_read_length: u32,
) -> String {
    let mut fastp = format!(
        "{} -l {min_read_length} -i \"$r1\" -I \"$r2\" -w {threads}",
        shell_quote(tools.fastp.as_str())
    );
    match &params.adapters {
        Some((forward, reverse)) => {
            fastp += &format!(" --adapter_sequence {forward} --adapter_sequence_r2 {reverse}")
        }
        None => fastp += " --detect_adapter_for_pe",
    }
    if params.polyg_trimming {
        fastp += " --trim_poly_g";
    }
    fastp += " -j \"$out/$subdir/${base1}.json\" -h \"$out/$subdir/${base1}.html\"";

    let header = format!(
        "manifest={}-${{SLURM_ARRAY_TASK_ID}}\nout={}\n",
        shell_quote(manifest_prefix.as_str()),
        shell_quote(output_root.as_str())
    );
    let read_loop_start = "while IFS=$'\\t' read -r r1 r2 subdir; do\n\
    base1=$(basename \"$r1\" .fastq.gz)\n\
    base2=$(basename \"$r2\" .fastq.gz)\n\
    mkdir -p \"$out/$subdir\"\n";

    match (params.human_filtering, &tools.filtering) {
        (true, Some(filter)) => {
            let q = |x: &Utf8Path| shell_quote(x.as_str());
            format!(
                "{header}\
work=$(mktemp -d \"${{TMPDIR:-/tmp}}/seqproc_qc.XXXXXX\")\n\
trap 'rm -rf \"$work\"' EXIT\n\
n=0\n\
{read_loop_start}\
    n=$((n+1))\n\
    printf '%s\\t%s\\t%s\\t%s\\n' \"$n\" \"$base1\" \"$base2\" \"$subdir\" >> \"$work/id_map\"\n\
    {fastp} --stdout | sed -r \"1~4s/^@(.*)/@${{n}}::MUX::\\1/\"\n\
done < \"$manifest\" \\\n\
    | {minimap2} -2 -ax sr -t {threads} {db} - \\\n\
    | {samtools} fastq -@ {threads} -f 12 -F 256 > \"$work/muxed.fastq\"\n\
for i in $(seq 1 \"$n\"); do\n\
    {seqproc} demux --id-map \"$work/id_map\" --infile \"$work/muxed.fastq\" --output \"$out\" --encoded-id \"$i\" --threads {threads}\n\
done\n",
                minimap2 = q(&filter.minimap2),
                db = q(&filter.minimap2_db),
                samtools = q(&filter.samtools),
                seqproc = q(&filter.seqproc),
            )
        }
        _ => format!(
            "{header}\
{read_loop_start}\
    {fastp} -o \"$out/$subdir/${{base1}}{TRIMMED_SUFFIX}\" -O \"$out/$subdir/${{base2}}{TRIMMED_SUFFIX}\"\n\
done < \"$manifest\"\n"
        ),
    }
}

/// QC stage for a single project
pub struct QcProjectJob {
    pub params: ProjectParams,
    pub stage: Stage,
    pub batch_count: usize,
    pub project_dir: Utf8PathBuf,
    sample_ids: BTreeSet<String>,
    manifest_prefix: Utf8PathBuf,

    /// Holds the batch manifests until the stage is terminal
    _manifest_dir: TempDir,
}

impl QcProjectJob {
    fn new(
        params: ProjectParams,
        sheet: &SampleSheet,
        convert_output: &Utf8Path,
        output_root: &Utf8Path,
        tools: &QcTools,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let project = params.project.name.clone();
        let files = project_read_files(convert_output, &project);
        let pairs = pair_files(files)?;

        // Manifests are read from the cluster nodes, so they live on the shared output volume
        let manifest_dir = tempfile::Builder::new()
            .prefix(&format!("manifests_{project}_"))
            .tempdir_in(output_root)
            .map_err(|e| {
                PipelineError::io(format!("Unable to create manifest directory in '{output_root}'"), e)
            })?;
        let manifest_root = Utf8Path::from_path(manifest_dir.path()).ok_or_else(|| {
            PipelineError::Config(format!("Non UTF-8 manifest directory in '{output_root}'"))
        })?;
        let manifest_prefix = manifest_root.join("batch");

        let batch_count = bin(
            &pairs,
            &project,
            config.bucket_size_gb,
            &manifest_prefix,
            config.qc_filter.array_cap,
        )?;

        let job_name = format!("{STAGE_NAME}_{project}");
        let mut options = JobScriptOptions::new(&job_name, &config.qc_filter);
        options.cmd_line = batch_command(
            &params,
            tools,
            &manifest_prefix,
            output_root,
            config.qc_filter.cores_per_task,
            config.min_read_length,
        );
        let stage = Stage::new(
            &job_name,
            output_root,
            ARRAY_TEMPLATE,
            &options,
            Some(batch_count),
            FailureLog::SchedulerLogs,
        )?;

        let sample_ids = sheet
            .samples_for_project(&project)
            .map(|x| x.sample_id.clone())
            .collect();

        info!(
            "Project '{project}': {} file pairs in {batch_count} batches",
            pairs.len()
        );

        Ok(Self {
            params,
            stage,
            batch_count,
            project_dir: output_root.join(&project),
            sample_ids,
            manifest_prefix,
            _manifest_dir: manifest_dir,
        })
    }

    pub fn manifest_path(&self, array_index: usize) -> Utf8PathBuf {
        manifest_path(&self.manifest_prefix, array_index)
    }

    pub fn run(
        &mut self,
        runner: &StageRunner,
        retries: u32,
        callback: Option<StatusCallback>,
        min_file_size: u64,
    ) -> PipelineResult<JobInfo> {
        debug!(
            "Running {} QC batches for project '{}' from manifest '{}'",
            self.batch_count,
            self.params.project,
            self.manifest_path(1)
        );
        let info = run_with_retries(&mut self.stage, runner, retries, callback)?;
        sort_project_output(&self.project_dir, &self.sample_ids, min_file_size)?;
        Ok(info)
    }
}

/// Check a produced fastq name against the project's sample ids
fn check_sample_name(file_name: &str, sample_ids: &BTreeSet<String>) -> PipelineResult<()> {
    match ILLUMINA_NAME.captures(file_name) {
        Some(c) => {
            let sample = &c[1];
            if sample_ids.contains(sample) {
                Ok(())
            } else {
                Err(PipelineError::Resolver(format!(
                    "Output file '{file_name}' belongs to unknown sample '{sample}'"
                )))
            }
        }
        None => {
            warn!("Output file '{file_name}' does not follow the Illumina naming convention");
            Ok(())
        }
    }
}

/// Sort the flat output of a project's array job into the project layout
///
/// Pairs where either file is at or below `min_file_size` bytes are moved into the empty file
/// directory together. Filtered reads are renamed with the trimmed suffix.
///
pub fn sort_project_output(
    project_dir: &Utf8Path,
    sample_ids: &BTreeSet<String>,
    min_file_size: u64,
) -> PipelineResult<()> {
    let entries = project_dir.read_dir_utf8().map_err(|e| {
        PipelineError::io(format!("Unable to read QC output directory '{project_dir}'"), e)
    })?;
    let mut fastqs = Vec::new();
    let mut reports = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            PipelineError::io(format!("Unable to read QC output directory '{project_dir}'"), e)
        })?;
        let path = entry.path().to_path_buf();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().unwrap_or_default();
        if name.ends_with(FASTQ_SUFFIX) {
            check_sample_name(name, sample_ids)?;
            fastqs.push(path);
        } else if name.ends_with(".html") || name.ends_with(".json") {
            reports.push(path);
        }
    }

    let reports_dir = project_dir.join(REPORTS_DIR);
    for report in reports {
        let name = report.file_name().unwrap_or_default().to_string();
        let kind = if name.ends_with(".html") { "html" } else { "json" };
        move_file(&report, &reports_dir.join(kind), &name)?;
    }

    for pair in pair_files(fastqs)? {
        let is_empty =
            file_size(&pair.forward)? <= min_file_size || file_size(&pair.reverse)? <= min_file_size;
        for path in [&pair.forward, &pair.reverse] {
            let name = path.file_name().unwrap_or_default();
            let (dest_dir, dest_name) = if is_empty {
                (ZERO_FILES_DIR, name.to_string())
            } else if name.ends_with(TRIMMED_SUFFIX) {
                (TRIMMED_DIR, name.to_string())
            } else {
                let stem = name.strip_suffix(FASTQ_SUFFIX).unwrap_or(name);
                (FILTERED_DIR, format!("{stem}{FILTERED_SUFFIX}"))
            };
            move_file(path, &project_dir.join(dest_dir), &dest_name)?;
        }
        if is_empty {
            warn!(
                "Moved pair '{}' to {ZERO_FILES_DIR}, at least one file is not larger than {min_file_size} bytes",
                pair.forward
            );
        }
    }
    Ok(())
}

/// Outcome of the QC stage over all projects of a run
#[derive(Debug, Default)]
pub struct QcSummary {
    pub completed: Vec<String>,

    /// Projects abandoned on a project-scoped error
    pub skipped: Vec<(String, PipelineError)>,
}

pub struct QcFilterJob {
    pub output_root: Utf8PathBuf,
    pub projects: Vec<QcProjectJob>,
    min_file_size: u64,
    retries: u32,
}

impl QcFilterJob {
    pub fn new(
        convert_output: &Utf8Path,
        sheet: &SampleSheet,
        output_root: &Utf8Path,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        create_dir_all(output_root, "QC output")?;
        let project_params = sheet.project_params()?;

        let filtering = if project_params.iter().any(|x| x.human_filtering) {
            Some(find_filter_tools(config)?)
        } else {
            None
        };
        let tools = QcTools {
            fastp: find_executable(&config.tools.fastp)?,
            filtering,
        };

        let projects = project_params
            .into_iter()
            .map(|params| {
                QcProjectJob::new(params, sheet, convert_output, output_root, &tools, config)
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        Ok(Self {
            output_root: output_root.to_path_buf(),
            projects,
            min_file_size: config.min_file_size,
            retries: config.retries,
        })
    }

    /// Run every project's array job in turn
    ///
    /// An error which only affects its own project skips that project. Any other error stops the
    /// stage.
    ///
    pub fn run(
        &mut self,
        runner: &StageRunner,
        mut callback: Option<StatusCallback>,
    ) -> PipelineResult<QcSummary> {
        let mut summary = QcSummary::default();
        for job in self.projects.iter_mut() {
            let project = job.params.project.name.clone();
            let result = match callback.as_mut() {
                Some(cb) => job.run(runner, self.retries, Some(&mut **cb), self.min_file_size),
                None => job.run(runner, self.retries, None, self.min_file_size),
            };
            match result {
                Ok(_) => summary.completed.push(project),
                Err(e) if e.recovery() == Recovery::SkipProject => {
                    warn!("Skipping project '{project}': {e}");
                    summary.skipped.push((project, e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }
}
