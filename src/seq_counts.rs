//! Per-file sequence and base-pair counts
//!
//! Counts are produced either by a `seqtk size` array job on the cluster, or locally by a worker
//! pool reading the fastq files directly. Both produce the same nested document keyed on directory
//! then filename.
//!

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::channel;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use tempfile::TempDir;
use thousands::Separable;

use crate::cli::{CountSequencesSettings, SharedSettings};
use crate::config::PipelineConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::file_pairs::manifest_path;
use crate::job::find_executable;
use crate::job::stage::{FailureLog, JobInfo, Stage, StageRunner, StatusCallback, run_with_retries};
use crate::job::template::{ARRAY_TEMPLATE, JobScriptOptions, shell_quote};
use crate::os_utils::{create_dir_all, walk_files};

pub const STAGE_NAME: &str = "seq_counts";

pub const SEQ_COUNTS_FILENAME: &str = "seq_counts.json";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileCounts {
    pub seq_counts: u64,
    pub base_pairs: u64,
}

/// Counts keyed on directory, then on filename
pub type SeqCounts = BTreeMap<String, BTreeMap<String, FileCounts>>;

fn insert_counts(counts: &mut SeqCounts, path: &Utf8Path, file_counts: FileCounts) {
    let dir = path.parent().map_or(String::new(), |x| x.to_string());
    let name = path.file_name().unwrap_or(path.as_str()).to_string();
    counts.entry(dir).or_default().insert(name, file_counts);
}

/// Look up the counts of one file
pub fn get_counts(counts: &SeqCounts, path: &Utf8Path) -> Option<FileCounts> {
    let dir = path.parent().map_or(String::new(), |x| x.to_string());
    let name = path.file_name()?;
    counts.get(&dir)?.get(name).copied()
}

pub fn is_fastq(path: &Utf8Path) -> bool {
    let name = path.file_name().unwrap_or_default();
    [".fastq.gz", ".fastq", ".fq.gz", ".fq"]
        .iter()
        .any(|x| name.ends_with(x))
}

/// Count the records and bases of one fastq stream
pub fn count_fastq_reader<R: BufRead>(mut reader: R, label: &str) -> SimpleResult<FileCounts> {
    let mut counts = FileCounts::default();
    let mut line = String::new();
    let mut line_index = 0u64;
    loop {
        line.clear();
        let n = match reader.read_line(&mut line) {
            Ok(x) => x,
            Err(e) => bail!("Unable to read fastq '{label}': {e}"),
        };
        if n == 0 {
            break;
        }
        if line_index % 4 == 1 {
            counts.seq_counts += 1;
            counts.base_pairs += line.trim_end().len() as u64;
        }
        line_index += 1;
    }
    if line_index % 4 != 0 {
        bail!("Fastq '{label}' ends with a truncated record");
    }
    Ok(counts)
}

pub fn count_fastq(path: &Utf8Path) -> SimpleResult<FileCounts> {
    let f = match File::open(path) {
        Ok(x) => x,
        Err(e) => bail!("Unable to open fastq '{path}': {e}"),
    };
    let reader: Box<dyn Read> = if path.extension() == Some("gz") {
        Box::new(MultiGzDecoder::new(f))
    } else {
        Box::new(f)
    };
    count_fastq_reader(BufReader::new(reader), path.as_str())
}

/// Count every fastq file below `dir` on a local worker pool
pub fn count_directory(dir: &Utf8Path, thread_count: usize) -> PipelineResult<SeqCounts> {
    let files = walk_files(dir, &mut |path, e| {
        warn!("Unable to read directory '{path}' while counting sequences: {e}");
    })
    .into_iter()
    .filter(|x| is_fastq(x))
    .collect::<Vec<_>>();

    info!(
        "Counting sequences in {} fastq files below '{dir}'",
        files.len()
    );

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .map_err(|e| PipelineError::Config(format!("Unable to create worker pool: {e}")))?;

    let (tx, rx) = channel();
    worker_pool.scope(|scope| {
        for file in files.iter() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = count_fastq(file).map(|x| (file.clone(), x));
                let _ = tx.send(result);
            });
        }
    });
    drop(tx);

    let mut counts = SeqCounts::new();
    for result in rx.into_iter() {
        let (path, file_counts) = result?;
        insert_counts(&mut counts, &path, file_counts);
    }

    let total: u64 = counts
        .values()
        .flat_map(|x| x.values())
        .map(|x| x.seq_counts)
        .sum();
    info!("Counted {} sequences", total.separate_with_commas());

    Ok(counts)
}

pub fn write_seq_counts(filename: &Utf8Path, counts: &SeqCounts) -> PipelineResult<()> {
    info!("Writing sequence counts to file: '{filename}'");
    let f = File::create(filename).map_err(|e| {
        PipelineError::io(format!("Unable to create sequence counts file: '{filename}'"), e)
    })?;
    serde_json::to_writer_pretty(&f, counts).map_err(|e| {
        PipelineError::io(
            format!("Unable to serialize sequence counts to '{filename}'"),
            e.into(),
        )
    })
}

pub fn read_seq_counts(filename: &Utf8Path) -> PipelineResult<SeqCounts> {
    let f = File::open(filename).map_err(|e| {
        PipelineError::io(format!("Unable to open sequence counts file: '{filename}'"), e)
    })?;
    serde_json::from_reader(BufReader::new(f)).map_err(|e| {
        PipelineError::Config(format!(
            "Unable to parse sequence counts from json file '{filename}': {e}"
        ))
    })
}

/// Entry point of the count-sequences command
pub fn run_count_sequences(
    shared: &SharedSettings,
    settings: &CountSequencesSettings,
) -> PipelineResult<()> {
    let counts = count_directory(&settings.dir, shared.thread_count)?;
    write_seq_counts(&settings.output_filename, &counts)
}

/// Parse `path \t seq_count \t base_pairs` lines written by the array job
pub fn parse_count_lines(text: &str, counts: &mut SeqCounts) -> SimpleResult<()> {
    for line in text.lines().filter(|x| !x.trim().is_empty()) {
        let mut fields = line.rsplitn(3, '\t');
        let (base_pairs, seq_counts, path) = match (fields.next(), fields.next(), fields.next()) {
            (Some(b), Some(s), Some(p)) => (b, s, p),
            _ => bail!("Malformed sequence count line: '{line}'"),
        };
        let (seq_counts, base_pairs) = match (seq_counts.trim().parse(), base_pairs.trim().parse()) {
            (Ok(s), Ok(b)) => (s, b),
            _ => bail!("Non-numeric sequence count in line: '{line}'"),
        };
        insert_counts(
            counts,
            Utf8Path::new(path),
            FileCounts {
                seq_counts,
                base_pairs,
            },
        );
    }
    Ok(())
}

/// Sequence count array job over a fixed list of fastq files
pub struct SeqCountsJob {
    pub stage: Stage,
    pub output_dir: Utf8PathBuf,
    pub files: Vec<Utf8PathBuf>,

    /// Holds the file manifests until the stage is terminal
    _manifest_dir: TempDir,
}

impl SeqCountsJob {
    pub fn new(
        files: Vec<Utf8PathBuf>,
        output_dir: &Utf8Path,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        if files.is_empty() {
            return Err(PipelineError::Config(
                "No fastq files to count sequences in".to_string(),
            ));
        }
        let seqtk = find_executable(&config.tools.seqtk)?;
        create_dir_all(output_dir, "sequence count output")?;

        let manifest_dir = tempfile::Builder::new()
            .prefix("manifests_seq_counts_")
            .tempdir_in(output_dir)
            .map_err(|e| {
                PipelineError::io(format!("Unable to create manifest directory in '{output_dir}'"), e)
            })?;
        let manifest_prefix = Utf8Path::from_path(manifest_dir.path())
            .ok_or_else(|| PipelineError::Config(format!("Non UTF-8 manifest directory in '{output_dir}'")))?
            .join("files");

        // Spread the files evenly over as many elements as the array cap allows
        let array_cap = config.seq_counts.array_cap;
        let files_per_batch = files.len().div_ceil(array_cap.min(files.len()));
        let mut batch_count = 0;
        for (batch_index, batch) in files.chunks(files_per_batch).enumerate() {
            let filename = manifest_path(&manifest_prefix, batch_index + 1);
            let content = batch.iter().map(|x| format!("{x}\n")).collect::<String>();
            std::fs::write(&filename, content).map_err(|e| {
                PipelineError::io(format!("Unable to write batch manifest '{filename}'"), e)
            })?;
            batch_count += 1;
        }

        let mut options = JobScriptOptions::new(STAGE_NAME, &config.seq_counts);
        options.cmd_line = format!(
            "manifest={}-${{SLURM_ARRAY_TASK_ID}}\n\
while IFS= read -r f; do\n\
    printf '%s\\t%s\\n' \"$f\" \"$({} size \"$f\")\"\n\
done < \"$manifest\" > {}/counts_${{SLURM_ARRAY_TASK_ID}}.tsv\n",
            shell_quote(manifest_prefix.as_str()),
            shell_quote(seqtk.as_str()),
            shell_quote(output_dir.as_str()),
        );
        let stage = Stage::new(
            STAGE_NAME,
            output_dir,
            ARRAY_TEMPLATE,
            &options,
            Some(batch_count),
            FailureLog::SchedulerLogs,
        )?;

        Ok(Self {
            stage,
            output_dir: output_dir.to_path_buf(),
            files,
            _manifest_dir: manifest_dir,
        })
    }

    /// Run the array job, then merge its per-element count tables into one json document
    pub fn run(
        &mut self,
        runner: &StageRunner,
        retries: u32,
        callback: Option<StatusCallback>,
    ) -> PipelineResult<(JobInfo, SeqCounts)> {
        let info = run_with_retries(&mut self.stage, runner, retries, callback)?;
        let counts = self.collect()?;
        write_seq_counts(&self.output_dir.join(SEQ_COUNTS_FILENAME), &counts)?;
        Ok((info, counts))
    }

    /// Merge the per-element count tables, requiring a count for every input file
    pub fn collect(&self) -> PipelineResult<SeqCounts> {
        let pattern = self.output_dir.join("counts_*.tsv");
        let tables = glob::glob(pattern.as_str())
            .map_err(|e| PipelineError::Config(format!("Invalid count table pattern: {e}")))?;
        let mut counts = SeqCounts::new();
        for table in tables {
            let table = table.map_err(|e| {
                PipelineError::io("Unable to list sequence count tables", e.into_error())
            })?;
            let text = std::fs::read_to_string(&table).map_err(|e| {
                PipelineError::io(format!("Unable to read count table '{}'", table.display()), e)
            })?;
            parse_count_lines(&text, &mut counts)?;
        }

        let missing = self
            .files
            .iter()
            .filter(|x| get_counts(&counts, x).is_none())
            .count();
        if missing > 0 {
            return Err(PipelineError::JobFailed {
                summary: format!("Sequence counts are missing for {missing} files"),
                log_tail: self.stage.failure_log_lines(10),
            });
        }
        Ok(counts)
    }
}
