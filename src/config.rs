//! Pipeline configuration file
//!
//! The configuration holds everything about the cluster environment and the external tools which
//! is not a per-invocation command-line setting. Every field has a default so that an empty JSON
//! object is a valid configuration.
//!

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail, try_with};

pub const CONFIG_FILENAME: &str = "seqproc.config.json";

/// Scheduler resources requested for one stage
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SchedulerParams {
    pub queue: String,
    pub node_count: u32,
    pub cores_per_task: u32,

    /// Wall-clock limit in minutes
    pub wall_time_limit: u32,

    pub mem_gb: u32,

    /// Environment modules loaded at the top of the job script
    pub modules: Vec<String>,

    /// Largest array the scheduler accepts for one submission
    pub array_cap: usize,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            queue: "qiita".to_string(),
            node_count: 1,
            cores_per_task: 16,
            wall_time_limit: 1440,
            mem_gb: 64,
            modules: Vec::new(),
            array_cap: 1000,
        }
    }
}

/// Paths to the external tools driven by the pipeline
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ToolPaths {
    pub bcl_converter: String,
    pub fastp: String,
    pub minimap2: String,
    pub samtools: String,
    pub seqtk: String,

    /// Path of this program, as invoked from inside job scripts for the demux step
    pub seqproc: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            bcl_converter: "bcl-convert".to_string(),
            fastp: "fastp".to_string(),
            minimap2: "minimap2".to_string(),
            samtools: "samtools".to_string(),
            seqtk: "seqtk".to_string(),
            seqproc: "seqproc".to_string(),
        }
    }
}

/// Study-specific rewrite applied to prep rows of one study
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct StudyFixup {
    /// Zero-pad all-digit sample names to this width, blanks excluded
    pub zero_pad_sample_names: Option<usize>,

    /// Column values overwritten on every row of the study
    pub column_defaults: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub convert: SchedulerParams,
    pub qc_filter: SchedulerParams,
    pub seq_counts: SchedulerParams,
    pub tools: ToolPaths,

    /// Reference index used for host read filtering
    pub minimap2_db: String,

    /// Minimum read length kept by the adapter trimmer
    pub min_read_length: u32,

    /// Target total size of one QC batch, in GiB, counting both read orientations
    pub bucket_size_gb: f64,

    /// Output fastq files at or below this size are moved aside as empty
    pub min_file_size: u64,

    pub poll_interval_secs: u64,

    /// Number of resubmissions of a stage which failed on the cluster
    pub retries: u32,

    /// Number of trailing scheduler stderr lines attached to a job failure, tool logs are attached in full
    pub log_tail_lines: usize,

    /// Keyed on study id
    pub study_fixups: BTreeMap<u64, StudyFixup>,

    /// Center name written to prep files, unless overwritten by a study fixup
    pub center_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            convert: SchedulerParams::default(),
            qc_filter: SchedulerParams {
                cores_per_task: 8,
                wall_time_limit: 2880,
                mem_gb: 20,
                ..Default::default()
            },
            seq_counts: SchedulerParams {
                cores_per_task: 1,
                wall_time_limit: 60,
                mem_gb: 4,
                ..Default::default()
            },
            tools: ToolPaths::default(),
            minimap2_db: String::new(),
            min_read_length: 45,
            bucket_size_gb: 8.0,
            min_file_size: 3100,
            poll_interval_secs: 30,
            retries: 0,
            log_tail_lines: 10,
            study_fixups: default_study_fixups(),
            center_name: "UCSDMI".to_string(),
        }
    }
}

/// The American Gut study requires padded numeric sample names and fixed protocol columns
fn default_study_fixups() -> BTreeMap<u64, StudyFixup> {
    let column_defaults = [
        ("center_name", "UCSDMI"),
        ("library_construction_protocol", "Knight Lab KHP"),
        (
            "experiment_design_description",
            "samples of skin, saliva and feces and other samples from the AGP",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    BTreeMap::from([(
        10317,
        StudyFixup {
            zero_pad_sample_names: Some(9),
            column_defaults,
        },
    )])
}

impl PipelineConfig {
    pub fn validate(&self) -> SimpleResult<()> {
        for (label, params) in [
            ("convert", &self.convert),
            ("qc_filter", &self.qc_filter),
            ("seq_counts", &self.seq_counts),
        ] {
            if params.array_cap == 0 {
                bail!("Stage '{label}' array_cap must be greater than 0");
            }
            if params.cores_per_task == 0 || params.node_count == 0 {
                bail!("Stage '{label}' must request at least one node and one core");
            }
            if params.queue.is_empty() {
                bail!("Stage '{label}' queue must not be empty");
            }
        }
        if !(self.bucket_size_gb > 0.0) {
            bail!(
                "bucket_size_gb must be greater than 0, found {}",
                self.bucket_size_gb
            );
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than 0");
        }
        Ok(())
    }
}

pub fn read_config(filename: &Utf8Path) -> SimpleResult<PipelineConfig> {
    let file = try_with!(
        File::open(filename),
        "Unable to open pipeline configuration file: '{filename}'"
    );
    let reader = BufReader::new(file);
    let config: PipelineConfig = try_with!(
        serde_json::from_reader(reader),
        "Unable to parse pipeline configuration from json file: '{filename}'"
    );
    config.validate()?;
    Ok(config)
}

/// Read the configuration file if one is given, and use the built-in defaults otherwise
pub fn load_config(filename: Option<&Utf8Path>) -> SimpleResult<PipelineConfig> {
    match filename {
        Some(x) => {
            info!("Reading pipeline configuration from file: '{x}'");
            read_config(x)
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Write the resolved configuration out in json format
pub fn write_config(output_dir: &Utf8Path, config: &PipelineConfig) -> SimpleResult<()> {
    let filename = output_dir.join(CONFIG_FILENAME);

    info!("Writing resolved pipeline configuration to file: '{filename}'");

    let f = try_with!(
        File::create(&filename),
        "Unable to create pipeline configuration json file: '{filename}'"
    );
    try_with!(
        serde_json::to_writer_pretty(&f, config),
        "Unable to serialize pipeline configuration to '{filename}'"
    );
    Ok(())
}
