//! Per-sample read count columns of the preparation file
//!

use std::collections::BTreeMap;

use camino::Utf8Path;
use log::debug;

use super::file_lane;
use crate::qc_filter::{FILTERED_SUFFIX, TRIMMED_SUFFIX, ZERO_FILES_DIR};
use crate::sample_files::resolve_sample;
use crate::sample_sheet::SampleRow;
use crate::seq_counts::{SeqCounts, is_fastq};

pub const RAW_READS_COLUMN: &str = "raw_reads_r1r2";
pub const FILTERED_READS_COLUMN: &str = "quality_filtered_reads_r1r2";
pub const FRACTION_PASSING_COLUMN: &str = "fraction_passing_quality_filter";

pub const READ_COUNT_COLUMNS: [&str; 3] = [
    RAW_READS_COLUMN,
    FILTERED_READS_COLUMN,
    FRACTION_PASSING_COLUMN,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FileKind {
    Raw,
    Trimmed,
    Filtered,
}

fn classify(path: &Utf8Path) -> Option<FileKind> {
    let name = path.file_name()?;
    let is_read_file = ["_R1_", "_R2_", ".R1.", ".R2."]
        .iter()
        .any(|x| name.contains(x));
    let in_zero_files = path.parent().and_then(|x| x.file_name()) == Some(ZERO_FILES_DIR);
    if !is_read_file || in_zero_files || !is_fastq(path) {
        return None;
    }
    Some(if name.ends_with(FILTERED_SUFFIX) {
        FileKind::Filtered
    } else if name.ends_with(TRIMMED_SUFFIX) {
        FileKind::Trimmed
    } else {
        FileKind::Raw
    })
}

/// Read totals over both orientations of one sample on one lane
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadStats {
    pub raw_reads: u64,
    pub trimmed_reads: u64,
    pub filtered_reads: u64,
}

impl ReadStats {
    /// Reads surviving QC, taken from the host filtered output where there is one
    pub fn quality_filtered_reads(&self) -> u64 {
        if self.filtered_reads > 0 {
            self.filtered_reads
        } else {
            self.trimmed_reads
        }
    }

    pub fn fraction_passing(&self) -> Option<f64> {
        if self.raw_reads == 0 {
            None
        } else {
            Some(self.quality_filtered_reads() as f64 / self.raw_reads as f64)
        }
    }

    pub fn columns(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (RAW_READS_COLUMN.to_string(), self.raw_reads.to_string()),
            (
                FILTERED_READS_COLUMN.to_string(),
                self.quality_filtered_reads().to_string(),
            ),
            (
                FRACTION_PASSING_COLUMN.to_string(),
                self.fraction_passing()
                    .map_or(String::new(), |x| format!("{x:.4}")),
            ),
        ])
    }
}

/// Read statistics keyed on sample name and lane
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadCounts {
    stats: BTreeMap<(String, u32), ReadStats>,
}

impl ReadCounts {
    /// Aggregate per-file counts onto the samples which produced each file
    ///
    /// Files which cannot be attributed to a sample, index read files, and files set aside as
    /// empty are not counted.
    ///
    pub fn from_seq_counts(counts: &SeqCounts, samples: &[SampleRow]) -> Self {
        let mut sample_ids = samples
            .iter()
            .map(|x| x.sample_id.clone())
            .collect::<Vec<_>>();
        sample_ids.sort();
        sample_ids.dedup();
        let names = samples
            .iter()
            .map(|x| (x.sample_id.as_str(), x.sample_name.as_str()))
            .collect::<BTreeMap<_, _>>();

        let mut stats: BTreeMap<(String, u32), ReadStats> = BTreeMap::new();
        for (dir, files) in counts.iter() {
            for (file_name, file_counts) in files.iter() {
                let path = Utf8Path::new(dir).join(file_name);
                let Some(kind) = classify(&path) else {
                    continue;
                };
                let Some(sample_name) =
                    resolve_sample(&sample_ids, file_name).and_then(|x| names.get(x))
                else {
                    debug!("No sample found for counted file '{path}'");
                    continue;
                };
                let entry = stats
                    .entry((sample_name.to_string(), file_lane(file_name)))
                    .or_default();
                let total = match kind {
                    FileKind::Raw => &mut entry.raw_reads,
                    FileKind::Trimmed => &mut entry.trimmed_reads,
                    FileKind::Filtered => &mut entry.filtered_reads,
                };
                *total += file_counts.seq_counts;
            }
        }
        Self { stats }
    }

    pub fn get(&self, sample_name: &str, lane: u32) -> Option<&ReadStats> {
        self.stats.get(&(sample_name.to_string(), lane))
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_sheet::tests::two_project_sheet;
    use crate::seq_counts::FileCounts;
    use approx::assert_ulps_eq;

    fn counts_entry(n: u64) -> FileCounts {
        FileCounts {
            seq_counts: n,
            base_pairs: n * 151,
        }
    }

    fn example_counts() -> SeqCounts {
        let mut counts = SeqCounts::new();
        let raw = counts.entry("/out/convert/Proj_1000".to_string()).or_default();
        raw.insert("S1_S1_L001_R1_001.fastq.gz".to_string(), counts_entry(1000));
        raw.insert("S1_S1_L001_R2_001.fastq.gz".to_string(), counts_entry(1000));
        raw.insert("S1_S1_L001_I1_001.fastq.gz".to_string(), counts_entry(1000));
        raw.insert("S1_B_S2_L001_R1_001.fastq.gz".to_string(), counts_entry(500));
        raw.insert("S1_B_S2_L001_R2_001.fastq.gz".to_string(), counts_entry(500));
        raw.insert("Undetermined_S0_L001_R1_001.fastq.gz".to_string(), counts_entry(7));

        let trimmed = counts
            .entry("/out/qc/Proj_1000/trimmed_sequences".to_string())
            .or_default();
        trimmed.insert("S1_S1_L001_R1_001.fastp.fastq.gz".to_string(), counts_entry(900));
        trimmed.insert("S1_S1_L001_R2_001.fastp.fastq.gz".to_string(), counts_entry(900));

        let filtered = counts
            .entry("/out/qc/Proj_1000/filtered_sequences".to_string())
            .or_default();
        filtered.insert("S1_S1_L001_R1_001.trimmed.fastq.gz".to_string(), counts_entry(600));
        filtered.insert("S1_S1_L001_R2_001.trimmed.fastq.gz".to_string(), counts_entry(600));

        let zero = counts
            .entry("/out/qc/Proj_1000/zero_files".to_string())
            .or_default();
        zero.insert("S1_B_S2_L001_R1_001.fastp.fastq.gz".to_string(), counts_entry(3));
        zero.insert("S1_B_S2_L001_R2_001.fastp.fastq.gz".to_string(), counts_entry(3));
        counts
    }

    #[test]
    fn test_read_counts_from_seq_counts() {
        let sheet = two_project_sheet();
        let read_counts = ReadCounts::from_seq_counts(&example_counts(), &sheet.samples);
        assert_eq!(read_counts.len(), 2);

        let s1 = read_counts.get("S1", 1).unwrap();
        assert_eq!(s1.raw_reads, 2000);
        assert_eq!(s1.trimmed_reads, 1800);
        assert_eq!(s1.quality_filtered_reads(), 1200);
        assert_ulps_eq!(s1.fraction_passing().unwrap(), 0.6);

        // Sample names, not sample ids, key the counts
        let s1b = read_counts.get("S1.B", 1).unwrap();
        assert_eq!(s1b.raw_reads, 1000);
        assert_eq!(s1b.quality_filtered_reads(), 0);
        assert_ulps_eq!(s1b.fraction_passing().unwrap(), 0.0);

        assert!(read_counts.get("S1", 2).is_none());
        assert!(read_counts.get("S2", 1).is_none());
    }

    #[test]
    fn test_read_stats_columns() {
        let stats = ReadStats {
            raw_reads: 3,
            trimmed_reads: 2,
            filtered_reads: 0,
        };
        let columns = stats.columns();
        assert_eq!(columns[RAW_READS_COLUMN], "3");
        assert_eq!(columns[FILTERED_READS_COLUMN], "2");
        assert_eq!(columns[FRACTION_PASSING_COLUMN], "0.6667");

        let columns = ReadStats::default().columns();
        assert_eq!(columns[FRACTION_PASSING_COLUMN], "");
    }
}
