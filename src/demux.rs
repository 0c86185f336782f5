//! Split an id-tagged interleaved fastq stream back into per-pair output files
//!
//! Records are tagged upstream with an identity line of the form `@<index>::MUX::<original-id>`,
//! and the stream interleaves the two mates of every pair, forward first. For one requested index
//! this writes the forward and reverse mates to their own gzip-compressed files, restoring the
//! original record id.
//!

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use gzp::ZWriter;
use gzp::deflate::Gzip;
use gzp::par::compress::{ParCompress, ParCompressBuilder};
use log::info;
use simple_error::{SimpleResult, bail};

use crate::cli::{DemuxSettings, SharedSettings};
use crate::errors::{PipelineError, PipelineResult};
use crate::os_utils::create_dir_all;

pub const MUX_DELIMITER: &[u8] = b"::MUX::";

/// One line of the identity map
#[derive(Clone, Debug, PartialEq)]
pub struct IdMapEntry {
    pub index: String,
    pub forward_name: String,
    pub reverse_name: String,
    pub output_subdir: String,
}

impl IdMapEntry {
    pub fn forward_path(&self, output: &Utf8Path) -> Utf8PathBuf {
        output
            .join(&self.output_subdir)
            .join(format!("{}.fastq.gz", self.forward_name))
    }

    pub fn reverse_path(&self, output: &Utf8Path) -> Utf8PathBuf {
        output
            .join(&self.output_subdir)
            .join(format!("{}.fastq.gz", self.reverse_name))
    }
}

/// Parse `index \t forward_name \t reverse_name \t output_subdir` lines
pub fn parse_id_map(text: &str) -> SimpleResult<Vec<IdMapEntry>> {
    let mut entries: Vec<IdMapEntry> = Vec::new();
    for (line_index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = line.split('\t').map(|x| x.trim()).collect::<Vec<_>>();
        let entry = match fields.as_slice() {
            [index, forward, reverse, subdir] => IdMapEntry {
                index: index.to_string(),
                forward_name: forward.to_string(),
                reverse_name: reverse.to_string(),
                output_subdir: subdir.to_string(),
            },
            _ => bail!(
                "Id map line {} has {} fields instead of 4: '{line}'",
                line_index + 1,
                fields.len()
            ),
        };
        if entries.iter().any(|x| x.index == entry.index) {
            bail!("Id map index '{}' appears more than once", entry.index);
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn malformed(msg: String) -> PipelineError {
    PipelineError::io(
        "Malformed multiplexed fastq input",
        io::Error::new(io::ErrorKind::InvalidData, msg),
    )
}

/// Read one line, returning false at end of input
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> PipelineResult<bool> {
    buf.clear();
    let n = reader
        .read_until(b'\n', buf)
        .map_err(|e| PipelineError::io("Unable to read multiplexed fastq input", e))?;
    if buf.ends_with(b"\n") {
        buf.pop();
        if buf.ends_with(b"\r") {
            buf.pop();
        }
    }
    Ok(n > 0)
}

/// Split a tagged identity line into its index token and original id
fn split_identity(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let rest = line.strip_prefix(b"@")?;
    let pos = rest
        .windows(MUX_DELIMITER.len())
        .position(|w| w == MUX_DELIMITER)?;
    Some((&rest[..pos], &rest[pos + MUX_DELIMITER.len()..]))
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DemuxCounts {
    pub records_read: u64,
    pub pairs_written: u64,
}

/// Route every record tagged with `encoded_id` alternately to the forward and reverse writer
pub fn demux_records<R: BufRead, W1: Write, W2: Write>(
    mut reader: R,
    encoded_id: &str,
    forward: &mut W1,
    reverse: &mut W2,
) -> PipelineResult<DemuxCounts> {
    let write_err = |e| PipelineError::io("Unable to write demultiplexed fastq output", e);

    let mut counts = DemuxCounts::default();
    let mut matched = 0u64;
    let mut header = Vec::new();
    let mut seq = Vec::new();
    let mut sep = Vec::new();
    let mut qual = Vec::new();
    loop {
        if !read_line(&mut reader, &mut header)? {
            break;
        }
        counts.records_read += 1;
        let record = counts.records_read;
        for buf in [&mut seq, &mut sep, &mut qual] {
            if !read_line(&mut reader, buf)? {
                return Err(malformed(format!("Record {record} is truncated")));
            }
        }
        if !sep.starts_with(b"+") {
            return Err(malformed(format!(
                "Record {record} separator line does not start with '+'"
            )));
        }
        let (token, original_id) = match split_identity(&header) {
            Some(x) => x,
            None => {
                return Err(malformed(format!(
                    "Record {record} identity line has no '@<index>::MUX::' prefix: '{}'",
                    String::from_utf8_lossy(&header)
                )));
            }
        };
        if token != encoded_id.as_bytes() {
            continue;
        }

        let out: &mut dyn Write = if matched % 2 == 0 {
            &mut *forward
        } else {
            &mut *reverse
        };
        out.write_all(b"@").map_err(write_err)?;
        for line in [original_id, &seq[..], &sep[..], &qual[..]] {
            out.write_all(line).map_err(write_err)?;
            out.write_all(b"\n").map_err(write_err)?;
        }
        matched += 1;
    }

    if matched % 2 != 0 {
        return Err(malformed(format!(
            "Found an odd number of records ({matched}) for index '{encoded_id}', the final mate is unpaired"
        )));
    }
    counts.pairs_written = matched / 2;
    Ok(counts)
}

fn open_input(infile: Option<&Utf8Path>) -> PipelineResult<Box<dyn BufRead>> {
    match infile {
        None => Ok(Box::new(BufReader::new(io::stdin()))),
        Some(path) if path.as_str() == "-" => Ok(Box::new(BufReader::new(io::stdin()))),
        Some(path) => {
            let f = File::open(path).map_err(|e| {
                PipelineError::io(format!("Unable to open multiplexed fastq file '{path}'"), e)
            })?;
            if path.extension() == Some("gz") {
                Ok(Box::new(BufReader::new(MultiGzDecoder::new(f))))
            } else {
                Ok(Box::new(BufReader::new(f)))
            }
        }
    }
}

fn gzip_writer(path: &Utf8Path, threads: usize, block_size: usize) -> PipelineResult<ParCompress<Gzip>> {
    let f = File::create(path)
        .map_err(|e| PipelineError::io(format!("Unable to create output file '{path}'"), e))?;
    let builder = ParCompressBuilder::<Gzip>::new()
        .num_threads(threads)
        .and_then(|b| b.buffer_size(block_size))
        .map_err(|e| PipelineError::Config(format!("Invalid gzip writer settings: {e}")))?;
    Ok(builder.from_writer(f))
}

pub struct DemuxOptions<'a> {
    pub id_map: &'a Utf8Path,
    pub infile: Option<&'a Utf8Path>,
    pub output: &'a Utf8Path,
    pub encoded_id: &'a str,
    pub threads: usize,

    /// Compression buffer size in bytes
    pub block_size: usize,
}

/// Demultiplex one index from the input stream into its id-map output files
pub fn run_demux(options: &DemuxOptions) -> PipelineResult<DemuxCounts> {
    let id_map_text = std::fs::read_to_string(options.id_map).map_err(|e| {
        PipelineError::io(format!("Unable to read id map '{}'", options.id_map), e)
    })?;
    let entries = parse_id_map(&id_map_text)?;
    let entry = match entries.iter().find(|x| x.index == options.encoded_id) {
        Some(x) => x,
        None => {
            return Err(PipelineError::Config(format!(
                "Index '{}' is not in id map '{}'",
                options.encoded_id, options.id_map
            )));
        }
    };

    create_dir_all(&options.output.join(&entry.output_subdir), "demux output")?;
    let forward_path = entry.forward_path(options.output);
    let reverse_path = entry.reverse_path(options.output);

    // Compression threads are split between the two writers
    let writer_threads = (options.threads / 2).max(1);
    let mut forward = gzip_writer(&forward_path, writer_threads, options.block_size)?;
    let mut reverse = gzip_writer(&reverse_path, writer_threads, options.block_size)?;

    let reader = open_input(options.infile)?;
    let counts = demux_records(reader, options.encoded_id, &mut forward, &mut reverse)?;

    for (writer, path) in [(&mut forward, &forward_path), (&mut reverse, &reverse_path)] {
        writer.finish().map_err(|e| {
            PipelineError::io(
                format!("Unable to finish compressed output file '{path}'"),
                io::Error::other(e.to_string()),
            )
        })?;
    }

    info!(
        "Wrote {} read pairs for index '{}' to '{forward_path}' and '{reverse_path}'",
        counts.pairs_written, options.encoded_id
    );
    Ok(counts)
}

/// Entry point of the demux command
pub fn run_demux_command(shared: &SharedSettings, settings: &DemuxSettings) -> PipelineResult<()> {
    let options = DemuxOptions {
        id_map: &settings.id_map,
        infile: settings.infile.as_deref(),
        output: &settings.output,
        encoded_id: &settings.encoded_id,
        threads: shared.thread_count,
        block_size: settings.block_size,
    };
    let counts = run_demux(&options)?;
    info!(
        "Read {} records for index '{}'",
        counts.records_read, settings.encoded_id
    );
    Ok(())
}
