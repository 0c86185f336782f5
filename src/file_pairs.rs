//! Pair forward/reverse read files and partition pairs into size-bounded batches
//!

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use simple_error::{SimpleResult, bail};

use crate::errors::{PipelineError, PipelineResult};
use crate::os_utils::file_size;

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

/// Orientation token families, as (forward, reverse) token pairs
const ORIENTATION_FAMILIES: [(&str, &str); 2] = [("_R1_", "_R2_"), (".R1.", ".R2.")];

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct FilePair {
    pub forward: Utf8PathBuf,
    pub reverse: Utf8PathBuf,
}

/// Split a path around the rightmost occurrence of `token`
fn split_at_token<'a>(path: &'a str, token: &str) -> Option<(&'a str, &'a str)> {
    path.rfind(token)
        .map(|pos| (&path[..pos], &path[pos + token.len()..]))
}

/// Check that two paths form a forward/reverse pair
fn check_pair(forward: &Utf8Path, reverse: &Utf8Path) -> SimpleResult<()> {
    let (fwd_token, rev_token) = match ORIENTATION_FAMILIES
        .iter()
        .find(|(f, _)| forward.as_str().contains(f))
    {
        Some(x) => *x,
        None => bail!(
            "Cannot find an orientation token (_R1_ or .R1.) in forward file '{forward}'"
        ),
    };

    let (fwd_prefix, fwd_suffix) = split_at_token(forward.as_str(), fwd_token).unwrap_or_default();
    let (rev_prefix, rev_suffix) = match split_at_token(reverse.as_str(), rev_token) {
        Some(x) => x,
        None => bail!(
            "Missing counterpart for forward file '{forward}': '{reverse}' has no {rev_token} token"
        ),
    };

    if fwd_prefix != rev_prefix {
        bail!("Mismatched prefixes for file pair:\n{forward}\n{reverse}");
    }
    if fwd_suffix != rev_suffix {
        bail!("Mismatched suffixes for file pair:\n{forward}\n{reverse}");
    }
    Ok(())
}

/// Iterates over forward/reverse pairs of a set of read files
///
/// Files are sorted lexicographically and consumed two at a time. A pairing error ends the
/// iteration.
///
pub struct PairedFileIter {
    paths: std::vec::IntoIter<Utf8PathBuf>,
    failed: bool,
}

impl Iterator for PairedFileIter {
    type Item = SimpleResult<FilePair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let forward = self.paths.next()?;
        let result = match self.paths.next() {
            Some(reverse) => check_pair(&forward, &reverse).map(|_| FilePair { forward, reverse }),
            None => Err(simple_error::simple_error!(
                "Unpaired file count, no reverse file for '{forward}'"
            )),
        };
        self.failed = result.is_err();
        Some(result)
    }
}

pub fn iter_paired_files(paths: impl IntoIterator<Item = Utf8PathBuf>) -> PairedFileIter {
    let mut paths = paths.into_iter().collect::<Vec<_>>();
    paths.sort();
    PairedFileIter {
        paths: paths.into_iter(),
        failed: false,
    }
}

/// Pair all files, failing on the first pairing error
pub fn pair_files(paths: impl IntoIterator<Item = Utf8PathBuf>) -> SimpleResult<Vec<FilePair>> {
    let paths = paths.into_iter().collect::<Vec<_>>();
    if paths.len() % 2 != 0 {
        bail!("Unpaired file count, found {} read files", paths.len());
    }
    iter_paired_files(paths).collect()
}

/// One row of an array-job manifest
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub forward: Utf8PathBuf,
    pub reverse: Utf8PathBuf,
    pub output_subdir: String,
}

/// Assign pair indices to batches, given the forward file size of each pair
///
/// A new batch starts whenever adding the next pair would take the running size above `limit`.
/// A single pair larger than `limit` forms its own batch.
///
pub fn plan_batches(forward_sizes: &[u64], limit: u64) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0u64;
    for (index, &size) in forward_sizes.iter().enumerate() {
        if !current.is_empty() && current_size.saturating_add(size) > limit {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(index);
        current_size = current_size.saturating_add(size);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Manifest filename for a 1-based array index
pub fn manifest_path(manifest_prefix: &Utf8Path, array_index: usize) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{manifest_prefix}-{array_index}"))
}

fn write_manifest(filename: &Utf8Path, batches: &[Batch]) -> PipelineResult<()> {
    let io_err = |e| PipelineError::io(format!("Unable to write batch manifest '{filename}'"), e);
    let f = File::create(filename).map_err(io_err)?;
    let mut f = BufWriter::new(f);
    for batch in batches {
        writeln!(
            f,
            "{}\t{}\t{}",
            batch.forward, batch.reverse, batch.output_subdir
        )
        .map_err(io_err)?;
    }
    f.flush().map_err(io_err)?;
    Ok(())
}

/// Partition file pairs into size-bounded manifests for an array job
///
/// Only forward file sizes are counted, so the bucket size is halved to account for the reverse
/// strand processed alongside each forward file.
///
/// Manifests are written to `<manifest_prefix>-<n>` for `n` from 1. Returns the number of
/// manifests written.
///
pub fn bin(
    pairs: &[FilePair],
    output_subdir: &str,
    bucket_size_gb: f64,
    manifest_prefix: &Utf8Path,
    array_cap: usize,
) -> PipelineResult<usize> {
    if pairs.is_empty() {
        return Err(PipelineError::Config(format!(
            "No file pairs to bin for '{output_subdir}'"
        )));
    }
    for pair in pairs {
        if [pair.forward.as_str(), pair.reverse.as_str(), output_subdir]
            .iter()
            .any(|x| x.contains(['\t', '\n']))
        {
            return Err(PipelineError::Config(format!(
                "File pair contains tab or newline characters: '{}'",
                pair.forward
            )));
        }
    }

    let forward_sizes = pairs
        .iter()
        .map(|x| file_size(&x.forward))
        .collect::<PipelineResult<Vec<_>>>()?;

    let limit = (bucket_size_gb / 2.0 * BYTES_PER_GB) as u64;
    let plan = plan_batches(&forward_sizes, limit);

    if plan.len() > array_cap {
        return Err(PipelineError::Config(format!(
            "{} batches are required for '{output_subdir}' but the array size limit is {array_cap}, increase the bucket size",
            plan.len()
        )));
    }

    for (batch_index, pair_indices) in plan.iter().enumerate() {
        let batches = pair_indices
            .iter()
            .map(|&i| Batch {
                forward: pairs[i].forward.clone(),
                reverse: pairs[i].reverse.clone(),
                output_subdir: output_subdir.to_string(),
            })
            .collect::<Vec<_>>();
        write_manifest(&manifest_path(manifest_prefix, batch_index + 1), &batches)?;
    }

    debug!(
        "Binned {} file pairs for '{output_subdir}' into {} batches",
        pairs.len(),
        plan.len()
    );

    Ok(plan.len())
}
