//! Map produced fastq files back onto the sample ids which generated them
//!

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use itertools::Itertools;

use crate::errors::{PipelineError, PipelineResult};
use crate::file_pairs::{FilePair, pair_files};

/// Tokens marking read orientation in a fastq filename
const ORIENTATION_TOKENS: [&str; 8] = [
    "_R1_", "_R2_", "_I1_", "_I2_", ".R1.", ".R2.", ".I1.", ".I2.",
];

/// True if `sample_id` is a prefix of `file_name` ending on a name separator
fn is_sample_prefix(sample_id: &str, file_name: &str) -> bool {
    file_name.starts_with(sample_id)
        && matches!(file_name.as_bytes().get(sample_id.len()), Some(b'_' | b'.'))
}

/// Find the longest sample id which prefixes the file name
pub(crate) fn resolve_sample<'a>(sample_ids: &'a [String], file_name: &str) -> Option<&'a str> {
    sample_ids
        .iter()
        .filter(|x| !x.is_empty() && is_sample_prefix(x, file_name))
        .max_by_key(|x| x.len())
        .map(|x| x.as_str())
}

/// Assign each produced file to exactly one sample id
///
/// Each file is claimed by the longest sample id which prefixes its filename, so that a sample
/// `S1_B` keeps its own files even when a sample `S1` is also present. Every resolved sample must
/// account for exactly two files.
///
pub fn map_files(
    sample_ids: &[String],
    files: &[Utf8PathBuf],
) -> PipelineResult<BTreeMap<String, FilePair>> {
    let mut by_sample: BTreeMap<String, Vec<Utf8PathBuf>> = BTreeMap::new();
    for file in files {
        let file_name = file.file_name().unwrap_or(file.as_str());
        match resolve_sample(sample_ids, file_name) {
            Some(sample_id) => by_sample
                .entry(sample_id.to_string())
                .or_default()
                .push(file.clone()),
            None => {
                return Err(PipelineError::Resolver(format!(
                    "File '{file}' cannot be matched to any sample id"
                )));
            }
        }
    }

    let mut pairs = BTreeMap::new();
    for (sample_id, files) in by_sample {
        if files.len() != 2 {
            return Err(PipelineError::Resolver(format!(
                "Sample '{sample_id}' matched {} files instead of 2: {}",
                files.len(),
                files.iter().join(", ")
            )));
        }
        let mut pair = pair_files(files)
            .map_err(|e| PipelineError::Resolver(format!("Sample '{sample_id}': {e}")))?;
        pairs.insert(sample_id, pair.remove(0));
    }
    Ok(pairs)
}

/// Portion of a filename before its rightmost orientation token
///
/// Returns None if the name carries no orientation token.
///
pub fn get_run_prefix(file_name: &str) -> Option<String> {
    ORIENTATION_TOKENS
        .iter()
        .filter_map(|token| file_name.rfind(token))
        .max()
        .map(|pos| file_name[..pos].to_string())
}
