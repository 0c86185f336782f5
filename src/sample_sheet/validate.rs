use std::collections::BTreeSet;

use log::warn;
use simple_error::{SimpleResult, bail};

use super::{Assay, SampleSheet};

/// Literal placeholder barcodes used by amplicon sheets for samples which carry no index
const PLACEHOLDER_BARCODES: [&str; 2] = ["NNNNNNNN", "NNNNNNNNNNNN"];

const BARCODE_COLUMNS: [&str; 2] = ["index", "index2"];

fn is_filename_safe(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Blank out placeholder barcodes on amplicon sheets
///
/// Returns a description of each rewritten cell. These rewrites are reported as warnings for
/// operator review.
///
fn strip_placeholder_barcodes(sheet: &mut SampleSheet) -> Vec<String> {
    let mut rewrites = Vec::new();
    for sample in sheet.samples.iter_mut() {
        for column in BARCODE_COLUMNS {
            if let Some(value) = sample.columns.get_mut(column) {
                if PLACEHOLDER_BARCODES.contains(&value.as_str()) {
                    rewrites.push(format!(
                        "sample '{}' column '{column}' placeholder '{value}'",
                        sample.sample_name
                    ));
                    value.clear();
                }
            }
        }
    }
    rewrites
}

/// Check all structural requirements of a loaded sample sheet
///
/// On success the sheet is returned, with amplicon placeholder barcodes blanked out.
///
pub fn validate(mut sheet: SampleSheet) -> SimpleResult<SampleSheet> {
    let assay = sheet.assay()?;

    if sheet.samples.is_empty() {
        bail!("Sample sheet '{}' contains no samples", sheet.path);
    }

    let projects = sheet.project_params()?;
    let mut project_names = BTreeSet::new();
    for params in projects.iter() {
        if !project_names.insert(params.project.name.clone()) {
            bail!(
                "Project '{}' appears more than once in the bioinformatics table",
                params.project
            );
        }
    }

    let mut sample_keys = BTreeSet::new();
    for sample in sheet.samples.iter() {
        if !project_names.contains(&sample.project.name) {
            bail!(
                "Sample '{}' belongs to project '{}' which is not in the bioinformatics table",
                sample.sample_name,
                sample.project
            );
        }
        if !is_filename_safe(&sample.sample_id) {
            bail!(
                "Sample id '{}' may only contain letters, digits, underscores and hyphens",
                sample.sample_id
            );
        }
        if !sample_keys.insert((sample.sample_id.clone(), sample.lane)) {
            bail!(
                "Sample id '{}' appears more than once in lane {}",
                sample.sample_id,
                sample.lane
            );
        }
    }

    let carried = sheet.carried_prep_columns()?;
    let missing = carried
        .iter()
        .filter(|x| !sheet.data_columns.contains(x))
        .cloned()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "Sample sheet '{}' is missing required columns: {}",
            sheet.path,
            missing.join(", ")
        );
    }

    for project in projects.iter().filter(|x| x.project.study_id.is_none()) {
        warn!(
            "Project '{}' does not carry a study id suffix, its study id is unknown",
            project.project
        );
    }

    if assay == Assay::Amplicon {
        let rewrites = strip_placeholder_barcodes(&mut sheet);
        if !rewrites.is_empty() {
            warn!(
                "Blanked {} placeholder barcodes in amplicon sample sheet '{}', please review: {}",
                rewrites.len(),
                sheet.path,
                rewrites.join("; ")
            );
        }
    }

    Ok(sheet)
}
