//! Amplicon mapping files
//!
//! Amplicon runs are described by a tab-separated mapping file rather than a sample sheet. The
//! file carries a broader fixed column set, all of which is copied into the preparation file.
//!

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, Trim};
use simple_error::{SimpleResult, bail, try_with};

use super::{canonical_column_name, select_well_column};
use crate::project::Project;

/// Columns required on every mapping file, other than the well column
pub const REQUIRED_MAPPING_COLUMNS: &[&str] = &[
    "barcode",
    "center_name",
    "center_project_name",
    "experiment_design_description",
    "extraction_robot",
    "extractionkit_lot",
    "instrument_model",
    "library_construction_protocol",
    "linker",
    "mastermix_lot",
    "orig_name",
    "pcr_primers",
    "plating",
    "platform",
    "primer",
    "primer_date",
    "primer_plate",
    "processing_robot",
    "project_name",
    "run_center",
    "run_date",
    "run_prefix",
    "runid",
    "sample_name",
    "sample_plate",
    "sequencing_meth",
    "target_gene",
    "target_subfragment",
    "tm1000_8_tool",
    "tm300_8_tool",
    "tm50_8_tool",
    "water_lot",
    "well_description",
];

#[derive(Clone, Debug, PartialEq)]
pub struct MappingRow {
    pub sample_name: String,
    pub project: Project,
    pub columns: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MappingFile {
    pub path: Utf8PathBuf,

    /// Canonical column names in file order
    pub columns: Vec<String>,

    pub rows: Vec<MappingRow>,
}

impl MappingFile {
    /// Columns copied from the mapping file into the preparation file
    pub fn carried_prep_columns(&self) -> SimpleResult<Vec<String>> {
        let well_column = select_well_column(&self.columns)?;
        let mut columns = REQUIRED_MAPPING_COLUMNS
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>();
        columns.push(well_column.to_string());
        Ok(columns)
    }

    /// Distinct projects in file order
    pub fn projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = Vec::new();
        for row in self.rows.iter() {
            if !projects.contains(&row.project) {
                projects.push(row.project.clone());
            }
        }
        projects
    }
}

pub fn parse(text: &str, path: &Utf8Path) -> SimpleResult<MappingFile> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let headers = try_with!(rdr.headers(), "Unable to read header of mapping file '{path}'");
    let columns = headers
        .iter()
        .map(canonical_column_name)
        .collect::<Vec<_>>();

    let missing = REQUIRED_MAPPING_COLUMNS
        .iter()
        .filter(|x| !columns.iter().any(|c| c == *x))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "Mapping file '{path}' is missing required columns: {}",
            missing.join(", ")
        );
    }
    select_well_column(&columns)?;

    let mut rows = Vec::new();
    for (row_index, result) in rdr.records().enumerate() {
        let record = try_with!(
            result,
            "Failed to parse record {} of mapping file '{path}'",
            row_index + 1
        );
        let row = columns
            .iter()
            .cloned()
            .zip(record.iter().map(|x| x.to_string()))
            .collect::<BTreeMap<_, _>>();

        let sample_name = row.get("sample_name").cloned().unwrap_or_default();
        if sample_name.is_empty() {
            bail!("Row {} of mapping file '{path}' has no sample_name", row_index + 1);
        }

        let project = Project::new(row.get("project_name").map_or("", |x| x.as_str()));
        if project.study_id.is_none() {
            bail!(
                "Project '{project}' of sample '{sample_name}' does not end in a study id, which is required for amplicon runs"
            );
        }

        rows.push(MappingRow {
            sample_name,
            project,
            columns: row,
        });
    }

    if rows.is_empty() {
        bail!("Mapping file '{path}' contains no samples");
    }

    Ok(MappingFile {
        path: path.to_path_buf(),
        columns,
        rows,
    })
}

pub fn load(path: &Utf8Path) -> SimpleResult<MappingFile> {
    let text = try_with!(
        std::fs::read_to_string(path),
        "Unable to read mapping file: '{path}'"
    );
    parse(&text, path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mapping_text(projects: &[&str]) -> String {
        let mut columns = REQUIRED_MAPPING_COLUMNS
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>();
        columns.push("well_id_384".to_string());
        let mut text = columns.join("\t") + "\n";
        for (i, project) in projects.iter().enumerate() {
            let values = columns
                .iter()
                .map(|c| match c.as_str() {
                    "sample_name" => format!("sample.{i}"),
                    "project_name" => project.to_string(),
                    "well_id_384" => format!("A{}", i + 1),
                    "sample_plate" => "Plate_16S".to_string(),
                    _ => format!("{c}_value"),
                })
                .collect::<Vec<_>>();
            text += &(values.join("\t") + "\n");
        }
        text
    }

    #[test]
    fn test_parse_mapping_file() {
        let text = mapping_text(&["Study_10001", "Study_10001", "Other_10002"]);
        let mf = parse(&text, Utf8Path::new("map.tsv")).unwrap();
        assert_eq!(mf.rows.len(), 3);
        assert_eq!(mf.rows[0].sample_name, "sample.0");
        assert_eq!(mf.projects().len(), 2);
        let carried = mf.carried_prep_columns().unwrap();
        assert!(carried.contains(&"well_id_384".to_string()));
        assert!(carried.contains(&"primer".to_string()));
    }

    #[test]
    fn test_study_id_required() {
        let text = mapping_text(&["StudyWithoutId"]);
        let err = parse(&text, Utf8Path::new("map.tsv")).unwrap_err();
        assert!(err.to_string().contains("study id"));
    }

    #[test]
    fn test_missing_columns() {
        let text = "sample_name\tproject_name\nx\tP_1\n";
        let err = parse(text, Utf8Path::new("map.tsv")).unwrap_err();
        assert!(err.to_string().contains("barcode"));
    }
}
