//! Illumina sample sheet adapter
//!
//! The sample sheet is exposed as three projections: the header key/value map, the ordered sample
//! rows, and the project-keyed bioinformatics table. Downstream code only touches these shapes.
//!

pub mod mapping_file;
mod validate;

use std::collections::BTreeMap;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, StringRecord, Trim};
use simple_error::{SimpleResult, bail, try_with};
use strum::{Display, EnumString};

pub use self::validate::validate;
use crate::project::Project;

/// Columns which the prep builder derives rather than copying from the sheet
pub const GENERATED_PREP_COLUMNS: &[&str] = &[
    "center_name",
    "center_project_name",
    "instrument_model",
    "lane",
    "platform",
    "run_center",
    "run_date",
    "run_prefix",
    "runid",
    "sequencing_meth",
    "well_description",
];

/// The two accepted names of the sample well column
pub const WELL_COLUMNS: [&str; 2] = ["well_id_384", "sample_well"];

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum Assay {
    Metagenomic,
    Metatranscriptomic,
    #[strum(to_string = "Amplicon", serialize = "TruSeq HT")]
    Amplicon,
}

/// Normalise a column or header key name to its canonical form
///
/// Names are lowercased with space and dash separators replaced by underscores. The camel-case
/// names used in the bioinformatics section are mapped onto their snake-case equivalents.
///
pub fn canonical_column_name(name: &str) -> String {
    let name = name.trim().to_lowercase().replace([' ', '-'], "_");
    let alias = match name.as_str() {
        "forwardadapter" => "forward_adapter",
        "reverseadapter" => "reverse_adapter",
        "humanfiltering" => "human_filtering",
        "polygtrimming" => "polyg_trimming",
        "qiitaid" => "qiita_id",
        "barcodesarerc" => "barcodes_are_rc",
        "samplename" => "sample_name",
        "sampleid" => "sample_id",
        "sampleproject" => "sample_project",
        _ => return name,
    };
    alias.to_string()
}

/// Replace every run of characters outside `[A-Za-z0-9_-]` with a single underscore
pub fn scrub_sample_name(name: &str) -> String {
    let mut scrubbed = String::with_capacity(name.len());
    let mut in_bad_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            scrubbed.push(c);
            in_bad_run = false;
        } else if !in_bad_run {
            scrubbed.push('_');
            in_bad_run = true;
        }
    }
    scrubbed
}

/// Coerce a boolean-valued cell
///
/// # Arguments
/// * `column` - Column name used in the error message
/// * `row` - Row label (usually the project or sample) used in the error message
///
pub fn parse_bool(value: &str, column: &str, row: &str) -> SimpleResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        _ => bail!("Column '{column}' in row '{row}' must be a boolean value, found '{value}'"),
    }
}

fn is_absent(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("na") || value.eq_ignore_ascii_case("none")
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampleRow {
    /// Filename-safe form of the sample name
    pub sample_id: String,

    /// Sample name as originally submitted
    pub sample_name: String,

    pub project: Project,
    pub lane: u32,

    /// All columns of the row, keyed on canonical column name
    pub columns: BTreeMap<String, String>,
}

impl SampleRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(|x| x.as_str())
    }
}

/// Per-project processing parameters from the bioinformatics section
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectParams {
    pub project: Project,

    /// Both adapters are present or both absent
    pub adapters: Option<(String, String)>,

    pub human_filtering: bool,
    pub polyg_trimming: bool,
}

impl ProjectParams {
    /// Build typed project parameters from one bioinformatics table row
    pub fn from_row(row: &BTreeMap<String, String>) -> SimpleResult<Self> {
        let project_name = match row.get("sample_project") {
            Some(x) if !x.trim().is_empty() => x.trim(),
            _ => bail!("Bioinformatics row is missing a Sample_Project value"),
        };

        let forward = row.get("forward_adapter").map(|x| x.as_str()).unwrap_or("");
        let reverse = row.get("reverse_adapter").map(|x| x.as_str()).unwrap_or("");
        let adapters = match (is_absent(forward), is_absent(reverse)) {
            (true, true) => None,
            (false, false) => {
                for (label, seq) in [("forward", forward), ("reverse", reverse)] {
                    if !seq.trim().chars().all(|c| "ACGTNacgtn".contains(c)) {
                        bail!(
                            "Project '{project_name}' {label} adapter is not a nucleotide sequence: '{seq}'"
                        );
                    }
                }
                Some((
                    forward.trim().to_uppercase(),
                    reverse.trim().to_uppercase(),
                ))
            }
            _ => bail!(
                "Project '{project_name}' must declare both adapters or neither, found forward '{forward}' and reverse '{reverse}'"
            ),
        };

        let human_filtering = match row.get("human_filtering") {
            Some(x) => parse_bool(x, "HumanFiltering", project_name)?,
            None => bail!("Project '{project_name}' is missing the HumanFiltering column"),
        };

        let polyg_trimming = match row.get("polyg_trimming") {
            Some(x) if !x.trim().is_empty() => parse_bool(x, "PolyGTrimming", project_name)?,
            _ => false,
        };

        Ok(Self {
            project: Project::new(project_name),
            adapters,
            human_filtering,
            polyg_trimming,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSheet {
    pub path: Utf8PathBuf,

    /// Header key/value pairs, keyed on canonical key name
    pub header: BTreeMap<String, String>,

    pub reads: Vec<u32>,
    pub settings: BTreeMap<String, String>,

    /// Canonical data column names in sheet order
    pub data_columns: Vec<String>,

    pub samples: Vec<SampleRow>,

    /// Raw bioinformatics rows, keyed on canonical column name, in sheet order
    pub bioinformatics: Vec<BTreeMap<String, String>>,

    pub contacts: Vec<BTreeMap<String, String>>,
}

impl SampleSheet {
    pub fn assay(&self) -> SimpleResult<Assay> {
        let assay = match self.header.get("assay") {
            Some(x) => x,
            None => bail!("Sample sheet '{}' has no Assay header entry", self.path),
        };
        match Assay::from_str(assay.trim()) {
            Ok(x) => Ok(x),
            Err(_) => bail!("Sample sheet '{}' has unknown assay '{assay}'", self.path),
        }
    }

    pub fn chemistry(&self) -> Option<&str> {
        self.header.get("chemistry").map(|x| x.as_str())
    }

    /// Typed project parameters for every row of the bioinformatics table
    pub fn project_params(&self) -> SimpleResult<Vec<ProjectParams>> {
        self.bioinformatics.iter().map(ProjectParams::from_row).collect()
    }

    /// Name of the well column used by this sheet
    ///
    /// Exactly one of the two accepted well column names must be present.
    ///
    pub fn well_column(&self) -> SimpleResult<&'static str> {
        select_well_column(&self.data_columns)
    }

    /// Columns which must already be present on every sample row
    pub fn carried_prep_columns(&self) -> SimpleResult<Vec<String>> {
        let well_column = self.well_column()?;
        Ok([
            "sample_name",
            "experiment_design_description",
            "library_construction_protocol",
            "sample_plate",
            well_column,
            "i7_index_id",
            "index",
            "i5_index_id",
            "index2",
            "sample_project",
        ]
        .into_iter()
        .map(|x| x.to_string())
        .collect())
    }

    pub fn generated_prep_columns(&self) -> Vec<String> {
        GENERATED_PREP_COLUMNS.iter().map(|x| x.to_string()).collect()
    }

    pub fn samples_for_project<'a>(
        &'a self,
        project_name: &'a str,
    ) -> impl Iterator<Item = &'a SampleRow> + 'a {
        self.samples
            .iter()
            .filter(move |x| x.project.name == project_name)
    }

    /// Sorted, deduplicated lanes used in the sheet
    pub fn lanes(&self) -> Vec<u32> {
        let mut lanes = self.samples.iter().map(|x| x.lane).collect::<Vec<_>>();
        lanes.sort_unstable();
        lanes.dedup();
        lanes
    }
}

/// Select the well column from a column list, requiring exactly one accepted name
pub fn select_well_column(columns: &[String]) -> SimpleResult<&'static str> {
    let present = WELL_COLUMNS
        .into_iter()
        .filter(|x| columns.iter().any(|c| c == x))
        .collect::<Vec<_>>();
    match present.as_slice() {
        [x] => Ok(*x),
        [] => bail!(
            "Sample table must contain one of the well columns '{}' or '{}'",
            WELL_COLUMNS[0],
            WELL_COLUMNS[1]
        ),
        _ => bail!(
            "Sample table must contain only one of the well columns '{}' or '{}', found both",
            WELL_COLUMNS[0],
            WELL_COLUMNS[1]
        ),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Section {
    None,
    Header,
    Reads,
    Settings,
    Data,
    Bioinformatics,
    Contact,
    Unknown,
}

impl Section {
    fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "header" => Self::Header,
            "reads" => Self::Reads,
            "settings" => Self::Settings,
            "data" => Self::Data,
            "bioinformatics" => Self::Bioinformatics,
            "contact" => Self::Contact,
            _ => Self::Unknown,
        }
    }
}

/// Accumulates a headered table section
#[derive(Default)]
struct TableSection {
    columns: Option<Vec<String>>,
    rows: Vec<BTreeMap<String, String>>,
}

impl TableSection {
    fn push(&mut self, fields: &[String], line: u64, label: &str) -> SimpleResult<()> {
        match &self.columns {
            None => {
                let columns = fields
                    .iter()
                    .map(|x| canonical_column_name(x))
                    .filter(|x| !x.is_empty())
                    .collect::<Vec<_>>();
                for (i, c) in columns.iter().enumerate() {
                    if columns[..i].contains(c) {
                        bail!("Duplicate column '{c}' in [{label}] section");
                    }
                }
                self.columns = Some(columns);
            }
            Some(columns) => {
                if fields.iter().skip(columns.len()).any(|x| !x.is_empty()) {
                    bail!("Line {line} of the [{label}] section has more fields than columns");
                }
                let row = columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.clone(), fields.get(i).cloned().unwrap_or_default()))
                    .collect();
                self.rows.push(row);
            }
        }
        Ok(())
    }
}

fn record_fields(record: &StringRecord) -> Vec<String> {
    let mut fields = record.iter().map(|x| x.to_string()).collect::<Vec<_>>();
    while fields.last().is_some_and(|x| x.is_empty()) {
        fields.pop();
    }
    fields
}

/// Parse a sectioned sample sheet from CSV text
pub fn parse(text: &str, path: &Utf8Path) -> SimpleResult<SampleSheet> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut sheet = SampleSheet {
        path: path.to_path_buf(),
        ..Default::default()
    };
    let mut data = TableSection::default();
    let mut bioinformatics = TableSection::default();
    let mut contact = TableSection::default();
    let mut section = Section::None;

    for result in rdr.records() {
        let record = try_with!(result, "Failed to parse csv record in sample sheet '{path}'");
        let line = record.position().map_or(0, |p| p.line());
        let fields = record_fields(&record);
        if fields.is_empty() {
            continue;
        }

        let first = fields[0].as_str();
        if first.starts_with('[') && first.ends_with(']') {
            section = Section::from_label(&first[1..first.len() - 1]);
            continue;
        }

        match section {
            Section::None => bail!("Sample sheet '{path}' has content before the first section"),
            Section::Header => {
                let value = fields.get(1).cloned().unwrap_or_default();
                sheet.header.insert(canonical_column_name(first), value);
            }
            Section::Settings => {
                let value = fields.get(1).cloned().unwrap_or_default();
                sheet.settings.insert(first.to_string(), value);
            }
            Section::Reads => {
                let cycles = try_with!(
                    first.parse::<u32>(),
                    "Invalid read cycle count '{first}' on line {line} of sample sheet '{path}'"
                );
                sheet.reads.push(cycles);
            }
            Section::Data => data.push(&fields, line, "Data")?,
            Section::Bioinformatics => bioinformatics.push(&fields, line, "Bioinformatics")?,
            Section::Contact => contact.push(&fields, line, "Contact")?,
            Section::Unknown => {}
        }
    }

    let data_columns = match data.columns {
        Some(x) => x,
        None => bail!("Sample sheet '{path}' has no [Data] section"),
    };
    if bioinformatics.columns.is_none() {
        bail!("Sample sheet '{path}' has no [Bioinformatics] section");
    }

    sheet.bioinformatics = bioinformatics.rows;
    sheet.contacts = contact.rows;

    for (row_index, mut columns) in data.rows.into_iter().enumerate() {
        let sample_name = columns.get("sample_name").cloned().unwrap_or_default();
        if sample_name.is_empty() {
            bail!("Sample row {} has no Sample_Name value", row_index + 1);
        }
        let sample_id = match columns.get("sample_id") {
            Some(x) if !x.is_empty() => x.clone(),
            _ => scrub_sample_name(&sample_name),
        };
        let project_name = match columns.get("sample_project") {
            Some(x) if !x.is_empty() => x.clone(),
            _ => bail!("Sample '{sample_name}' has no Sample_Project value"),
        };
        let lane = match columns.get("lane") {
            Some(x) if !x.is_empty() => try_with!(
                x.parse::<u32>(),
                "Sample '{sample_name}' has invalid lane value '{x}'"
            ),
            _ => 1,
        };

        // Fold per-project bioinformatics columns onto the row where the row does not carry them
        if let Some(bio_row) = sheet
            .bioinformatics
            .iter()
            .find(|x| x.get("sample_project") == Some(&project_name))
        {
            for (k, v) in bio_row.iter() {
                if !columns.contains_key(k) && !is_bioinformatics_control_column(k) {
                    columns.insert(k.clone(), v.clone());
                }
            }
        }

        sheet.samples.push(SampleRow {
            sample_id,
            sample_name,
            project: Project::new(&project_name),
            lane,
            columns,
        });
    }

    // Columns folded in from the bioinformatics table become data columns
    let mut data_columns = data_columns;
    for bio_row in sheet.bioinformatics.iter() {
        for k in bio_row.keys() {
            if !data_columns.contains(k) && !is_bioinformatics_control_column(k) {
                data_columns.push(k.clone());
            }
        }
    }
    sheet.data_columns = data_columns;

    Ok(sheet)
}

/// Bioinformatics columns which control processing and are never copied onto sample rows
fn is_bioinformatics_control_column(column: &str) -> bool {
    matches!(
        column,
        "sample_project"
            | "forward_adapter"
            | "reverse_adapter"
            | "human_filtering"
            | "polyg_trimming"
            | "qiita_id"
            | "barcodes_are_rc"
    )
}

/// Read and parse a sample sheet
pub fn load(path: &Utf8Path) -> SimpleResult<SampleSheet> {
    let text = try_with!(
        std::fs::read_to_string(path),
        "Unable to read sample sheet file: '{path}'"
    );
    parse(&text, path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn two_project_sheet_text() -> String {
        "[Header]\n\
IEMFileVersion,4\n\
Investigator Name,Knight\n\
Date,2022-01-01\n\
Assay,Metagenomic\n\
Chemistry,Default\n\
,,\n\
[Reads]\n\
151\n\
151\n\
\n\
[Settings]\n\
ReverseComplement,0\n\
\n\
[Data]\n\
Sample_ID,Sample_Name,Sample_Plate,well_id_384,I7_Index_ID,index,I5_Index_ID,index2,Sample_Project,Well_description,Lane\n\
S1,S1,Plate_1,A1,iTru7_101_01,ACGTTACC,iTru5_01_A,ACCGACAA,Proj_1000,Plate_1.S1.A1,1\n\
S1_B,S1.B,Plate_1,A3,iTru7_101_02,CTGTGTTG,iTru5_01_B,AGTGGCAA,Proj_1000,Plate_1.S1.B.A3,1\n\
S2,S2,Plate_1,A5,iTru7_101_03,TGAGGTGT,iTru5_01_C,CACAGACT,Proj_2000,Plate_1.S2.A5,1\n\
S3,S3,Plate_1,A7,iTru7_101_04,GATCCATG,iTru5_01_D,CGACACTT,Proj_2000,Plate_1.S3.A7,1\n\
\n\
[Bioinformatics]\n\
Sample_Project,QiitaID,BarcodesAreRC,ForwardAdapter,ReverseAdapter,HumanFiltering,library_construction_protocol,experiment_design_description\n\
Proj_1000,1000,False,NA,NA,False,Knight Lab Kapa HP,Eqiiperiment\n\
Proj_2000,2000,False,AAAA,TTTT,True,Knight Lab Kapa HP,Eqiiperiment\n\
\n\
[Contact]\n\
Sample_Project,Email\n\
Proj_1000,a@b.c\n"
            .to_string()
    }

    pub(crate) fn two_project_sheet() -> SampleSheet {
        parse(&two_project_sheet_text(), Utf8Path::new("test.csv")).unwrap()
    }

    #[test]
    fn test_canonical_column_name() {
        assert_eq!(canonical_column_name("Sample_ID"), "sample_id");
        assert_eq!(canonical_column_name("Investigator Name"), "investigator_name");
        assert_eq!(canonical_column_name("ForwardAdapter"), "forward_adapter");
        assert_eq!(canonical_column_name("PolyGTrimming"), "polyg_trimming");
        assert_eq!(canonical_column_name(" index2 "), "index2");
    }

    #[test]
    fn test_scrub_sample_name() {
        assert_eq!(scrub_sample_name("S1.B"), "S1_B");
        assert_eq!(scrub_sample_name("a b..c"), "a_b_c");
        assert_eq!(scrub_sample_name("ok_name-1"), "ok_name-1");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("True", "c", "r").unwrap());
        assert!(parse_bool("yes", "c", "r").unwrap());
        assert!(!parse_bool("FALSE", "c", "r").unwrap());
        assert!(!parse_bool("no", "c", "r").unwrap());
        let err = parse_bool("maybe", "HumanFiltering", "Proj_1").unwrap_err();
        assert!(err.to_string().contains("HumanFiltering"));
        assert!(err.to_string().contains("Proj_1"));
    }

    #[test]
    fn test_parse_sheet() {
        let sheet = two_project_sheet();
        assert_eq!(sheet.assay().unwrap(), Assay::Metagenomic);
        assert_eq!(sheet.chemistry(), Some("Default"));
        assert_eq!(sheet.header.get("investigator_name").unwrap(), "Knight");
        assert_eq!(sheet.reads, vec![151, 151]);
        assert_eq!(sheet.samples.len(), 4);
        assert_eq!(sheet.samples[1].sample_id, "S1_B");
        assert_eq!(sheet.samples[1].sample_name, "S1.B");
        assert_eq!(sheet.samples[1].project.study_id, Some(1000));
        assert_eq!(sheet.samples[1].lane, 1);
        assert_eq!(
            sheet.samples[0].get("library_construction_protocol"),
            Some("Knight Lab Kapa HP")
        );
        assert!(sheet.data_columns.contains(&"experiment_design_description".to_string()));
        assert!(!sheet.data_columns.contains(&"human_filtering".to_string()));
        assert_eq!(sheet.well_column().unwrap(), "well_id_384");
        assert_eq!(sheet.lanes(), vec![1]);
        assert_eq!(sheet.samples_for_project("Proj_2000").count(), 2);
        assert_eq!(sheet.contacts.len(), 1);
    }

    #[test]
    fn test_project_params() {
        let sheet = two_project_sheet();
        let params = sheet.project_params().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].adapters, None);
        assert!(!params[0].human_filtering);
        assert_eq!(
            params[1].adapters,
            Some(("AAAA".to_string(), "TTTT".to_string()))
        );
        assert!(params[1].human_filtering);
        assert!(!params[1].polyg_trimming);
    }

    #[test]
    fn test_mixed_adapters_rejected() {
        let text = two_project_sheet_text().replace(
            "Proj_2000,2000,False,AAAA,TTTT",
            "Proj_2000,2000,False,AAAA,NA",
        );
        let sheet = parse(&text, Utf8Path::new("test.csv")).unwrap();
        let err = sheet.project_params().unwrap_err();
        assert!(err.to_string().contains("both adapters or neither"));
    }

    #[test]
    fn test_well_column_policy() {
        let cols = |x: &[&str]| x.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert_eq!(select_well_column(&cols(&["sample_well"])).unwrap(), "sample_well");
        assert!(select_well_column(&cols(&["sample_name"])).is_err());
        assert!(select_well_column(&cols(&["sample_well", "well_id_384"])).is_err());
    }

    #[test]
    fn test_missing_data_section() {
        let text = "[Header]\nAssay,Metagenomic\n[Bioinformatics]\nSample_Project\n";
        assert!(parse(text, Utf8Path::new("x.csv")).is_err());
    }
}
