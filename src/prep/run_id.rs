//! Run metadata derived from the run identifier
//!

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use simple_error::{SimpleResult, bail};

/// Run center used when the instrument is not in the known instrument table
pub const DEFAULT_RUN_CENTER: &str = "UCSDMI";

static RUN_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{6}|\d{8})_([A-Za-z0-9]+)_(.+)$").unwrap());

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Instrument {
    /// Instrument model, in the study database vocabulary
    pub model: &'static str,
    pub run_center: &'static str,
}

/// Instruments known by serial number
const KNOWN_INSTRUMENTS: [(&str, &str, &str); 8] = [
    ("FS10001773", "Illumina iSeq", "KLM"),
    ("A00953", "Illumina NovaSeq 6000", "IGM"),
    ("A00169", "Illumina NovaSeq 6000", "LJI"),
    ("M05314", "Illumina MiSeq", "KLM"),
    ("K00180", "Illumina HiSeq 4000", "IGM"),
    ("D00611", "Illumina HiSeq 2500", "IGM"),
    ("LH00444", "Illumina NovaSeq X", "IGM"),
    ("MN01225", "Illumina MiniSeq", "CMI"),
];

/// Instrument models keyed on serial number prefix, longest prefixes first
const INSTRUMENT_PREFIXES: [(&str, &str); 7] = [
    ("FS", "Illumina iSeq"),
    ("MN", "Illumina MiniSeq"),
    ("LH", "Illumina NovaSeq X"),
    ("A", "Illumina NovaSeq 6000"),
    ("M", "Illumina MiSeq"),
    ("K", "Illumina HiSeq 4000"),
    ("D", "Illumina HiSeq 2500"),
];

/// Resolve an instrument serial number to its model and run center
///
/// Serial numbers outside the known instrument table fall back to a model lookup on their one or
/// two letter prefix, with the default run center.
///
pub fn lookup_instrument(code: &str) -> SimpleResult<Instrument> {
    if let Some(&(_, model, run_center)) = KNOWN_INSTRUMENTS.iter().find(|x| x.0 == code) {
        return Ok(Instrument { model, run_center });
    }
    for (prefix, model) in INSTRUMENT_PREFIXES {
        let is_match = code.starts_with(prefix)
            && code[prefix.len()..].starts_with(|c: char| c.is_ascii_digit());
        if is_match {
            return Ok(Instrument {
                model,
                run_center: DEFAULT_RUN_CENTER,
            });
        }
    }
    bail!("Unrecognized instrument code '{code}'")
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunInfo {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub instrument_code: String,
    pub instrument: Instrument,
}

impl RunInfo {
    /// Parse a run identifier of the form `YYMMDD_<instrument>_<rest>` or `YYYYMMDD_<instrument>_<rest>`
    pub fn parse(run_id: &str) -> SimpleResult<Self> {
        let c = match RUN_ID.captures(run_id) {
            Some(x) => x,
            None => bail!("Run identifier '{run_id}' is not of the form <date>_<instrument>_<run>"),
        };
        let date_field = &c[1];
        let format = if date_field.len() == 6 { "%y%m%d" } else { "%Y%m%d" };
        let run_date = match NaiveDate::parse_from_str(date_field, format) {
            Ok(x) => x,
            Err(_) => bail!("Run identifier '{run_id}' starts with an invalid date '{date_field}'"),
        };
        let instrument_code = c[2].to_string();
        let instrument = lookup_instrument(&instrument_code)?;
        Ok(Self {
            run_id: run_id.to_string(),
            run_date,
            instrument_code,
            instrument,
        })
    }

    /// Run date in `YYYY-MM-DD` form
    pub fn run_date_label(&self) -> String {
        self.run_date.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_id() {
        let run = RunInfo::parse("220101_A00953_0001_FC").unwrap();
        assert_eq!(run.run_date_label(), "2022-01-01");
        assert_eq!(run.instrument_code, "A00953");
        assert_eq!(run.instrument.model, "Illumina NovaSeq 6000");
        assert_eq!(run.instrument.run_center, "IGM");

        let run = RunInfo::parse("20230207_M05314_0346_000000000-KVMGL").unwrap();
        assert_eq!(run.run_date_label(), "2023-02-07");
        assert_eq!(run.instrument.model, "Illumina MiSeq");
        assert_eq!(run.instrument.run_center, "KLM");
    }

    #[test]
    fn test_bad_run_ids() {
        assert!(RunInfo::parse("run_A00953_0001").is_err());
        assert!(RunInfo::parse("221301_A00953_0001_FC").is_err());
        assert!(RunInfo::parse("2201_A00953_0001_FC").is_err());
        assert!(RunInfo::parse("220101_X00001_0001_FC").is_err());
    }

    #[test]
    fn test_instrument_prefix_fallback() {
        let x = lookup_instrument("A01234").unwrap();
        assert_eq!(x.model, "Illumina NovaSeq 6000");
        assert_eq!(x.run_center, DEFAULT_RUN_CENTER);

        let x = lookup_instrument("LH00001").unwrap();
        assert_eq!(x.model, "Illumina NovaSeq X");

        let x = lookup_instrument("FS10000001").unwrap();
        assert_eq!(x.model, "Illumina iSeq");

        assert_eq!(lookup_instrument("MN01225").unwrap().run_center, "CMI");
        assert!(lookup_instrument("Q00001").is_err());
    }
}
