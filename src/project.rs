use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static STUDY_ID_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+)_(\d+)$").unwrap());

/// A study-scoped grouping of samples
///
/// Project names conventionally carry the numeric study id as a trailing `_<id>` suffix.
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Project {
    pub name: String,
    pub study_id: Option<u64>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        let study_id = STUDY_ID_SUFFIX
            .captures(name)
            .and_then(|c| c[2].parse::<u64>().ok());
        Self {
            name: name.to_string(),
            study_id,
        }
    }

    /// Project name with any trailing `_<study_id>` removed
    pub fn name_without_study_id(&self) -> &str {
        strip_study_id(&self.name)
    }

    /// Study id for display, with a marker for projects which do not carry one
    pub fn study_id_label(&self) -> String {
        match self.study_id {
            Some(x) => x.to_string(),
            None => "unknown".to_string(),
        }
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub fn strip_study_id(name: &str) -> &str {
    match STUDY_ID_SUFFIX.captures(name) {
        Some(c) => c.get(1).map_or(name, |m| m.as_str()),
        None => name,
    }
}
