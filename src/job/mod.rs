//! Pipeline stages run as scheduler jobs
//!

pub mod scheduler;
pub mod stage;
pub mod template;

use std::env;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{PipelineError, PipelineResult};

/// Locate an external tool
///
/// A name containing a path separator must point to an existing file. Any other name is searched
/// for on the PATH.
///
pub fn find_executable(name: &str) -> PipelineResult<Utf8PathBuf> {
    if name.is_empty() {
        return Err(PipelineError::Config("Empty executable name".to_string()));
    }
    if name.contains('/') {
        let path = Utf8Path::new(name);
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(PipelineError::Config(format!(
                "Executable '{name}' does not exist"
            )))
        };
    }

    let search_path = env::var("PATH").unwrap_or_default();
    env::split_paths(&search_path)
        .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .map(|dir| dir.join(name))
        .find(|x| x.is_file())
        .ok_or_else(|| PipelineError::Config(format!("Executable '{name}' not found on PATH")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let tool = dir.join("bcl-convert");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        assert_eq!(find_executable(tool.as_str()).unwrap(), tool);
        assert!(find_executable(dir.join("bcl2fastq").as_str()).is_err());
        assert!(find_executable("").is_err());
        assert!(find_executable("surely-not-a-real-tool-name").is_err());
    }
}
