//! Discover completed sequencing run directories below a root directory
//!

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use log::{debug, info, warn};

use crate::cli::ScanSettings;

/// Relative path from a run root to the base-call tree
pub const BASE_CALLS_SUBPATH: &str = "Data/Intensities/BaseCalls";

/// Written by the instrument once the run has finished transferring
pub const COMPLETION_SENTINEL: &str = "RTAComplete.txt";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunDirectory {
    pub path: Utf8PathBuf,

    /// Modification time of the completion sentinel
    pub completed_at: SystemTime,
}

impl RunDirectory {
    /// The run id is the final path component of the run root
    pub fn run_id(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }

    /// One line report of the run for the scan command
    pub fn report_line(&self) -> String {
        let completed_at: DateTime<Local> = self.completed_at.into();
        format!(
            "{}\t{}\t{}",
            self.run_id(),
            completed_at.format("%Y-%m-%d %H:%M:%S"),
            self.path
        )
    }
}

/// Find every run root below `root`
///
/// A run root is any directory containing the base-calls subpath. The search does not descend
/// into a run root once found.
///
fn find_run_roots(root: &Utf8Path) -> BTreeSet<Utf8PathBuf> {
    let mut run_roots = BTreeSet::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if dir.join(BASE_CALLS_SUBPATH).is_dir() {
            run_roots.insert(dir);
            continue;
        }
        let entries = match dir.read_dir_utf8() {
            Ok(x) => x,
            Err(e) => {
                warn!("Unable to read directory '{dir}' while scanning for runs: {e}");
                continue;
            }
        };
        for entry in entries {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_dir() && !path.is_symlink() {
                        stack.push(path.to_path_buf());
                    }
                }
                Err(e) => {
                    warn!("Unable to read entry in directory '{dir}': {e}");
                }
            }
        }
    }
    run_roots
}

/// Test whether a sentinel age lies in the half-open window `[younger, older)`
fn is_age_in_window(age: Duration, younger_hours: u64, older_hours: u64) -> bool {
    let younger = Duration::from_secs(younger_hours * 3600);
    let older = Duration::from_secs(older_hours * 3600);
    age >= younger && age < older
}

/// Scan `root` for completed run directories whose completion time falls in the requested window
///
/// # Arguments
/// * `younger_hours` - Runs completed more recently than this are skipped
/// * `older_hours` - Runs completed this long ago or earlier are skipped
///
pub fn scan(root: &Utf8Path, younger_hours: u64, older_hours: u64) -> Vec<RunDirectory> {
    scan_at(root, younger_hours, older_hours, SystemTime::now())
}

fn scan_at(
    root: &Utf8Path,
    younger_hours: u64,
    older_hours: u64,
    now: SystemTime,
) -> Vec<RunDirectory> {
    let mut runs = Vec::new();
    for run_root in find_run_roots(root) {
        let sentinel = run_root.join(COMPLETION_SENTINEL);
        let completed_at = match sentinel.metadata().and_then(|m| m.modified()) {
            Ok(x) => x,
            Err(_) => {
                warn!("Skipping run directory without completion sentinel: '{run_root}'");
                continue;
            }
        };

        // A sentinel from the future is treated as brand new
        let age = now.duration_since(completed_at).unwrap_or_default();
        if !is_age_in_window(age, younger_hours, older_hours) {
            debug!(
                "Skipping run directory '{run_root}', completed {:.1} hours ago",
                age.as_secs_f64() / 3600.0
            );
            continue;
        }

        runs.push(RunDirectory {
            path: run_root,
            completed_at,
        });
    }
    runs
}

/// Entry point of the scan command, listing eligible runs on stdout
pub fn run_scan(settings: &ScanSettings) {
    let runs = scan(&settings.root, settings.younger_hours, settings.older_hours);
    info!(
        "Found {} completed run directories below '{}'",
        runs.len(),
        settings.root
    );
    for run in runs.iter() {
        println!("{}", run.report_line());
    }
}
