//! Utilities pertaining to filesystem and other os-level operations
//!

use std::fs;
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{PipelineError, PipelineResult};

/// Create a novel directory path if it does not exist already
///
/// If the directory already exists no operations are performed
///
/// * `label` - used to describe the error directory in an error message
///
pub fn create_dir_all(dir: &Utf8Path, label: &str) -> PipelineResult<()> {
    if !dir.is_dir() {
        fs::create_dir_all(dir).map_err(|e| {
            PipelineError::io(format!("Can't create new {label} directory at '{dir}'"), e)
        })?;
    }
    Ok(())
}

/// Move a file, creating the destination directory if required
///
/// Falls back to copy and delete when the source and destination are on different filesystems.
///
pub fn move_file(src: &Utf8Path, dest_dir: &Utf8Path, dest_name: &str) -> PipelineResult<Utf8PathBuf> {
    create_dir_all(dest_dir, "destination")?;
    let dest = dest_dir.join(dest_name);
    if dest.exists() {
        return Err(PipelineError::io(
            format!("Can't move '{src}' to '{dest}'"),
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        ));
    }
    if fs::rename(src, &dest).is_err() {
        fs::copy(src, &dest)
            .map_err(|e| PipelineError::io(format!("Can't copy '{src}' to '{dest}'"), e))?;
        fs::remove_file(src)
            .map_err(|e| PipelineError::io(format!("Can't remove moved file '{src}'"), e))?;
    }
    Ok(dest)
}

/// Write a shell script and mark it executable for the owner, group and others
pub fn write_executable(path: &Utf8Path, content: &str) -> PipelineResult<()> {
    fs::write(path, content)
        .map_err(|e| PipelineError::io(format!("Unable to write script file: '{path}'"), e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| PipelineError::io(format!("Unable to set permissions on '{path}'"), e))?;
    Ok(())
}

pub fn file_size(path: &Utf8Path) -> PipelineResult<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| PipelineError::io(format!("Unable to stat file: '{path}'"), e))
}

/// List all regular files below `dir`, recursively, sorted by path
///
/// Directories that cannot be read are reported through `on_error` and skipped.
///
pub fn walk_files(
    dir: &Utf8Path,
    on_error: &mut dyn FnMut(&Utf8Path, std::io::Error),
) -> Vec<Utf8PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match current.read_dir_utf8() {
            Ok(x) => x,
            Err(e) => {
                on_error(&current, e);
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(x) => x,
                Err(e) => {
                    on_error(&current, e);
                    continue;
                }
            };
            let path = entry.path().to_path_buf();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
