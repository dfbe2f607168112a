use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, UploaderError};

pub const GPX_EXTENSION: &str = ".gpx";

/// Files in a sync directory that come after the resume marker, in
/// ascending name order.
#[derive(Debug, Clone)]
pub struct PendingFiles {
    dir: PathBuf,
    names: Vec<String>,
}

impl PendingFiles {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// List `dir` and keep files ending in `extension` whose name sorts strictly
/// after `last_file`. Symlinks count when they resolve to a regular file.
pub fn pending_files(dir: &Path, extension: &str, last_file: Option<&str>) -> Result<PendingFiles> {
    let entries = fs::read_dir(dir).map_err(|e| {
        UploaderError::ConfigMissing(format!(
            "cannot list sync directory {}: {e}",
            dir.display()
        ))
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!("Ignoring non UTF-8 file name {:?}", entry.file_name());
            continue;
        };
        if !name.ends_with(extension) || !entry.path().is_file() {
            continue;
        }
        if let Some(last) = last_file {
            if name.as_str() <= last {
                debug!("Skipping {} as it is not newer than {}", name, last);
                continue;
            }
        }
        names.push(name);
    }
    names.sort();

    Ok(PendingFiles {
        dir: dir.to_path_buf(),
        names,
    })
}
