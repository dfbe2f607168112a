use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use tracing::{debug, info};

use crate::error::{Result, UploaderError};

const CONFIG_SECTION: &str = "Config";
const DATA_SECTION: &str = "Data";
const LAST_FILE_KEY: &str = "LastFile";

pub const DEFAULT_VENDOR: &str = "Gadgetbridge";
pub const DEFAULT_RATE_LIMIT_SLEEP: Duration = Duration::from_secs(900);

/// Settings from the `[Config]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sync_path: PathBuf,
    pub vendor: String,
    pub dry_run: bool,
    pub rate_limit_sleep: Duration,
}

impl Config {
    /// Directory the companion app drops its exported tracks into.
    pub fn activity_dir(&self) -> PathBuf {
        self.sync_path.join(&self.vendor).join("files")
    }
}

/// Resume marker: the last file that was uploaded or found to be a duplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    last_file: Option<String>,
}

impl SyncState {
    pub fn new(last_file: Option<String>) -> Self {
        Self { last_file }
    }

    pub fn last_file(&self) -> Option<&str> {
        self.last_file.as_deref()
    }

    /// Move the marker to `file_name` unless that would move it backwards.
    /// Returns whether the marker changed.
    pub fn advance(&mut self, file_name: &str) -> bool {
        match self.last_file.as_deref() {
            Some(current) if file_name <= current => false,
            _ => {
                self.last_file = Some(file_name.to_string());
                true
            }
        }
    }
}

/// The ini file holding both configuration and progress.
pub struct ProgressFile {
    path: PathBuf,
    ini: Ini,
}

impl ProgressFile {
    /// A missing file loads as empty; [`ProgressFile::config`] reports what
    /// is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let ini = if path.exists() {
            Ini::load_from_file(path).map_err(|e| {
                UploaderError::ConfigMissing(format!("cannot read {}: {e}", path.display()))
            })?
        } else {
            debug!("{} does not exist, starting with empty config", path.display());
            Ini::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            ini,
        })
    }

    pub fn config(&self) -> Result<Config> {
        let section = self.ini.section(Some(CONFIG_SECTION));

        let sync_path = section
            .and_then(|s| s.get("workpath").or_else(|| s.get("SyncPath")))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                UploaderError::ConfigMissing(format!(
                    "No workpath found in {} - please create the file",
                    self.path.display()
                ))
            })?;

        let vendor = section
            .and_then(|s| s.get("vendor"))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VENDOR);

        let dry_run = match section.and_then(|s| s.get("dryrun")) {
            Some(value) => parse_bool(value).ok_or_else(|| {
                UploaderError::ConfigMissing(format!("dryrun: `{value}` is not a boolean"))
            })?,
            None => false,
        };

        let rate_limit_sleep = match section.and_then(|s| s.get("ratelimitsleep")) {
            Some(value) => value.trim().parse().map(Duration::from_secs).map_err(|e| {
                UploaderError::ConfigMissing(format!("ratelimitsleep: `{value}`: {e}"))
            })?,
            None => DEFAULT_RATE_LIMIT_SLEEP,
        };

        Ok(Config {
            sync_path: PathBuf::from(sync_path),
            vendor: vendor.to_string(),
            dry_run,
            rate_limit_sleep,
        })
    }

    pub fn state(&self) -> SyncState {
        let last_file = self
            .ini
            .section(Some(DATA_SECTION))
            .and_then(|s| s.get(LAST_FILE_KEY))
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        SyncState::new(last_file)
    }

    /// Rewrite the file with the marker from `state`, leaving every other
    /// key untouched. Nothing is written if the marker is already stored.
    pub fn save_state(&mut self, state: &SyncState) -> Result<()> {
        let Some(last_file) = state.last_file() else {
            return Ok(());
        };
        if self.state().last_file() == Some(last_file) {
            return Ok(());
        }

        self.ini
            .with_section(Some(DATA_SECTION))
            .set(LAST_FILE_KEY, last_file);
        self.ini.write_to_file(&self.path)?;
        info!("Saved progress marker {} to {}", last_file, self.path.display());
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
