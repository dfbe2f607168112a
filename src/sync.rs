use std::path::PathBuf;

use chrono::TimeZone;
use tracing::{debug, info, warn};

use crate::activity::extract_metadata;
use crate::config::ProgressFile;
use crate::error::Result;
use crate::scanner::{GPX_EXTENSION, pending_files};
use crate::uploader::{DRY_RUN_PREFIX, Dispatcher, UploadApi, UploadOutcome};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub uploaded: usize,
    pub duplicates: usize,
}

/// One pass over the sync directory.
pub struct SyncJob<A, Tz> {
    progress: ProgressFile,
    activity_dir: PathBuf,
    dispatcher: Dispatcher<A>,
    tz: Tz,
}

impl<A: UploadApi, Tz: TimeZone> SyncJob<A, Tz> {
    /// `tz` decides which part of the day an activity started in.
    pub fn new(progress: ProgressFile, activity_dir: PathBuf, dispatcher: Dispatcher<A>, tz: Tz) -> Self {
        Self {
            progress,
            activity_dir,
            dispatcher,
            tz,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<A> {
        &self.dispatcher
    }

    /// Upload every file newer than the stored marker, oldest first.
    ///
    /// The marker is saved after each uploaded or duplicate file. The first
    /// failure stops the run and is returned; files after it stay pending.
    pub async fn run(&mut self) -> Result<SyncSummary> {
        let dry_run = self.dispatcher.config().dry_run;
        let mut state = self.progress.state();
        let pending = pending_files(&self.activity_dir, GPX_EXTENSION, state.last_file())?;

        info!(
            "Found {} new file(s) in {} (last processed: {})",
            pending.len(),
            self.activity_dir.display(),
            state.last_file().unwrap_or("none")
        );

        let mut summary = SyncSummary::default();
        for name in pending.iter() {
            info!("Processing {}", name);
            let path = pending.dir().join(name);

            let metadata = extract_metadata(&path, &self.tz)?;
            debug!(
                "{}: name={:?} title={:?} type={}",
                name, metadata.raw_name, metadata.display_name, metadata.activity_type
            );

            match self.dispatcher.dispatch(&path, &metadata).await? {
                UploadOutcome::Uploaded(activity) => {
                    let prefix = if dry_run { DRY_RUN_PREFIX } else { "" };
                    info!("{}Uploaded {} - Activity id: {}", prefix, path.display(), activity);
                    summary.uploaded += 1;
                }
                UploadOutcome::Duplicate { url } => {
                    warn!(
                        "Duplicate file {} - already uploaded as {}",
                        path.display(),
                        url.as_deref().unwrap_or("an existing activity")
                    );
                    summary.duplicates += 1;
                }
            }

            if state.advance(name) && !dry_run {
                self.progress.save_state(&state)?;
            }
        }

        Ok(summary)
    }
}
