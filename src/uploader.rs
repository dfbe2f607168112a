use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::activity::ActivityMetadata;
use crate::error::{Result, UploaderError};
use crate::retry::{RateLimitPolicy, RetryError};
use crate::strava_client::{ApiError, StravaClient, UploadProgress, UploadRequest, UploadStatus};

pub const DRY_RUN_PREFIX: &str = "[DRY RUN] ";

/// The two remote calls an upload needs.
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn submit(&self, request: &UploadRequest) -> std::result::Result<UploadStatus, ApiError>;

    async fn status(&self, upload_id: u64) -> std::result::Result<UploadStatus, ApiError>;
}

#[async_trait]
impl UploadApi for StravaClient {
    async fn submit(&self, request: &UploadRequest) -> std::result::Result<UploadStatus, ApiError> {
        self.upload_activity(request).await
    }

    async fn status(&self, upload_id: u64) -> std::result::Result<UploadStatus, ApiError> {
        self.upload_status(upload_id).await
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Skip all network calls and report a made-up activity id.
    pub dry_run: bool,
    pub rate_limit: RateLimitPolicy,
    pub poll_interval: Duration,
    pub upload_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            rate_limit: RateLimitPolicy::default(),
            poll_interval: Duration::from_secs(1),
            upload_timeout: Duration::from_secs(300),
        }
    }
}

/// The activity an upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityRef {
    Remote(u64),
    Simulated(Uuid),
}

impl fmt::Display for ActivityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityRef::Remote(id) => write!(f, "{id}"),
            ActivityRef::Simulated(id) => write!(f, "{id} (simulated)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded(ActivityRef),
    /// Strava already has this file; `url` points at the existing activity.
    Duplicate { url: Option<String> },
}

pub struct Dispatcher<A> {
    api: A,
    config: DispatcherConfig,
}

impl<A: UploadApi> Dispatcher<A> {
    pub fn new(api: A, config: DispatcherConfig) -> Self {
        Self { api, config }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Submit one file and wait until Strava has processed it.
    pub async fn dispatch(&self, path: &Path, metadata: &ActivityMetadata) -> Result<UploadOutcome> {
        let prefix = if self.config.dry_run { DRY_RUN_PREFIX } else { "" };
        info!("{}Uploading {}", prefix, path.display());

        if self.config.dry_run {
            info!(
                "{}Uploading activity from GPX file: {}, activity type: {}, name: {}, notes: {}",
                prefix,
                path.display(),
                metadata.activity_type,
                metadata.display_name,
                metadata.raw_name
            );
            return Ok(UploadOutcome::Uploaded(ActivityRef::Simulated(Uuid::new_v4())));
        }

        let contents = tokio::fs::read(path).await.map_err(|e| UploaderError::UploadFailed {
            file: path.to_path_buf(),
            reason: format!("cannot read file: {e}"),
        })?;

        let request = UploadRequest {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "activity.gpx".to_string()),
            contents,
            name: metadata.display_name.clone(),
            description: metadata.raw_name.clone(),
            activity_type: metadata.activity_type.api_name(),
        };

        let submitted = match self
            .config
            .rate_limit
            .run("upload", || self.api.submit(&request))
            .await
        {
            Ok(status) => status,
            Err(e) => return self.classify(path, e),
        };
        info!("Upload succeeded. Waiting for response...");

        match self
            .config
            .rate_limit
            .run("waiting for upload", || self.wait_for_upload(&submitted))
            .await
        {
            Ok(activity_id) => Ok(UploadOutcome::Uploaded(ActivityRef::Remote(activity_id))),
            Err(e) => self.classify(path, e),
        }
    }

    async fn wait_for_upload(&self, submitted: &UploadStatus) -> std::result::Result<u64, ApiError> {
        let deadline = Instant::now() + self.config.upload_timeout;
        let mut current = submitted.clone();

        loop {
            if let UploadProgress::Done(activity_id) = current.progress()? {
                return Ok(activity_id);
            }
            if Instant::now() >= deadline {
                return Err(ApiError::Upload(format!(
                    "upload {} still processing after {}s",
                    submitted.id,
                    self.config.upload_timeout.as_secs()
                )));
            }

            debug!(
                "Upload {}: {}",
                submitted.id,
                current.status.as_deref().unwrap_or("processing")
            );
            tokio::time::sleep(self.config.poll_interval).await;
            current = self.api.status(submitted.id).await?;
        }
    }

    fn classify(&self, path: &Path, error: RetryError) -> Result<UploadOutcome> {
        match error {
            RetryError::Exhausted(e) => Err(e),
            RetryError::Api(ApiError::Duplicate { url }) => Ok(UploadOutcome::Duplicate { url }),
            RetryError::Api(e) => Err(UploaderError::UploadFailed {
                file: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    pub fn done(upload_id: u64, activity_id: u64) -> UploadStatus {
        UploadStatus {
            id: upload_id,
            status: Some("Your activity is ready.".to_string()),
            error: None,
            activity_id: Some(activity_id),
        }
    }

    pub fn processing(upload_id: u64) -> UploadStatus {
        UploadStatus {
            id: upload_id,
            status: Some("Your activity is still being processed.".to_string()),
            error: None,
            activity_id: None,
        }
    }

    pub fn failed(upload_id: u64, error: &str) -> UploadStatus {
        UploadStatus {
            id: upload_id,
            status: Some("There was an error processing your activity.".to_string()),
            error: Some(error.to_string()),
            activity_id: None,
        }
    }

    /// Scripted stand-in for Strava. Unscripted calls succeed.
    #[derive(Default)]
    pub struct FakeApi {
        submit_replies: Mutex<VecDeque<std::result::Result<UploadStatus, ApiError>>>,
        status_replies: Mutex<VecDeque<std::result::Result<UploadStatus, ApiError>>>,
        submitted: Mutex<Vec<UploadRequest>>,
        status_calls: Mutex<u32>,
    }

    impl FakeApi {
        pub fn queue_submit(&self, reply: std::result::Result<UploadStatus, ApiError>) {
            self.submit_replies.lock().unwrap().push_back(reply);
        }

        pub fn queue_status(&self, reply: std::result::Result<UploadStatus, ApiError>) {
            self.status_replies.lock().unwrap().push_back(reply);
        }

        pub fn submitted(&self) -> Vec<UploadRequest> {
            self.submitted.lock().unwrap().clone()
        }

        pub fn status_calls(&self) -> u32 {
            *self.status_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl UploadApi for FakeApi {
        async fn submit(
            &self,
            request: &UploadRequest,
        ) -> std::result::Result<UploadStatus, ApiError> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            let n = submitted.len() as u64;
            self.submit_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(done(n, 1000 + n)))
        }

        async fn status(&self, upload_id: u64) -> std::result::Result<UploadStatus, ApiError> {
            *self.status_calls.lock().unwrap() += 1;
            self.status_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(done(upload_id, 2000 + upload_id)))
        }
    }

    pub fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            dry_run: false,
            rate_limit: RateLimitPolicy::with_delay(Duration::ZERO),
            poll_interval: Duration::ZERO,
            upload_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::activity::ActivityType;
    use std::fs;

    fn metadata() -> ActivityMetadata {
        ActivityMetadata {
            raw_name: "Radfahren im Freien".to_string(),
            display_name: "Morning Ride".to_string(),
            activity_type: ActivityType::Ride,
        }
    }

    fn gpx_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("20240101.gpx");
        fs::write(&path, "<gpx/>").unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_then_poll_until_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = gpx_file(dir.path());
        let api = FakeApi::default();
        api.queue_submit(Ok(processing(7)));
        api.queue_status(Ok(processing(7)));
        api.queue_status(Ok(done(7, 555)));

        let dispatcher = Dispatcher::new(api, fast_config());
        let outcome = dispatcher.dispatch(&path, &metadata()).await.unwrap();

        assert_eq!(outcome, UploadOutcome::Uploaded(ActivityRef::Remote(555)));
        assert_eq!(dispatcher.api().status_calls(), 2);

        let request = &dispatcher.api().submitted()[0];
        assert_eq!(request.file_name, "20240101.gpx");
        assert_eq!(request.name, "Morning Ride");
        assert_eq!(request.description, "Radfahren im Freien");
        assert_eq!(request.activity_type, "ride");
        assert_eq!(request.contents, b"<gpx/>");
    }

    #[tokio::test]
    async fn test_duplicate_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = gpx_file(dir.path());
        let api = FakeApi::default();
        api.queue_submit(Ok(processing(8)));
        api.queue_status(Ok(failed(
            8,
            "20240101.gpx duplicate of <a href='/activities/999' target='_blank'>Ride</a>",
        )));

        let dispatcher = Dispatcher::new(api, fast_config());
        let outcome = dispatcher.dispatch(&path, &metadata()).await.unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Duplicate {
                url: Some("https://www.strava.com/activities/999".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_other_upload_errors_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = gpx_file(dir.path());
        let api = FakeApi::default();
        api.queue_submit(Ok(failed(9, "Improperly formatted data.")));

        let dispatcher = Dispatcher::new(api, fast_config());
        let err = dispatcher.dispatch(&path, &metadata()).await.unwrap_err();

        assert!(matches!(err, UploaderError::UploadFailed { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_on_wait_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = gpx_file(dir.path());
        let api = FakeApi::default();
        api.queue_submit(Ok(processing(3)));
        api.queue_status(Err(ApiError::RateLimited));
        api.queue_status(Ok(done(3, 33)));

        let dispatcher = Dispatcher::new(api, fast_config());
        let outcome = dispatcher.dispatch(&path, &metadata()).await.unwrap();

        assert_eq!(outcome, UploadOutcome::Uploaded(ActivityRef::Remote(33)));
        assert_eq!(dispatcher.api().submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_rate_limit_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = gpx_file(dir.path());
        let api = FakeApi::default();
        api.queue_submit(Err(ApiError::RateLimited));
        api.queue_submit(Err(ApiError::RateLimited));

        let dispatcher = Dispatcher::new(api, fast_config());
        let err = dispatcher.dispatch(&path, &metadata()).await.unwrap_err();

        assert!(matches!(err, UploaderError::RateLimitExceeded(_)));
        assert_eq!(dispatcher.api().submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = gpx_file(dir.path());
        let api = FakeApi::default();
        api.queue_submit(Ok(processing(4)));
        for _ in 0..50 {
            api.queue_status(Ok(processing(4)));
        }

        let config = DispatcherConfig {
            upload_timeout: Duration::ZERO,
            ..fast_config()
        };
        let dispatcher = Dispatcher::new(api, config);
        let err = dispatcher.dispatch(&path, &metadata()).await.unwrap_err();

        assert!(matches!(err, UploaderError::UploadFailed { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_calls() {
        let config = DispatcherConfig {
            dry_run: true,
            ..fast_config()
        };
        let dispatcher = Dispatcher::new(FakeApi::default(), config);

        // The file does not even need to exist.
        let outcome = dispatcher
            .dispatch(Path::new("/nonexistent/a.gpx"), &metadata())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            UploadOutcome::Uploaded(ActivityRef::Simulated(_))
        ));
        assert!(dispatcher.api().submitted().is_empty());
        assert_eq!(dispatcher.api().status_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let dispatcher = Dispatcher::new(FakeApi::default(), fast_config());
        let err = dispatcher
            .dispatch(Path::new("/nonexistent/a.gpx"), &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, UploaderError::UploadFailed { .. }));
    }
}
