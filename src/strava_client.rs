use std::sync::LazyLock;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    RetryTransientMiddleware, Retryable, RetryableStrategy, default_on_request_failure,
    default_on_request_success, policies::ExponentialBackoff,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ENDPOINT: &str = "https://www.strava.com";

static DUPLICATE_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href=['"]([^'"]+)['"]"#).expect("duplicate href pattern is valid")
});

#[derive(Debug)]
pub enum ApiError {
    /// Strava answered 429; the caller decides whether to wait it out.
    RateLimited,
    Duplicate { url: Option<String> },
    Upload(String),
    Http(StatusCode, String),
    Network(reqwest_middleware::Error),
    Decode(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::RateLimited => write!(f, "Rate limit exceeded"),
            ApiError::Duplicate { url: Some(url) } => write!(f, "Duplicate of {url}"),
            ApiError::Duplicate { url: None } => write!(f, "Duplicate of an existing activity"),
            ApiError::Upload(msg) => write!(f, "Upload rejected: {msg}"),
            ApiError::Http(status, body) => write!(f, "HTTP {status}: {body}"),
            ApiError::Network(e) => write!(f, "Network error: {e}"),
            ApiError::Decode(msg) => write!(f, "Failed to decode response: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    client_id: u64,
    client_secret: &'a str,
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Athlete {
    pub id: u64,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub username: Option<String>,
}

/// Everything Strava needs to create an activity from a GPX file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub contents: Vec<u8>,
    pub name: String,
    pub description: String,
    pub activity_type: String,
}

/// Body of `POST /api/v3/uploads` and `GET /api/v3/uploads/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadStatus {
    pub id: u64,
    pub status: Option<String>,
    pub error: Option<String>,
    pub activity_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    Processing,
    Done(u64),
}

impl UploadStatus {
    /// Classify the status reported by Strava. Upload errors become
    /// structured [`ApiError`] kinds so callers never inspect message text.
    pub fn progress(&self) -> Result<UploadProgress, ApiError> {
        if let Some(error) = self.error.as_deref().filter(|e| !e.is_empty()) {
            if is_duplicate(error) {
                return Err(ApiError::Duplicate {
                    url: duplicate_activity_url(error),
                });
            }
            return Err(ApiError::Upload(error.to_string()));
        }

        Ok(match self.activity_id {
            Some(activity_id) => UploadProgress::Done(activity_id),
            None => UploadProgress::Processing,
        })
    }
}

pub fn is_duplicate(message: &str) -> bool {
    message.contains("duplicate of")
}

/// Pull the existing activity link out of a duplicate message such as
/// `x.gpx duplicate of <a href='/activities/999'>Morning Ride</a>`.
pub fn duplicate_activity_url(message: &str) -> Option<String> {
    let href = DUPLICATE_HREF.captures(message)?.get(1)?.as_str();
    if href.starts_with("http://") || href.starts_with("https://") {
        Some(href.to_string())
    } else {
        Some(format!("{ENDPOINT}{href}"))
    }
}

/// Transient failures are retried by the middleware, but 429 is handed back
/// so the rate-limit policy can make the call.
struct TransientExceptRateLimit;

impl RetryableStrategy for TransientExceptRateLimit {
    fn handle(
        &self,
        res: &Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Option<Retryable> {
        match res {
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => None,
            Ok(success) => default_on_request_success(success),
            Err(error) => default_on_request_failure(error),
        }
    }
}

pub struct StravaClient {
    client: ClientWithMiddleware,
    // Multipart bodies are streamed and cannot be cloned for a retry.
    upload_client: reqwest::Client,
    auth_header: Option<String>,
}

impl Default for StravaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StravaClient {
    pub fn new() -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                TransientExceptRateLimit,
            ))
            .build();

        Self {
            client,
            upload_client: reqwest::Client::new(),
            auth_header: None,
        }
    }

    pub fn set_access_token(&mut self, access_token: &str) {
        self.auth_header = Some(format!("Bearer {access_token}"));
    }

    fn auth_header(&self) -> Result<&str, ApiError> {
        self.auth_header.as_deref().ok_or_else(|| {
            ApiError::Network(reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                "No access token set"
            )))
        })
    }

    pub async fn refresh_access_token(
        &self,
        client_id: u64,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, ApiError> {
        let path = format!("{ENDPOINT}/oauth/token");
        let request = RefreshTokenRequest {
            client_id,
            client_secret,
            grant_type: "refresh_token",
            refresh_token,
        };

        let response = self
            .client
            .post(path)
            .form(&request)
            .send()
            .await
            .map_err(ApiError::Network)?;

        decode(response).await
    }

    pub async fn get_athlete(&self) -> Result<Athlete, ApiError> {
        let path = format!("{ENDPOINT}/api/v3/athlete");

        let response = self
            .client
            .get(path)
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(ApiError::Network)?;

        decode(response).await
    }

    pub async fn upload_activity(&self, request: &UploadRequest) -> Result<UploadStatus, ApiError> {
        let path = format!("{ENDPOINT}/api/v3/uploads");
        debug!(
            "POST {} file={} name={} type={}",
            path, request.file_name, request.name, request.activity_type
        );

        let file = Part::bytes(request.contents.clone()).file_name(request.file_name.clone());
        let form = Form::new()
            .part("file", file)
            .text("name", request.name.clone())
            .text("description", request.description.clone())
            .text("data_type", "gpx")
            .text("activity_type", request.activity_type.clone());

        let response = self
            .upload_client
            .post(path)
            .header("Authorization", self.auth_header()?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(reqwest_middleware::Error::Reqwest(e)))?;

        decode(response).await
    }

    pub async fn upload_status(&self, upload_id: u64) -> Result<UploadStatus, ApiError> {
        let path = format!("{ENDPOINT}/api/v3/uploads/{upload_id}");

        let response = self
            .client
            .get(path)
            .header("Authorization", self.auth_header()?)
            .send()
            .await
            .map_err(ApiError::Network)?;

        decode(response).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited);
    }

    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Network(reqwest_middleware::Error::Reqwest(e)))?;

    if !status.is_success() {
        // Strava rejects some uploads up front with the same error body it
        // reports while polling.
        if let Ok(upload) = serde_json::from_str::<UploadStatus>(&body) {
            upload.progress()?;
        }
        return Err(ApiError::Http(status, body));
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}
