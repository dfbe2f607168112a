use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, UploaderError};
use crate::strava_client::{Athlete, StravaClient};

/// API application credentials, stored as `<client id>,<client secret>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: u64,
    pub client_secret: String,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            UploaderError::CredentialMissing(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content).map_err(|reason| {
            UploaderError::CredentialMissing(format!("{}: {reason}", path.display()))
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let (id, secret) = content
            .trim()
            .split_once(',')
            .ok_or_else(|| "expected `<client id>,<client secret>`".to_string())?;

        let client_id = id
            .trim()
            .parse()
            .map_err(|e| format!("client id `{}` is not a number: {e}", id.trim()))?;

        let client_secret = secret.trim();
        if client_secret.is_empty() {
            return Err("client secret is empty".to_string());
        }

        Ok(Self {
            client_id,
            client_secret: client_secret.to_string(),
        })
    }
}

/// Tokens saved from the initial OAuth authorization.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl StoredTokens {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            UploaderError::CredentialMissing(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            UploaderError::CredentialMissing(format!("{}: {e}", path.display()))
        })
    }
}

pub struct Session {
    client: StravaClient,
}

impl Session {
    /// Load credentials and exchange the refresh token for a fresh access
    /// token. The new token is kept in memory only, so every run spends one
    /// refresh call.
    pub async fn establish(secrets_path: &Path, tokens_path: &Path) -> Result<Self> {
        let secrets = ClientSecrets::load(secrets_path)?;
        let tokens = StoredTokens::load(tokens_path)?;

        let mut client = StravaClient::new();
        client.set_access_token(&tokens.access_token);

        debug!("Refreshing access token for client {}", secrets.client_id);
        let refreshed = client
            .refresh_access_token(
                secrets.client_id,
                &secrets.client_secret,
                &tokens.refresh_token,
            )
            .await
            .map_err(|e| UploaderError::CredentialMissing(format!("token refresh failed: {e}")))?;

        client.set_access_token(&refreshed.access_token);
        info!(
            "Access token refreshed, expires at {}",
            refreshed
                .expires_at
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Self { client })
    }

    pub async fn athlete(&self) -> Result<Athlete> {
        self.client
            .get_athlete()
            .await
            .map_err(|e| UploaderError::Unknown(format!("failed to fetch athlete profile: {e}")))
    }

    pub fn into_client(self) -> StravaClient {
        self.client
    }
}
