//! Media host client
//!
//! Uploads comic files to a Cloudinary-compatible media host as raw
//! resources. Requests are signed with SHA-256 over the signed parameters
//! followed by the API secret.

use async_trait::async_trait;
use chrono::Utc;
use comics_common::config::MediaConfig;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.cloudinary.com";
const USER_AGENT: &str = concat!("comics-sync/", env!("CARGO_PKG_VERSION"));

/// Media host errors
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to read upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Media host rejected upload ({0}): {1}")]
    Rejected(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Media host not configured")]
    NotConfigured,
}

/// What the host reports for a stored file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedMedia {
    pub secure_url: String,
    pub public_id: String,
}

#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Upload the file at `path`, sent under `file_name`
    async fn upload(&self, path: &Path, file_name: &str) -> Result<UploadedMedia, MediaError>;
}

pub struct CloudinaryClient {
    http_client: reqwest::Client,
    base_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl CloudinaryClient {
    pub fn new(cloud_name: &str, api_key: &str, api_secret: &str) -> Result<Self, MediaError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| MediaError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: DEFAULT_BASE_URL.to_string(),
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    pub fn from_config(config: &MediaConfig) -> Result<Self, MediaError> {
        match (&config.cloud_name, &config.api_key, &config.api_secret) {
            (Some(cloud), Some(key), Some(secret)) => Self::new(cloud, key, secret),
            _ => Err(MediaError::NotConfigured),
        }
    }

    /// Point at a different API host
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn upload_url(&self) -> String {
        format!("{}/v1_1/{}/raw/upload", self.base_url, self.cloud_name)
    }
}

/// Hex SHA-256 of the sorted `key=value` pairs joined by `&`, then the secret
fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by_key(|(k, _)| *k);
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaHost for CloudinaryClient {
    async fn upload(&self, path: &Path, file_name: &str) -> Result<UploadedMedia, MediaError> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(&[("timestamp", &timestamp)], &self.api_secret);

        let form = Form::new()
            .part(
                "file",
                Part::stream_with_length(reqwest::Body::from(file), length)
                    .file_name(file_name.to_string()),
            )
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature_algorithm", "sha256")
            .text("signature", signature);

        tracing::debug!(file = file_name, bytes = length, "Uploading to media host");

        let response = self
            .http_client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MediaError::Rejected(status.as_u16(), error_text));
        }

        let uploaded: UploadedMedia = response
            .json()
            .await
            .map_err(|e| MediaError::Parse(e.to_string()))?;

        tracing::info!(
            public_id = %uploaded.public_id,
            url = %uploaded.secure_url,
            "Media upload complete"
        );
        Ok(uploaded)
    }
}
