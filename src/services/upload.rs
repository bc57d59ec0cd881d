use std::time::Duration;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::{multipart, Client};
use serde::Deserialize;

use crate::config::Config;
use crate::dashboard::model::{MediaFile, Platform, PrivacyStatus, QueueItem};
use crate::error::{AppError, AppResult};

/// Result of an upload attempt that reached the provider (or the simulator).
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Success { url: String },
    Failure { error: String },
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload_video(&self, item: &QueueItem, token: Option<&str>) -> AppResult<UploadOutcome>;
}

/// Uploads YouTube Shorts for real when a token and a file are available,
/// simulates every other upload.
#[derive(Debug, Clone)]
pub struct VideoUploader {
    client: Client,
    upload_url: String,
    mock_token: String,
    mock_latency: Duration,
    success_rate: f64,
}

#[derive(Debug, Deserialize)]
struct UploadedResource {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: Option<String>,
}

pub const SIMULATED_FAILURE: &str = "Simulated upload failed. Try again.";

impl VideoUploader {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            // uploads can be large; allow more than the usual 30s
            .timeout(Duration::from_secs(10 * 60))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            upload_url: config.youtube.upload_url.clone(),
            mock_token: config.youtube.mock_token.clone(),
            mock_latency: Duration::from_millis(config.dashboard.mock_latency_ms),
            success_rate: config.dashboard.mock_upload_success_rate,
        })
    }

    async fn upload_to_youtube(
        &self,
        item: &QueueItem,
        file: &MediaFile,
        token: &str,
    ) -> AppResult<UploadOutcome> {
        let bytes = tokio::fs::read(&file.path).await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to read {}: {}",
                file.path.display(),
                e
            ))
        })?;

        let mut status = serde_json::json!({
            "privacyStatus": item
                .privacy_status
                .unwrap_or(PrivacyStatus::Private)
                .as_str(),
            "selfDeclaredMadeForKids": false,
        });
        if let Some(publish_at) = item.publish_at {
            status["publishAt"] = serde_json::Value::String(publish_at.to_rfc3339());
        }

        let metadata = serde_json::json!({
            "snippet": {
                "title": item.title,
                "description": item
                    .description
                    .as_deref()
                    .unwrap_or("Uploaded via ViralCuts Dashboard"),
                "tags": ["shorts", "viralcuts"],
                "categoryId": "22",
            },
            "status": status,
        });

        let form = multipart::Form::new()
            .part(
                "snippet",
                multipart::Part::text(metadata.to_string()).mime_str("application/json")?,
            )
            .part(
                "video",
                multipart::Part::bytes(bytes)
                    .file_name(file.name.clone())
                    .mime_str(file.content_type.as_deref().unwrap_or("video/mp4"))?,
            );

        tracing::info!("Uploading '{}' to YouTube", item.title);

        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "multipart"), ("part", "snippet,status")])
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!("YouTube upload rejected ({}): {}", status, error_text);

            let message = serde_json::from_str::<ProviderErrorBody>(&error_text)
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("YouTube upload failed with status {}", status));
            return Ok(UploadOutcome::Failure { error: message });
        }

        let resource: UploadedResource = response
            .json()
            .await
            .map_err(|e| AppError::malformed("YouTube", e.to_string()))?;
        let id = resource
            .id
            .ok_or_else(|| AppError::malformed("YouTube", "upload response without id"))?;

        Ok(UploadOutcome::Success {
            url: format!("https://youtube.com/shorts/{}", id),
        })
    }

    async fn simulate(&self, item: &QueueItem) -> UploadOutcome {
        tracing::debug!("Simulating upload of '{}' to {}", item.title, item.platform.as_str());
        if !self.mock_latency.is_zero() {
            tokio::time::sleep(self.mock_latency).await;
        }

        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.success_rate) {
            let slug: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(|c| char::from(c).to_ascii_lowercase())
                .collect();
            UploadOutcome::Success {
                url: format!("https://youtube.com/shorts/{}", slug),
            }
        } else {
            UploadOutcome::Failure {
                error: SIMULATED_FAILURE.to_string(),
            }
        }
    }
}

#[async_trait]
impl Uploader for VideoUploader {
    async fn upload_video(&self, item: &QueueItem, token: Option<&str>) -> AppResult<UploadOutcome> {
        let token = token.filter(|t| !t.is_empty() && *t != self.mock_token);

        match (item.platform, token, item.file.as_ref()) {
            (Platform::YouTubeShorts, Some(token), Some(file)) => {
                self.upload_to_youtube(item, file, token).await
            }
            _ => Ok(self.simulate(item).await),
        }
    }
}
