use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dashboard::model::{Clip, JobStatus, MediaFile};
use crate::error::{AppError, AppResult};

/// A clip project as acknowledged by the clipping service.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectHandle {
    pub project_id: String,
    pub status: JobStatus,
    pub original_name: String,
}

/// Clip-project lifecycle on the clipping service.
///
/// `api_key` of `None` (or the mock key) serves simulated projects.
#[async_trait]
pub trait ClipApi: Send + Sync {
    async fn create_project_from_url(&self, url: &str, api_key: Option<&str>)
        -> AppResult<ProjectHandle>;

    async fn upload_to_opus(&self, file: &MediaFile, api_key: Option<&str>)
        -> AppResult<ProjectHandle>;

    async fn check_project_status(&self, project_id: &str, api_key: Option<&str>)
        -> AppResult<JobStatus>;

    async fn get_clips(&self, project_id: &str, api_key: Option<&str>) -> AppResult<Vec<Clip>>;
}

#[derive(Debug, Clone)]
pub struct OpusService {
    client: Client,
    api_url: String,
    mock_key: String,
    mock_latency: Duration,
}

// ============================================================================
// Provider Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest<'a> {
    video_url: &'a str,
    curation_pref: CurationPref,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CurationPref {
    clip_durations: Vec<[u32; 2]>,
    genre: &'static str,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    id: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClipsResponse {
    #[serde(default)]
    clips: Vec<RawClip>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClip {
    id: String,
    title: Option<String>,
    virality_score: Option<f64>,
    download_url: Option<String>,
    thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
}

fn parse_status(status: &str) -> JobStatus {
    match status.to_lowercase().as_str() {
        "done" | "completed" | "complete" | "finished" => JobStatus::Done,
        _ => JobStatus::Processing,
    }
}

fn normalize_clip(raw: RawClip) -> Clip {
    Clip {
        id: raw.id,
        title: raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled Clip".to_string()),
        score: raw.virality_score.map(|s| s.round().max(0.0) as u32).unwrap_or(0),
        url: raw.download_url,
        thumbnail: raw.thumbnail_url,
    }
}

// ============================================================================
// Mock Data
// ============================================================================

pub fn mock_clips() -> Vec<Clip> {
    let stamp = Utc::now().timestamp_millis();
    [
        ("Viral Moment 1 - High Engagement", 95),
        ("Funny Segment - Must Watch", 88),
        ("Insightful Quote", 82),
    ]
    .iter()
    .enumerate()
    .map(|(i, (title, score))| Clip {
        id: format!("clip_{}_{}", stamp, i + 1),
        title: title.to_string(),
        score: *score,
        url: Some(format!("https://example.com/clip{}.mp4", i + 1)),
        thumbnail: Some(format!("https://picsum.photos/seed/clip{}/120/200", i + 1)),
    })
    .collect()
}

impl OpusService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_url: config.opus.api_url.trim_end_matches('/').to_string(),
            mock_key: config.opus.mock_key.clone(),
            mock_latency: Duration::from_millis(config.dashboard.mock_latency_ms),
        })
    }

    fn real_key<'a>(&self, api_key: Option<&'a str>) -> Option<&'a str> {
        api_key.filter(|k| !k.is_empty() && *k != self.mock_key)
    }

    async fn simulate_latency(&self) {
        if !self.mock_latency.is_zero() {
            tokio::time::sleep(self.mock_latency).await;
        }
    }

    async fn error_from(response: reqwest::Response, action: &str) -> AppError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&error_text)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or(error_text);
        AppError::OpusApi(format!("{} failed ({}): {}", action, status, message))
    }
}

#[async_trait]
impl ClipApi for OpusService {
    async fn create_project_from_url(
        &self,
        url: &str,
        api_key: Option<&str>,
    ) -> AppResult<ProjectHandle> {
        tracing::info!("Creating clip project from URL: {}", url);

        let Some(api_key) = self.real_key(api_key) else {
            self.simulate_latency().await;
            return Ok(ProjectHandle {
                project_id: format!("opus_proj_url_{}", Utc::now().timestamp_millis()),
                status: JobStatus::Processing,
                original_name: url.to_string(),
            });
        };

        let response = self
            .client
            .post(format!("{}/clip-projects", self.api_url))
            .bearer_auth(api_key)
            .json(&CreateProjectRequest {
                video_url: url,
                curation_pref: CurationPref {
                    clip_durations: vec![[0, 60]],
                    genre: "Auto",
                },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "Create project").await);
        }

        let project: ProjectResponse = response
            .json()
            .await
            .map_err(|e| AppError::malformed("Opus", e.to_string()))?;
        let project_id = project
            .id
            .ok_or_else(|| AppError::malformed("Opus", "project response without id"))?;

        Ok(ProjectHandle {
            project_id,
            status: JobStatus::Processing,
            original_name: url.to_string(),
        })
    }

    async fn upload_to_opus(
        &self,
        file: &MediaFile,
        api_key: Option<&str>,
    ) -> AppResult<ProjectHandle> {
        tracing::info!("Uploading file to clip service: {}", file.name);

        if self.real_key(api_key).is_some() {
            return Err(AppError::OpusApi(
                "File upload is not available on the public API; submit a video URL instead"
                    .to_string(),
            ));
        }

        self.simulate_latency().await;
        Ok(ProjectHandle {
            project_id: format!("opus_proj_{}", Utc::now().timestamp_millis()),
            status: JobStatus::Processing,
            original_name: file.name.clone(),
        })
    }

    async fn check_project_status(
        &self,
        project_id: &str,
        api_key: Option<&str>,
    ) -> AppResult<JobStatus> {
        let Some(api_key) = self.real_key(api_key) else {
            self.simulate_latency().await;
            let done = rand::thread_rng().gen_bool(0.3);
            return Ok(if done {
                JobStatus::Done
            } else {
                JobStatus::Processing
            });
        };

        let response = self
            .client
            .get(format!("{}/clip-projects/{}", self.api_url, project_id))
            .bearer_auth(api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "Check project status").await);
        }

        let project: ProjectResponse = response
            .json()
            .await
            .map_err(|e| AppError::malformed("Opus", e.to_string()))?;
        let status = project
            .status
            .ok_or_else(|| AppError::malformed("Opus", "project response without status"))?;

        Ok(parse_status(&status))
    }

    async fn get_clips(&self, project_id: &str, api_key: Option<&str>) -> AppResult<Vec<Clip>> {
        let Some(api_key) = self.real_key(api_key) else {
            self.simulate_latency().await;
            return Ok(mock_clips());
        };

        let response = self
            .client
            .get(format!("{}/clip-projects/{}/clips", self.api_url, project_id))
            .bearer_auth(api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "Get clips").await);
        }

        let clips: ClipsResponse = response
            .json()
            .await
            .map_err(|e| AppError::malformed("Opus", e.to_string()))?;

        Ok(clips.clips.into_iter().map(normalize_clip).collect())
    }
}
