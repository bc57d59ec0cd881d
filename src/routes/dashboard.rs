//! JSON API over the dashboard controller. Every route requires a session
//! belonging to one of the configured admin emails.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::dashboard::model::{
    ChecklistGroup, ChecklistItem, MediaFile, NewQueueItem, PipelineJob, Progress, QueueItem,
    QueueStatus, SettingsPatch, TokenResponse,
};
use crate::dashboard::view::{AccountView, SettingsView, StateView};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

/// OAuth scopes the browser must request for the YouTube connection.
const YOUTUBE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.readonly",
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/yt-analytics.readonly",
];

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/state", get(get_state))
        .route("/progress", get(get_progress))
        .route("/reset", post(reset_state))
        // Checklists
        .route("/checklists.csv", get(export_checklists))
        .route("/checklists/:group_id/items", post(add_checklist_item))
        .route(
            "/checklists/:group_id/items/:item_id/toggle",
            post(toggle_checklist_item),
        )
        .route("/checklists/:group_id/reset", post(reset_checklist))
        // Upload queue
        .route("/queue", post(add_queue_item))
        .route("/queue/start", post(start_queue))
        .route("/queue/:id", delete(remove_queue_item))
        .route("/queue/:id/status", put(set_queue_status))
        // Channel data
        .route("/channel/refresh", post(refresh_channel))
        .route("/analytics/refresh", post(refresh_analytics))
        // Accounts
        .route("/youtube/oauth", get(youtube_oauth))
        .route("/youtube/token", post(set_youtube_token))
        .route("/accounts/:id/switch", post(switch_account))
        .route("/accounts/:id", delete(disconnect_account))
        // Settings & history
        .route("/settings", get(get_settings).put(update_settings))
        .route("/history/:date/:video_id", delete(remove_history_item))
        // Clip pipeline
        .route("/pipeline/url", post(create_project_from_url))
        .route("/pipeline/file", post(create_project_from_file))
        .route("/pipeline/refresh", post(refresh_pipeline))
        .route(
            "/pipeline/:project_id/clips/:clip_id/queue",
            post(queue_clip),
        )
}

/// A signed-in user allowed to operate the dashboard.
///
/// The dashboard holds one channel's tokens and queue, so only `ADMIN_EMAILS`
/// get in; anyone else with a session is refused with `403`.
pub struct DashboardOwner(pub AuthUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for DashboardOwner {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        if !state.config.is_admin(&auth.user.email) {
            tracing::warn!(
                "User {} tried to use the dashboard without owner rights",
                auth.user.id
            );
            return Err(AppError::Forbidden);
        }
        Ok(Self(auth))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: QueueStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub force: bool,
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub refreshed: bool,
    pub quota_exceeded: bool,
}

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    pub started: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfigResponse {
    pub client_id: Option<String>,
    pub scopes: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account: Option<AccountView>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectUrlRequest {
    pub url: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn get_state(State(state): State<Arc<AppState>>, _owner: DashboardOwner) -> Json<StateView> {
    Json(state.dashboard.snapshot().await.into())
}

async fn get_progress(State(state): State<Arc<AppState>>, _owner: DashboardOwner) -> Json<Progress> {
    Json(state.dashboard.progress().await)
}

async fn reset_state(
    State(state): State<Arc<AppState>>,
    DashboardOwner(AuthUser { user, .. }): DashboardOwner,
) -> AppResult<Json<StateView>> {
    tracing::warn!("User {} reset the dashboard", user.id);
    Ok(Json(state.dashboard.reset_state().await?.into()))
}

async fn export_checklists(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
) -> impl IntoResponse {
    let csv = state.dashboard.export_checklists_csv().await;
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"checklists.csv\"",
            ),
        ],
        csv,
    )
}

async fn add_checklist_item(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path(group_id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> AppResult<(StatusCode, Json<ChecklistItem>)> {
    let item = state
        .dashboard
        .add_checklist_item(&group_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn toggle_checklist_item(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path((group_id, item_id)): Path<(String, String)>,
) -> AppResult<Json<ChecklistItem>> {
    Ok(Json(
        state
            .dashboard
            .toggle_checklist_item(&group_id, &item_id)
            .await?,
    ))
}

async fn reset_checklist(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path(group_id): Path<String>,
) -> AppResult<Json<ChecklistGroup>> {
    Ok(Json(state.dashboard.reset_checklist(&group_id).await?))
}

async fn add_queue_item(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Json(req): Json<NewQueueItem>,
) -> AppResult<(StatusCode, Json<QueueItem>)> {
    let item = state.dashboard.add_to_upload_queue(req).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn start_queue(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
) -> AppResult<(StatusCode, Json<StartedResponse>)> {
    let started = state.dashboard.start_upload_queue().await?;
    Ok((StatusCode::ACCEPTED, Json(StartedResponse { started })))
}

async fn remove_queue_item(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.dashboard.remove_queue_item(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `uploading` starts the upload in the background and answers `202`.
async fn set_queue_status(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> AppResult<(StatusCode, Json<QueueItem>)> {
    match req.status {
        QueueStatus::Uploading => {
            let item = state.dashboard.begin_upload(&id).await?;
            Ok((StatusCode::ACCEPTED, Json(item)))
        }
        status => {
            let item = state.dashboard.mark_queue_status(&id, status).await?;
            Ok((StatusCode::OK, Json(item)))
        }
    }
}

async fn refresh_channel(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    body: Option<Json<RefreshRequest>>,
) -> Json<RefreshResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let refreshed = state
        .dashboard
        .refresh_channel_stats(req.force, req.query.as_deref())
        .await;
    Json(RefreshResponse {
        refreshed,
        quota_exceeded: state.dashboard.snapshot().await.quota_exceeded,
    })
}

async fn refresh_analytics(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    body: Option<Json<RefreshRequest>>,
) -> Json<RefreshResponse> {
    let force = body.map(|Json(r)| r.force).unwrap_or(false);
    let refreshed = state.dashboard.refresh_analytics(force).await;
    Json(RefreshResponse {
        refreshed,
        quota_exceeded: state.dashboard.snapshot().await.quota_exceeded,
    })
}

async fn youtube_oauth(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
) -> Json<OAuthConfigResponse> {
    Json(OAuthConfigResponse {
        client_id: state.config.youtube.client_id.clone(),
        scopes: YOUTUBE_SCOPES.to_vec(),
    })
}

async fn set_youtube_token(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Json(token): Json<TokenResponse>,
) -> AppResult<Json<AccountResponse>> {
    let account = state.dashboard.set_youtube_token(token).await?;
    Ok(Json(AccountResponse {
        account: account.map(|a| AccountView::new(a, true)),
    }))
}

async fn switch_account(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path(id): Path<String>,
) -> AppResult<Json<AccountView>> {
    let account = state.dashboard.switch_account(&id).await?;
    Ok(Json(AccountView::new(account, true)))
}

async fn disconnect_account(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.dashboard.disconnect_account(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
) -> Json<SettingsView> {
    Json(state.dashboard.snapshot().await.settings.into())
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Json(patch): Json<SettingsPatch>,
) -> AppResult<Json<SettingsView>> {
    Ok(Json(state.dashboard.update_settings(patch).await?.into()))
}

async fn remove_history_item(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path((date, video_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    state
        .dashboard
        .remove_history_item(&date, &video_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_project_from_url(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Json(req): Json<ProjectUrlRequest>,
) -> AppResult<(StatusCode, Json<PipelineJob>)> {
    let job = state
        .dashboard
        .create_clip_project_from_url(&req.url)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn create_project_from_file(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Json(file): Json<MediaFile>,
) -> AppResult<(StatusCode, Json<PipelineJob>)> {
    if file.name.trim().is_empty() {
        return Err(AppError::Validation("File name is required".to_string()));
    }
    let job = state.dashboard.create_clip_project_from_file(file).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn refresh_pipeline(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
) -> AppResult<Json<Vec<PipelineJob>>> {
    Ok(Json(state.dashboard.refresh_pipeline_jobs().await?))
}

async fn queue_clip(
    State(state): State<Arc<AppState>>,
    _owner: DashboardOwner,
    Path((project_id, clip_id)): Path<(String, String)>,
) -> AppResult<(StatusCode, Json<QueueItem>)> {
    let item = state.dashboard.queue_clip(&project_id, &clip_id).await?;
    Ok((StatusCode::CREATED, Json(item)))
}
