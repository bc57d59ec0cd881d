//! The dashboard controller owns the state tree and every action on it.
//!
//! All mutations go through [`DashboardController::mutate`]: the write lock is
//! held only while the change is applied, the revision is bumped, and the
//! resulting snapshot is persisted after the lock is released. External calls
//! never happen under the lock.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::csv::checklists_csv;
use super::history::{self, date_key};
use super::model::{
    default_checklists, AuthState, Cache, CacheEntry, ChecklistGroup, ChecklistItem, Clip, ConnectedAccount,
    DashboardState, JobStatus, MediaFile, NewQueueItem, PipelineJob, Platform, Progress,
    QueueItem, QueueStatus, Settings, SettingsPatch, TokenResponse,
};
use super::store::StateStore;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::opus::{ClipApi, ProjectHandle};
use crate::services::upload::{UploadOutcome, Uploader};
use crate::services::youtube::ChannelApi;

const RECENT_UPLOADS_LIMIT: u32 = 50;
const UNEXPECTED_UPLOAD_ERROR: &str = "Unexpected upload error. Try again.";
const INTERRUPTED_UPLOAD_ERROR: &str = "Upload was interrupted by a server restart. Try again.";

/// Topics used for the suggestions panel when no query is given.
const SUGGESTION_TOPICS: &[&str] = &[
    "cachorro engraçado",
    "gato fofo",
    "pets virais",
    "animais engraçados",
    "resgate de animais",
    "truques de cachorro",
];

/// External clients the controller talks to.
pub struct Clients {
    pub youtube: Arc<dyn ChannelApi>,
    pub uploader: Arc<dyn Uploader>,
    pub clips: Arc<dyn ClipApi>,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub cache_ttl: Duration,
    /// Server-wide clip API key, used when the settings carry none.
    pub opus_api_key: Option<String>,
    /// Media files must resolve to a location under this directory.
    pub upload_dir: PathBuf,
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_ttl: Duration::seconds(config.dashboard.cache_ttl_seconds),
            opus_api_key: config.opus.api_key.clone(),
            upload_dir: config.dashboard.upload_dir.clone(),
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::hours(1),
            opus_api_key: None,
            upload_dir: std::env::temp_dir(),
        }
    }
}

struct UploadJob {
    item: QueueItem,
    token: Option<String>,
}

enum Claim {
    Started(UploadJob),
    Unchanged(QueueItem),
}

/// Data for one slice of a channel refresh.
enum Slice<T> {
    Fetched(T),
    Fallback(T),
}

impl<T> Slice<T> {
    fn is_fetched(&self) -> bool {
        matches!(self, Slice::Fetched(_))
    }

    fn into_inner(self) -> T {
        match self {
            Slice::Fetched(v) | Slice::Fallback(v) => v,
        }
    }
}

fn is_fallback<T>(result: &AppResult<Slice<T>>) -> bool {
    matches!(result, Ok(Slice::Fallback(_)))
}

/// Resolve a fetch result. Quota errors fall back to the cached value, then to mock data.
async fn settle<T, M>(
    what: &str,
    result: AppResult<T>,
    cached: Option<T>,
    mock: M,
) -> AppResult<Slice<T>>
where
    M: Future<Output = AppResult<T>>,
{
    match result {
        Ok(value) => Ok(Slice::Fetched(value)),
        Err(e) if e.is_quota_exceeded() => {
            tracing::warn!("YouTube quota exceeded while fetching {}: {}", what, e);
            match cached {
                Some(value) => {
                    tracing::info!("Serving cached {}", what);
                    Ok(Slice::Fallback(value))
                }
                None => {
                    tracing::info!("No cached {}, serving mock data", what);
                    mock.await.map(Slice::Fallback)
                }
            }
        }
        Err(e) => Err(e),
    }
}

fn random_topic() -> String {
    SUGGESTION_TOPICS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("pets")
        .to_string()
}

fn queue_item_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Queue item '{}'", id))
}

fn find_group<'a>(
    groups: &'a mut [ChecklistGroup],
    group_id: &str,
) -> AppResult<&'a mut ChecklistGroup> {
    groups
        .iter_mut()
        .find(|g| g.id == group_id)
        .ok_or_else(|| AppError::NotFound(format!("Checklist '{}'", group_id)))
}

/// The channel details entry alone decides whether a refresh may be skipped.
fn channel_cache_is_fresh(cache: &Cache, now: DateTime<Utc>, ttl: Duration) -> bool {
    cache
        .channel_stats
        .as_ref()
        .is_some_and(|c| c.is_fresh(now, ttl))
}

/// Uploads persisted mid-flight cannot be resumed; mark them failed so they can be retried.
fn recover_interrupted_uploads(state: &mut DashboardState) -> usize {
    let mut recovered = 0;
    for item in &mut state.upload_queue {
        if item.status == QueueStatus::Uploading {
            item.status = QueueStatus::Error;
            item.error = Some(INTERRUPTED_UPLOAD_ERROR.to_string());
            recovered += 1;
        }
    }
    recovered
}

/// Forget everything fetched for the previous account. History is kept.
fn clear_channel_data(state: &mut DashboardState) {
    state.cache.clear();
    state.channel_stats = None;
    state.recent_uploads.clear();
    state.analytics = None;
}

fn activate_account(state: &mut DashboardState, account: &ConnectedAccount) {
    state.auth = AuthState {
        youtube_token: Some(account.token.clone()),
        youtube_token_expires_at: account.token_expires_at,
        active_account_id: Some(account.id.clone()),
    };
    clear_channel_data(state);
}

pub struct DashboardController {
    state: RwLock<DashboardState>,
    store: Arc<dyn StateStore>,
    youtube: Arc<dyn ChannelApi>,
    uploader: Arc<dyn Uploader>,
    clips: Arc<dyn ClipApi>,
    options: ControllerOptions,
    uploads: Mutex<Vec<JoinHandle<()>>>,
}

impl DashboardController {
    /// Build a controller from whatever the store holds.
    pub async fn load(
        store: Arc<dyn StateStore>,
        clients: Clients,
        options: ControllerOptions,
    ) -> Self {
        let mut state = store.load().await;
        tracing::info!(
            "Loaded dashboard state at revision {} ({} queued uploads)",
            state.revision,
            state.upload_queue.len()
        );

        let recovered = recover_interrupted_uploads(&mut state);
        if recovered > 0 {
            tracing::warn!("Marked {} interrupted uploads as failed", recovered);
            state.revision += 1;
        }

        let controller = Self::with_state(state, store, clients, options);
        if recovered > 0 {
            controller.persist(&controller.snapshot().await).await;
        }
        controller
    }

    pub fn with_state(
        state: DashboardState,
        store: Arc<dyn StateStore>,
        clients: Clients,
        options: ControllerOptions,
    ) -> Self {
        Self {
            state: RwLock::new(state),
            store,
            youtube: clients.youtube,
            uploader: clients.uploader,
            clips: clients.clips,
            options,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub async fn snapshot(&self) -> DashboardState {
        self.state.read().await.clone()
    }

    async fn mutate<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut DashboardState) -> AppResult<T>,
    {
        let (result, snapshot) = {
            let mut state = self.state.write().await;
            let result = f(&mut *state)?;
            state.revision += 1;
            (result, state.clone())
        };
        self.persist(&snapshot).await;
        Ok(result)
    }

    async fn persist(&self, snapshot: &DashboardState) {
        if let Err(e) = self.store.save(snapshot).await {
            tracing::error!(
                "Failed to persist dashboard state at revision {}: {:?}",
                snapshot.revision,
                e
            );
        }
    }

    // ------------------------------------------------------------------------
    // Checklists
    // ------------------------------------------------------------------------

    pub async fn toggle_checklist_item(
        &self,
        group_id: &str,
        item_id: &str,
    ) -> AppResult<ChecklistItem> {
        let now = Utc::now();
        self.mutate(|state| {
            let today = date_key(now, state.settings.tz());
            let group = find_group(&mut state.checklists, group_id)?;
            let item = group
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or_else(|| AppError::NotFound(format!("Checklist item '{}'", item_id)))?;

            item.done = !item.done;
            let updated = item.clone();
            history::set_checklist_completion(&mut state.history, &today, item_id, updated.done);
            Ok(updated)
        })
        .await
    }

    pub async fn add_checklist_item(&self, group_id: &str, text: &str) -> AppResult<ChecklistItem> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Checklist item text is required".to_string()));
        }

        let now = Utc::now();
        self.mutate(|state| {
            let group = find_group(&mut state.checklists, group_id)?;

            let base = format!("{}_custom_{}", group_id, now.timestamp_millis());
            let mut id = base.clone();
            let mut n = 1;
            while group.items.iter().any(|i| i.id == id) {
                id = format!("{}_{}", base, n);
                n += 1;
            }

            let item = ChecklistItem {
                id,
                text: text.to_string(),
                done: false,
                actions: Vec::new(),
            };
            group.items.push(item.clone());
            Ok(item)
        })
        .await
    }

    /// Restore a group to its shipped items, dropping custom ones. Groups
    /// without shipped defaults are only unchecked.
    pub async fn reset_checklist(&self, group_id: &str) -> AppResult<ChecklistGroup> {
        let shipped = default_checklists()
            .into_iter()
            .find(|g| g.id == group_id)
            .map(|g| g.items);

        self.mutate(|state| {
            let group = find_group(&mut state.checklists, group_id)?;
            match shipped {
                Some(items) => group.items = items,
                None => {
                    for item in &mut group.items {
                        item.done = false;
                    }
                }
            }
            Ok(group.clone())
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Upload queue
    // ------------------------------------------------------------------------

    pub async fn add_to_upload_queue(&self, new: NewQueueItem) -> AppResult<QueueItem> {
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }

        let file = match new.file {
            Some(file) => Some(self.resolve_media_file(file).await?),
            None => None,
        };

        let item = QueueItem {
            id: Uuid::new_v4().to_string(),
            title,
            description: new.description.filter(|d| !d.trim().is_empty()),
            source: new
                .source
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "manual".to_string()),
            platform: new.platform.unwrap_or(Platform::YouTubeShorts),
            scheduled_at: new.scheduled_at,
            publish_at: new.publish_at,
            privacy_status: new.privacy_status,
            status: QueueStatus::Ready,
            file,
            error: None,
            url: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        tracing::info!("Queued '{}' for {}", item.title, item.platform.as_str());
        self.mutate(|state| {
            state.upload_queue.push(item.clone());
            Ok(item)
        })
        .await
    }

    /// Remove a queue item together with its uploaded-video history entries.
    pub async fn remove_queue_item(&self, id: &str) -> AppResult<()> {
        self.mutate(|state| {
            let before = state.upload_queue.len();
            state.upload_queue.retain(|q| q.id != id);
            if state.upload_queue.len() == before {
                return Err(queue_item_not_found(id));
            }
            history::remove_uploaded_video_everywhere(&mut state.history, id);
            Ok(())
        })
        .await
    }

    /// Canonicalize a media path and require a regular file inside the upload
    /// directory. Relative paths resolve against that directory. Missing files
    /// and files elsewhere get the same error.
    async fn resolve_media_file(&self, mut file: MediaFile) -> AppResult<MediaFile> {
        let root = tokio::fs::canonicalize(&self.options.upload_dir)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Upload directory {} is not usable: {}",
                    self.options.upload_dir.display(),
                    e
                );
                AppError::ServiceUnavailable("Upload directory is not available".to_string())
            })?;

        let resolved = tokio::fs::canonicalize(root.join(&file.path)).await.ok();
        let accepted = match &resolved {
            Some(path) if path.starts_with(&root) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            _ => false,
        };

        match resolved {
            Some(path) if accepted => {
                file.path = path;
                Ok(file)
            }
            _ => {
                tracing::warn!("Rejected media path {}", file.path.display());
                Err(AppError::Validation(format!(
                    "File '{}' is not available in the upload directory",
                    file.name
                )))
            }
        }
    }

    async fn current_item(&self, id: &str) -> AppResult<QueueItem> {
        let state = self.state.read().await;
        state
            .queue_item(id)
            .cloned()
            .ok_or_else(|| queue_item_not_found(id))
    }

    /// Apply a requested status to a queue item.
    ///
    /// `uploading` runs the upload to completion before returning; upload
    /// failures end up on the item, never in the returned error.
    pub async fn mark_queue_status(&self, id: &str, status: QueueStatus) -> AppResult<QueueItem> {
        match status {
            QueueStatus::Uploading => match self.claim_upload(id).await? {
                Claim::Started(job) => self.perform_upload(job).await,
                Claim::Unchanged(item) => Ok(item),
            },
            QueueStatus::Done => self.complete_manually(id).await,
            QueueStatus::Ready | QueueStatus::Error => Err(AppError::Validation(format!(
                "Cannot set status '{}' directly",
                status.as_str()
            ))),
        }
    }

    /// Claim an item for upload and run the upload in the background.
    pub async fn begin_upload(self: &Arc<Self>, id: &str) -> AppResult<QueueItem> {
        match self.claim_upload(id).await? {
            Claim::Started(job) => {
                let item = job.item.clone();
                self.spawn_upload(job);
                Ok(item)
            }
            Claim::Unchanged(item) => Ok(item),
        }
    }

    async fn claim_upload(&self, id: &str) -> AppResult<Claim> {
        let current = self.current_item(id).await?;
        if !current.status.can_start_upload() {
            tracing::debug!(
                "Queue item {} is {}, not starting upload",
                id,
                current.status.as_str()
            );
            return Ok(Claim::Unchanged(current));
        }

        self.mutate(|state| {
            let token = state.auth.youtube_token.clone();
            let item = state
                .queue_item_mut(id)
                .ok_or_else(|| queue_item_not_found(id))?;

            // another caller may have claimed it since the read above
            if !item.status.can_start_upload() {
                return Ok(Claim::Unchanged(item.clone()));
            }

            item.status = QueueStatus::Uploading;
            item.error = None;
            item.url = None;
            Ok(Claim::Started(UploadJob {
                item: item.clone(),
                token,
            }))
        })
        .await
    }

    async fn perform_upload(&self, job: UploadJob) -> AppResult<QueueItem> {
        let result = self
            .uploader
            .upload_video(&job.item, job.token.as_deref())
            .await;
        let now = Utc::now();
        let id = job.item.id;

        self.mutate(move |state| {
            let today = date_key(now, state.settings.tz());
            let item = state
                .queue_item_mut(&id)
                .ok_or_else(|| queue_item_not_found(&id))?;

            if item.status == QueueStatus::Done {
                return Ok(item.clone());
            }

            match result {
                Ok(UploadOutcome::Success { url }) => {
                    item.status = QueueStatus::Done;
                    item.url = Some(url);
                    item.error = None;
                    item.completed_at = Some(now);
                    let done = item.clone();

                    history::record_upload(&mut state.history, &today, &done, now);
                    tracing::info!("Uploaded '{}'", done.title);
                    Ok(done)
                }
                Ok(UploadOutcome::Failure { error }) => {
                    tracing::warn!("Upload of '{}' failed: {}", item.title, error);
                    item.status = QueueStatus::Error;
                    item.error = Some(error);
                    Ok(item.clone())
                }
                Err(e) => {
                    tracing::error!("Upload of '{}' errored: {:?}", item.title, e);
                    item.status = QueueStatus::Error;
                    item.error = Some(UNEXPECTED_UPLOAD_ERROR.to_string());
                    Ok(item.clone())
                }
            }
        })
        .await
    }

    async fn complete_manually(&self, id: &str) -> AppResult<QueueItem> {
        let current = self.current_item(id).await?;
        if current.status == QueueStatus::Done {
            return Ok(current);
        }

        let now = Utc::now();
        self.mutate(|state| {
            let today = date_key(now, state.settings.tz());
            let item = state
                .queue_item_mut(id)
                .ok_or_else(|| queue_item_not_found(id))?;
            if item.status == QueueStatus::Done {
                return Ok(item.clone());
            }

            item.status = QueueStatus::Done;
            item.error = None;
            item.completed_at = Some(now);
            let done = item.clone();

            history::record_upload(&mut state.history, &today, &done, now);
            Ok(done)
        })
        .await
    }

    /// Claim every item matching `due` and move it to `uploading`.
    async fn claim_where<P>(&self, due: P) -> AppResult<Vec<UploadJob>>
    where
        P: Fn(&QueueItem) -> bool,
    {
        {
            let state = self.state.read().await;
            if !state.upload_queue.iter().any(&due) {
                return Ok(Vec::new());
            }
        }

        self.mutate(|state| {
            let token = state.auth.youtube_token.clone();
            let jobs = state
                .upload_queue
                .iter_mut()
                .filter(|item| due(item))
                .map(|item| {
                    item.status = QueueStatus::Uploading;
                    item.error = None;
                    item.url = None;
                    UploadJob {
                        item: item.clone(),
                        token: token.clone(),
                    }
                })
                .collect();
            Ok(jobs)
        })
        .await
    }

    fn spawn_upload(self: &Arc<Self>, job: UploadJob) {
        let controller = Arc::clone(self);
        let id = job.item.id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = controller.perform_upload(job).await {
                tracing::warn!("Could not record upload result for {}: {}", id, e);
            }
        });

        let mut uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
        uploads.retain(|h| !h.is_finished());
        uploads.push(handle);
    }

    fn spawn_all(self: &Arc<Self>, jobs: Vec<UploadJob>) -> Vec<String> {
        jobs.into_iter()
            .map(|job| {
                let id = job.item.id.clone();
                self.spawn_upload(job);
                id
            })
            .collect()
    }

    /// Start uploads for every `ready` or `error` item. Returns the claimed ids.
    pub async fn start_upload_queue(self: &Arc<Self>) -> AppResult<Vec<String>> {
        let jobs = self.claim_where(|item| item.status.can_start_upload()).await?;
        tracing::info!("Starting upload queue with {} items", jobs.len());
        Ok(self.spawn_all(jobs))
    }

    /// Start uploads for `ready` items scheduled at or before `now`.
    pub async fn run_scheduled_tick(self: &Arc<Self>, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        let jobs = self
            .claim_where(|item| {
                item.status == QueueStatus::Ready && item.scheduled_at.is_some_and(|at| at <= now)
            })
            .await?;

        if !jobs.is_empty() {
            tracing::info!("{} scheduled uploads are due", jobs.len());
        }
        Ok(self.spawn_all(jobs))
    }

    /// Wait for in-flight uploads, at most `wait`.
    pub async fn shutdown(&self, wait: StdDuration) {
        let handles = std::mem::take(&mut *self.uploads.lock().unwrap_or_else(PoisonError::into_inner));
        let pending: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
        if pending.is_empty() {
            return;
        }

        tracing::info!(
            "Waiting up to {}s for {} in-flight uploads",
            wait.as_secs(),
            pending.len()
        );
        let all = async {
            for handle in pending {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(wait, all).await.is_err() {
            tracing::warn!("In-flight uploads did not finish before shutdown");
        }
    }

    // ------------------------------------------------------------------------
    // Channel data
    // ------------------------------------------------------------------------

    /// Refresh channel details, recent uploads and suggestions.
    ///
    /// Returns `false` when a non-quota failure prevented the refresh.
    pub async fn refresh_channel_stats(&self, force: bool, custom_query: Option<&str>) -> bool {
        let now = Utc::now();
        let custom_query = custom_query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        let (token, cache) = {
            let state = self.state.read().await;
            if !force
                && custom_query.is_none()
                && channel_cache_is_fresh(&state.cache, now, self.options.cache_ttl)
            {
                tracing::debug!("Channel cache is fresh, skipping refresh");
                return true;
            }
            (state.auth.youtube_token.clone(), state.cache.clone())
        };

        let query = custom_query.unwrap_or_else(random_topic);
        let token = token.as_deref();

        let (details, videos, suggestions) = tokio::join!(
            self.youtube.fetch_channel_details(token),
            self.youtube.fetch_channel_videos(token, RECENT_UPLOADS_LIMIT),
            self.youtube.search_videos(token, &query),
        );

        let details = settle(
            "channel details",
            details,
            cache.channel_stats.map(|c| Some(c.data)),
            self.youtube.fetch_channel_details(None),
        )
        .await;
        let videos = settle(
            "channel videos",
            videos,
            cache.videos.map(|c| c.data),
            self.youtube.fetch_channel_videos(None, RECENT_UPLOADS_LIMIT),
        )
        .await;
        let suggestions = settle(
            "suggestions",
            suggestions,
            cache.suggestions.map(|c| c.data),
            self.youtube.search_videos(None, &query),
        )
        .await;

        let quota_hit = is_fallback(&details) || is_fallback(&videos) || is_fallback(&suggestions);

        let (details, videos, suggestions) = match (details, videos, suggestions) {
            (Ok(d), Ok(v), Ok(s)) => (d, v, s),
            (d, v, s) => {
                for e in [d.err(), v.err(), s.err()].into_iter().flatten() {
                    tracing::error!("Channel refresh failed: {}", e);
                }
                if quota_hit {
                    self.mark_channel_quota_hit().await;
                }
                return false;
            }
        };

        let result = self
            .mutate(|state| {
                let tz = state.settings.tz();
                state.set_channel_quota(quota_hit);

                let fetched = details.is_fetched();
                if let Some(stats) = details.into_inner() {
                    if fetched {
                        state.cache.channel_stats = Some(CacheEntry::new(stats.clone(), now));
                    }
                    state.channel_stats = Some(stats);
                }

                if videos.is_fetched() {
                    let videos = videos.into_inner();
                    let days = history::sync_published_videos(&mut state.history, &videos, tz);
                    tracing::debug!("Synced {} videos across {} days", videos.len(), days);
                    state.cache.videos = Some(CacheEntry::new(videos.clone(), now));
                    state.recent_uploads = videos;
                } else {
                    state.recent_uploads = videos.into_inner();
                }

                if suggestions.is_fetched() {
                    let suggestions = suggestions.into_inner();
                    state.cache.suggestions = Some(CacheEntry::new(suggestions.clone(), now));
                    state.suggestions = suggestions;
                } else {
                    state.suggestions = suggestions.into_inner();
                }
                Ok(())
            })
            .await;

        result.is_ok()
    }

    pub async fn refresh_analytics(&self, force: bool) -> bool {
        let now = Utc::now();
        let (token, cached) = {
            let state = self.state.read().await;
            if let Some(entry) = &state.cache.analytics {
                if !force && entry.is_fresh(now, self.options.cache_ttl) {
                    return true;
                }
            }
            (
                state.auth.youtube_token.clone(),
                state.cache.analytics.as_ref().map(|c| c.data.clone()),
            )
        };

        let result = self.youtube.fetch_channel_analytics(token.as_deref()).await;
        let analytics = match settle(
            "analytics",
            result,
            cached,
            self.youtube.fetch_channel_analytics(None),
        )
        .await
        {
            Ok(slice) => slice,
            Err(e) => {
                tracing::error!("Analytics refresh failed: {}", e);
                return false;
            }
        };

        self.mutate(|state| {
            let fetched = analytics.is_fetched();
            state.set_analytics_quota(!fetched);
            let analytics = analytics.into_inner();
            if fetched {
                state.cache.analytics = Some(CacheEntry::new(analytics.clone(), now));
            }
            state.analytics = Some(analytics);
            Ok(())
        })
        .await
        .is_ok()
    }

    async fn mark_channel_quota_hit(&self) {
        let _ = self
            .mutate(|state| {
                state.set_channel_quota(true);
                Ok(())
            })
            .await;
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    /// Store a freshly granted token and connect the channel behind it.
    pub async fn set_youtube_token(
        &self,
        token: TokenResponse,
    ) -> AppResult<Option<ConnectedAccount>> {
        let access_token = token.access_token.trim().to_string();
        if access_token.is_empty() {
            return Err(AppError::Validation("access_token is required".to_string()));
        }

        let now = Utc::now();
        let expires_at = now + Duration::seconds(token.expires_in.max(0));

        let stats = match self.youtube.fetch_channel_details(Some(&access_token)).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Failed to fetch channel details for new token: {}", e);
                None
            }
        };

        self.mutate(move |state| {
            state.auth.youtube_token = Some(access_token.clone());
            state.auth.youtube_token_expires_at = Some(expires_at);
            state.cache.clear();

            let Some(stats) = stats else {
                return Ok(None);
            };

            let account = ConnectedAccount {
                id: stats
                    .id
                    .clone()
                    .or_else(|| stats.custom_url.clone())
                    .unwrap_or_else(|| stats.title.clone()),
                name: stats.title.clone(),
                avatar: stats.thumbnails.best().map(str::to_string),
                token: access_token,
                token_expires_at: Some(expires_at),
                connected_at: now,
            };

            match state.accounts.iter_mut().find(|a| a.id == account.id) {
                Some(existing) => {
                    *existing = ConnectedAccount {
                        connected_at: existing.connected_at,
                        ..account.clone()
                    };
                }
                None => state.accounts.push(account.clone()),
            }

            tracing::info!("Connected YouTube account '{}'", account.name);
            state.auth.active_account_id = Some(account.id.clone());
            state.channel_stats = Some(stats);
            Ok(Some(account))
        })
        .await
    }

    pub async fn switch_account(&self, id: &str) -> AppResult<ConnectedAccount> {
        self.mutate(|state| {
            let account = state
                .accounts
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Account '{}'", id)))?;
            activate_account(state, &account);
            Ok(account)
        })
        .await
    }

    pub async fn disconnect_account(&self, id: &str) -> AppResult<()> {
        self.mutate(|state| {
            let pos = state
                .accounts
                .iter()
                .position(|a| a.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Account '{}'", id)))?;
            state.accounts.remove(pos);

            if state.auth.active_account_id.as_deref() == Some(id) {
                match state.accounts.first().cloned() {
                    Some(next) => activate_account(state, &next),
                    None => {
                        state.auth = AuthState::default();
                        clear_channel_data(state);
                    }
                }
            }
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Settings, history, reset
    // ------------------------------------------------------------------------

    pub async fn update_settings(&self, patch: SettingsPatch) -> AppResult<Settings> {
        if patch.daily_goal == Some(0) {
            return Err(AppError::Validation("Daily goal must be at least 1".to_string()));
        }
        if let Some(tz) = &patch.timezone {
            if tz.parse::<chrono_tz::Tz>().is_err() {
                return Err(AppError::Validation(format!("Unknown timezone: {}", tz)));
            }
        }
        if patch
            .channel_name
            .as_deref()
            .is_some_and(|n| n.trim().is_empty())
        {
            return Err(AppError::Validation("Channel name cannot be empty".to_string()));
        }

        self.mutate(|state| {
            let settings = &mut state.settings;
            if let Some(name) = patch.channel_name {
                settings.channel_name = name.trim().to_string();
            }
            if let Some(tz) = patch.timezone {
                settings.timezone = tz;
            }
            if let Some(targets) = patch.upload_targets {
                settings.upload_targets = targets;
            }
            if let Some(goal) = patch.daily_goal {
                settings.daily_goal = goal;
            }
            if let Some(text) = patch.cta_text {
                settings.cta_text = text;
            }
            if let Some(link) = patch.cta_link {
                settings.cta_link = link;
            }
            if let Some(key) = patch.opus_api_key {
                settings.opus_api_key = Some(key.trim().to_string()).filter(|k| !k.is_empty());
            }
            Ok(settings.clone())
        })
        .await
    }

    pub async fn remove_history_item(&self, date: &str, video_id: &str) -> AppResult<()> {
        self.mutate(|state| {
            if history::remove_uploaded_video(&mut state.history, date, video_id) {
                Ok(())
            } else {
                Err(AppError::NotFound(format!(
                    "History entry '{}' on {}",
                    video_id, date
                )))
            }
        })
        .await
    }

    pub async fn reset_state(&self) -> AppResult<DashboardState> {
        tracing::warn!("Resetting dashboard state to defaults");
        self.mutate(|state| {
            let revision = state.revision;
            *state = DashboardState {
                revision,
                ..DashboardState::default()
            };
            Ok(())
        })
        .await?;
        Ok(self.snapshot().await)
    }

    // ------------------------------------------------------------------------
    // Clip pipeline
    // ------------------------------------------------------------------------

    async fn opus_key(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .settings
            .opus_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.options.opus_api_key.clone())
    }

    async fn add_pipeline_job(&self, project: ProjectHandle) -> AppResult<PipelineJob> {
        let now = Utc::now();
        let job = PipelineJob {
            project_id: project.project_id,
            status: project.status,
            original_name: project.original_name,
            clips: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.mutate(|state| {
            state.pipeline.insert(0, job.clone());
            Ok(job)
        })
        .await
    }

    pub async fn create_clip_project_from_url(&self, url: &str) -> AppResult<PipelineJob> {
        let url = url.trim();
        let parsed = url::Url::parse(url)
            .map_err(|_| AppError::Validation("A valid video URL is required".to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Validation(
                "Video URL must use http or https".to_string(),
            ));
        }

        let key = self.opus_key().await;
        let project = self
            .clips
            .create_project_from_url(url, key.as_deref())
            .await?;
        self.add_pipeline_job(project).await
    }

    pub async fn create_clip_project_from_file(&self, file: MediaFile) -> AppResult<PipelineJob> {
        let file = self.resolve_media_file(file).await?;
        let key = self.opus_key().await;
        let project = self.clips.upload_to_opus(&file, key.as_deref()).await?;
        self.add_pipeline_job(project).await
    }

    async fn poll_project(&self, project_id: &str, key: Option<&str>) -> Option<Vec<Clip>> {
        match self.clips.check_project_status(project_id, key).await {
            Ok(JobStatus::Done) => match self.clips.get_clips(project_id, key).await {
                Ok(clips) => Some(clips),
                Err(e) => {
                    tracing::warn!("Fetching clips for project {} failed: {}", project_id, e);
                    None
                }
            },
            Ok(JobStatus::Processing) => None,
            Err(e) => {
                tracing::warn!("Status check for project {} failed: {}", project_id, e);
                None
            }
        }
    }

    /// Poll every processing job; finished ones get their clips.
    pub async fn refresh_pipeline_jobs(&self) -> AppResult<Vec<PipelineJob>> {
        let key = self.opus_key().await;
        let pending: Vec<String> = {
            let state = self.state.read().await;
            state
                .pipeline
                .iter()
                .filter(|j| j.status == JobStatus::Processing)
                .map(|j| j.project_id.clone())
                .collect()
        };

        let polls = pending.iter().map(|id| self.poll_project(id, key.as_deref()));
        let finished: Vec<(String, Vec<Clip>)> = futures::future::join_all(polls)
            .await
            .into_iter()
            .zip(pending.iter())
            .filter_map(|(clips, id)| clips.map(|c| (id.clone(), c)))
            .collect();

        if finished.is_empty() {
            return Ok(self.state.read().await.pipeline.clone());
        }

        let now = Utc::now();
        self.mutate(|state| {
            for (project_id, clips) in finished {
                if let Some(job) = state.pipeline.iter_mut().find(|j| j.project_id == project_id) {
                    job.status = JobStatus::Done;
                    job.clips = clips;
                    job.updated_at = now;
                }
            }
            Ok(state.pipeline.clone())
        })
        .await
    }

    /// Queue a generated clip for upload.
    pub async fn queue_clip(&self, project_id: &str, clip_id: &str) -> AppResult<QueueItem> {
        let clip = {
            let state = self.state.read().await;
            let job = state
                .pipeline
                .iter()
                .find(|j| j.project_id == project_id)
                .ok_or_else(|| AppError::NotFound(format!("Clip project '{}'", project_id)))?;
            job.clips
                .iter()
                .find(|c| c.id == clip_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Clip '{}'", clip_id)))?
        };

        self.add_to_upload_queue(NewQueueItem {
            title: clip.title,
            source: Some("opus".to_string()),
            ..NewQueueItem::default()
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------------

    pub async fn progress(&self) -> Progress {
        let state = self.state.read().await;
        let today = date_key(Utc::now(), state.settings.tz());

        let items = state.checklists.iter().flat_map(|g| g.items.iter());
        let count_status = |status: QueueStatus| {
            state
                .upload_queue
                .iter()
                .filter(|q| q.status == status)
                .count()
        };

        Progress {
            checklist_done: items.clone().filter(|i| i.done).count(),
            checklist_total: items.count(),
            uploads_today: state.history.get(&today).map_or(0, |d| d.uploads),
            today,
            daily_goal: state.settings.daily_goal,
            queue_ready: count_status(QueueStatus::Ready),
            queue_uploading: count_status(QueueStatus::Uploading),
            queue_failed: count_status(QueueStatus::Error),
        }
    }

    pub async fn export_checklists_csv(&self) -> String {
        let state = self.state.read().await;
        checklists_csv(&state.checklists)
    }
}
