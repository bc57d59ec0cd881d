use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Root state
// ============================================================================

/// The whole dashboard, persisted as one JSON document.
///
/// Every field falls back to its default when missing from a stored
/// document, so documents written by older versions still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardState {
    /// Bumped on every mutation; the store refuses to overwrite a newer revision.
    pub revision: i64,
    pub settings: Settings,
    pub checklists: Vec<ChecklistGroup>,
    pub upload_queue: Vec<QueueItem>,
    /// Keyed by `YYYY-MM-DD` in the settings timezone.
    pub history: BTreeMap<String, HistoryDay>,
    pub auth: AuthState,
    pub accounts: Vec<ConnectedAccount>,
    pub channel_stats: Option<ChannelStats>,
    pub recent_uploads: Vec<Video>,
    pub suggestions: Vec<Video>,
    pub analytics: Option<ChannelAnalytics>,
    pub cache: Cache,
    pub pipeline: Vec<PipelineJob>,
    /// Any area currently over quota; kept in sync with `quota`.
    pub quota_exceeded: bool,
    pub quota: QuotaFlags,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            revision: 0,
            settings: Settings::default(),
            checklists: default_checklists(),
            upload_queue: Vec::new(),
            history: BTreeMap::new(),
            auth: AuthState::default(),
            accounts: Vec::new(),
            channel_stats: None,
            recent_uploads: Vec::new(),
            suggestions: Vec::new(),
            analytics: None,
            cache: Cache::default(),
            pipeline: Vec::new(),
            quota_exceeded: false,
            quota: QuotaFlags::default(),
        }
    }
}

impl DashboardState {
    pub fn queue_item(&self, id: &str) -> Option<&QueueItem> {
        self.upload_queue.iter().find(|q| q.id == id)
    }

    pub fn queue_item_mut(&mut self, id: &str) -> Option<&mut QueueItem> {
        self.upload_queue.iter_mut().find(|q| q.id == id)
    }

    pub fn active_account(&self) -> Option<&ConnectedAccount> {
        let id = self.auth.active_account_id.as_deref()?;
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn set_channel_quota(&mut self, hit: bool) {
        self.quota.channel = hit;
        self.quota_exceeded = self.quota.any();
    }

    pub fn set_analytics_quota(&mut self, hit: bool) {
        self.quota.analytics = hit;
        self.quota_exceeded = self.quota.any();
    }
}

/// Which data areas last ran into the provider quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaFlags {
    pub channel: bool,
    pub analytics: bool,
}

impl QuotaFlags {
    pub fn any(&self) -> bool {
        self.channel || self.analytics
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub channel_name: String,
    /// IANA timezone name used to bucket history by calendar day.
    pub timezone: String,
    pub upload_targets: Vec<Platform>,
    pub daily_goal: u32,
    pub cta_text: String,
    pub cta_link: String,
    /// Opus clip API key; falls back to the server-wide key when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_name: "PetCutsBR".to_string(),
            timezone: "America/Manaus".to_string(),
            upload_targets: vec![Platform::YouTubeShorts, Platform::TikTok],
            daily_goal: 4,
            cta_text: "🚀 Domine o Método ViralCuts".to_string(),
            cta_link: "https://seu-curso-ou-metodo.com".to_string(),
            opus_api_key: None,
        }
    }
}

impl Settings {
    /// The configured timezone, or UTC when the name does not parse.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

/// Partial settings update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub channel_name: Option<String>,
    pub timezone: Option<String>,
    pub upload_targets: Option<Vec<Platform>>,
    pub daily_goal: Option<u32>,
    pub cta_text: Option<String>,
    pub cta_link: Option<String>,
    pub opus_api_key: Option<String>,
}

// ============================================================================
// Checklists
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistGroup {
    pub id: String,
    pub title: String,
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ChecklistAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

fn item(id: &str, text: &str) -> ChecklistItem {
    ChecklistItem {
        id: id.to_string(),
        text: text.to_string(),
        done: false,
        actions: Vec::new(),
    }
}

fn item_with_link(id: &str, text: &str, url: &str) -> ChecklistItem {
    ChecklistItem {
        actions: vec![ChecklistAction {
            kind: "link".to_string(),
            url: url.to_string(),
        }],
        ..item(id, text)
    }
}

/// The checklist groups seeded on first run.
pub fn default_checklists() -> Vec<ChecklistGroup> {
    vec![
        ChecklistGroup {
            id: "setup".to_string(),
            title: "Configuração de Contas".to_string(),
            items: vec![
                item_with_link(
                    "g_account",
                    "Criar conta Google & canal YouTube",
                    "https://www.youtube.com/create_channel",
                ),
                item_with_link(
                    "tiktok_acc",
                    "Criar conta TikTok com mesmo nome",
                    "https://www.tiktok.com/signup",
                ),
                item("profile_img", "Imagem de perfil 800x800 exportada"),
                item("banner", "Banner YouTube (2560x1440) com safe area"),
                item("bio", "Bios escritas com CTA e links"),
            ],
        },
        ChecklistGroup {
            id: "production".to_string(),
            title: "Pipeline de Produção".to_string(),
            items: vec![
                item("clips_ready", "10 cortes prontos (edição + legendas)"),
                item("thumbs", "Templates de thumbnail prontos (Canva)"),
                item("uploads_sched", "Uploads agendados (YouTube + TikTok)"),
                item("zapier", "Zapier/Make > Airtable > upload flow configurado"),
            ],
        },
        ChecklistGroup {
            id: "monetize".to_string(),
            title: "Monetização & Crescimento".to_string(),
            items: vec![
                item(
                    "ypp_check",
                    "Monitorar requisitos YPP (inscritos + horas/shorts views)",
                ),
                item("partner", "Criar outreach para parcerias/TikTok Marketplace"),
            ],
        },
    ]
}

// ============================================================================
// Upload queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "YouTube Shorts")]
    YouTubeShorts,
    #[serde(rename = "TikTok")]
    TikTok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTubeShorts => "YouTube Shorts",
            Platform::TikTok => "TikTok",
        }
    }
}

/// Queue item lifecycle: ready -> uploading -> done | error, error -> uploading.
///
/// `done` is terminal. Older documents used `success` for the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Ready,
    Uploading,
    #[serde(alias = "success")]
    Done,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Ready => "ready",
            QueueStatus::Uploading => "uploading",
            QueueStatus::Done => "done",
            QueueStatus::Error => "error",
        }
    }

    /// Whether an upload may start from this status.
    pub fn can_start_upload(&self) -> bool {
        matches!(self, QueueStatus::Ready | QueueStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Private,
    Unlisted,
    Public,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Private => "private",
            PrivacyStatus::Unlisted => "unlisted",
            PrivacyStatus::Public => "public",
        }
    }
}

/// A video file on the server's disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: String,
    pub platform: Platform,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Platform-native scheduled publish time.
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub privacy_status: Option<PrivacyStatus>,
    pub status: QueueStatus,
    #[serde(default)]
    pub file: Option<MediaFile>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for adding a queue item. Only `title` is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQueueItem {
    pub title: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub platform: Option<Platform>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub publish_at: Option<DateTime<Utc>>,
    pub privacy_status: Option<PrivacyStatus>,
    pub file: Option<MediaFile>,
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryDay {
    pub completed_items: Vec<CompletedItem>,
    pub uploaded_videos: Vec<UploadedVideo>,
    /// Always `uploaded_videos.len()`; kept for the calendar view.
    pub uploads: usize,
}

impl HistoryDay {
    pub fn recount(&mut self) {
        self.uploads = self.uploaded_videos.len();
    }

    pub fn is_empty(&self) -> bool {
        self.completed_items.is_empty() && self.uploaded_videos.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompletedItem {
    #[serde(rename = "checklist")]
    Checklist { id: String },
    #[serde(rename = "youtube_video", rename_all = "camelCase")]
    PublishedVideo {
        id: String,
        title: String,
        url: String,
        #[serde(default)]
        thumbnail_url: Option<String>,
    },
}

impl CompletedItem {
    pub fn id(&self) -> &str {
        match self {
            CompletedItem::Checklist { id } => id,
            CompletedItem::PublishedVideo { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedVideo {
    pub id: String,
    pub title: String,
    pub platform: Platform,
    #[serde(default)]
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Channel data
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelStats {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub custom_url: Option<String>,
    pub published_at: Option<String>,
    pub thumbnails: Thumbnails,
    pub statistics: ChannelStatistics,
    pub banner_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thumbnails {
    pub default: Option<String>,
    pub medium: Option<String>,
    pub high: Option<String>,
}

impl Thumbnails {
    /// Largest available thumbnail.
    pub fn best(&self) -> Option<&str> {
        self.high
            .as_deref()
            .or(self.medium.as_deref())
            .or(self.default.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelStatistics {
    pub view_count: u64,
    pub subscriber_count: u64,
    pub video_count: u64,
    pub hidden_subscriber_count: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub url: String,
    #[serde(default)]
    pub channel_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelAnalytics {
    pub rows: Vec<DailyMetric>,
    pub total_views: u64,
    pub total_watch_minutes: u64,
    pub subscribers_gained: i64,
}

impl ChannelAnalytics {
    pub fn from_rows(rows: Vec<DailyMetric>) -> Self {
        Self {
            total_views: rows.iter().map(|r| r.views).sum(),
            total_watch_minutes: rows.iter().map(|r| r.watch_minutes).sum(),
            subscribers_gained: rows.iter().map(|r| r.subscribers_gained).sum(),
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub views: u64,
    pub watch_minutes: u64,
    pub subscribers_gained: i64,
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthState {
    pub youtube_token: Option<String>,
    pub youtube_token_expires_at: Option<DateTime<Utc>>,
    pub active_account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub token: String,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
}

/// OAuth implicit-flow token as handed over by the browser.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, timestamp: DateTime<Utc>) -> Self {
        Self { data, timestamp }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.timestamp < ttl
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cache {
    pub channel_stats: Option<CacheEntry<ChannelStats>>,
    pub videos: Option<CacheEntry<Vec<Video>>>,
    pub suggestions: Option<CacheEntry<Vec<Video>>>,
    pub analytics: Option<CacheEntry<ChannelAnalytics>>,
}

impl Cache {
    pub fn clear(&mut self) {
        *self = Cache::default();
    }
}

// ============================================================================
// Clip pipeline
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJob {
    pub project_id: String,
    pub status: JobStatus,
    pub original_name: String,
    #[serde(default)]
    pub clips: Vec<Clip>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub title: String,
    pub score: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

// ============================================================================
// Derived views
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub checklist_done: usize,
    pub checklist_total: usize,
    pub today: String,
    pub uploads_today: usize,
    pub daily_goal: u32,
    pub queue_ready: usize,
    pub queue_uploading: usize,
    pub queue_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let state: DashboardState =
            serde_json::from_str(r#"{"settings": {"channelName": "Mine"}, "history": {}}"#)
                .unwrap();

        assert_eq!(state.settings.channel_name, "Mine");
        assert_eq!(state.settings.daily_goal, 4);
        assert_eq!(state.settings.timezone, "America/Manaus");
        assert_eq!(state.checklists.len(), 3);
        assert!(state.upload_queue.is_empty());
        assert!(!state.quota_exceeded);
    }

    #[test]
    fn queue_items_from_older_documents_still_load() {
        let state: DashboardState = serde_json::from_str(
            r#"{"uploadQueue": [{
                "id": "q1",
                "title": "Old item",
                "source": "manual",
                "platform": "TikTok",
                "status": "success"
            }]}"#,
        )
        .unwrap();

        let item = &state.upload_queue[0];
        assert_eq!(item.status, QueueStatus::Done);
        assert!(item.created_at <= Utc::now());
        assert!(item.file.is_none());
    }

    #[test]
    fn quota_flag_covers_every_area() {
        let mut state = DashboardState::default();
        state.set_channel_quota(true);
        state.set_analytics_quota(false);
        assert!(state.quota_exceeded);

        state.set_channel_quota(false);
        assert!(!state.quota_exceeded);
    }

    #[test]
    fn success_status_is_read_as_done() {
        let status: QueueStatus = serde_json::from_str(r#""success""#).unwrap();
        assert_eq!(status, QueueStatus::Done);
        assert_eq!(serde_json::to_string(&status).unwrap(), r#""done""#);
    }

    #[test]
    fn completed_items_are_tagged_by_type() {
        let items = vec![
            CompletedItem::Checklist {
                id: "bio".to_string(),
            },
            CompletedItem::PublishedVideo {
                id: "v1".to_string(),
                title: "Dog".to_string(),
                url: "https://youtube.com/watch?v=v1".to_string(),
                thumbnail_url: None,
            },
        ];
        let json = serde_json::to_value(&items).unwrap();
        assert_eq!(json[0]["type"], "checklist");
        assert_eq!(json[1]["type"], "youtube_video");
        assert_eq!(json[1]["url"], "https://youtube.com/watch?v=v1");
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let settings = Settings {
            timezone: "Mars/Olympus".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.tz(), chrono_tz::UTC);
        assert_eq!(Settings::default().tz(), chrono_tz::America::Manaus);
    }

    #[test]
    fn cache_freshness_window() {
        let now = Utc::now();
        let entry = CacheEntry::new((), now - Duration::minutes(59));
        assert!(entry.is_fresh(now, Duration::hours(1)));

        let entry = CacheEntry::new((), now - Duration::minutes(60));
        assert!(!entry.is_fresh(now, Duration::hours(1)));
    }
}
