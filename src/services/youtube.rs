use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;

use crate::config::Config;
use crate::dashboard::model::{
    ChannelAnalytics, ChannelStatistics, ChannelStats, DailyMetric, Thumbnails, Video,
};
use crate::error::{AppError, AppResult};

const PROVIDER: &str = "YouTube";

/// Read access to a creator's channel.
///
/// A `None` token, or the configured mock token, yields canned data so the
/// dashboard works before any account is connected.
#[async_trait]
pub trait ChannelApi: Send + Sync {
    async fn fetch_channel_details(&self, token: Option<&str>) -> AppResult<Option<ChannelStats>>;

    async fn fetch_channel_videos(&self, token: Option<&str>, max_results: u32)
        -> AppResult<Vec<Video>>;

    async fn fetch_channel_analytics(&self, token: Option<&str>) -> AppResult<ChannelAnalytics>;

    async fn search_videos(&self, token: Option<&str>, query: &str) -> AppResult<Vec<Video>>;
}

#[derive(Debug, Clone)]
pub struct YouTubeService {
    client: Client,
    api_url: String,
    analytics_url: String,
    mock_token: String,
    mock_latency: StdDuration,
}

// ============================================================================
// Provider Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    id: Option<String>,
    snippet: Option<ChannelSnippet>,
    statistics: Option<RawStatistics>,
    branding_settings: Option<BrandingSettings>,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    description: String,
    custom_url: Option<String>,
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: RawThumbnails,
}

/// YouTube reports counters as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatistics {
    view_count: Option<String>,
    subscriber_count: Option<String>,
    video_count: Option<String>,
    #[serde(default)]
    hidden_subscriber_count: bool,
}

#[derive(Debug, Deserialize)]
struct BrandingSettings {
    image: Option<BrandingImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrandingImage {
    banner_external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawThumbnails {
    default: Option<RawThumbnail>,
    medium: Option<RawThumbnail>,
    high: Option<RawThumbnail>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: String,
}

impl From<RawThumbnails> for Thumbnails {
    fn from(raw: RawThumbnails) -> Self {
        Thumbnails {
            default: raw.default.map(|t| t.url),
            medium: raw.medium.map(|t| t.url),
            high: raw.high.map(|t| t.url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: RawThumbnails,
    channel_title: Option<String>,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: SearchResultId,
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    title: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: RawThumbnails,
    channel_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

// ============================================================================
// Normalization
// ============================================================================

fn parse_count(raw: Option<String>, field: &str) -> AppResult<u64> {
    match raw {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| AppError::malformed(PROVIDER, format!("{} is not a number: {}", field, v))),
    }
}

fn normalize_channel(resource: ChannelResource) -> AppResult<ChannelStats> {
    let snippet = resource
        .snippet
        .ok_or_else(|| AppError::malformed(PROVIDER, "channel without snippet"))?;

    let statistics = match resource.statistics {
        Some(raw) => ChannelStatistics {
            view_count: parse_count(raw.view_count, "viewCount")?,
            subscriber_count: parse_count(raw.subscriber_count, "subscriberCount")?,
            video_count: parse_count(raw.video_count, "videoCount")?,
            hidden_subscriber_count: raw.hidden_subscriber_count,
        },
        None => ChannelStatistics::default(),
    };

    Ok(ChannelStats {
        id: resource.id,
        title: snippet.title,
        description: snippet.description,
        custom_url: snippet.custom_url,
        published_at: snippet.published_at,
        thumbnails: snippet.thumbnails.into(),
        statistics,
        banner_url: resource
            .branding_settings
            .and_then(|b| b.image)
            .and_then(|i| i.banner_external_url),
    })
}

fn watch_url(video_id: &str) -> String {
    format!("https://youtube.com/watch?v={}", video_id)
}

fn normalize_playlist_item(item: PlaylistItem) -> Video {
    let snippet = item.snippet;
    let thumbnails: Thumbnails = snippet.thumbnails.into();
    Video {
        url: watch_url(&snippet.resource_id.video_id),
        id: snippet.resource_id.video_id,
        title: snippet.title,
        published_at: snippet.published_at,
        thumbnail_url: thumbnails.best().map(str::to_string),
        channel_title: snippet.channel_title,
    }
}

fn normalize_search_result(result: SearchResult) -> Option<Video> {
    // channels and playlists can show up in search results; only videos carry an id here
    let video_id = result.id.video_id?;
    let thumbnails: Thumbnails = result.snippet.thumbnails.into();
    Some(Video {
        url: watch_url(&video_id),
        id: video_id,
        title: result.snippet.title,
        published_at: result.snippet.published_at,
        thumbnail_url: thumbnails.best().map(str::to_string),
        channel_title: result.snippet.channel_title,
    })
}

fn normalize_report_row(row: &[serde_json::Value]) -> AppResult<DailyMetric> {
    let malformed = || AppError::malformed(PROVIDER, format!("unexpected report row: {:?}", row));

    let date = row
        .first()
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or_else(malformed)?;

    Ok(DailyMetric {
        date,
        views: row.get(1).and_then(|v| v.as_u64()).ok_or_else(malformed)?,
        watch_minutes: row.get(2).and_then(|v| v.as_u64()).ok_or_else(malformed)?,
        subscribers_gained: row.get(3).and_then(|v| v.as_i64()).ok_or_else(malformed)?,
    })
}

// ============================================================================
// Mock Data
// ============================================================================

pub const MOCK_CHANNEL_TITLE: &str = "Canal de Teste (Mock)";

pub fn mock_channel_details() -> ChannelStats {
    let avatar = "https://api.dicebear.com/7.x/avataaars/svg?seed=Felix".to_string();
    ChannelStats {
        id: Some("mock_channel".to_string()),
        title: MOCK_CHANNEL_TITLE.to_string(),
        description: "Canal simulado para desenvolvimento. Conecte sua conta do YouTube para ver os dados reais.".to_string(),
        custom_url: Some("@teste_mock".to_string()),
        published_at: Some("2023-01-15T10:00:00Z".to_string()),
        thumbnails: Thumbnails {
            default: Some(avatar.clone()),
            medium: Some(avatar.clone()),
            high: Some(avatar),
        },
        statistics: ChannelStatistics {
            view_count: 15430,
            subscriber_count: 1250,
            video_count: 42,
            hidden_subscriber_count: false,
        },
        banner_url: Some("https://picsum.photos/seed/viralcuts/2560/1440".to_string()),
    }
}

pub fn mock_channel_videos(now: DateTime<Utc>) -> Vec<Video> {
    vec![
        Video {
            id: "mock_video_1".to_string(),
            title: "Cachorro salva dono - Viral Short".to_string(),
            published_at: now - Duration::days(1),
            thumbnail_url: Some("https://picsum.photos/seed/video1/320/180".to_string()),
            url: "https://youtube.com/shorts/mock1".to_string(),
            channel_title: Some(MOCK_CHANNEL_TITLE.to_string()),
        },
        Video {
            id: "mock_video_2".to_string(),
            title: "Gato fazendo truques incríveis".to_string(),
            published_at: now - Duration::days(2),
            thumbnail_url: Some("https://picsum.photos/seed/video2/320/180".to_string()),
            url: "https://youtube.com/shorts/mock2".to_string(),
            channel_title: Some(MOCK_CHANNEL_TITLE.to_string()),
        },
    ]
}

pub fn mock_search_results(query: &str, now: DateTime<Utc>) -> Vec<Video> {
    (1..=4)
        .map(|n| Video {
            id: format!("mock_search_{}", n),
            title: format!("{} #{}", query, n),
            published_at: now - Duration::days(n),
            thumbnail_url: Some(format!("https://picsum.photos/seed/search{}/320/180", n)),
            url: format!("https://youtube.com/shorts/mock_search_{}", n),
            channel_title: Some("Canal Viral".to_string()),
        })
        .collect()
}

/// 28 days of plausible daily metrics ending at `today`.
pub fn mock_channel_analytics(today: NaiveDate) -> ChannelAnalytics {
    let mut rng = rand::thread_rng();
    let rows = (0..28)
        .rev()
        .map(|days_ago| DailyMetric {
            date: today - Duration::days(days_ago),
            views: rng.gen_range(200..2000),
            watch_minutes: rng.gen_range(100..900),
            subscribers_gained: rng.gen_range(0..25),
        })
        .collect();
    ChannelAnalytics::from_rows(rows)
}

// ============================================================================
// Service
// ============================================================================

impl YouTubeService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_url: config.youtube.api_url.trim_end_matches('/').to_string(),
            analytics_url: config.youtube.analytics_url.clone(),
            mock_token: config.youtube.mock_token.clone(),
            mock_latency: StdDuration::from_millis(config.dashboard.mock_latency_ms),
        })
    }

    fn real_token<'a>(&self, token: Option<&'a str>) -> Option<&'a str> {
        token.filter(|t| !t.is_empty() && *t != self.mock_token)
    }

    async fn simulate_latency(&self) {
        if !self.mock_latency.is_zero() {
            tokio::time::sleep(self.mock_latency).await;
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::YouTubeApi(format!("{}: {}", status, error_text)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::malformed(PROVIDER, e.to_string()))
    }

    async fn uploads_playlist_id(&self, token: &str) -> AppResult<Option<String>> {
        let url = format!("{}/channels", self.api_url);
        let channels: ListResponse<ChannelResource> = self
            .get_json(&url, token, &[("part", "contentDetails"), ("mine", "true")])
            .await?;

        Ok(channels
            .items
            .into_iter()
            .next()
            .and_then(|c| c.content_details)
            .map(|d| d.related_playlists.uploads))
    }
}

#[async_trait]
impl ChannelApi for YouTubeService {
    async fn fetch_channel_details(&self, token: Option<&str>) -> AppResult<Option<ChannelStats>> {
        let Some(token) = self.real_token(token) else {
            tracing::debug!("Serving mock channel details");
            self.simulate_latency().await;
            return Ok(Some(mock_channel_details()));
        };

        let url = format!("{}/channels", self.api_url);
        let channels: ListResponse<ChannelResource> = self
            .get_json(
                &url,
                token,
                &[("part", "snippet,statistics,brandingSettings"), ("mine", "true")],
            )
            .await?;

        match channels.items.into_iter().next() {
            Some(resource) => normalize_channel(resource).map(Some),
            None => {
                tracing::warn!("Token has no YouTube channel attached");
                Ok(None)
            }
        }
    }

    async fn fetch_channel_videos(
        &self,
        token: Option<&str>,
        max_results: u32,
    ) -> AppResult<Vec<Video>> {
        let Some(token) = self.real_token(token) else {
            self.simulate_latency().await;
            return Ok(mock_channel_videos(Utc::now()));
        };

        let Some(playlist_id) = self.uploads_playlist_id(token).await? else {
            tracing::warn!("No uploads playlist found for channel");
            return Ok(Vec::new());
        };

        let url = format!("{}/playlistItems", self.api_url);
        let max_results = max_results.clamp(1, 50).to_string();
        let items: ListResponse<PlaylistItem> = self
            .get_json(
                &url,
                token,
                &[
                    ("part", "snippet"),
                    ("playlistId", playlist_id.as_str()),
                    ("maxResults", max_results.as_str()),
                ],
            )
            .await?;

        tracing::debug!("Fetched {} channel videos", items.items.len());
        Ok(items.items.into_iter().map(normalize_playlist_item).collect())
    }

    async fn fetch_channel_analytics(&self, token: Option<&str>) -> AppResult<ChannelAnalytics> {
        let today = Utc::now().date_naive();

        let Some(token) = self.real_token(token) else {
            self.simulate_latency().await;
            return Ok(mock_channel_analytics(today));
        };

        let start = (today - Duration::days(27)).format("%Y-%m-%d").to_string();
        let end = today.format("%Y-%m-%d").to_string();
        let report: ReportResponse = self
            .get_json(
                &self.analytics_url,
                token,
                &[
                    ("ids", "channel==MINE"),
                    ("startDate", start.as_str()),
                    ("endDate", end.as_str()),
                    ("metrics", "views,estimatedMinutesWatched,subscribersGained"),
                    ("dimensions", "day"),
                    ("sort", "day"),
                ],
            )
            .await?;

        let rows = report
            .rows
            .iter()
            .map(|row| normalize_report_row(row))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(ChannelAnalytics::from_rows(rows))
    }

    async fn search_videos(&self, token: Option<&str>, query: &str) -> AppResult<Vec<Video>> {
        let Some(token) = self.real_token(token) else {
            self.simulate_latency().await;
            return Ok(mock_search_results(query, Utc::now()));
        };

        let url = format!("{}/search", self.api_url);
        let results: ListResponse<SearchResult> = self
            .get_json(
                &url,
                token,
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("videoDuration", "short"),
                    ("order", "viewCount"),
                    ("maxResults", "12"),
                    ("q", query),
                ],
            )
            .await?;

        Ok(results
            .items
            .into_iter()
            .filter_map(normalize_search_result)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> YouTubeService {
        let mut config = Config::default();
        config.dashboard.mock_latency_ms = 0;
        YouTubeService::new(&config).unwrap()
    }

    #[tokio::test]
    async fn missing_or_mock_token_serves_mock_data() {
        let yt = service();

        let details = yt.fetch_channel_details(None).await.unwrap().unwrap();
        assert_eq!(details.title, MOCK_CHANNEL_TITLE);

        let details = yt
            .fetch_channel_details(Some("MOCK_TOKEN"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.statistics.subscriber_count, 1250);

        let videos = yt.fetch_channel_videos(Some(""), 10).await.unwrap();
        assert_eq!(videos.len(), 2);

        let found = yt.search_videos(None, "gatos").await.unwrap();
        assert!(found.iter().all(|v| v.title.starts_with("gatos")));
    }

    #[test]
    fn channel_payload_is_normalized() {
        let raw = serde_json::json!({
            "items": [{
                "id": "UC123",
                "snippet": {
                    "title": "Pets BR",
                    "description": "cortes",
                    "customUrl": "@petsbr",
                    "publishedAt": "2021-05-01T00:00:00Z",
                    "thumbnails": { "default": { "url": "d.jpg" }, "high": { "url": "h.jpg" } }
                },
                "statistics": {
                    "viewCount": "1000",
                    "subscriberCount": "50",
                    "videoCount": "7",
                    "hiddenSubscriberCount": false
                },
                "brandingSettings": { "image": { "bannerExternalUrl": "banner.jpg" } }
            }]
        });
        let list: ListResponse<ChannelResource> = serde_json::from_value(raw).unwrap();
        let stats = normalize_channel(list.items.into_iter().next().unwrap()).unwrap();

        assert_eq!(stats.id.as_deref(), Some("UC123"));
        assert_eq!(stats.statistics.view_count, 1000);
        assert_eq!(stats.thumbnails.best(), Some("h.jpg"));
        assert_eq!(stats.banner_url.as_deref(), Some("banner.jpg"));
    }

    #[test]
    fn non_numeric_counters_are_malformed() {
        let resource = ChannelResource {
            id: None,
            snippet: Some(ChannelSnippet {
                title: "x".to_string(),
                description: String::new(),
                custom_url: None,
                published_at: None,
                thumbnails: RawThumbnails::default(),
            }),
            statistics: Some(RawStatistics {
                view_count: Some("lots".to_string()),
                subscriber_count: None,
                video_count: None,
                hidden_subscriber_count: false,
            }),
            branding_settings: None,
            content_details: None,
        };

        assert!(matches!(
            normalize_channel(resource),
            Err(AppError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn search_results_without_video_id_are_skipped() {
        let raw = serde_json::json!({
            "items": [
                { "id": { "channelId": "UC1" }, "snippet": { "title": "chan", "publishedAt": "2024-01-01T00:00:00Z" } },
                { "id": { "videoId": "abc" }, "snippet": { "title": "clip", "publishedAt": "2024-01-02T00:00:00Z" } }
            ]
        });
        let list: ListResponse<SearchResult> = serde_json::from_value(raw).unwrap();
        let videos: Vec<Video> = list.items.into_iter().filter_map(normalize_search_result).collect();

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].url, "https://youtube.com/watch?v=abc");
    }

    #[test]
    fn report_rows_are_summed() {
        let rows = vec![
            vec![serde_json::json!("2024-03-01"), 10.into(), 4.into(), 1.into()],
            vec![serde_json::json!("2024-03-02"), 5.into(), 2.into(), (-1).into()],
        ];
        let metrics = rows
            .iter()
            .map(|r| normalize_report_row(r))
            .collect::<AppResult<Vec<_>>>()
            .unwrap();
        let analytics = ChannelAnalytics::from_rows(metrics);

        assert_eq!(analytics.total_views, 15);
        assert_eq!(analytics.total_watch_minutes, 6);
        assert_eq!(analytics.subscribers_gained, 0);

        assert!(normalize_report_row(&[serde_json::json!("nope")]).is_err());
    }

    #[test]
    fn mock_analytics_covers_four_weeks() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 28).unwrap();
        let analytics = mock_channel_analytics(today);
        assert_eq!(analytics.rows.len(), 28);
        assert_eq!(analytics.rows.last().unwrap().date, today);
    }
}
