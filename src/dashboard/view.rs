//! What the browser gets to see of the dashboard state.
//!
//! OAuth tokens and API keys stay in the persisted document and are never
//! serialized into a response.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::model::{
    ChannelAnalytics, ChannelStats, ChecklistGroup, ConnectedAccount, DashboardState, HistoryDay,
    PipelineJob, QuotaFlags, QueueItem, Settings, Video,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    #[serde(flatten)]
    pub settings: Settings,
    pub opus_api_key_set: bool,
}

impl From<Settings> for SettingsView {
    fn from(mut settings: Settings) -> Self {
        let opus_api_key_set = settings.opus_api_key.take().is_some();
        Self {
            settings,
            opus_api_key_set,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
    pub active: bool,
}

impl AccountView {
    pub fn new(account: ConnectedAccount, active: bool) -> Self {
        Self {
            id: account.id,
            name: account.name,
            avatar: account.avatar,
            token_expires_at: account.token_expires_at,
            connected_at: account.connected_at,
            active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthView {
    /// A YouTube token is stored.
    pub connected: bool,
    pub youtube_token_expires_at: Option<DateTime<Utc>>,
    pub active_account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub revision: i64,
    pub settings: SettingsView,
    pub checklists: Vec<ChecklistGroup>,
    pub upload_queue: Vec<QueueItem>,
    pub history: BTreeMap<String, HistoryDay>,
    pub auth: AuthView,
    pub accounts: Vec<AccountView>,
    pub channel_stats: Option<ChannelStats>,
    pub recent_uploads: Vec<Video>,
    pub suggestions: Vec<Video>,
    pub analytics: Option<ChannelAnalytics>,
    pub pipeline: Vec<PipelineJob>,
    pub quota_exceeded: bool,
    pub quota: QuotaFlags,
}

impl From<DashboardState> for StateView {
    fn from(state: DashboardState) -> Self {
        let active_id = state.active_account().map(|a| a.id.clone());
        let accounts = state
            .accounts
            .into_iter()
            .map(|account| {
                let active = active_id.as_deref() == Some(account.id.as_str());
                AccountView::new(account, active)
            })
            .collect();

        Self {
            revision: state.revision,
            settings: state.settings.into(),
            checklists: state.checklists,
            upload_queue: state.upload_queue,
            history: state.history,
            auth: AuthView {
                connected: state.auth.youtube_token.is_some(),
                youtube_token_expires_at: state.auth.youtube_token_expires_at,
                active_account_id: state.auth.active_account_id,
            },
            accounts,
            channel_stats: state.channel_stats,
            recent_uploads: state.recent_uploads,
            suggestions: state.suggestions,
            analytics: state.analytics,
            pipeline: state.pipeline,
            quota_exceeded: state.quota_exceeded,
            quota: state.quota,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_never_reach_the_view() {
        let now = Utc::now();
        let mut state = DashboardState::default();
        state.settings.opus_api_key = Some("opus-secret".to_string());
        state.auth.youtube_token = Some("oauth-secret".to_string());
        state.auth.active_account_id = Some("UC1".to_string());
        state.accounts = vec![
            ConnectedAccount {
                id: "UC1".to_string(),
                name: "Pets".to_string(),
                avatar: None,
                token: "oauth-secret".to_string(),
                token_expires_at: None,
                connected_at: now,
            },
            ConnectedAccount {
                id: "UC2".to_string(),
                name: "Gatos".to_string(),
                avatar: None,
                token: "other-secret".to_string(),
                token_expires_at: None,
                connected_at: now,
            },
        ];

        let json = serde_json::to_string(&StateView::from(state)).unwrap();
        assert!(!json.contains("secret"));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["auth"]["connected"], true);
        assert_eq!(value["settings"]["opusApiKeySet"], true);
        assert_eq!(value["settings"]["channelName"], "PetCutsBR");
        assert_eq!(value["accounts"][0]["active"], true);
        assert_eq!(value["accounts"][1]["active"], false);
    }
}
