use async_trait::async_trait;
use sqlx::SqlitePool;

use super::model::DashboardState;
use crate::db::repository::KvRepository;
use crate::error::AppResult;

/// Durable storage for the dashboard document.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the stored state. Missing or unreadable documents yield defaults.
    async fn load(&self) -> DashboardState;

    /// Persist a snapshot. Returns `false` when a newer revision is already stored.
    async fn save(&self, state: &DashboardState) -> AppResult<bool>;
}

/// Stores the dashboard as a JSON blob in the `kv_store` table.
pub struct SqliteStateStore {
    pool: SqlitePool,
    key: String,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self) -> DashboardState {
        let doc = match KvRepository::get(&self.pool, &self.key).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                tracing::info!("No stored dashboard state under '{}', using defaults", self.key);
                return DashboardState::default();
            }
            Err(e) => {
                tracing::error!("Failed to read dashboard state: {:?}", e);
                return DashboardState::default();
            }
        };

        match serde_json::from_str::<DashboardState>(&doc.value) {
            Ok(mut state) => {
                // The row revision is authoritative.
                state.revision = state.revision.max(doc.revision);
                state
            }
            Err(e) => {
                tracing::warn!(
                    "Stored dashboard state is malformed, falling back to defaults: {}",
                    e
                );
                DashboardState {
                    revision: doc.revision,
                    ..DashboardState::default()
                }
            }
        }
    }

    async fn save(&self, state: &DashboardState) -> AppResult<bool> {
        let value = serde_json::to_string(state).map_err(anyhow::Error::from)?;
        let written =
            KvRepository::put_if_newer(&self.pool, &self.key, &value, state.revision).await?;

        if !written {
            tracing::debug!(
                "Skipped stale dashboard write at revision {}",
                state.revision
            );
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::init::test_pool;

    #[tokio::test]
    async fn empty_store_loads_defaults() {
        let store = SqliteStateStore::new(test_pool().await, "dashboard");
        let state = store.load().await;
        assert_eq!(state.revision, 0);
        assert_eq!(state.settings.daily_goal, 4);
    }

    #[tokio::test]
    async fn malformed_document_loads_defaults_without_losing_revision() {
        let pool = test_pool().await;
        KvRepository::put_if_newer(&pool, "dashboard", "{not json", 7)
            .await
            .unwrap();

        let store = SqliteStateStore::new(pool, "dashboard");
        let state = store.load().await;
        assert_eq!(state.revision, 7);
        assert_eq!(state.checklists.len(), 3);
    }

    #[tokio::test]
    async fn saved_state_is_loaded_back_and_stale_writes_are_skipped() {
        let store = SqliteStateStore::new(test_pool().await, "dashboard");

        let mut state = DashboardState::default();
        state.revision = 2;
        state.settings.channel_name = "Newer".to_string();
        assert!(store.save(&state).await.unwrap());

        let mut stale = DashboardState::default();
        stale.revision = 1;
        stale.settings.channel_name = "Older".to_string();
        assert!(!store.save(&stale).await.unwrap());

        let loaded = store.load().await;
        assert_eq!(loaded.revision, 2);
        assert_eq!(loaded.settings.channel_name, "Newer");
    }
}
