pub mod admin;
pub mod auth;
pub mod dashboard;
pub mod health;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::response::Response;
    use http_body_util::BodyExt;

    use crate::config::Config;
    use crate::dashboard::{Clients, ControllerOptions, DashboardController, SqliteStateStore};
    use crate::db::{models::CreateUser, UserRepository};
    use crate::services::{
        auth::{AuthService, SESSION_COOKIE},
        email::Mailer,
        init::test_pool,
        opus::OpusService,
        upload::VideoUploader,
        youtube::YouTubeService,
    };
    use crate::AppState;

    pub async fn test_state() -> Arc<AppState> {
        test_state_with(|_| {}).await
    }

    /// App state over an in-memory database with instant, always-successful mocks.
    pub async fn test_state_with(configure: impl FnOnce(&mut Config)) -> Arc<AppState> {
        let mut config = Config::default();
        config.jwt.secret = "test-secret".to_string();
        config.dashboard.mock_latency_ms = 0;
        config.dashboard.mock_upload_success_rate = 1.0;
        config.dashboard.upload_dir = std::env::temp_dir();
        configure(&mut config);

        let pool = test_pool().await;
        let store = Arc::new(SqliteStateStore::new(
            pool.clone(),
            config.dashboard.state_key.clone(),
        ));
        let clients = Clients {
            youtube: Arc::new(YouTubeService::new(&config).unwrap()),
            uploader: Arc::new(VideoUploader::new(&config).unwrap()),
            clips: Arc::new(OpusService::new(&config).unwrap()),
        };
        let dashboard =
            DashboardController::load(store, clients, ControllerOptions::from_config(&config))
                .await;

        Arc::new(AppState {
            db: pool,
            mailer: Mailer::new(&config).unwrap(),
            dashboard: Arc::new(dashboard),
            config,
        })
    }

    pub async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Create a user and return a `Cookie` header value carrying their session.
    pub async fn sign_in_as(state: &AppState, email: &str) -> String {
        let user = UserRepository::create(
            &state.db,
            CreateUser {
                name: "Test".to_string(),
                email: email.to_string(),
                password_hash: AuthService::hash_password("secret123").unwrap(),
            },
        )
        .await
        .unwrap();
        let (_, token) = AuthService::start_session(&state.db, &state.config, &user.id, None, None)
            .await
            .unwrap();
        format!("{}={}", SESSION_COOKIE, token)
    }
}
