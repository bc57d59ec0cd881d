use std::env;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub youtube: YouTubeConfig,
    pub opus: OpusConfig,
    pub dashboard: DashboardConfig,
    pub email: EmailConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    /// Public URL used when building links in outgoing emails (verification, password reset).
    pub app_url: String,
    /// Whether to set the `Secure` flag on the session cookie.
    /// If `None`, inferred from `frontend_url` (`https` -> true).
    /// Read from env var `COOKIE_SECURE` (accepted values: "true"/"false", "1"/"0", "yes"/"no").
    pub cookie_secure: Option<bool>,
    /// Emails allowed to call the admin endpoints.
    pub admin_emails: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub session_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YouTubeConfig {
    pub api_url: String,
    pub upload_url: String,
    pub analytics_url: String,
    pub client_id: Option<String>,
    /// Sentinel credential that routes every call to canned data.
    pub mock_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpusConfig {
    pub api_url: String,
    /// Fallback key used when the dashboard settings carry none.
    pub api_key: Option<String>,
    pub mock_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Key the state document is stored under.
    pub state_key: String,
    /// How often (seconds) the scheduled-upload poller runs.
    pub poll_interval_seconds: u64,
    /// Freshness window (seconds) for cached external data.
    pub cache_ttl_seconds: i64,
    /// Simulated latency (milliseconds) for mock client responses.
    pub mock_latency_ms: u64,
    /// Probability that a simulated upload succeeds.
    pub mock_upload_success_rate: f64,
    /// Directory that queued and clipped video files must live under.
    pub upload_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Resend API key. Without it, outgoing emails are only logged.
    pub resend_api_key: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for auth endpoints (e.g. /api/auth/sign-in)
    pub auth_per_second: u32,
    /// Burst size for auth endpoints
    pub auth_burst: u32,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> Option<bool> {
    match env::var(key) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        Err(_) => None,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let success_rate: f64 = env_or(
            "MOCK_UPLOAD_SUCCESS_RATE",
            defaults.dashboard.mock_upload_success_rate,
        );
        if !(0.0..=1.0).contains(&success_rate) {
            return Err(ConfigError::InvalidValue(
                "MOCK_UPLOAD_SUCCESS_RATE".to_string(),
            ));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.server.frontend_url),
                app_url: env::var("APP_URL").unwrap_or(defaults.server.app_url),
                cookie_secure: env_flag("COOKIE_SECURE"),
                admin_emails: env::var("ADMIN_EMAILS")
                    .map(|v| {
                        v.split(',')
                            .map(|e| e.trim().to_lowercase())
                            .filter(|e| !e.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
                session_ttl_days: env_or("SESSION_TTL_DAYS", 30),
            },
            youtube: YouTubeConfig {
                api_url: env::var("YOUTUBE_API_URL").unwrap_or(defaults.youtube.api_url),
                upload_url: env::var("YOUTUBE_UPLOAD_URL").unwrap_or(defaults.youtube.upload_url),
                analytics_url: env::var("YOUTUBE_ANALYTICS_URL")
                    .unwrap_or(defaults.youtube.analytics_url),
                client_id: env::var("GOOGLE_CLIENT_ID").ok(),
                mock_token: env::var("MOCK_TOKEN").unwrap_or(defaults.youtube.mock_token),
            },
            opus: OpusConfig {
                api_url: env::var("OPUS_API_URL").unwrap_or(defaults.opus.api_url),
                api_key: env::var("OPUS_API_KEY").ok().filter(|k| !k.is_empty()),
                mock_key: defaults.opus.mock_key,
            },
            dashboard: DashboardConfig {
                state_key: env::var("DASHBOARD_STATE_KEY")
                    .unwrap_or(defaults.dashboard.state_key),
                poll_interval_seconds: env_or("SCHEDULER_POLL_INTERVAL_SECONDS", 30u64),
                cache_ttl_seconds: env_or("CACHE_TTL_SECONDS", 3600i64),
                mock_latency_ms: env_or("MOCK_LATENCY_MS", defaults.dashboard.mock_latency_ms),
                mock_upload_success_rate: success_rate,
                upload_dir: env::var("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.dashboard.upload_dir),
            },
            email: EmailConfig {
                resend_api_key: env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty()),
                from: env::var("EMAIL_FROM").unwrap_or(defaults.email.from),
            },
            rate_limit: RateLimitConfig {
                auth_per_second: env_or("RATE_LIMIT_AUTH_PER_SECOND", 3),
                auth_burst: env_or("RATE_LIMIT_AUTH_BURST", 10),
            },
        })
    }

    /// Whether the session cookie should carry the `Secure` flag.
    pub fn cookie_secure(&self) -> bool {
        self.server
            .cookie_secure
            .unwrap_or_else(|| self.server.frontend_url.starts_with("https://"))
    }

    pub fn is_admin(&self, email: &str) -> bool {
        let email = email.to_lowercase();
        self.server.admin_emails.iter().any(|e| *e == email)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                frontend_url: "http://localhost:5173".to_string(),
                app_url: "http://localhost:5173".to_string(),
                cookie_secure: None,
                admin_emails: Vec::new(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/viralcuts.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
                session_ttl_days: 30,
            },
            youtube: YouTubeConfig {
                api_url: "https://www.googleapis.com/youtube/v3".to_string(),
                upload_url: "https://www.googleapis.com/upload/youtube/v3/videos".to_string(),
                analytics_url: "https://youtubeanalytics.googleapis.com/v2/reports".to_string(),
                client_id: None,
                mock_token: "MOCK_TOKEN".to_string(),
            },
            opus: OpusConfig {
                api_url: "https://api.opus.pro/api".to_string(),
                api_key: None,
                mock_key: "MOCK_KEY".to_string(),
            },
            dashboard: DashboardConfig {
                state_key: "viralcuts_workflow_v1".to_string(),
                poll_interval_seconds: 30,
                cache_ttl_seconds: 3600,
                mock_latency_ms: 1500,
                mock_upload_success_rate: 0.9,
                upload_dir: PathBuf::from("data/uploads"),
            },
            email: EmailConfig {
                resend_api_key: None,
                from: "ViralCuts <noreply@viralcuts.com>".to_string(),
            },
            rate_limit: RateLimitConfig {
                auth_per_second: 3,
                auth_burst: 10,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_secure_is_inferred_from_frontend_scheme() {
        let mut config = Config::default();
        assert!(!config.cookie_secure());

        config.server.frontend_url = "https://viralcuts.app".to_string();
        assert!(config.cookie_secure());

        config.server.cookie_secure = Some(false);
        assert!(!config.cookie_secure());
    }

    #[test]
    fn admin_check_ignores_case() {
        let mut config = Config::default();
        config.server.admin_emails = vec!["owner@viralcuts.com".to_string()];
        assert!(config.is_admin("Owner@ViralCuts.com"));
        assert!(!config.is_admin("someone@else.com"));
    }
}
