use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::models::{CreateSession, Session, User, Verification, VerificationPurpose};
use crate::db::{SessionRepository, UserRepository, VerificationRepository};
use crate::error::{AppError, AppResult};

/// Name of the session cookie; kept compatible with the existing web client.
pub const SESSION_COOKIE: &str = "better-auth.session_token";

pub const MIN_PASSWORD_LEN: usize = 6;

#[cfg(not(test))]
const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

/// Claims of the signed session cookie. `sid` points at a row in `sessions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub sid: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct AuthService;

impl AuthService {
    // ========================================================================
    // Passwords
    // ========================================================================

    pub fn validate_password(password: &str) -> AppResult<()> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }

    /// Normalize an email address, rejecting anything without a local part and a dotted domain.
    pub fn normalize_email(email: &str) -> AppResult<String> {
        let email = email.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.contains('.'),
            None => false,
        };
        if !valid {
            return Err(AppError::Validation("A valid email is required".to_string()));
        }
        Ok(email)
    }

    pub fn hash_password(password: &str) -> AppResult<String> {
        bcrypt::hash(password, BCRYPT_COST).map_err(|e| AppError::Internal(e.into()))
    }

    pub fn verify_password(password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    // ========================================================================
    // Opaque tokens
    // ========================================================================

    /// 32 random bytes, base64url without padding.
    pub fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Only this digest is stored; the raw token travels by email.
    pub fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    // ========================================================================
    // Session JWT
    // ========================================================================

    pub fn create_session_jwt(
        secret: &str,
        user_id: &str,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            iat: Utc::now().timestamp() as usize,
            exp: expires_at.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn decode_session_jwt(secret: &str, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Persist a new session and return it with its signed cookie value.
    pub async fn start_session(
        pool: &SqlitePool,
        config: &Config,
        user_id: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> AppResult<(Session, String)> {
        let expires_at = Utc::now() + Duration::days(config.jwt.session_ttl_days);
        let session = SessionRepository::create(
            pool,
            CreateSession {
                user_id: user_id.to_string(),
                ip_address,
                user_agent,
            },
            expires_at.naive_utc(),
        )
        .await?;

        let token = Self::create_session_jwt(&config.jwt.secret, user_id, &session.id, expires_at)?;
        tracing::debug!("Started session {} for user {}", session.id, user_id);
        Ok((session, token))
    }

    /// Resolve a session cookie to its user. The session row must still exist.
    pub async fn user_from_token(
        pool: &SqlitePool,
        secret: &str,
        token: &str,
    ) -> AppResult<(User, Session)> {
        let claims = Self::decode_session_jwt(secret, token)?;

        let session = SessionRepository::find_active(pool, &claims.sid)
            .await?
            .filter(|s| s.user_id == claims.sub)
            .ok_or(AppError::Unauthorized)?;

        let user = UserRepository::find_by_id(pool, &claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok((user, session))
    }

    // ========================================================================
    // Verification tokens
    // ========================================================================

    /// Replace any outstanding token of this purpose and return a fresh raw token.
    pub async fn issue_verification(
        pool: &SqlitePool,
        email: &str,
        purpose: VerificationPurpose,
        ttl: Duration,
    ) -> AppResult<String> {
        VerificationRepository::delete_for_identifier(pool, email, purpose).await?;

        let token = Self::generate_token();
        let expires_at = (Utc::now() + ttl).naive_utc();
        VerificationRepository::create(pool, email, purpose, &Self::hash_token(&token), expires_at)
            .await?;
        Ok(token)
    }

    /// Consume a token. Unknown, expired or wrong-purpose tokens are a bad request.
    pub async fn redeem_verification(
        pool: &SqlitePool,
        token: &str,
        purpose: VerificationPurpose,
    ) -> AppResult<Verification> {
        let verification =
            VerificationRepository::find_active(pool, &Self::hash_token(token.trim()), purpose)
                .await?
                .ok_or_else(|| AppError::BadRequest("Invalid or expired token".to_string()))?;

        VerificationRepository::delete(pool, &verification.id).await?;
        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CreateUser;
    use crate::services::init::test_pool;

    fn config() -> Config {
        let mut config = Config::default();
        config.jwt.secret = "test-secret".to_string();
        config
    }

    #[test]
    fn passwords_hash_and_verify() {
        let hash = AuthService::hash_password("hunter22").unwrap();
        assert!(AuthService::verify_password("hunter22", &hash));
        assert!(!AuthService::verify_password("hunter23", &hash));
        assert!(!AuthService::verify_password("hunter22", "not-a-hash"));
    }

    #[test]
    fn short_passwords_and_bad_emails_are_rejected() {
        assert!(AuthService::validate_password("12345").is_err());
        assert!(AuthService::validate_password("123456").is_ok());

        assert_eq!(
            AuthService::normalize_email("  Ana@Example.COM ").unwrap(),
            "ana@example.com"
        );
        assert!(AuthService::normalize_email("ana").is_err());
        assert!(AuthService::normalize_email("@example.com").is_err());
        assert!(AuthService::normalize_email("ana@localhost").is_err());
    }

    #[test]
    fn tokens_are_random_and_digests_stable() {
        let a = AuthService::generate_token();
        let b = AuthService::generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);

        assert_eq!(AuthService::hash_token(&a), AuthService::hash_token(&a));
        assert_eq!(AuthService::hash_token(&a).len(), 64);
    }

    #[test]
    fn session_jwt_requires_the_same_secret() {
        let exp = Utc::now() + Duration::days(1);
        let token = AuthService::create_session_jwt("s1", "user-1", "sess-1", exp).unwrap();

        let claims = AuthService::decode_session_jwt("s1", &token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.sid, "sess-1");

        assert!(AuthService::decode_session_jwt("s2", &token).is_err());
    }

    #[tokio::test]
    async fn deleted_sessions_no_longer_authenticate() {
        let pool = test_pool().await;
        let config = config();
        let user = UserRepository::create(
            &pool,
            CreateUser {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                password_hash: "x".to_string(),
            },
        )
        .await
        .unwrap();

        let (session, token) = AuthService::start_session(&pool, &config, &user.id, None, None)
            .await
            .unwrap();
        let (found, _) = AuthService::user_from_token(&pool, &config.jwt.secret, &token)
            .await
            .unwrap();
        assert_eq!(found.id, user.id);

        SessionRepository::delete(&pool, &session.id).await.unwrap();
        let err = AuthService::user_from_token(&pool, &config.jwt.secret, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn verification_tokens_are_single_use_and_purpose_bound() {
        let pool = test_pool().await;
        let purpose = VerificationPurpose::PasswordReset;

        let first = AuthService::issue_verification(&pool, "ana@example.com", purpose, Duration::hours(1))
            .await
            .unwrap();
        let token = AuthService::issue_verification(&pool, "ana@example.com", purpose, Duration::hours(1))
            .await
            .unwrap();

        // reissuing replaces the older token
        assert!(AuthService::redeem_verification(&pool, &first, purpose).await.is_err());

        assert!(AuthService::redeem_verification(
            &pool,
            &token,
            VerificationPurpose::EmailVerification
        )
        .await
        .is_err());

        let verification = AuthService::redeem_verification(&pool, &token, purpose)
            .await
            .unwrap();
        assert_eq!(verification.identifier, "ana@example.com");
        assert!(AuthService::redeem_verification(&pool, &token, purpose).await.is_err());
    }
}
