use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::models::{CreateUser, Session, User, UserResponse, VerificationPurpose};
use crate::db::{SessionRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::services::auth::{AuthService, SESSION_COOKIE};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sign-up", post(sign_up))
        .route("/sign-in", post(sign_in))
        .route("/sign-out", post(sign_out))
        .route("/session", get(session))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/verify-email", get(verify_email))
        .route("/resend-verification", post(resend_verification))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub expires_at: String,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            expires_at: session.expires_at.and_utc().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserResponse,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

const VERIFICATION_TTL_HOURS: i64 = 24;
const RESET_TTL_HOURS: i64 = 1;

// ============================================================================
// Helpers
// ============================================================================

fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(config.jwt.session_ttl_days))
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    cookie
}

/// Client address and user agent, as far as the proxy headers tell.
fn client_meta(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let ip = header("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .or_else(|| header("x-real-ip"));
    (ip, header("user-agent"))
}

async fn open_session(
    state: &AppState,
    jar: CookieJar,
    headers: &HeaderMap,
    user: User,
) -> AppResult<(CookieJar, Json<SessionResponse>)> {
    let (ip, user_agent) = client_meta(headers);
    let (session, token) =
        AuthService::start_session(&state.db, &state.config, &user.id, ip, user_agent).await?;

    let jar = jar.add(session_cookie(&state.config, token));
    Ok((
        jar,
        Json(SessionResponse {
            user: user.into(),
            session: session.into(),
        }),
    ))
}

async fn send_verification_email(state: &AppState, user: &User) -> AppResult<()> {
    let token = AuthService::issue_verification(
        &state.db,
        &user.email,
        VerificationPurpose::EmailVerification,
        Duration::hours(VERIFICATION_TTL_HOURS),
    )
    .await?;

    if let Err(e) = state
        .mailer
        .send_verification(&user.email, &user.name, &token)
        .await
    {
        tracing::warn!("Failed to send verification email to {}: {}", user.email, e);
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn sign_up(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(req): Json<SignUpRequest>,
) -> AppResult<impl IntoResponse> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    let email = AuthService::normalize_email(&req.email)?;
    AuthService::validate_password(&req.password)?;

    let user = UserRepository::create(
        &state.db,
        CreateUser {
            name: name.to_string(),
            email,
            password_hash: AuthService::hash_password(&req.password)?,
        },
    )
    .await?;
    tracing::info!("Registered user {}", user.id);

    send_verification_email(&state, &user).await?;

    let (jar, body) = open_session(&state, jar, &headers, user).await?;
    Ok((StatusCode::CREATED, jar, body))
}

async fn sign_in(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(req): Json<SignInRequest>,
) -> AppResult<impl IntoResponse> {
    let user = UserRepository::find_by_email(&state.db, &req.email)
        .await?
        .filter(|u| AuthService::verify_password(&req.password, &u.password_hash))
        .ok_or_else(|| {
            tracing::debug!("Rejected sign-in for {}", req.email);
            AppError::Unauthorized
        })?;

    open_session(&state, jar, &headers, user).await
}

async fn sign_out(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<impl IntoResponse> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        match AuthService::decode_session_jwt(&state.config.jwt.secret, cookie.value()) {
            Ok(claims) => SessionRepository::delete(&state.db, &claims.sid).await?,
            Err(e) => tracing::debug!("Ignoring invalid session cookie on sign-out: {:?}", e),
        }
    }

    Ok((jar.remove(removal_cookie()), message("Signed out")))
}

async fn session(AuthUser { user, session }: AuthUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: user.into(),
        session: session.into(),
    })
}

async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    const REPLY: &str = "If the email exists, a password reset link has been sent";

    if let Some(user) = UserRepository::find_by_email(&state.db, &req.email).await? {
        let token = AuthService::issue_verification(
            &state.db,
            &user.email,
            VerificationPurpose::PasswordReset,
            Duration::hours(RESET_TTL_HOURS),
        )
        .await?;

        if let Err(e) = state.mailer.send_password_reset(&user.email, &token).await {
            tracing::warn!("Failed to send reset email to {}: {}", user.email, e);
        }
    }

    Ok(message(REPLY))
}

async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    AuthService::validate_password(&req.new_password)?;

    let verification =
        AuthService::redeem_verification(&state.db, &req.token, VerificationPurpose::PasswordReset)
            .await?;
    let user = UserRepository::find_by_email(&state.db, &verification.identifier)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired token".to_string()))?;

    let hash = AuthService::hash_password(&req.new_password)?;
    UserRepository::update_password(&state.db, &user.id, &hash).await?;
    let revoked = SessionRepository::delete_for_user(&state.db, &user.id).await?;
    tracing::info!(
        "Password reset for user {} ({} sessions revoked)",
        user.id,
        revoked
    );

    Ok(message("Password has been reset"))
}

async fn verify_email(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> AppResult<Json<MessageResponse>> {
    let verification = AuthService::redeem_verification(
        &state.db,
        &query.token,
        VerificationPurpose::EmailVerification,
    )
    .await?;

    if !UserRepository::mark_email_verified(&state.db, &verification.identifier).await? {
        return Err(AppError::BadRequest("Invalid or expired token".to_string()));
    }
    Ok(message("Email verified"))
}

async fn resend_verification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    const REPLY: &str = "If the email exists, a verification link has been sent";

    let Some(user) = UserRepository::find_by_email(&state.db, &req.email).await? else {
        return Ok(message(REPLY));
    };
    if user.email_verified {
        return Err(AppError::BadRequest("Email is already verified".to_string()));
    }

    send_verification_email(&state, &user).await?;
    Ok(message(REPLY))
}

// ============================================================================
// Auth Extractor
// ============================================================================

/// The signed-in user, from the session cookie or a `Bearer` header carrying the same token.
pub struct AuthUser {
    pub user: User,
    pub session: Session,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = match jar.get(SESSION_COOKIE) {
            Some(cookie) => cookie.value().to_string(),
            None => {
                let auth_header = parts
                    .headers
                    .get(http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        tracing::debug!("No session cookie or Authorization header");
                        AppError::Unauthorized
                    })?;

                if !auth_header.to_ascii_lowercase().starts_with("bearer ") {
                    return Err(AppError::Unauthorized);
                }
                auth_header[7..].trim().to_string()
            }
        };

        if token.is_empty() {
            return Err(AppError::Unauthorized);
        }

        let (user, session) = AuthService::user_from_token(&state.db, &state.config.jwt.secret, &token)
            .await
            .map_err(|e| {
                tracing::debug!("Failed to resolve session: {:?}", e);
                AppError::Unauthorized
            })?;

        tracing::debug!("Authenticated user: {}", user.id);
        Ok(AuthUser { user, session })
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::routes::test_support::{body_json, test_state};

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api/auth", router()).with_state(state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn session_cookie_from(resp: &axum::response::Response) -> String {
        let set_cookie = resp
            .headers()
            .get(http::header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("cookie", cookie)
            .body(Body::empty())
            .unwrap()
    }

    async fn sign_up(state: &Arc<AppState>, email: &str) -> axum::response::Response {
        app(state.clone())
            .oneshot(post_json(
                "/api/auth/sign-up",
                serde_json::json!({ "name": "Ana", "email": email, "password": "secret1" }),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sign_up_opens_a_session_and_rejects_duplicates() {
        let state = test_state().await;

        let resp = sign_up(&state, "ana@example.com").await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let cookie = session_cookie_from(&resp);
        let body = body_json(resp).await;
        assert_eq!(body["user"]["email"], "ana@example.com");
        assert_eq!(body["user"]["emailVerified"], false);
        assert!(body["user"].get("passwordHash").is_none());

        let resp = app(state.clone())
            .oneshot(get_with_cookie("/api/auth/session", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = sign_up(&state, "ANA@example.com").await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn sign_in_checks_the_password() {
        let state = test_state().await;
        sign_up(&state, "ana@example.com").await;

        let resp = app(state.clone())
            .oneshot(post_json(
                "/api/auth/sign-in",
                serde_json::json!({ "email": "ana@example.com", "password": "wrong-pass" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(state.clone())
            .oneshot(post_json(
                "/api/auth/sign-in",
                serde_json::json!({ "email": "ana@example.com", "password": "secret1" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn short_password_is_a_validation_error() {
        let state = test_state().await;
        let resp = app(state)
            .oneshot(post_json(
                "/api/auth/sign-up",
                serde_json::json!({ "name": "Ana", "email": "ana@example.com", "password": "123" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn sign_out_ends_the_session() {
        let state = test_state().await;
        let cookie = session_cookie_from(&sign_up(&state, "ana@example.com").await);

        let resp = app(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/sign-out")
                    .header("cookie", &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(state)
            .oneshot(get_with_cookie("/api/auth/session", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn password_reset_revokes_sessions() {
        let state = test_state().await;
        let cookie = session_cookie_from(&sign_up(&state, "ana@example.com").await);

        let resp = app(state.clone())
            .oneshot(post_json(
                "/api/auth/forgot-password",
                serde_json::json!({ "email": "nobody@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let token = AuthService::issue_verification(
            &state.db,
            "ana@example.com",
            VerificationPurpose::PasswordReset,
            Duration::hours(1),
        )
        .await
        .unwrap();

        let resp = app(state.clone())
            .oneshot(post_json(
                "/api/auth/reset-password",
                serde_json::json!({ "token": token, "newPassword": "brand-new" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(state.clone())
            .oneshot(get_with_cookie("/api/auth/session", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(state)
            .oneshot(post_json(
                "/api/auth/sign-in",
                serde_json::json!({ "email": "ana@example.com", "password": "brand-new" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn verifying_email_then_resending_is_rejected() {
        let state = test_state().await;
        sign_up(&state, "ana@example.com").await;

        let token = AuthService::issue_verification(
            &state.db,
            "ana@example.com",
            VerificationPurpose::EmailVerification,
            Duration::hours(24),
        )
        .await
        .unwrap();

        let resp = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/auth/verify-email?token={}",
                        urlencoding::encode(&token)
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(state)
            .oneshot(post_json(
                "/api/auth/resend-verification",
                serde_json::json!({ "email": "ana@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
