use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::UserResponse;
use crate::db::UserRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/users", get(list_users))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersListResponse {
    pub users: Vec<UserResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

/// Page and page size after clamping; out-of-range sizes fall back to the default.
fn pagination(query: &UsersQuery) -> (i64, i64) {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = match query.page_size {
        Some(size) if (1..=MAX_PAGE_SIZE).contains(&size) => size,
        _ => DEFAULT_PAGE_SIZE,
    };
    (page, page_size)
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    AuthUser { user, .. }: AuthUser,
    Query(query): Query<UsersQuery>,
) -> AppResult<Json<UsersListResponse>> {
    if !state.config.is_admin(&user.email) {
        tracing::warn!("User {} tried to list users without admin rights", user.id);
        return Err(AppError::Forbidden);
    }

    let (page, page_size) = pagination(&query);
    let search = query.search.as_deref().map(str::trim);

    let total = UserRepository::count(&state.db, search).await?;
    let users = UserRepository::list_paginated(&state.db, search, page_size, (page - 1) * page_size)
        .await?;

    Ok(Json(UsersListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages: (total + page_size - 1) / page_size,
    }))
}
