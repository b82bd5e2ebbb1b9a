//! # Routes
//!
//! JSON handlers over [`AppState`]. Bodies are read as raw bytes and parsed with
//! [`parse_json`] so malformed payloads share one error shape.
//!
//! ## Identity
//! The upstream gateway forwards the caller's numeric id in `x-user-id`.
//! - [`CurrentUser`]: required, missing or garbled header is a 401
//! - [`MaybeUser`]: optional, only a garbled header is a 401
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    acts::{ActQuery, RegionQuery},
    error::AppError,
    models::{ActId, DecorationId, DecorationPatch, NewAct, NewDecoration, ProgressView, UserId},
    state::AppState,
    utils::parse_json,
};

pub const USER_HEADER: &str = "x-user-id";

fn user_from_headers(headers: &HeaderMap) -> Result<Option<UserId>, AppError> {
    let Some(value) = headers.get(USER_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Some)
        .ok_or(AppError::Unauthorized)
}

pub struct CurrentUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_headers(&parts.headers)?
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

pub struct MaybeUser(pub Option<UserId>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_headers(&parts.headers).map(MaybeUser)
    }
}

#[derive(Deserialize)]
struct AutoDecorate {
    act_id: ActId,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/acts", post(create_act_handler).get(list_acts_handler))
        .route("/acts/stats", get(stats_handler))
        .route("/acts/region", get(region_handler))
        .route("/acts/{id}", get(get_act_handler).delete(delete_act_handler))
        .route(
            "/tree/decorations",
            get(list_decorations_handler).post(create_decoration_handler),
        )
        .route("/tree/decorations/my_tree", get(my_tree_handler))
        .route("/tree/decorations/progress", get(progress_handler))
        .route("/tree/decorations/auto_decorate", post(auto_decorate_handler))
        .route(
            "/tree/decorations/{id}",
            get(get_decoration_handler)
                .patch(update_decoration_handler)
                .delete(delete_decoration_handler),
        )
        .with_state(state)
}

pub async fn create_act_handler(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let input: NewAct = parse_json(body)?;
    let act = state.acts.create_act(user, input).await?;

    Ok((StatusCode::CREATED, Json(act)))
}

pub async fn list_acts_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.acts.list_acts(&query).await?))
}

pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.acts.stats(Utc::now()).await?))
}

pub async fn region_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RegionQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.acts.region(&query, Utc::now()).await?))
}

pub async fn get_act_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ActId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.acts.get_act(id).await?))
}

pub async fn delete_act_handler(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<ActId>,
) -> Result<impl IntoResponse, AppError> {
    state.acts.delete_act(user, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_decorations_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.tree.list(user).await?))
}

pub async fn create_decoration_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let input: NewDecoration = parse_json(body)?;
    let decoration = state.tree.create_manual(user, input).await?;

    Ok((StatusCode::CREATED, Json(decoration)))
}

pub async fn get_decoration_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<DecorationId>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.tree.get(user, id).await?))
}

pub async fn update_decoration_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<DecorationId>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let patch: DecorationPatch = parse_json(body)?;

    Ok(Json(state.tree.update(user, id, patch).await?))
}

pub async fn delete_decoration_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<DecorationId>,
) -> Result<impl IntoResponse, AppError> {
    state.tree.delete(user, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn my_tree_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.tree.sync(user).await?))
}

pub async fn progress_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let progress = state.tree.progress(user).await?;

    Ok(Json(ProgressView::from(progress)))
}

pub async fn auto_decorate_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let AutoDecorate { act_id } = parse_json(body)?;
    let decoration = state.tree.auto_decorate(user, act_id).await?;

    Ok((StatusCode::CREATED, Json(decoration)))
}
