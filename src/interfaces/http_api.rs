use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};

use crate::application::AppError;
use crate::application::usecases::{
    FollowMode, FollowUseCase, InfoUseCase, SubscriberSettingsUseCase, UnfollowUseCase,
};
use crate::domain::SubscriberId;

/// Inbound commands from the chat gateway.
#[derive(Clone)]
pub struct ApiState {
    pub follow: Arc<FollowUseCase>,
    pub unfollow: Arc<UnfollowUseCase>,
    pub info: Arc<InfoUseCase>,
    pub settings: Arc<SubscriberSettingsUseCase>,
    pub api_token: Option<String>,
}

pub fn build_router(state: ApiState) -> Router {
    let commands = Router::new()
        .route(
            "/subscribers/{id}/watches",
            get(list_watches).post(follow).delete(unfollow),
        )
        .route("/subscribers/{id}/watches/search", get(find_watches))
        .route("/subscribers/{id}/prefix", put(set_prefix).delete(clear_prefix))
        .route(
            "/subscribers/{id}/blacklist",
            get(list_blacklist)
                .post(add_blacklist)
                .delete(remove_blacklist),
        )
        .route("/subscribers/{id}/popular", put(set_popular))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(commands)
        .with_state(state)
}

pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateWatch { .. } => StatusCode::CONFLICT,
            AppError::Upstream { .. } | AppError::Delivery(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if code.is_server_error() {
            tracing::error!(error = %self.0, "command failed");
        }
        (
            code,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn list_watches(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.info.list(SubscriberId(id)).await?))
}

#[derive(Deserialize)]
struct FollowBody {
    query: String,
    #[serde(default)]
    mode: FollowMode,
}

async fn follow(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<FollowBody>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .follow
        .execute(SubscriberId(id), &body.query, body.mode)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Deserialize)]
struct UnfollowBody {
    queries: Vec<String>,
}

#[derive(Serialize)]
struct UnfollowResp {
    removed: usize,
    missing: Vec<String>,
}

async fn unfollow(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<UnfollowBody>,
) -> ApiResult<impl IntoResponse> {
    if body.queries.is_empty() {
        return Err(AppError::Validation("no queries given".into()).into());
    }
    let missing = state
        .unfollow
        .execute_many(SubscriberId(id), &body.queries)
        .await?;
    if missing.len() == body.queries.len() {
        return Err(AppError::NotFound(format!("no such queries: {}", missing.join(", "))).into());
    }
    Ok(Json(UnfollowResp {
        removed: body.queries.len() - missing.len(),
        missing,
    }))
}

#[derive(Deserialize)]
struct SearchParams {
    containing: String,
}

async fn find_watches(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Query(q): Query<SearchParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.info.find(SubscriberId(id), &q.containing).await?))
}

#[derive(Deserialize)]
struct TagsBody {
    tags: String,
}

#[derive(Serialize)]
struct ChangedResp {
    changed: u64,
}

async fn set_prefix(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<TagsBody>,
) -> ApiResult<impl IntoResponse> {
    state.settings.set_prefix(SubscriberId(id), &body.tags).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_prefix(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    state.settings.clear_prefix(SubscriberId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_blacklist(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.settings.blacklist(SubscriberId(id)).await?))
}

async fn add_blacklist(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<TagsBody>,
) -> ApiResult<impl IntoResponse> {
    let changed = state
        .settings
        .blacklist_add(SubscriberId(id), &body.tags)
        .await?;
    Ok(Json(ChangedResp { changed }))
}

async fn remove_blacklist(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<TagsBody>,
) -> ApiResult<impl IntoResponse> {
    let changed = state
        .settings
        .blacklist_remove(SubscriberId(id), &body.tags)
        .await?;
    Ok(Json(ChangedResp { changed }))
}

#[derive(Deserialize)]
struct PopularBody {
    subscribed: bool,
}

async fn set_popular(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<PopularBody>,
) -> ApiResult<impl IntoResponse> {
    state
        .settings
        .set_popular(SubscriberId(id), body.subscribed)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn require_auth(
    State(state): State<ApiState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    next.run(request).await
}

fn check_auth(headers: &HeaderMap, token: &Option<String>) -> Result<(), (StatusCode, String)> {
    let Some(expected) = token else {
        return Ok(());
    }; // no token configured, no auth
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if auth == format!("Bearer {}", expected) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthorized".to_string()))
    }
}
