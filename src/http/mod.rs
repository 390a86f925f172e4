//! HTTP surface: route table, Basic auth gate, and the `Server` response
//! header stamped on every reply.

pub mod auth;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{config::Config, errors::Error, scheduler::Scheduler, time::now_unix};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    // Routes (including the fallback) are assembled first, then the auth
    // layer is applied over the whole router — `Router::layer` only wraps
    // what's already attached, so a fallback set afterward would dispatch
    // unauthenticated. Wrapping after `.fallback` keeps unmapped paths
    // behind the same Basic-auth gate as every real route.
    let routes = Router::new()
        .route("/get/{device}", get(get_account).post(get_account))
        .route(
            "/get/{device}/{level}",
            get(get_account_with_level).post(get_account_with_level),
        )
        .route("/get-current/{device}", get(get_current).post(get_current))
        .route(
            "/set/level/by-device/{device}/{level}",
            get(set_level_by_device).post(set_level_by_device),
        )
        .route(
            "/set/level/by-account/{account}/{level}",
            get(set_level_by_account).post(set_level_by_account),
        )
        .route(
            "/set/burned/by-device/{device}",
            get(set_burned_by_device).post(set_burned_by_device),
        )
        .route(
            "/set/burned/by-device/{device}/{ts}",
            get(set_burned_by_device_ts).post(set_burned_by_device_ts),
        )
        .route(
            "/set/burned/by-account/{account}",
            get(set_burned_by_account).post(set_burned_by_account),
        )
        .route(
            "/set/burned/by-account/{account}/{ts}",
            get(set_burned_by_account_ts).post(set_burned_by_account_ts),
        )
        .route("/stats", get(stats))
        .fallback(fallback);

    routes
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_basic_auth))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(middleware::from_fn(stamp_server_header)),
        )
        .with_state(state)
}

async fn stamp_server_header(request: axum::extract::Request, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("Server", HeaderValue::from_static("pogoAccountServer"));
    response
}

fn ok(body: serde_json::Value) -> Json<serde_json::Value> {
    let mut map = serde_json::Map::new();
    map.insert("status".to_string(), json!("ok"));
    if let serde_json::Value::Object(fields) = body {
        map.extend(fields);
    }
    Json(serde_json::Value::Object(map))
}

async fn get_account(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let lease = state
        .scheduler
        .get_account(&device, crate::scheduler::DEFAULT_REQUESTED_LEVEL, now_unix())
        .await?;
    Ok(ok(json!({ "username": lease.username, "password": lease.password })))
}

async fn get_account_with_level(
    State(state): State<AppState>,
    Path((device, level)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, Error> {
    let level: i64 = level
        .parse()
        .map_err(|_| Error::invalid("level must be an integer"))?;
    let lease = state.scheduler.get_account(&device, level, now_unix()).await?;
    Ok(ok(json!({ "username": lease.username, "password": lease.password })))
}

async fn get_current(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let row = state
        .scheduler
        .store()
        .current_for(&device)
        .await?
        .ok_or_else(|| Error::invalid("device has no active lease"))?;
    Ok(ok(json!({ "username": row.username })))
}

async fn set_level_by_device(
    State(state): State<AppState>,
    Path((device, level)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, Error> {
    let level: i64 = level
        .parse()
        .map_err(|_| Error::invalid("level must be an integer"))?;
    state.scheduler.set_level_by_device(&device, level).await?;
    Ok(ok(json!({})))
}

async fn set_level_by_account(
    State(state): State<AppState>,
    Path((account, level)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, Error> {
    let level: i64 = level
        .parse()
        .map_err(|_| Error::invalid("level must be an integer"))?;
    state.scheduler.set_level_by_account(&account, level).await?;
    Ok(ok(json!({})))
}

async fn set_burned_by_device(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    state.scheduler.set_burned_by_device(&device, now_unix()).await?;
    Ok(ok(json!({})))
}

async fn set_burned_by_device_ts(
    State(state): State<AppState>,
    Path((device, ts)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, Error> {
    let ts: i64 = ts.parse().map_err(|_| Error::invalid("ts must be an integer"))?;
    state.scheduler.set_burned_by_device(&device, ts).await?;
    Ok(ok(json!({})))
}

async fn set_burned_by_account(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    state.scheduler.set_burned_by_account(&account, now_unix()).await?;
    Ok(ok(json!({})))
}

async fn set_burned_by_account_ts(
    State(state): State<AppState>,
    Path((account, ts)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, Error> {
    let ts: i64 = ts.parse().map_err(|_| Error::invalid("ts must be an integer"))?;
    state.scheduler.set_burned_by_account(&account, ts).await?;
    Ok(ok(json!({})))
}

async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, Error> {
    let stats = state.scheduler.stats(now_unix()).await?;
    Ok(ok(serde_json::to_value(stats).unwrap()))
}

async fn fallback() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, Json(json!({ "status": "fail" })))
}
