//! HTTP route handlers

use axum::{
    extract::{Extension, Json, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use super::session::{require_session, session_id};
use super::AppState;
use crate::error::{MwsError, Result};
use crate::service::{CountRequest, FindRequest, RemoveRequest, UpdateRequest};
use crate::store::Document;

/// GET payloads arrive as JSON in the `q` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct GetPayload {
    #[serde(default)]
    q: Option<String>,
}

fn parse_get_json<T>(payload: GetPayload) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match payload.q {
        None => Ok(T::default()),
        Some(raw) => serde_json::from_str(&raw).map_err(|_| {
            MwsError::bad_request_detail(
                "Error parsing JSON data",
                "Invalid GET parameter data",
            )
        }),
    }
}

fn empty_success() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Create the session's resource, or return the one it already owns.
#[instrument(skip(state, headers))]
pub async fn create_resource(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response> {
    let session_id =
        session_id(&headers).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let handle = state.service.create_resource(&session_id).await?;
    info!(res_id = %handle.res_id, is_new = handle.is_new, "resource ready");
    Ok(Json(json!({
        "res_id": handle.res_id,
        "is_new": handle.is_new,
        "session_id": session_id,
    }))
    .into_response())
}

/// Refresh the tenant's activity timestamp.
#[instrument(skip(state, headers))]
pub async fn keep_alive(
    Extension(state): Extension<Arc<AppState>>,
    Path(res_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let session = require_session(&headers)?;
    state.service.keep_alive(&session, &res_id).await?;
    Ok(empty_success())
}

/// Paged find over one collection.
#[instrument(skip(state, headers, payload))]
pub async fn collection_find(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
    Query(payload): Query<GetPayload>,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let request: FindRequest = parse_get_json(payload)?;
    let page = state
        .service
        .find(&session, &res_id, &collection_name, request)
        .await?;
    Ok(Json(json!({
        "result": page.result,
        "count": page.count,
        "cursor_id": page.cursor_id,
    }))
    .into_response())
}

/// Match count for a query.
#[instrument(skip(state, headers, payload))]
pub async fn collection_count(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
    Query(payload): Query<GetPayload>,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let request: CountRequest = parse_get_json(payload)?;
    let count = state
        .service
        .count(&session, &res_id, &collection_name, request)
        .await?;
    Ok(Json(json!({ "count": count })).into_response())
}

/// Aggregation pipeline over one collection.
#[instrument(skip(state, headers, payload))]
pub async fn collection_aggregate(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
    Query(payload): Query<GetPayload>,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let pipeline: Vec<Document> = parse_get_json(payload)?;
    let result = state
        .service
        .aggregate(&session, &res_id, &collection_name, pipeline)
        .await?;
    Ok(Json(json!({ "result": result })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DocumentBody {
    document: Option<Value>,
}

/// Insert a document or list of documents.
#[instrument(skip(state, headers, body))]
pub async fn collection_insert(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<DocumentBody>,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let document = body.document.ok_or_else(|| {
        MwsError::bad_request("'document' argument not found in the insert request.")
    })?;
    let ids = state
        .service
        .insert(&session, &res_id, &collection_name, document)
        .await?;
    Ok(Json(json!({ "result": ids })).into_response())
}

/// Update documents matching a query.
#[instrument(skip(state, headers, body))]
pub async fn collection_update(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Option<Json<UpdateRequest>>,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let request = body.map(|Json(b)| b).ok_or_else(|| {
        MwsError::bad_request("update requires spec and document arguments")
    })?;
    let summary = state
        .service
        .update(&session, &res_id, &collection_name, request)
        .await?;
    Ok(Json(json!({
        "matched": summary.matched,
        "modified": summary.modified,
        "upserted_id": summary.upserted_id,
    }))
    .into_response())
}

/// Save one document (insert, or replace by its id).
#[instrument(skip(state, headers, body))]
pub async fn collection_save(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<DocumentBody>,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let document = body.document.ok_or_else(|| {
        MwsError::bad_request("'document' argument not found in the save request.")
    })?;
    let summary = state
        .service
        .save(&session, &res_id, &collection_name, document)
        .await?;
    Ok(Json(json!({
        "matched": summary.matched,
        "modified": summary.modified,
        "upserted_id": summary.upserted_id,
    }))
    .into_response())
}

/// Remove documents matching a constraint.
#[instrument(skip(state, headers, body))]
pub async fn collection_remove(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Option<Json<RemoveRequest>>,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let removed = state
        .service
        .remove(&session, &res_id, &collection_name, request)
        .await?;
    Ok(Json(json!({ "removed": removed })).into_response())
}

/// Drop one collection.
#[instrument(skip(state, headers))]
pub async fn collection_drop(
    Extension(state): Extension<Arc<AppState>>,
    Path((res_id, collection_name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let session = require_session(&headers)?;
    state
        .service
        .drop_collection(&session, &res_id, &collection_name)
        .await?;
    Ok(empty_success())
}

/// Drop every collection of the tenant.
#[instrument(skip(state, headers))]
pub async fn db_drop(
    Extension(state): Extension<Arc<AppState>>,
    Path(res_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let session = require_session(&headers)?;
    state.service.drop_database(&session, &res_id).await?;
    Ok(empty_success())
}

/// List the tenant's collections.
#[instrument(skip(state, headers))]
pub async fn get_collection_names(
    Extension(state): Extension<Arc<AppState>>,
    Path(res_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let session = require_session(&headers)?;
    let names = state.service.collection_names(&session, &res_id).await?;
    Ok(Json(json!({ "result": names })).into_response())
}

/// Health check
pub async fn health_check() -> Response {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}
