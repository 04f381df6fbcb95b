//! REST API surface.
//!
//! Handlers only enqueue actions and read collections; all mutation of the
//! collector, the action queue, and the collections happens on the tick
//! loop in [`crate::app`].

use crate::actions::{Action, ActionPayload, ActionQueue};
use crate::app::SharedState;
use crate::collections::Collection;
use crate::collections::item::{CollectionItem, FieldsFilter};
use crate::collector::RelationshipKind;
use crate::domain::ActionId;
use crate::error::BorderRouterError;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, body::Bytes};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Builds the router serving both the action API and the collection API.
#[must_use]
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/actions", post(submit_actions).get(list_actions).delete(delete_all_actions))
        .route("/api/actions/{id}", get(get_action))
        .route("/api/devices", get(get_devices).delete(clear_devices).post(discover_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/diagnostics", get(get_diagnostics).delete(clear_diagnostics))
        .route("/api/diagnostics/{id}", get(get_diagnostic))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

fn error_response(err: &BorderRouterError) -> Response {
    let status = err.status_code();
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            let v = v.split(';').next().unwrap_or("").trim();
            v == "application/json" || v == "application/vnd.api+json"
        })
}

fn wants_json_api(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/vnd.api+json"))
}

#[derive(Debug, Deserialize)]
struct ActionEntry {
    #[serde(rename = "type")]
    type_name: String,
    attributes: Value,
}

#[derive(Debug, Deserialize)]
struct ActionSubmission {
    data: Vec<ActionEntry>,
}

fn render_actions_collection(queue: &ActionQueue, ids: &[ActionId]) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .filter_map(|id| queue.get(*id))
        .map(Action::to_json_api)
        .collect();
    json!({
        "data": data,
        "meta": {
            "collection": {
                "offset": 0,
                "limit": queue.max_size(),
                "total": queue.len(),
                "pending": queue.pending_count(),
            },
        },
    })
}

/// `POST /api/actions`.
async fn submit_actions(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json_content_type(&headers) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    let submission: ActionSubmission = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("malformed JSON body: {e}")).into_response();
        }
    };

    let mut payloads = Vec::with_capacity(submission.data.len());
    for entry in &submission.data {
        match ActionPayload::parse(&entry.type_name, &entry.attributes) {
            Ok(payload) => payloads.push(payload),
            Err(e) => return error_response(&e),
        }
    }

    let mut guard = state.lock().await;
    let now_ms = guard.time_provider.now_ms();
    match guard.actions.submit(payloads, now_ms) {
        Ok(ids) => (StatusCode::OK, Json(render_actions_collection(&guard.actions, &ids))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/actions`.
async fn list_actions(State(state): State<SharedState>) -> Response {
    let guard = state.lock().await;
    let data: Vec<Value> = guard.actions.iter().map(Action::to_json_api).collect();
    let body = json!({
        "data": data,
        "meta": {
            "collection": {
                "offset": 0,
                "limit": guard.actions.max_size(),
                "total": guard.actions.len(),
                "pending": guard.actions.pending_count(),
            },
        },
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// `GET /api/actions/<uuid>`.
async fn get_action(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let guard = state.lock().await;
    match guard.actions.get(ActionId::from(uuid)) {
        Some(action) => (StatusCode::OK, Json(json!({ "data": action.to_json_api() }))).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `DELETE /api/actions`.
async fn delete_all_actions(State(state): State<SharedState>) -> Response {
    let mut guard = state.lock().await;
    guard.actions.mark_all_for_delete();
    StatusCode::NO_CONTENT.into_response()
}

fn render_collection_body<T: CollectionItem>(
    collection: &Collection<T>,
    json_api: bool,
    fields: &FieldsFilter,
    pending: Option<usize>,
) -> Value {
    if json_api {
        collection.to_json_api_with_pending(fields, pending)
    } else {
        collection.to_plain_json(fields)
    }
}

fn render_collection_item<T: CollectionItem>(
    collection: &Collection<T>,
    id: &str,
    json_api: bool,
    fields: &FieldsFilter,
) -> Response {
    if json_api {
        let rendered = collection.to_json_api_item(id, fields);
        if rendered.is_empty() {
            return StatusCode::NOT_FOUND.into_response();
        }
        (StatusCode::OK, [(header::CONTENT_TYPE, "application/vnd.api+json")], rendered).into_response()
    } else {
        match collection.get(id) {
            Some(_) => {
                let all = collection.to_plain_json(fields);
                let Value::Array(items) = all else {
                    return StatusCode::NOT_FOUND.into_response();
                };
                match items.into_iter().find(|item| item.get("id").and_then(Value::as_str) == Some(id)) {
                    Some(item) => (StatusCode::OK, Json(item)).into_response(),
                    None => StatusCode::NOT_FOUND.into_response(),
                }
            }
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

/// `GET /api/devices`.
async fn get_devices(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = FieldsFilter::from_query_pairs(params);
    let json_api = wants_json_api(&headers);
    let guard = state.lock().await;
    let pending = (guard.collector.active_relationship() == Some(RelationshipKind::Devices))
        .then(|| guard.collector.pending_count());
    let body = render_collection_body(&guard.collections.devices, json_api, &fields, pending);
    (StatusCode::OK, Json(body)).into_response()
}

/// `GET /api/devices/<id>`.
async fn get_device(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = FieldsFilter::from_query_pairs(params);
    let json_api = wants_json_api(&headers);
    let guard = state.lock().await;
    render_collection_item(&guard.collections.devices, &id, json_api, &fields)
}

/// `DELETE /api/devices`.
async fn clear_devices(State(state): State<SharedState>) -> Response {
    let mut guard = state.lock().await;
    guard.collections.devices.clear();
    StatusCode::NO_CONTENT.into_response()
}

/// `GET /api/diagnostics`.
async fn get_diagnostics(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = FieldsFilter::from_query_pairs(params);
    let json_api = wants_json_api(&headers);
    let guard = state.lock().await;
    let pending = (guard.collector.active_relationship() == Some(RelationshipKind::Diagnostics))
        .then(|| guard.collector.pending_count());
    let body = render_collection_body(&guard.collections.diagnostics, json_api, &fields, pending);
    (StatusCode::OK, Json(body)).into_response()
}

/// `GET /api/diagnostics/<id>`.
async fn get_diagnostic(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = FieldsFilter::from_query_pairs(params);
    let json_api = wants_json_api(&headers);
    let guard = state.lock().await;
    render_collection_item(&guard.collections.diagnostics, &id, json_api, &fields)
}

/// `DELETE /api/diagnostics`.
async fn clear_diagnostics(State(state): State<SharedState>) -> Response {
    let mut guard = state.lock().await;
    guard.collections.diagnostics.clear();
    StatusCode::NO_CONTENT.into_response()
}

/// How often `discover_devices` re-locks to poll the collector while the
/// caller waits for a discovery cycle to finish.
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// `POST /api/devices`: runs a full discovery cycle
/// synchronously with the request, configuring the collector with the
/// control plane's default timeout/age/retry budget and returning once the
/// cycle finishes or that timeout elapses (408 with whatever partial
/// result was gathered).
async fn discover_devices(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let json_api = wants_json_api(&headers);
    let fields = FieldsFilter::none();

    let deadline_ms = {
        let mut guard = state.lock().await;
        if !guard.collector.is_idle() {
            return error_response(&BorderRouterError::InvalidState(
                "a collector cycle is already active".to_string(),
            ));
        }
        let config = guard.config.clone();
        let now_ms = guard.time_provider.now_ms();
        if let Err(e) = guard.collector.configure(
            config.default_collector_timeout_ms,
            config.default_collector_max_age_ms,
            config.default_collector_retries,
            config.retry_delay_ftd_ms.into_inner(),
            now_ms,
        ) {
            return error_response(&e);
        }
        let thread_api = guard.thread_api.clone();
        if let Err(e) = guard.collector.start_discovery(thread_api.as_ref(), now_ms).await {
            return error_response(&e);
        }
        now_ms + config.default_collector_timeout_ms
    };

    loop {
        let mut guard = state.lock().await;
        let now_ms = guard.time_provider.now_ms();
        if guard.collector.is_idle() {
            let body = render_collection_body(&guard.collections.devices, json_api, &fields, None);
            return (StatusCode::OK, Json(body)).into_response();
        }
        if now_ms >= deadline_ms {
            warn!("discovery request timed out waiting on collector cycle");
            guard.collector.cancel();
            let body = render_collection_body(&guard.collections.devices, json_api, &fields, None);
            return (StatusCode::REQUEST_TIMEOUT, Json(body)).into_response();
        }
        let time_provider = guard.time_provider.clone();
        drop(guard);
        time_provider.sleep(DISCOVERY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_type_accepts_plain_and_json_api() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(is_json_content_type(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            "application/vnd.api+json".parse().unwrap(),
        );
        assert!(is_json_content_type(&headers));
    }

    #[test]
    fn json_content_type_rejects_form_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        assert!(!is_json_content_type(&headers));
    }

    #[test]
    fn wants_json_api_checks_accept_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "application/vnd.api+json".parse().unwrap());
        assert!(wants_json_api(&headers));
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(!wants_json_api(&headers));
    }
}
