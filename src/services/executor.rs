use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::Method;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request};
use hyper_tls::HttpsConnector;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;
use warp::http::Uri;

use crate::config::{MAX_IN_FLIGHT, REQUEST_TIMEOUT_SECS};
use crate::errors::GatewayError;
use crate::models::{AppState, RequestRecord, RequestStatus, StatusReply, SubmitBody, SubmitReceipt};
use crate::services::{cache, limiter, notify};

/// Outbound side shared by every worker: the TLS-capable client and the
/// worker-pool bound.
#[derive(Clone)]
pub struct Outbound {
    client: Client<HttpsConnector<HttpConnector>>,
    workers: Arc<Semaphore>,
}

impl Outbound {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build(HttpsConnector::new()),
            workers: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        }
    }
}

impl Default for Outbound {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates the submission, answers from the cache when possible, otherwise
/// reserves a rate-limiter slot and schedules the outbound call. Returns
/// immediately in every case; completion is observed via status polling or
/// the push channel.
pub async fn submit(
    state: &Arc<RwLock<AppState>>,
    outbound: &Outbound,
    body: SubmitBody,
) -> Result<SubmitReceipt, GatewayError> {
    let method: Method = body
        .method
        .to_uppercase()
        .parse()
        .map_err(|_| GatewayError::UnsupportedMethod(body.method.clone()))?;
    let uuid = Uuid::new_v4();

    let (wait, cached) = {
        let mut guard = state.write().await;
        let manager = guard
            .managers
            .get(&body.manager_id)
            .ok_or(GatewayError::ManagerNotFound)?;
        if !manager.allows(&body.url) {
            return Err(GatewayError::Forbidden(body.url.clone()));
        }

        let key = cache::cache_key(&method, &body.url, body.payload.as_ref());
        let cached = if body.cache_duration > 0 {
            cache::lookup(&guard, &key)
        } else {
            None
        };

        let wait = if cached.is_some() {
            Duration::ZERO
        } else {
            limiter::reserve(&mut guard, &body.manager_id)?
        };

        let status = match &cached {
            Some(payload) => RequestStatus::Complete(payload.clone()),
            None => RequestStatus::Pending,
        };
        guard.requests.insert(
            uuid,
            RequestRecord {
                uuid,
                manager_id: body.manager_id,
                url: body.url.clone(),
                method,
                headers: body.headers,
                payload: body.payload,
                cache_duration: body.cache_duration,
                client_id: body.client_id.clone(),
                submitted_at: SystemTime::now(),
                estimated_delay: wait.as_secs_f64(),
                status,
            },
        );
        (wait, cached)
    };

    if let Some(payload) = cached {
        info!(%uuid, url = %body.url, "request served from cache");
        let status = RequestStatus::Complete(payload);
        notify::notify_client(state, body.client_id.as_deref(), uuid, &status).await;
    } else {
        info!(
            %uuid,
            manager_id = %body.manager_id,
            url = %body.url,
            delay = wait.as_secs_f64(),
            "request queued"
        );
        let state = state.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            execute(state, outbound, uuid, wait).await;
        });
    }

    Ok(SubmitReceipt {
        uuid,
        status_url: format!("/api/status/{}", uuid),
        estimated_delay: wait.as_secs_f64(),
        message: "Your request is in the queue. Use the provided URL to check the status."
            .to_string(),
    })
}

/// Read-only, idempotent snapshot of a request.
pub async fn get_status(
    state: &Arc<RwLock<AppState>>,
    uuid: &Uuid,
) -> Result<StatusReply, GatewayError> {
    let state = state.read().await;
    let record = state
        .requests
        .get(uuid)
        .ok_or(GatewayError::RequestNotFound(*uuid))?;
    Ok(StatusReply::from_status(&record.status, record.estimated_delay))
}

/// Valid only while the request is still pending; the execution task observes
/// the terminal state at wake-up and skips the upstream call.
pub async fn cancel(state: &Arc<RwLock<AppState>>, uuid: &Uuid) -> Result<(), GatewayError> {
    let (client_id, status) = {
        let mut state = state.write().await;
        let record = state
            .requests
            .get_mut(uuid)
            .ok_or(GatewayError::RequestNotFound(*uuid))?;
        if record.status.is_terminal() {
            return Err(GatewayError::RequestNotPending(*uuid));
        }
        record.status = RequestStatus::Error("cancelled by caller".to_string());
        (record.client_id.clone(), record.status.clone())
    };

    info!(%uuid, "request cancelled");
    notify::notify_client(state, client_id.as_deref(), *uuid, &status).await;
    Ok(())
}

/// One deferred execution attempt. The request may have reached a terminal
/// state while it waited (cancellation, manager deletion); in that case the
/// upstream is never called.
async fn execute(state: Arc<RwLock<AppState>>, outbound: Outbound, uuid: Uuid, wait: Duration) {
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
    let _permit = match outbound.workers.acquire().await {
        Ok(permit) => permit,
        Err(_) => return, // pool closed during shutdown
    };

    let job = {
        let guard = state.read().await;
        match guard.requests.get(&uuid) {
            Some(record) if record.status == RequestStatus::Pending => Some((
                record.method.clone(),
                record.url.clone(),
                record.headers.clone(),
                record.payload.clone(),
                record.cache_duration,
                record.client_id.clone(),
            )),
            _ => None,
        }
    };
    let (method, url, headers, payload, cache_duration, client_id) = match job {
        Some(job) => job,
        None => return,
    };

    let started = SystemTime::now();
    let status = match perform_call(&outbound.client, &method, &url, &headers, payload.as_ref())
        .await
    {
        Ok(response) => RequestStatus::Complete(response),
        Err(err) => {
            warn!(%uuid, url = %url, error = %err, "upstream call failed");
            RequestStatus::Error(err.to_string())
        }
    };

    let delivered = {
        let mut guard = state.write().await;
        if let RequestStatus::Complete(response) = &status {
            let key = cache::cache_key(&method, &url, payload.as_ref());
            cache::store(&mut guard, &key, response.clone(), cache_duration);
        }
        match guard.requests.get_mut(&uuid) {
            // terminal states are final: only a still-pending record moves
            Some(record) if record.status == RequestStatus::Pending => {
                record.status = status.clone();
                true
            }
            _ => false,
        }
    };

    if let Ok(elapsed) = started.elapsed() {
        info!(
            %uuid,
            method = %method,
            url = %url,
            elapsed_ms = elapsed.as_millis() as u64,
            "outbound call finished"
        );
    }

    if delivered {
        notify::notify_client(&state, client_id.as_deref(), uuid, &status).await;
    }
}

async fn perform_call(
    client: &Client<HttpsConnector<HttpConnector>>,
    method: &Method,
    url: &str,
    headers: &HashMap<String, String>,
    payload: Option<&Value>,
) -> Result<Value, GatewayError> {
    let mut url = url.to_string();
    let mut request_body = Body::empty();

    if let Some(payload) = payload {
        if *method == Method::GET {
            let query = serde_urlencoded::to_string(payload)
                .map_err(|e| GatewayError::InvalidUri(e.to_string()))?;
            if !query.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&query);
            }
        } else {
            request_body = Body::from(payload.to_string());
        }
    }

    let uri: Uri = url
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| GatewayError::InvalidUri(e.to_string()))?;

    let mut builder = Request::builder().method(method.clone()).uri(uri);
    if payload.is_some()
        && *method != Method::GET
        && !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"))
    {
        builder = builder.header("content-type", "application/json");
    }
    for (name, value) in headers {
        if name.to_lowercase() != "host" {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    let request = builder
        .body(request_body)
        .map_err(|e| GatewayError::Http(e.to_string()))?;

    let response = match timeout(
        Duration::from_secs(REQUEST_TIMEOUT_SECS),
        client.request(request),
    )
    .await
    {
        Ok(result) => result.map_err(|e| GatewayError::Http(e.to_string()))?,
        Err(_) => return Err(GatewayError::Timeout),
    };

    let status = response.status();
    let body_bytes = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| GatewayError::Http(e.to_string()))?;

    if !status.is_success() {
        return Err(GatewayError::Http(format!(
            "upstream returned {}: {}",
            status,
            String::from_utf8_lossy(&body_bytes)
        )));
    }

    Ok(parse_payload(&body_bytes))
}

/// JSON when the body parses as JSON, the raw text otherwise.
fn parse_payload(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
