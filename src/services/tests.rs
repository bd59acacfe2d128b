use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::Method;
use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::errors::GatewayError;
use crate::models::{AppState, CacheEntry, Manager, RequestRecord, RequestStatus, SubmitBody};
use crate::services::{cache, executor, is_authenticated, limiter, notify, registry};

fn state_with_manager(limit: f64) -> (AppState, Uuid) {
    let mut state = AppState::new();
    let mut manager = Manager::new(vec!["http://upstream/".to_string()]);
    manager.calls_per_second = limit;
    let manager_id = manager.id;
    state.managers.insert(manager_id, manager);
    (state, manager_id)
}

fn pending_record(manager_id: Uuid) -> RequestRecord {
    RequestRecord {
        uuid: Uuid::new_v4(),
        manager_id,
        url: "http://upstream/ping".to_string(),
        method: Method::GET,
        headers: HashMap::new(),
        payload: None,
        cache_duration: 0,
        client_id: None,
        submitted_at: SystemTime::now(),
        estimated_delay: 0.0,
        status: RequestStatus::Pending,
    }
}

fn submit_body(manager_id: Uuid, url: &str) -> SubmitBody {
    SubmitBody {
        manager_id,
        url: url.to_string(),
        method: "GET".to_string(),
        cache_duration: 0,
        headers: HashMap::new(),
        payload: None,
        client_id: None,
    }
}

// ---- limiter ----

#[test]
fn limiter_first_slot_is_immediate() {
    let (mut state, manager_id) = state_with_manager(1.0);
    let wait = limiter::reserve(&mut state, &manager_id).unwrap();
    assert!(wait.is_zero());
}

#[test]
fn limiter_spaces_slots_by_interval() {
    let (mut state, manager_id) = state_with_manager(1.0);
    let first = limiter::reserve(&mut state, &manager_id).unwrap();
    let second = limiter::reserve(&mut state, &manager_id).unwrap();
    let third = limiter::reserve(&mut state, &manager_id).unwrap();
    assert!(first.is_zero());
    assert!(second.as_secs_f64() > 0.9 && second.as_secs_f64() < 1.1);
    assert!(third.as_secs_f64() > 1.9 && third.as_secs_f64() < 2.1);
}

#[test]
fn limiter_supports_fractional_limits() {
    // 0.5 calls per second means one call every two seconds
    let (mut state, manager_id) = state_with_manager(0.5);
    limiter::reserve(&mut state, &manager_id).unwrap();
    let second = limiter::reserve(&mut state, &manager_id).unwrap();
    assert!(second.as_secs_f64() > 1.9 && second.as_secs_f64() < 2.1);
}

#[test]
fn limiter_rejects_unrepresentable_interval() {
    // 1e-30 calls per second would need an interval beyond Duration's range
    let (mut state, manager_id) = state_with_manager(1e-30);
    let result = limiter::reserve(&mut state, &manager_id);
    assert!(matches!(result, Err(GatewayError::RateLimitMisconfigured(_))));
}

#[test]
fn limiter_rejects_unknown_manager() {
    let mut state = AppState::new();
    let result = limiter::reserve(&mut state, &Uuid::new_v4());
    assert!(matches!(result, Err(GatewayError::ManagerNotFound)));
}

// ---- registry ----

#[tokio::test]
async fn set_rate_limit_resets_window() {
    let (inner, manager_id) = state_with_manager(1.0);
    let state = Arc::new(RwLock::new(inner));

    {
        let mut guard = state.write().await;
        limiter::reserve(&mut guard, &manager_id).unwrap();
        let deferred = limiter::reserve(&mut guard, &manager_id).unwrap();
        assert!(!deferred.is_zero());
    }

    registry::set_rate_limit(&state, &manager_id, 4.0).await.unwrap();

    let mut guard = state.write().await;
    let wait = limiter::reserve(&mut guard, &manager_id).unwrap();
    assert!(wait.is_zero());
}

#[tokio::test]
async fn set_rate_limit_rejects_non_positive_values() {
    let (inner, manager_id) = state_with_manager(1.0);
    let state = Arc::new(RwLock::new(inner));

    for bad in [0.0, -1.0, f64::NAN] {
        let result = registry::set_rate_limit(&state, &manager_id, bad).await;
        assert!(matches!(result, Err(GatewayError::RateLimitMisconfigured(_))));
    }
}

#[tokio::test]
async fn set_rate_limit_rejects_vanishingly_small_values() {
    let (inner, manager_id) = state_with_manager(1.0);
    let state = Arc::new(RwLock::new(inner));
    let result = registry::set_rate_limit(&state, &manager_id, 1e-30).await;
    assert!(matches!(result, Err(GatewayError::RateLimitMisconfigured(_))));
}

#[tokio::test]
async fn set_rate_limit_rejects_unknown_manager() {
    let state = Arc::new(RwLock::new(AppState::new()));
    let result = registry::set_rate_limit(&state, &Uuid::new_v4(), 1.0).await;
    assert!(matches!(result, Err(GatewayError::ManagerNotFound)));
}

#[tokio::test]
async fn delete_manager_flips_pending_requests_only() {
    let (mut inner, manager_id) = state_with_manager(1.0);
    let pending = pending_record(manager_id);
    let pending_uuid = pending.uuid;
    let mut finished = pending_record(manager_id);
    finished.status = RequestStatus::Complete(json!({"ok": true}));
    let finished_uuid = finished.uuid;
    inner.requests.insert(pending_uuid, pending);
    inner.requests.insert(finished_uuid, finished);
    let state = Arc::new(RwLock::new(inner));

    registry::delete_manager(&state, &manager_id).await.unwrap();

    let guard = state.read().await;
    assert!(!guard.managers.contains_key(&manager_id));
    assert_eq!(
        guard.requests[&pending_uuid].status,
        RequestStatus::Error("manager deleted".to_string())
    );
    assert_eq!(
        guard.requests[&finished_uuid].status,
        RequestStatus::Complete(json!({"ok": true}))
    );
}

#[tokio::test]
async fn delete_manager_rejects_unknown_manager() {
    let state = Arc::new(RwLock::new(AppState::new()));
    let result = registry::delete_manager(&state, &Uuid::new_v4()).await;
    assert!(matches!(result, Err(GatewayError::ManagerNotFound)));
}

// ---- cache ----

#[test]
fn cache_key_ignores_parameter_ordering() {
    let mut forward = Map::new();
    forward.insert("action".to_string(), json!("query"));
    forward.insert("format".to_string(), json!("json"));
    let mut backward = Map::new();
    backward.insert("format".to_string(), json!("json"));
    backward.insert("action".to_string(), json!("query"));

    let url = "http://upstream/w/api.php";
    let a = cache::cache_key(&Method::GET, url, Some(&Value::Object(forward)));
    let b = cache::cache_key(&Method::GET, url, Some(&Value::Object(backward)));
    assert_eq!(a, b);

    let other = cache::cache_key(&Method::GET, url, Some(&json!({"action": "parse"})));
    assert_ne!(a, other);
}

#[test]
fn cache_round_trip() {
    let mut state = AppState::new();
    let key = cache::cache_key(&Method::GET, "http://upstream/ping", None);
    cache::store(&mut state, &key, json!({"pong": true}), 60);
    assert_eq!(cache::lookup(&state, &key), Some(json!({"pong": true})));
}

#[test]
fn cache_expired_entry_misses_but_stays_for_overwrite() {
    let mut state = AppState::new();
    state.cache.insert(
        "stale".to_string(),
        CacheEntry {
            payload: json!("old"),
            expires_at: SystemTime::now() - Duration::from_secs(1),
        },
    );
    assert_eq!(cache::lookup(&state, "stale"), None);
    assert_eq!(state.cache.len(), 1);
}

#[test]
fn cache_skips_ttl_beyond_representable_time() {
    let mut state = AppState::new();
    cache::store(&mut state, "k", json!(1), i64::MAX);
    assert!(state.cache.is_empty());
}

#[test]
fn cache_bypassed_for_non_positive_ttl() {
    let mut state = AppState::new();
    cache::store(&mut state, "k", json!(1), 0);
    cache::store(&mut state, "k", json!(1), -5);
    assert!(state.cache.is_empty());
}

// ---- executor ----

#[tokio::test]
async fn submit_rejects_unknown_manager() {
    let state = Arc::new(RwLock::new(AppState::new()));
    let outbound = executor::Outbound::new();
    let result = executor::submit(
        &state,
        &outbound,
        submit_body(Uuid::new_v4(), "http://upstream/ping"),
    )
    .await;
    assert!(matches!(result, Err(GatewayError::ManagerNotFound)));
}

#[tokio::test]
async fn submit_rejects_url_outside_patterns() {
    let (inner, manager_id) = state_with_manager(1.0);
    let state = Arc::new(RwLock::new(inner));
    let outbound = executor::Outbound::new();
    let result = executor::submit(
        &state,
        &outbound,
        submit_body(manager_id, "http://somewhere-else/ping"),
    )
    .await;
    assert!(matches!(result, Err(GatewayError::Forbidden(_))));
}

#[tokio::test]
async fn submit_rejects_unknown_method() {
    let (inner, manager_id) = state_with_manager(1.0);
    let state = Arc::new(RwLock::new(inner));
    let outbound = executor::Outbound::new();
    let mut body = submit_body(manager_id, "http://upstream/ping");
    body.method = "FR OB".to_string();
    let result = executor::submit(&state, &outbound, body).await;
    assert!(matches!(result, Err(GatewayError::UnsupportedMethod(_))));
}

#[tokio::test]
async fn cache_hit_completes_without_an_upstream_call() {
    let (mut inner, manager_id) = state_with_manager(1.0);
    // pre-seed the cache; the URL is unresolvable, so an actual call would fail
    let key = cache::cache_key(&Method::GET, "http://upstream/ping", None);
    cache::store(&mut inner, &key, json!({"pong": true}), 60);
    let state = Arc::new(RwLock::new(inner));
    let outbound = executor::Outbound::new();

    let mut body = submit_body(manager_id, "http://upstream/ping");
    body.cache_duration = 60;
    let receipt = executor::submit(&state, &outbound, body).await.unwrap();
    assert_eq!(receipt.estimated_delay, 0.0);

    let reply = executor::get_status(&state, &receipt.uuid).await.unwrap();
    assert_eq!(reply.status, "complete");
    assert_eq!(reply.response, Some(json!({"pong": true})));
}

#[tokio::test]
async fn status_rejects_unknown_uuid() {
    let state = Arc::new(RwLock::new(AppState::new()));
    let result = executor::get_status(&state, &Uuid::new_v4()).await;
    assert!(matches!(result, Err(GatewayError::RequestNotFound(_))));
}

#[tokio::test]
async fn cancel_is_only_valid_while_pending() {
    let (mut inner, manager_id) = state_with_manager(1.0);
    // keep the execution task asleep for the whole test
    inner.managers.get_mut(&manager_id).unwrap().next_slot =
        SystemTime::now() + Duration::from_secs(30);
    let state = Arc::new(RwLock::new(inner));
    let outbound = executor::Outbound::new();

    let receipt = executor::submit(
        &state,
        &outbound,
        submit_body(manager_id, "http://upstream/ping"),
    )
    .await
    .unwrap();
    assert!(receipt.estimated_delay > 0.0);

    executor::cancel(&state, &receipt.uuid).await.unwrap();
    let reply = executor::get_status(&state, &receipt.uuid).await.unwrap();
    assert_eq!(reply.status, "error");
    assert_eq!(reply.error, Some("cancelled by caller".to_string()));

    let again = executor::cancel(&state, &receipt.uuid).await;
    assert!(matches!(again, Err(GatewayError::RequestNotPending(_))));
}

// ---- notify ----

#[tokio::test]
async fn notify_delivers_to_registered_client() {
    let state = Arc::new(RwLock::new(AppState::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    notify::register_client(&state, "client-1", 1, tx).await;

    let uuid = Uuid::new_v4();
    let status = RequestStatus::Complete(json!({"pong": true}));
    notify::notify_client(&state, Some("client-1"), uuid, &status).await;

    let message = rx.recv().await.expect("event delivered");
    let event: Value = serde_json::from_str(message.to_str().unwrap()).unwrap();
    assert_eq!(event["event"], "response_ready");
    assert_eq!(event["status"], "complete");
    assert_eq!(event["uuid"], json!(uuid));
    assert_eq!(event["response"], json!({"pong": true}));
}

#[tokio::test]
async fn reregistration_replaces_binding_and_survives_stale_disconnect() {
    let state = Arc::new(RwLock::new(AppState::new()));
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    notify::register_client(&state, "client-1", 1, old_tx).await;
    notify::register_client(&state, "client-1", 2, new_tx).await;

    // the old connection closing must not tear down the new binding
    notify::unregister_connection(&state, 1).await;
    assert_eq!(state.read().await.clients.len(), 1);

    let uuid = Uuid::new_v4();
    notify::notify_client(&state, Some("client-1"), uuid, &RequestStatus::Error("x".into())).await;
    assert!(new_rx.recv().await.is_some());
    assert!(old_rx.try_recv().is_err());
}

// ---- auth ----

#[test]
fn bearer_token_authentication() {
    let mut headers = HeaderMap::new();

    headers.insert(AUTHORIZATION, "Invalid".parse().unwrap());
    assert!(!is_authenticated(&headers));

    headers.insert(AUTHORIZATION, "Bearer invalid-token".parse().unwrap());
    assert!(!is_authenticated(&headers));

    headers.insert(AUTHORIZATION, "Bearer example-token".parse().unwrap());
    assert!(is_authenticated(&headers));
}
