use std::time::{Duration, SystemTime};

use http::Method;
use serde_json::Value;

use crate::models::{AppState, CacheEntry};

/// Cache keys are manager-agnostic: an upstream response is valid no matter
/// which manager fetched it. serde_json keeps object keys sorted, so the
/// serialized params are canonical across client-side orderings.
pub fn cache_key(method: &Method, url: &str, params: Option<&Value>) -> String {
    let params_json = params.map(|p| p.to_string()).unwrap_or_default();
    let digest = md5::compute(format!("{} {} {}", method, url, params_json));
    format!("{:x}", digest)
}

/// Stale entries are left in place for overwrite rather than pre-deleted.
pub fn lookup(state: &AppState, key: &str) -> Option<Value> {
    let entry = state.cache.get(key)?;
    if SystemTime::now() < entry.expires_at {
        Some(entry.payload.clone())
    } else {
        None
    }
}

/// A non-positive TTL bypasses the cache: the response is never entered.
/// TTLs too large to yield a representable expiry timestamp are not cached
/// either.
pub fn store(state: &mut AppState, key: &str, payload: Value, ttl_secs: i64) {
    if ttl_secs <= 0 {
        return;
    }
    let expires_at = match SystemTime::now().checked_add(Duration::from_secs(ttl_secs as u64)) {
        Some(expires_at) => expires_at,
        None => return,
    };
    state.cache.insert(key.to_string(), CacheEntry { payload, expires_at });
}
