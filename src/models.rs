use std::collections::HashMap;
use std::time::SystemTime;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::DEFAULT_CALLS_PER_SECOND;

/// One rate-limit/permission scope for calls to a set of upstream APIs.
pub struct Manager {
    pub id: Uuid,
    pub api_patterns: Vec<String>,
    pub calls_per_second: f64,
    /// Earliest time the next outbound call for this manager may start.
    pub next_slot: SystemTime,
    pub created_at: SystemTime,
}

impl Manager {
    pub fn new(api_patterns: Vec<String>) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            api_patterns,
            calls_per_second: DEFAULT_CALLS_PER_SECOND,
            next_slot: now,
            created_at: now,
        }
    }

    /// A pattern is an exact prefix, optionally ending in `*`.
    pub fn allows(&self, url: &str) -> bool {
        self.api_patterns.iter().any(|pattern| {
            let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
            url.starts_with(prefix)
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestStatus {
    Pending,
    Complete(Value),
    Error(String),
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One tracked outbound call, retained after completion so that status
/// polling stays idempotent.
pub struct RequestRecord {
    pub uuid: Uuid,
    pub manager_id: Uuid,
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub payload: Option<Value>,
    pub cache_duration: i64,
    pub client_id: Option<String>,
    pub submitted_at: SystemTime,
    pub estimated_delay: f64,
    pub status: RequestStatus,
}

pub struct CacheEntry {
    pub payload: Value,
    pub expires_at: SystemTime,
}

pub type ClientSender = UnboundedSender<warp::ws::Message>;

pub struct AppState {
    pub managers: HashMap<Uuid, Manager>,
    /// Terminal records are retained so polling stays idempotent; nothing
    /// evicts them, so a long-lived process holds one entry per submission.
    pub requests: HashMap<Uuid, RequestRecord>,
    pub cache: HashMap<String, CacheEntry>,
    /// client_id -> (connection id, sender). The connection id lets a stale
    /// disconnect leave a newer registration for the same client_id alone.
    pub clients: HashMap<String, (u64, ClientSender)>,
    pub next_connection_id: u64,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            managers: HashMap::new(),
            requests: HashMap::new(),
            cache: HashMap::new(),
            clients: HashMap::new(),
            next_connection_id: 0,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// ---- wire types ----

#[derive(Deserialize)]
pub struct InitializeBody {
    pub api_patterns: Vec<String>,
}

#[derive(Deserialize)]
pub struct RateLimitBody {
    pub manager_id: Uuid,
    pub limit: f64,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Deserialize)]
pub struct SubmitBody {
    pub manager_id: Uuid,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Seconds the response stays cached; zero or negative bypasses the cache
    /// entirely (no read, no write).
    #[serde(default)]
    pub cache_duration: i64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON body for non-GET methods, query parameters for GET.
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteManagerQuery {
    pub manager_id: Uuid,
}

#[derive(Serialize)]
pub struct SubmitReceipt {
    pub uuid: Uuid,
    pub status_url: String,
    pub estimated_delay: f64,
    pub message: String,
}

#[derive(Serialize)]
pub struct StatusReply {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReply {
    pub fn from_status(status: &RequestStatus, estimated_delay: f64) -> Self {
        match status {
            RequestStatus::Pending => Self {
                status: "pending".to_string(),
                message: Some("Your request is still being processed.".to_string()),
                estimated_delay: Some(estimated_delay),
                response: None,
                error: None,
            },
            RequestStatus::Complete(payload) => Self {
                status: "complete".to_string(),
                message: None,
                estimated_delay: None,
                response: Some(payload.clone()),
                error: None,
            },
            RequestStatus::Error(detail) => Self {
                status: "error".to_string(),
                message: None,
                estimated_delay: None,
                response: None,
                error: Some(detail.clone()),
            },
        }
    }
}

/// Push event emitted once per request reaching a terminal state.
#[derive(Serialize)]
pub struct CompletionEvent {
    pub event: String,
    pub uuid: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionEvent {
    pub fn new(uuid: Uuid, status: &RequestStatus) -> Self {
        let (status_str, response, error) = match status {
            RequestStatus::Pending => ("pending", None, None),
            RequestStatus::Complete(payload) => ("complete", Some(payload.clone()), None),
            RequestStatus::Error(detail) => ("error", None, Some(detail.clone())),
        };
        Self {
            event: "response_ready".to_string(),
            uuid,
            status: status_str.to_string(),
            response,
            error,
        }
    }
}

/// Command sent by a client over the push channel.
#[derive(Deserialize)]
pub struct ChannelCommand {
    pub event: String,
    #[serde(default)]
    pub client_id: Option<String>,
}
