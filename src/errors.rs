use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Manager not found for the given ID")]
    ManagerNotFound,
    #[error("URL not allowed for this manager: {0}")]
    Forbidden(String),
    #[error("Request ID not found: {0}")]
    RequestNotFound(Uuid),
    #[error("Request {0} is no longer pending")]
    RequestNotPending(Uuid),
    #[error("A valid positive rate limit is required, got {0}")]
    RateLimitMisconfigured(f64),
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
    #[error("HTTP Error: {0}")]
    Http(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Unauthorized")]
    Unauthorized,
}

impl warp::reject::Reject for GatewayError {}
