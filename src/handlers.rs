use std::convert::Infallible;
use std::sync::Arc;

use hyper::{HeaderMap, StatusCode};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;
use warp::{Filter, Rejection, Reply};

use crate::errors::GatewayError;
use crate::middleware;
use crate::models::{AppState, DeleteManagerQuery, InitializeBody, RateLimitBody, SubmitBody};
use crate::services::{self, executor, notify, registry};


/// The full gateway router: health probe, the authenticated `/api` surface
/// and the unauthenticated push channel.
pub fn routes(
    state: Arc<RwLock<AppState>>,
    outbound: executor::Outbound,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let state_filter = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };
    let outbound_filter = warp::any().map(move || outbound.clone());

    let health = warp::path("health").and(warp::get()).map(|| "OK");

    let initialize = warp::path!("api" / "initialize")
        .and(warp::post())
        .and(with_auth())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(initialize_manager);

    let set_rate_limit = warp::path!("api" / "set_rate_limit")
        .and(warp::post())
        .and(with_auth())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(update_rate_limit);

    let submit = warp::path!("api" / "request")
        .and(warp::post())
        .and(with_auth())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and(outbound_filter)
        .and_then(submit_request);

    let status = warp::path!("api" / "status" / Uuid)
        .and(warp::get())
        .and(with_auth())
        .and(state_filter.clone())
        .and_then(request_status);

    let cancel = warp::path!("api" / "cancel" / Uuid)
        .and(warp::post())
        .and(with_auth())
        .and(state_filter.clone())
        .and_then(cancel_request);

    let delete = warp::path!("api" / "delete_manager")
        .and(warp::delete())
        .and(with_auth())
        .and(warp::query::<DeleteManagerQuery>())
        .and(state_filter.clone())
        .and_then(delete_manager);

    let events = warp::path!("api" / "events")
        .and(warp::ws())
        .and(state_filter)
        .map(|ws: warp::ws::Ws, state: Arc<RwLock<AppState>>| {
            ws.on_upgrade(move |socket| notify::client_channel(socket, state))
        });

    health
        .or(events)
        .or(initialize)
        .or(set_rate_limit)
        .or(submit)
        .or(status)
        .or(cancel)
        .or(delete)
        .recover(handle_rejection)
        .with(middleware::cors())
}

fn with_auth() -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::headers_cloned()
        .and_then(|headers: HeaderMap| async move {
            if services::is_authenticated(&headers) {
                Ok(())
            } else {
                Err(warp::reject::custom(GatewayError::Unauthorized))
            }
        })
        .untuple_one()
}

async fn initialize_manager(
    body: InitializeBody,
    state: Arc<RwLock<AppState>>,
) -> Result<impl Reply, Rejection> {
    let manager_id = registry::initialize(&state, body.api_patterns).await;
    Ok(warp::reply::json(&json!({
        "manager_id": manager_id,
        "message": "Manager initialized for the given API patterns.",
    })))
}

async fn update_rate_limit(
    body: RateLimitBody,
    state: Arc<RwLock<AppState>>,
) -> Result<impl Reply, Rejection> {
    registry::set_rate_limit(&state, &body.manager_id, body.limit)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&json!({ "message": "Rate limit updated." })))
}

async fn submit_request(
    body: SubmitBody,
    state: Arc<RwLock<AppState>>,
    outbound: executor::Outbound,
) -> Result<impl Reply, Rejection> {
    let receipt = executor::submit(&state, &outbound, body)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&receipt))
}

async fn request_status(uuid: Uuid, state: Arc<RwLock<AppState>>) -> Result<impl Reply, Rejection> {
    let reply = executor::get_status(&state, &uuid)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&reply))
}

async fn cancel_request(uuid: Uuid, state: Arc<RwLock<AppState>>) -> Result<impl Reply, Rejection> {
    executor::cancel(&state, &uuid)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&json!({ "message": "Request cancelled." })))
}

async fn delete_manager(
    query: DeleteManagerQuery,
    state: Arc<RwLock<AppState>>,
) -> Result<impl Reply, Rejection> {
    registry::delete_manager(&state, &query.manager_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&json!({
        "message": format!("Manager with ID {} deleted successfully.", query.manager_id),
    })))
}

/// Business-logic failures map to 4xx JSON bodies; only programming or infra
/// faults surface as 5xx.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(e) = err.find::<GatewayError>() {
        let code = match e {
            GatewayError::ManagerNotFound | GatewayError::RequestNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::RequestNotPending(_) => StatusCode::CONFLICT,
            GatewayError::RateLimitMisconfigured(_)
            | GatewayError::UnsupportedMethod(_)
            | GatewayError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            // Timeout and Http are normally recorded on the request record,
            // not rejected; they reach this handler only if a submission
            // path ever surfaces them synchronously
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, e.to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    let body = warp::reply::json(&json!({ "error": message }));
    Ok(warp::reply::with_status(body, code))
}
