use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::errors::GatewayError;
use crate::models::{AppState, Manager, RequestStatus};
use crate::services::notify;

pub async fn initialize(state: &Arc<RwLock<AppState>>, api_patterns: Vec<String>) -> Uuid {
    let manager = Manager::new(api_patterns);
    let manager_id = manager.id;
    state.write().await.managers.insert(manager_id, manager);
    info!(%manager_id, "manager initialized");
    manager_id
}

pub async fn set_rate_limit(
    state: &Arc<RwLock<AppState>>,
    manager_id: &Uuid,
    limit: f64,
) -> Result<(), GatewayError> {
    // the inverse must also be representable as a Duration, or the limiter
    // could never compute the slot interval
    if !limit.is_finite() || limit <= 0.0 || Duration::try_from_secs_f64(1.0 / limit).is_err() {
        return Err(GatewayError::RateLimitMisconfigured(limit));
    }

    let mut state = state.write().await;
    let manager = state
        .managers
        .get_mut(manager_id)
        .ok_or(GatewayError::ManagerNotFound)?;
    manager.calls_per_second = limit;
    // the current window is discarded on a limit change
    manager.next_slot = SystemTime::now();
    info!(%manager_id, limit, "rate limit updated");
    Ok(())
}

/// Removes the manager and flips its still-pending requests to an error so
/// pollers never see their uuid vanish. Terminal records stay readable and
/// cache entries stay valid; both are manager-agnostic.
pub async fn delete_manager(
    state: &Arc<RwLock<AppState>>,
    manager_id: &Uuid,
) -> Result<(), GatewayError> {
    let aborted = {
        let mut state = state.write().await;
        if state.managers.remove(manager_id).is_none() {
            return Err(GatewayError::ManagerNotFound);
        }

        let mut aborted = Vec::new();
        for record in state.requests.values_mut() {
            if record.manager_id == *manager_id && !record.status.is_terminal() {
                record.status = RequestStatus::Error("manager deleted".to_string());
                aborted.push((record.uuid, record.client_id.clone(), record.status.clone()));
            }
        }
        aborted
    };

    info!(%manager_id, aborted = aborted.len(), "manager deleted");
    for (uuid, client_id, status) in &aborted {
        notify::notify_client(state, client_id.as_deref(), *uuid, status).await;
    }
    Ok(())
}
