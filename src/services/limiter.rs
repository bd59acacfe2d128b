use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::errors::GatewayError;
use crate::models::AppState;

/// Reserves the manager's next execution slot and returns how long the caller
/// must wait before starting the call; zero means the call may run now.
///
/// Slots are spaced `1 / calls_per_second` apart, so fractional limits work
/// (0.5 means one call every two seconds) and slots are handed out in
/// submission order. The reservation itself is the counter increment: callers
/// must not reserve twice for one request.
pub fn reserve(state: &mut AppState, manager_id: &Uuid) -> Result<Duration, GatewayError> {
    let manager = state
        .managers
        .get_mut(manager_id)
        .ok_or(GatewayError::ManagerNotFound)?;

    let now = SystemTime::now();
    // a limit so small that its interval cannot be a Duration is invalid
    let interval = Duration::try_from_secs_f64(1.0 / manager.calls_per_second)
        .map_err(|_| GatewayError::RateLimitMisconfigured(manager.calls_per_second))?;
    let wait = manager
        .next_slot
        .duration_since(now)
        .unwrap_or(Duration::ZERO);

    manager.next_slot = if wait.is_zero() {
        now + interval
    } else {
        manager.next_slot + interval
    };

    Ok(wait)
}
