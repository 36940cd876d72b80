use tracing::warn;

use crate::{
    dto::{format_system_time, health::HealthResponse},
    state::SharedState,
};

/// Report whether storage is reachable, pinging it when a store is installed.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.quiz_store().await {
        Some(store) => {
            if let Err(err) = state.store_call(store.health_check()).await {
                warn!(error = %err, "storage health check failed");
                return HealthResponse::new(true, format_system_time(state.now()));
            }
        }
        None => warn!("storage unavailable (degraded mode)"),
    }

    HealthResponse::new(state.is_degraded(), format_system_time(state.now()))
}
