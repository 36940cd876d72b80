use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Server wall-clock time, useful to spot client clock drift.
    pub server_time: String,
}

impl HealthResponse {
    pub fn new(degraded: bool, server_time: String) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self {
            status: status.to_string(),
            server_time,
        }
    }
}
