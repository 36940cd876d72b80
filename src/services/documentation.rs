use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the quiz arena backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::session_status,
        crate::routes::session::session_results,
        crate::routes::session::prize_winners,
        crate::routes::participant::join_session,
        crate::routes::participant::get_questions,
        crate::routes::participant::submit_answer,
        crate::routes::participant::submit_quiz,
        crate::routes::sse::session_stream,
        crate::routes::sse::admin_stream,
        crate::routes::admin::create_quiz,
        crate::routes::admin::create_session,
        crate::routes::admin::start_session,
        crate::routes::admin::end_session,
        crate::routes::admin::calculate_prizes,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::PhaseChangedEvent,
            crate::dto::sse::ParticipantFinishedEvent,
            crate::dto::sse::ResultsReadyEvent,
            crate::dao::models::SessionStatus,
            crate::dao::models::ParticipantStatus,
            crate::dao::models::PerformanceCategory,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session phase, results and prizes"),
        (name = "participants", description = "Joining, answering and submitting a quiz"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "admin", description = "Quiz authoring and lifecycle triggers"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/sessions/{id}/status",
            "/sessions/{id}/events",
            "/sessions/{id}/participants/{pid}/submit",
            "/admin/sessions/{id}/prizes",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
