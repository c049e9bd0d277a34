//! # HTTP API
//!
//! Thin axum layer over [`LeadEngine`]. Handlers validate and
//! translate; all decisions live in the engine. Engine errors map
//! onto status codes in one place ([`ApiError`]).
//!
//! [`LeadEngine`]: crate::engine::LeadEngine

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;

use crate::engine::LeadEngine;
use crate::error::LeadEngineError;

/// Build the full API router over a shared engine
pub fn router(engine: Arc<LeadEngine>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/leads", post(handlers::create_lead))
        .route("/leads/:lead_id", get(handlers::get_lead))
        .route("/leads/:lead_id/status", put(handlers::update_lead_status))
        .route(
            "/prioritization/score/:lead_id",
            get(handlers::score_lead),
        )
        .route("/prioritization/rescore", post(handlers::rescore_all))
        .route("/agents", post(handlers::upsert_agent).get(handlers::list_agents))
        .route(
            "/agents/:agent_id/availability",
            put(handlers::set_availability),
        )
        .route(
            "/agents/:agent_id/specializations",
            post(handlers::replace_specializations),
        )
        .route("/assign/:lead_id", post(handlers::assign_lead))
        .route(
            "/assign/:lead_id/accept",
            post(handlers::accept_assignment),
        )
        .route(
            "/assign/:lead_id/reject",
            post(handlers::reject_assignment),
        )
        .route("/batch-assign", post(handlers::batch_assign))
        .route("/reroute/:lead_id", post(handlers::reroute_lead))
        .route("/queues/status", get(handlers::all_queue_stats))
        .route("/queue/:queue_type/status", get(handlers::queue_status))
        .route("/queue/:queue_type/leads", get(handlers::queue_leads))
        .route("/queue/:queue_type/process", post(handlers::process_queue))
        .route("/queue/:queue_type/move", post(handlers::move_lead))
        .route("/sla-at-risk", get(handlers::sla_at_risk))
        .route("/capacity/heatmap", get(handlers::capacity_heatmap))
        .route("/capacity/forecast", get(handlers::capacity_forecast))
        .route("/experiments/create", post(handlers::create_experiment))
        .route("/experiments/active", get(handlers::active_experiments))
        .route(
            "/experiments/:experiment_id/metrics",
            get(handlers::experiment_metrics),
        )
        .route(
            "/experiments/:experiment_id/outcomes",
            post(handlers::record_outcome),
        )
        .route(
            "/experiments/:experiment_id/promote",
            post(handlers::promote_experiment),
        )
        .with_state(engine)
}

/// Engine error carried to the HTTP boundary
pub struct ApiError(pub LeadEngineError);

impl From<LeadEngineError> for ApiError {
    fn from(err: LeadEngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LeadEngineError::Validation { .. } | LeadEngineError::Experiment { .. } => {
                StatusCode::BAD_REQUEST
            }
            LeadEngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            LeadEngineError::NoCandidates { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LeadEngineError::CapacityExhausted { .. }
            | LeadEngineError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            LeadEngineError::StoreTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            LeadEngineError::Database(_)
            | LeadEngineError::Configuration { .. }
            | LeadEngineError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Handler result alias
pub type ApiResult<T> = std::result::Result<T, ApiError>;
