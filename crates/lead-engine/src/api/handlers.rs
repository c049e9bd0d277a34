//! Route handlers

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use crate::agent::{Agent, AgentId};
use crate::assignment::Assignment;
use crate::api::types::{
    AvailabilityUpdate, BatchAssignRequest, ForecastQuery, LeadStatusUpdate, LeadView, LimitQuery,
    MoveRequest, ProcessRequest, ProcessResponse, RerouteRequest, RescoreResponse, ScoreView,
    SlaQuery, SpecializationUpdate,
};
use crate::api::{ApiError, ApiResult};
use crate::capacity::{AgentUtilization, CapacityForecast};
use crate::engine::{EngineStats, LeadEngine, LeadIntake, NewAgent, NewLead};
use crate::experiment::{Experiment, NewExperiment, OutcomeReport, PromotionDecision};
use crate::lead::{Lead, LeadId};
use crate::queue::{QueueEntry, QueueStats, QueueType};
use crate::routing::{BatchRouteReport, RerouteOutcome, RouteDecision, RouteRequest};
use crate::scoring;

type Engine = State<Arc<LeadEngine>>;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn stats(State(engine): Engine) -> ApiResult<Json<EngineStats>> {
    Ok(Json(engine.stats().await?))
}

// --- leads ---

pub async fn create_lead(
    State(engine): Engine,
    Json(new): Json<NewLead>,
) -> ApiResult<(StatusCode, Json<LeadIntake>)> {
    let intake = engine.ingest_lead(new).await?;
    Ok((StatusCode::CREATED, Json(intake)))
}

pub async fn get_lead(
    State(engine): Engine,
    Path(lead_id): Path<String>,
) -> ApiResult<Json<LeadView>> {
    let lead = engine.get_lead(&LeadId(lead_id)).await?;
    let sla = scoring::sla::status(&lead, Utc::now());
    Ok(Json(LeadView { lead, sla }))
}

pub async fn update_lead_status(
    State(engine): Engine,
    Path(lead_id): Path<String>,
    Json(update): Json<LeadStatusUpdate>,
) -> ApiResult<StatusCode> {
    engine
        .update_lead_status(&LeadId(lead_id), update.status)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- prioritization ---

pub async fn score_lead(
    State(engine): Engine,
    Path(lead_id): Path<String>,
) -> ApiResult<Json<ScoreView>> {
    let lead_id = LeadId(lead_id);
    let lead = engine.get_lead(&lead_id).await?;
    let outcome = engine.score_of(&lead_id).await?;
    let sla = scoring::sla::status(&lead, Utc::now());
    Ok(Json(ScoreView { outcome, sla }))
}

pub async fn rescore_all(State(engine): Engine) -> ApiResult<Json<RescoreResponse>> {
    let changed = engine.rescore_all().await?;
    Ok(Json(RescoreResponse { changed }))
}

// --- agents ---

pub async fn upsert_agent(
    State(engine): Engine,
    Json(new): Json<NewAgent>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    let agent = engine.upsert_agent(new).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn list_agents(State(engine): Engine) -> ApiResult<Json<Vec<Agent>>> {
    Ok(Json(engine.list_agents().await?))
}

pub async fn set_availability(
    State(engine): Engine,
    Path(agent_id): Path<String>,
    Json(update): Json<AvailabilityUpdate>,
) -> ApiResult<StatusCode> {
    engine
        .set_agent_availability(&AgentId(agent_id), update.status, update.max_capacity)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn replace_specializations(
    State(engine): Engine,
    Path(agent_id): Path<String>,
    Json(update): Json<SpecializationUpdate>,
) -> ApiResult<StatusCode> {
    engine
        .replace_specializations(&AgentId(agent_id), update.specializations)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- routing ---

pub async fn assign_lead(
    State(engine): Engine,
    Path(lead_id): Path<String>,
    request: Option<Json<RouteRequest>>,
) -> ApiResult<Json<RouteDecision>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(engine.assign(&LeadId(lead_id), request).await?))
}

pub async fn batch_assign(
    State(engine): Engine,
    Json(request): Json<BatchAssignRequest>,
) -> ApiResult<Json<BatchRouteReport>> {
    let lead_ids = request.lead_ids.into_iter().map(LeadId).collect();
    Ok(Json(engine.batch_assign(lead_ids, request.strategy).await?))
}

pub async fn reroute_lead(
    State(engine): Engine,
    Path(lead_id): Path<String>,
    request: Option<Json<RerouteRequest>>,
) -> ApiResult<Json<RerouteOutcome>> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "unspecified".to_string());
    Ok(Json(engine.reroute(&LeadId(lead_id), &reason).await?))
}

pub async fn accept_assignment(
    State(engine): Engine,
    Path(lead_id): Path<String>,
) -> ApiResult<Json<Assignment>> {
    Ok(Json(engine.accept_assignment(&LeadId(lead_id)).await?))
}

pub async fn reject_assignment(
    State(engine): Engine,
    Path(lead_id): Path<String>,
    request: Option<Json<RerouteRequest>>,
) -> ApiResult<Json<Assignment>> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "unspecified".to_string());
    Ok(Json(
        engine.reject_assignment(&LeadId(lead_id), &reason).await?,
    ))
}

// --- queues ---

fn parse_queue(raw: &str) -> ApiResult<QueueType> {
    QueueType::from_str(raw).map_err(ApiError)
}

pub async fn all_queue_stats(State(engine): Engine) -> ApiResult<Json<Vec<QueueStats>>> {
    Ok(Json(engine.queue_stats().await?))
}

pub async fn queue_status(
    State(engine): Engine,
    Path(queue_type): Path<String>,
) -> ApiResult<Json<QueueStats>> {
    let queue = parse_queue(&queue_type)?;
    let stats = engine.queue_stats().await?;
    let entry = stats
        .into_iter()
        .find(|s| s.queue == queue)
        .ok_or_else(|| ApiError(crate::error::LeadEngineError::not_found("queue", queue_type)))?;
    Ok(Json(entry))
}

pub async fn queue_leads(
    State(engine): Engine,
    Path(queue_type): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<QueueEntry>>> {
    let queue = parse_queue(&queue_type)?;
    let limit = query.limit.unwrap_or(50);
    Ok(Json(engine.queue_leads(queue, limit).await?))
}

pub async fn process_queue(
    State(engine): Engine,
    Path(queue_type): Path<String>,
    request: Option<Json<ProcessRequest>>,
) -> ApiResult<Json<ProcessResponse>> {
    let queue = parse_queue(&queue_type)?;
    let max = request.and_then(|Json(r)| r.max);
    let assigned = engine.process_queue(queue, max).await?;
    Ok(Json(ProcessResponse { assigned }))
}

pub async fn move_lead(
    State(engine): Engine,
    Path(queue_type): Path<String>,
    Json(request): Json<MoveRequest>,
) -> ApiResult<StatusCode> {
    let queue = parse_queue(&queue_type)?;
    let reason = request.reason.as_deref().unwrap_or("unspecified");
    engine
        .move_lead(&LeadId(request.lead_id), queue, reason)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn sla_at_risk(
    State(engine): Engine,
    Query(query): Query<SlaQuery>,
) -> ApiResult<Json<Vec<Lead>>> {
    Ok(Json(engine.sla_at_risk(query.threshold).await?))
}

// --- capacity ---

pub async fn capacity_heatmap(State(engine): Engine) -> ApiResult<Json<Vec<AgentUtilization>>> {
    Ok(Json(engine.capacity_heatmap().await?))
}

pub async fn capacity_forecast(
    State(engine): Engine,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<Json<CapacityForecast>> {
    Ok(Json(engine.capacity_forecast(query.hours.unwrap_or(8)).await?))
}

// --- experiments ---

pub async fn create_experiment(
    State(engine): Engine,
    Json(spec): Json<NewExperiment>,
) -> ApiResult<(StatusCode, Json<Experiment>)> {
    let experiment = engine.create_experiment(spec).await?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

pub async fn active_experiments(State(engine): Engine) -> ApiResult<Json<Vec<Experiment>>> {
    Ok(Json(engine.active_experiments().await?))
}

pub async fn experiment_metrics(
    State(engine): Engine,
    Path(experiment_id): Path<String>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(engine.experiment(&experiment_id).await?))
}

pub async fn record_outcome(
    State(engine): Engine,
    Path(experiment_id): Path<String>,
    Json(outcome): Json<OutcomeReport>,
) -> ApiResult<StatusCode> {
    engine
        .record_experiment_outcome(&experiment_id, outcome)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn promote_experiment(
    State(engine): Engine,
    Path(experiment_id): Path<String>,
) -> ApiResult<Json<PromotionDecision>> {
    Ok(Json(engine.promote_experiment(&experiment_id).await?))
}
