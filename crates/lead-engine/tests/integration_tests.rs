//! End-to-end tests over the engine facade with an in-memory SQLite
//! store

use std::sync::Arc;

use serial_test::serial;

use lead_engine::database::{LeadStore, SqliteStore};
use lead_engine::engine::{LeadEngine, NewAgent, NewLead};
use lead_engine::experiment::{
    ExperimentController, NewExperiment, NewVariant, OutcomeReport, PromotionDecision,
    SuccessMetric,
};
use lead_engine::lead::{LeadDetails, LeadId, LeadSource, LeadTier};
use lead_engine::prelude::*;
use lead_engine::routing::{RerouteOutcome, RouteRequest, RoutingStrategy};

async fn engine() -> LeadEngine {
    engine_with(LeadEngineConfig::default()).await
}

async fn engine_with(config: LeadEngineConfig) -> LeadEngine {
    let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
    LeadEngine::with_store(config, store).expect("engine")
}

fn hot_lead(id: &str) -> NewLead {
    NewLead {
        id: Some(id.to_string()),
        insurance_line: "auto".to_string(),
        source: LeadSource::Referral,
        city: Some("Austin".to_string()),
        state: Some("TX".to_string()),
        preferred_language: Some("en".to_string()),
        details: LeadDetails {
            email: Some("p@example.com".to_string()),
            phone: Some("555-0100".to_string()),
            engagement_score: Some(90.0),
            stated_budget: Some(1_800.0),
            purchase_timeline_days: Some(5),
            knowledge_level: Some(4),
            competing_quotes: Some(0),
            existing_policies: 1,
        },
    }
}

fn cold_lead(id: &str) -> NewLead {
    NewLead {
        id: Some(id.to_string()),
        insurance_line: "auto".to_string(),
        source: LeadSource::WebForm,
        city: None,
        state: None,
        preferred_language: None,
        details: LeadDetails {
            email: Some("c@example.com".to_string()),
            phone: Some("555-0101".to_string()),
            engagement_score: Some(30.0),
            ..LeadDetails::default()
        },
    }
}

fn auto_agent(id: &str, max_capacity: u32, rating: f64) -> NewAgent {
    let mut spec = Specialization::new("auto", "individual", 4);
    spec.languages = vec!["en".to_string()];
    NewAgent {
        id: id.to_string(),
        name: format!("Agent {id}"),
        max_capacity,
        specializations: vec![spec],
        rating,
        conversion_rate: 0.25,
        avg_response_minutes: 8.0,
        city: Some("Austin".to_string()),
        state: Some("TX".to_string()),
    }
}

#[tokio::test]
async fn hot_lead_scores_hot_and_lands_in_hot_queue() {
    let engine = engine().await;
    let intake = engine.ingest_lead(hot_lead("l1")).await.unwrap();

    assert_eq!(intake.lead.tier, LeadTier::Hot);
    assert!(intake.lead.quality_score >= 75.0);
    assert_eq!(intake.queue, Some(QueueType::Hot));

    // Hot SLA window is one hour.
    let minutes = (intake.lead.sla_deadline - intake.lead.created_at).num_minutes();
    assert_eq!(minutes, 60);
}

#[tokio::test]
async fn greedy_route_assigns_best_agent_and_reserves_capacity() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("strong", 10, 4.9)).await.unwrap();
    engine.upsert_agent(auto_agent("weak", 10, 3.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();

    let decision = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    assert!(!decision.already_assigned);
    assert_eq!(decision.assignment.agent_id, AgentId::from("strong"));
    assert_eq!(decision.assignment.status, AssignmentStatus::Pending);

    let agent = engine.get_agent(&AgentId::from("strong")).await.unwrap();
    assert_eq!(agent.current_capacity, 1);

    // The lead now waits on the agent.
    let entries = engine.queue_leads(QueueType::Waiting, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].lead_id, LeadId::from("l1"));
}

#[tokio::test]
async fn routing_is_idempotent_per_lead() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("a1", 10, 4.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();

    let first = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    let second = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();

    assert!(second.already_assigned);
    assert_eq!(first.assignment.id, second.assignment.id);

    // No double reservation.
    let agent = engine.get_agent(&AgentId::from("a1")).await.unwrap();
    assert_eq!(agent.current_capacity, 1);
}

#[tokio::test]
async fn saturated_agents_exhaust_capacity_and_lead_stays_queued() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("a1", 1, 4.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine.ingest_lead(hot_lead("l2")).await.unwrap();

    engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    let err = engine
        .assign(&LeadId::from("l2"), RouteRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LeadEngineError::CapacityExhausted { .. }));

    // The unrouted lead is still offered by the hot queue.
    let hot = engine.queue_leads(QueueType::Hot, 10).await.unwrap();
    assert_eq!(hot.len(), 1);
    assert_eq!(hot[0].lead_id, LeadId::from("l2"));
}

#[tokio::test]
async fn no_capable_agent_means_no_candidates() {
    let engine = engine().await;
    let mut life_only = auto_agent("a1", 5, 4.0);
    life_only.specializations = vec![Specialization::new("life", "individual", 5)];
    engine.upsert_agent(life_only).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();

    let err = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LeadEngineError::NoCandidates { .. }));
}

#[tokio::test]
async fn manual_routing_honors_the_operator_and_force_flag() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("picked", 1, 2.0)).await.unwrap();
    engine.upsert_agent(auto_agent("better", 10, 5.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine.ingest_lead(hot_lead("l2")).await.unwrap();

    let decision = engine
        .assign(
            &LeadId::from("l1"),
            RouteRequest {
                strategy: Some(RoutingStrategy::Manual),
                preferred_agent: Some(AgentId::from("picked")),
                force: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(decision.assignment.agent_id, AgentId::from("picked"));

    // Same agent again without force fails; with force it goes over max.
    let err = engine
        .assign(
            &LeadId::from("l2"),
            RouteRequest {
                strategy: Some(RoutingStrategy::Manual),
                preferred_agent: Some(AgentId::from("picked")),
                force: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LeadEngineError::CapacityExhausted { .. }));

    let forced = engine
        .assign(
            &LeadId::from("l2"),
            RouteRequest {
                strategy: Some(RoutingStrategy::Manual),
                preferred_agent: Some(AgentId::from("picked")),
                force: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(forced.assignment.agent_id, AgentId::from("picked"));

    let agent = engine.get_agent(&AgentId::from("picked")).await.unwrap();
    assert_eq!(agent.current_capacity, 2);
    assert_eq!(agent.max_capacity, 1);
}

#[tokio::test]
async fn reroute_releases_previous_agent_and_excludes_it() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("first", 10, 4.9)).await.unwrap();
    engine.upsert_agent(auto_agent("second", 10, 3.5)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();

    let original = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    assert_eq!(original.assignment.agent_id, AgentId::from("first"));

    let outcome = engine
        .reroute(&LeadId::from("l1"), "agent unresponsive")
        .await
        .unwrap();
    let RerouteOutcome::Reassigned { assignment } = outcome else {
        panic!("expected immediate reassignment");
    };
    assert_eq!(assignment.agent_id, AgentId::from("second"));

    let first = engine.get_agent(&AgentId::from("first")).await.unwrap();
    assert_eq!(first.current_capacity, 0);
    assert!(first.last_released_at.is_some());
    let second = engine.get_agent(&AgentId::from("second")).await.unwrap();
    assert_eq!(second.current_capacity, 1);
}

#[tokio::test]
async fn reroute_with_no_alternative_parks_in_reassignment_queue() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("only", 5, 4.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();

    let outcome = engine.reroute(&LeadId::from("l1"), "complaint").await.unwrap();
    assert!(matches!(outcome, RerouteOutcome::Queued { .. }));

    let parked = engine
        .queue_leads(QueueType::Reassignment, 10)
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);
    // Capacity on the only agent was still released.
    let only = engine.get_agent(&AgentId::from("only")).await.unwrap();
    assert_eq!(only.current_capacity, 0);
}

#[tokio::test]
async fn fuzzy_line_match_routes_to_compound_specializations() {
    let engine = engine().await;
    let mut compound = auto_agent("a1", 5, 4.0);
    let mut spec = Specialization::new("Auto & Motorcycle", "individual", 4);
    spec.languages = vec!["en".to_string()];
    compound.specializations = vec![spec];
    engine.upsert_agent(compound).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();

    let decision = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    assert_eq!(decision.assignment.agent_id, AgentId::from("a1"));
}

#[tokio::test]
async fn accepted_assignment_holds_capacity_until_the_lead_closes() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("a1", 5, 4.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();

    let accepted = engine.accept_assignment(&LeadId::from("l1")).await.unwrap();
    assert_eq!(accepted.status, AssignmentStatus::Accepted);

    // First contact: accepting a fresh lead advances it.
    let lead = engine.get_lead(&LeadId::from("l1")).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Contacted);

    // Capacity stays reserved while the agent works the lead, and the
    // accepted assignment still makes routing idempotent.
    let agent = engine.get_agent(&AgentId::from("a1")).await.unwrap();
    assert_eq!(agent.current_capacity, 1);
    let again = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    assert!(again.already_assigned);
    assert_eq!(again.assignment.id, accepted.id);

    // Closing the lead releases the slot; a second close is refused so
    // it cannot release twice.
    engine
        .update_lead_status(&LeadId::from("l1"), LeadStatus::Converted)
        .await
        .unwrap();
    let agent = engine.get_agent(&AgentId::from("a1")).await.unwrap();
    assert_eq!(agent.current_capacity, 0);
    assert!(engine
        .update_lead_status(&LeadId::from("l1"), LeadStatus::Lost)
        .await
        .is_err());
    let agent = engine.get_agent(&AgentId::from("a1")).await.unwrap();
    assert_eq!(agent.current_capacity, 0);
}

#[tokio::test]
async fn rejected_assignment_releases_capacity_and_parks_the_lead() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("a1", 5, 4.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();

    let rejected = engine
        .reject_assignment(&LeadId::from("l1"), "outside coverage area")
        .await
        .unwrap();
    assert_eq!(rejected.status, AssignmentStatus::Rejected);

    let agent = engine.get_agent(&AgentId::from("a1")).await.unwrap();
    assert_eq!(agent.current_capacity, 0);
    let parked = engine
        .queue_leads(QueueType::Reassignment, 10)
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].lead_id, LeadId::from("l1"));

    // Rejecting twice fails: the assignment is no longer pending.
    assert!(engine
        .reject_assignment(&LeadId::from("l1"), "again")
        .await
        .is_err());
}

#[tokio::test]
async fn expiry_sweep_releases_capacity_and_requeues_the_lead() {
    let mut config = LeadEngineConfig::default();
    config.routing.assignment_expiry_hours = 0;
    let engine = engine_with(config).await;
    engine.upsert_agent(auto_agent("a1", 5, 4.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();

    let expired = engine.expire_assignments().await.unwrap();
    assert_eq!(expired, 1);

    // The slot is free again and the lead is back in rotation.
    let agent = engine.get_agent(&AgentId::from("a1")).await.unwrap();
    assert_eq!(agent.current_capacity, 0);
    let parked = engine
        .queue_leads(QueueType::Reassignment, 10)
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].lead_id, LeadId::from("l1"));

    // The expired assignment no longer blocks routing; a fresh one is
    // created.
    let second = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    assert!(!second.already_assigned);

    // Nothing left to expire after the fresh assignment's own window
    // lapses and is swept.
    let expired = engine.expire_assignments().await.unwrap();
    assert_eq!(expired, 1);
}

#[tokio::test]
async fn queue_sweep_drains_hot_queue_until_capacity_runs_out() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("a1", 2, 4.0)).await.unwrap();
    for i in 0..3 {
        engine.ingest_lead(hot_lead(&format!("l{i}"))).await.unwrap();
    }

    let assigned = engine.process_queue(QueueType::Hot, Some(10)).await.unwrap();
    assert_eq!(assigned, 2);

    let hot = engine.queue_leads(QueueType::Hot, 10).await.unwrap();
    assert_eq!(hot.len(), 1);
    let waiting = engine.queue_leads(QueueType::Waiting, 10).await.unwrap();
    assert_eq!(waiting.len(), 2);
}

#[tokio::test]
async fn batch_optimal_maximizes_total_match_score() {
    let engine = engine().await;
    // One slot each; the strong agent should take the lead, the weak
    // agent the other, rather than both leads fighting over one agent.
    engine.upsert_agent(auto_agent("strong", 1, 5.0)).await.unwrap();
    engine.upsert_agent(auto_agent("weak", 1, 2.5)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine.ingest_lead(hot_lead("l2")).await.unwrap();

    let report = engine
        .batch_assign(
            vec![LeadId::from("l1"), LeadId::from("l2")],
            Some(RoutingStrategy::Optimal),
        )
        .await
        .unwrap();

    assert_eq!(report.routed.len(), 2);
    assert!(report.failures.is_empty());
    let agents: Vec<&str> = report
        .routed
        .iter()
        .map(|a| a.agent_id.0.as_str())
        .collect();
    assert!(agents.contains(&"strong"));
    assert!(agents.contains(&"weak"));
}

#[tokio::test]
async fn sla_risk_report_excludes_assigned_leads() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("a1", 5, 4.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine.ingest_lead(hot_lead("l2")).await.unwrap();

    // Hot leads have a 60-minute window, so a 120-minute horizon
    // catches both.
    let at_risk = engine.sla_at_risk(Some(120)).await.unwrap();
    assert_eq!(at_risk.len(), 2);

    engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    let at_risk = engine.sla_at_risk(Some(120)).await.unwrap();
    assert_eq!(at_risk.len(), 1);
    assert_eq!(at_risk[0].id, LeadId::from("l2"));
}

#[tokio::test]
async fn rescoring_moves_leads_between_queues() {
    let engine = engine().await;
    let intake = engine.ingest_lead(cold_lead("l1")).await.unwrap();
    assert!(intake.lead.tier < LeadTier::Hot);

    // Scoring inputs have not changed, so nothing should move.
    let changed = engine.rescore_all().await.unwrap();
    assert_eq!(changed, 0);
}

#[tokio::test]
async fn capacity_heatmap_and_forecast_reflect_load() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("busy", 2, 4.0)).await.unwrap();
    engine.upsert_agent(auto_agent("idle", 2, 3.0)).await.unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();
    engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();

    let heatmap = engine.capacity_heatmap().await.unwrap();
    assert_eq!(heatmap.len(), 2);
    assert!(heatmap[0].utilization >= heatmap[1].utilization);

    let forecast = engine.capacity_forecast(8).await.unwrap();
    assert_eq!(forecast.free_capacity, 3);
    assert!(forecast.hourly_assignment_rate > 0.0);
}

#[tokio::test]
#[serial]
async fn concurrent_reservations_never_oversubscribe() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let agent = Agent {
        id: AgentId::from("a1"),
        name: "a1".to_string(),
        status: AgentStatus::Available,
        max_capacity: 3,
        current_capacity: 0,
        specializations: Vec::new(),
        rating: 4.0,
        conversion_rate: 0.2,
        avg_response_minutes: 5.0,
        city: None,
        state: None,
        last_released_at: None,
    };
    store.upsert_agent(&agent).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let store = store.clone();
        tasks.spawn(async move { store.try_reserve_capacity(&AgentId::from("a1")).await });
    }
    let mut reserved = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().unwrap() {
            reserved += 1;
        }
    }
    assert_eq!(reserved, 3);

    let stored = store.get_agent(&AgentId::from("a1")).await.unwrap().unwrap();
    assert_eq!(stored.current_capacity, 3);
}

#[tokio::test]
async fn experiment_promotion_requires_samples_and_significance() {
    let store: Arc<dyn LeadStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let controller = ExperimentController::new(store);

    let experiment = controller
        .create_experiment(NewExperiment {
            name: "greedy vs optimal".to_string(),
            success_metric: SuccessMetric::ConversionRate,
            min_sample_size: 50,
            confidence_level: 95,
            variants: vec![
                NewVariant {
                    name: "control".to_string(),
                    strategy: RoutingStrategy::Greedy,
                    allocation: 50,
                },
                NewVariant {
                    name: "candidate".to_string(),
                    strategy: RoutingStrategy::Optimal,
                    allocation: 50,
                },
            ],
        })
        .await
        .unwrap();

    // Too few samples: refused without a z statistic.
    let decision = controller.promote_winner(&experiment.id).await.unwrap();
    assert!(matches!(
        decision,
        PromotionDecision::Refused { z_statistic: None, .. }
    ));

    // Feed outcomes: the candidate variant converts far more often.
    for i in 0..600 {
        let lead_id = LeadId(format!("lead-{i}"));
        let variant = ExperimentController::assign_variant(&experiment, &lead_id)
            .unwrap()
            .name
            .clone();
        let converted = if variant == "candidate" { i % 2 == 0 } else { i % 10 == 0 };
        controller
            .record_outcome(
                &experiment.id,
                OutcomeReport {
                    lead_id,
                    converted,
                    sla_met: true,
                    handling_seconds: 300.0,
                    satisfaction: None,
                },
            )
            .await
            .unwrap();
    }

    let decision = controller.promote_winner(&experiment.id).await.unwrap();
    let PromotionDecision::Promoted { winner, z_statistic } = decision else {
        panic!("expected promotion, got {decision:?}");
    };
    assert_eq!(winner, "candidate");
    assert!(z_statistic > 1.96);

    // Concluded experiments leave the active set.
    assert!(controller.active_experiments().await.unwrap().is_empty());
}

#[tokio::test]
async fn experiment_variant_decides_default_strategy() {
    let engine = engine().await;
    engine.upsert_agent(auto_agent("a1", 10, 4.0)).await.unwrap();
    engine
        .create_experiment(NewExperiment {
            name: "all-optimal".to_string(),
            success_metric: SuccessMetric::ConversionRate,
            min_sample_size: 10,
            confidence_level: 95,
            variants: vec![
                NewVariant {
                    name: "a".to_string(),
                    strategy: RoutingStrategy::Optimal,
                    allocation: 50,
                },
                NewVariant {
                    name: "b".to_string(),
                    strategy: RoutingStrategy::Optimal,
                    allocation: 50,
                },
            ],
        })
        .await
        .unwrap();
    engine.ingest_lead(hot_lead("l1")).await.unwrap();

    let decision = engine
        .assign(&LeadId::from("l1"), RouteRequest::default())
        .await
        .unwrap();
    assert_eq!(decision.assignment.strategy, RoutingStrategy::Optimal);
}
