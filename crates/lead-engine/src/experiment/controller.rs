//! Experiment lifecycle and traffic assignment

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::LeadStore;
use crate::error::{LeadEngineError, Result};
use crate::experiment::stats::{two_proportion_z, welch_z, z_threshold};
use crate::lead::LeadId;
use crate::routing::RoutingStrategy;

/// What an experiment optimizes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessMetric {
    ConversionRate,
    HandlingTime,
    SlaCompliance,
    Satisfaction,
}

impl SuccessMetric {
    /// Rate metrics use the two-proportion z-test; mean metrics use
    /// a Welch-style z on sample means.
    fn is_rate(&self) -> bool {
        matches!(self, Self::ConversionRate | Self::SlaCompliance)
    }

    /// Whether lower values win (handling time)
    fn lower_is_better(&self) -> bool {
        matches!(self, Self::HandlingTime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Active,
    Concluded,
}

/// Accumulated outcomes for one variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub samples: u64,
    pub conversions: u64,
    pub sla_met: u64,
    pub handling_seconds_total: f64,
    pub handling_seconds_sumsq: f64,
    pub satisfaction_total: f64,
    pub satisfaction_sumsq: f64,
    pub satisfaction_samples: u64,
}

impl VariantMetrics {
    pub fn conversion_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.conversions as f64 / self.samples as f64
        }
    }

    pub fn sla_compliance(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sla_met as f64 / self.samples as f64
        }
    }

    pub fn avg_handling_seconds(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.handling_seconds_total / self.samples as f64
        }
    }

    pub fn avg_satisfaction(&self) -> f64 {
        if self.satisfaction_samples == 0 {
            0.0
        } else {
            self.satisfaction_total / self.satisfaction_samples as f64
        }
    }
}

/// One strategy configuration under comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub strategy: RoutingStrategy,
    /// Traffic share in percent; all variants sum to 100
    pub allocation: u8,
    pub metrics: VariantMetrics,
}

/// A/B experiment over routing strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub success_metric: SuccessMetric,
    pub min_sample_size: u64,
    /// Confidence level in percent: 90, 95, or 99
    pub confidence_level: u8,
    pub status: ExperimentStatus,
    pub variants: Vec<Variant>,
    pub winner: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to create an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExperiment {
    pub name: String,
    pub success_metric: SuccessMetric,
    pub min_sample_size: u64,
    pub confidence_level: u8,
    pub variants: Vec<NewVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVariant {
    pub name: String,
    pub strategy: RoutingStrategy,
    pub allocation: u8,
}

/// One reported routing outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub lead_id: LeadId,
    pub converted: bool,
    pub sla_met: bool,
    pub handling_seconds: f64,
    pub satisfaction: Option<f64>,
}

/// Result of a promotion attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PromotionDecision {
    Promoted {
        winner: String,
        z_statistic: f64,
    },
    Refused {
        reason: String,
        z_statistic: Option<f64>,
    },
}

/// Assigns traffic to variants and promotes winners
pub struct ExperimentController {
    store: Arc<dyn LeadStore>,
    /// Outcome reports read-modify-write the whole experiment record
    /// and the store has no compare-and-swap on experiments. One
    /// controller exists per process, so this lock serializes the
    /// writers.
    write_lock: tokio::sync::Mutex<()>,
}

impl ExperimentController {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self {
            store,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn create_experiment(&self, spec: NewExperiment) -> Result<Experiment> {
        if spec.variants.len() < 2 {
            return Err(LeadEngineError::experiment(
                "an experiment needs at least two variants",
            ));
        }
        let total: u32 = spec.variants.iter().map(|v| u32::from(v.allocation)).sum();
        if total != 100 {
            return Err(LeadEngineError::experiment(format!(
                "variant allocations sum to {total}, expected 100"
            )));
        }
        if spec.min_sample_size == 0 {
            return Err(LeadEngineError::experiment(
                "min_sample_size must be positive",
            ));
        }
        if !matches!(spec.confidence_level, 90 | 95 | 99) {
            return Err(LeadEngineError::experiment(
                "confidence_level must be 90, 95, or 99",
            ));
        }

        let experiment = Experiment {
            id: uuid::Uuid::new_v4().to_string(),
            name: spec.name,
            success_metric: spec.success_metric,
            min_sample_size: spec.min_sample_size,
            confidence_level: spec.confidence_level,
            status: ExperimentStatus::Active,
            variants: spec
                .variants
                .into_iter()
                .map(|v| Variant {
                    name: v.name,
                    strategy: v.strategy,
                    allocation: v.allocation,
                    metrics: VariantMetrics::default(),
                })
                .collect(),
            winner: None,
            created_at: Utc::now(),
        };
        self.store.insert_experiment(&experiment).await?;
        info!(experiment = %experiment.id, name = %experiment.name, "experiment created");
        Ok(experiment)
    }

    pub async fn active_experiments(&self) -> Result<Vec<Experiment>> {
        self.store.list_active_experiments().await
    }

    pub async fn get_experiment(&self, id: &str) -> Result<Experiment> {
        self.store
            .get_experiment(id)
            .await?
            .ok_or_else(|| LeadEngineError::not_found("experiment", id))
    }

    /// Strategy the active experiment (if any) picks for this lead.
    /// Returns (experiment id, variant name, strategy).
    pub async fn strategy_for(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<(String, String, RoutingStrategy)>> {
        let experiments = self.store.list_active_experiments().await?;
        let Some(experiment) = experiments.into_iter().next() else {
            return Ok(None);
        };
        let variant = Self::assign_variant(&experiment, lead_id)?;
        Ok(Some((
            experiment.id.clone(),
            variant.name.clone(),
            variant.strategy,
        )))
    }

    /// Stable variant assignment: the same (lead, experiment) pair
    /// always maps to the same variant. Errors only on a malformed
    /// record whose allocations do not cover the bucket range.
    pub fn assign_variant<'a>(
        experiment: &'a Experiment,
        lead_id: &LeadId,
    ) -> Result<&'a Variant> {
        let bucket = stable_bucket(lead_id, &experiment.id);
        let mut cumulative = 0u32;
        for variant in &experiment.variants {
            cumulative += u32::from(variant.allocation);
            if u32::from(bucket) < cumulative {
                return Ok(variant);
            }
        }
        Err(LeadEngineError::experiment(format!(
            "experiment {} has allocations covering {cumulative}/100",
            experiment.id
        )))
    }

    /// Accumulate a reported outcome into the lead's variant
    pub async fn record_outcome(&self, experiment_id: &str, outcome: OutcomeReport) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut experiment = self.get_experiment(experiment_id).await?;
        if experiment.status != ExperimentStatus::Active {
            return Err(LeadEngineError::experiment(format!(
                "experiment {experiment_id} is concluded"
            )));
        }
        let variant_name = Self::assign_variant(&experiment, &outcome.lead_id)?
            .name
            .clone();
        let Some(variant) = experiment
            .variants
            .iter_mut()
            .find(|v| v.name == variant_name)
        else {
            return Err(LeadEngineError::experiment(format!(
                "experiment {experiment_id} lost variant {variant_name}"
            )));
        };

        let m = &mut variant.metrics;
        m.samples += 1;
        if outcome.converted {
            m.conversions += 1;
        }
        if outcome.sla_met {
            m.sla_met += 1;
        }
        m.handling_seconds_total += outcome.handling_seconds;
        m.handling_seconds_sumsq += outcome.handling_seconds * outcome.handling_seconds;
        if let Some(sat) = outcome.satisfaction {
            m.satisfaction_total += sat;
            m.satisfaction_sumsq += sat * sat;
            m.satisfaction_samples += 1;
        }

        self.store.update_experiment(&experiment).await
    }

    /// Promote the best variant if every variant reached the minimum
    /// sample size and the lead over the runner-up is significant.
    pub async fn promote_winner(&self, experiment_id: &str) -> Result<PromotionDecision> {
        let _guard = self.write_lock.lock().await;
        let mut experiment = self.get_experiment(experiment_id).await?;
        if experiment.status != ExperimentStatus::Concluded {
            if let Some(short) = experiment
                .variants
                .iter()
                .find(|v| v.metrics.samples < experiment.min_sample_size)
            {
                return Ok(PromotionDecision::Refused {
                    reason: format!(
                        "variant '{}' has {} samples, needs {}",
                        short.name, short.metrics.samples, experiment.min_sample_size
                    ),
                    z_statistic: None,
                });
            }
        } else {
            return Err(LeadEngineError::experiment(format!(
                "experiment {experiment_id} already concluded"
            )));
        }

        let mut ranked: Vec<&Variant> = experiment.variants.iter().collect();
        let metric = experiment.success_metric;
        ranked.sort_by(|a, b| {
            let va = Self::metric_value(&a.metrics, metric);
            let vb = Self::metric_value(&b.metrics, metric);
            vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
        });
        let (best, runner_up) = (ranked[0], ranked[1]);

        let z = Self::z_statistic(metric, &best.metrics, &runner_up.metrics);
        let threshold = z_threshold(experiment.confidence_level);
        if z < threshold {
            info!(
                experiment = %experiment.id,
                z, threshold,
                "promotion refused, difference not significant"
            );
            return Ok(PromotionDecision::Refused {
                reason: format!(
                    "difference between '{}' and '{}' not significant (z {:.3} < {:.3})",
                    best.name, runner_up.name, z, threshold
                ),
                z_statistic: Some(z),
            });
        }

        let winner = best.name.clone();
        experiment.status = ExperimentStatus::Concluded;
        experiment.winner = Some(winner.clone());
        self.store.update_experiment(&experiment).await?;
        info!(experiment = %experiment.id, winner = %winner, z, "experiment winner promoted");
        Ok(PromotionDecision::Promoted {
            winner,
            z_statistic: z,
        })
    }

    fn metric_value(metrics: &VariantMetrics, metric: SuccessMetric) -> f64 {
        let value = match metric {
            SuccessMetric::ConversionRate => metrics.conversion_rate(),
            SuccessMetric::SlaCompliance => metrics.sla_compliance(),
            SuccessMetric::HandlingTime => metrics.avg_handling_seconds(),
            SuccessMetric::Satisfaction => metrics.avg_satisfaction(),
        };
        if metric.lower_is_better() {
            -value
        } else {
            value
        }
    }

    fn z_statistic(metric: SuccessMetric, a: &VariantMetrics, b: &VariantMetrics) -> f64 {
        if metric.is_rate() {
            let (sa, sb) = match metric {
                SuccessMetric::ConversionRate => (a.conversions, b.conversions),
                _ => (a.sla_met, b.sla_met),
            };
            two_proportion_z(sa, a.samples, sb, b.samples)
        } else {
            match metric {
                SuccessMetric::HandlingTime => welch_z(
                    a.handling_seconds_total,
                    a.handling_seconds_sumsq,
                    a.samples,
                    b.handling_seconds_total,
                    b.handling_seconds_sumsq,
                    b.samples,
                ),
                _ => welch_z(
                    a.satisfaction_total,
                    a.satisfaction_sumsq,
                    a.satisfaction_samples,
                    b.satisfaction_total,
                    b.satisfaction_sumsq,
                    b.satisfaction_samples,
                ),
            }
        }
    }
}

/// FNV-1a over (lead id, experiment id), reduced to a 0-99 bucket.
/// Hand-rolled so the mapping stays stable across compiler and std
/// versions.
fn stable_bucket(lead_id: &LeadId, experiment_id: &str) -> u8 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in lead_id.0.bytes().chain(experiment_id.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    (hash % 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment(allocations: &[(&str, u8)]) -> Experiment {
        Experiment {
            id: "exp-1".to_string(),
            name: "greedy vs optimal".to_string(),
            success_metric: SuccessMetric::ConversionRate,
            min_sample_size: 100,
            confidence_level: 95,
            status: ExperimentStatus::Active,
            variants: allocations
                .iter()
                .map(|(name, alloc)| Variant {
                    name: (*name).to_string(),
                    strategy: RoutingStrategy::Greedy,
                    allocation: *alloc,
                    metrics: VariantMetrics::default(),
                })
                .collect(),
            winner: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn variant_assignment_is_stable() {
        let exp = experiment(&[("control", 50), ("candidate", 50)]);
        let lead = LeadId::from("lead-42");
        let first = ExperimentController::assign_variant(&exp, &lead)
            .unwrap()
            .name
            .clone();
        for _ in 0..10 {
            assert_eq!(
                ExperimentController::assign_variant(&exp, &lead).unwrap().name,
                first
            );
        }
    }

    #[tokio::test]
    async fn concurrent_outcome_reports_all_count() {
        use crate::database::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(ExperimentController::new(store));
        let created = controller
            .create_experiment(NewExperiment {
                name: "greedy vs optimal".to_string(),
                success_metric: SuccessMetric::ConversionRate,
                min_sample_size: 100,
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

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let controller = controller.clone();
            let id = created.id.clone();
            tasks.spawn(async move {
                controller
                    .record_outcome(
                        &id,
                        OutcomeReport {
                            lead_id: LeadId(format!("lead-{i}")),
                            converted: i % 2 == 0,
                            sla_met: true,
                            handling_seconds: 30.0,
                            satisfaction: None,
                        },
                    )
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let stored = controller.get_experiment(&created.id).await.unwrap();
        let total: u64 = stored.variants.iter().map(|v| v.metrics.samples).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn allocation_ranges_cover_all_buckets() {
        let exp = experiment(&[("a", 10), ("b", 90)]);
        let mut a_hits = 0usize;
        for i in 0..1_000 {
            let lead = LeadId(format!("lead-{i}"));
            if ExperimentController::assign_variant(&exp, &lead).unwrap().name == "a" {
                a_hits += 1;
            }
        }
        // Roughly 10% of leads should land in the 10% variant.
        assert!(a_hits > 40 && a_hits < 250, "a_hits was {a_hits}");
    }
}
