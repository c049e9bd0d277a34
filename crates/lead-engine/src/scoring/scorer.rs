//! Pure lead quality scoring

use serde::{Deserialize, Serialize};

use crate::config::{DimensionWeights, ScoringConfig};
use crate::lead::{Lead, LeadSource, LeadTier};

/// The six scored dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDimension {
    ContactCompleteness,
    Engagement,
    BudgetAlignment,
    TimelineUrgency,
    DomainKnowledge,
    CompetitivePosition,
}

/// One factor that contributed to the final score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreFactor {
    pub dimension: ScoreDimension,
    /// Raw dimension value, 0-100; 0 when the input was absent
    pub raw: f64,
    pub weight: f64,
    pub contribution: f64,
}

/// Result of scoring one lead snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreOutcome {
    /// Final score in [0, 100]
    pub score: f64,
    pub tier: LeadTier,
    pub factors: Vec<ScoreFactor>,
    /// Fraction of dimensions that had input data, 0-1
    pub confidence: f64,
    pub bonuses: Vec<(String, f64)>,
}

/// Deterministic lead scorer; holds configuration only, never state
#[derive(Debug, Clone)]
pub struct LeadScorer {
    config: ScoringConfig,
}

impl LeadScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score a lead snapshot. Pure and idempotent.
    pub fn score(&self, lead: &Lead) -> ScoreOutcome {
        let weights = self.weights_for(&lead.insurance_line);
        let mut factors = Vec::with_capacity(6);
        let mut present = 0u32;
        let mut base = 0.0;

        let dims: [(ScoreDimension, Option<f64>, f64); 6] = [
            (
                ScoreDimension::ContactCompleteness,
                Some(self.contact_completeness(lead)),
                weights.contact_completeness,
            ),
            (
                ScoreDimension::Engagement,
                lead.details.engagement_score.map(|s| s.clamp(0.0, 100.0)),
                weights.engagement,
            ),
            (
                ScoreDimension::BudgetAlignment,
                self.budget_alignment(lead),
                weights.budget_alignment,
            ),
            (
                ScoreDimension::TimelineUrgency,
                Self::timeline_urgency(lead),
                weights.timeline_urgency,
            ),
            (
                ScoreDimension::DomainKnowledge,
                Self::domain_knowledge(lead),
                weights.domain_knowledge,
            ),
            (
                ScoreDimension::CompetitivePosition,
                Self::competitive_position(lead),
                weights.competitive_position,
            ),
        ];

        for (dimension, raw, weight) in dims {
            let raw = match raw {
                Some(value) => {
                    present += 1;
                    value
                }
                None => 0.0,
            };
            let contribution = raw * weight;
            base += contribution;
            factors.push(ScoreFactor {
                dimension,
                raw,
                weight,
                contribution,
            });
        }

        let mut bonuses = Vec::new();
        if lead.source == LeadSource::Referral {
            bonuses.push(("referral".to_string(), self.config.referral_bonus));
        }
        if lead.details.existing_policies >= 1 {
            bonuses.push(("multi_policy".to_string(), self.config.multi_policy_bonus));
        }
        if self.profile_complete(lead) {
            bonuses.push((
                "complete_profile".to_string(),
                self.config.complete_profile_bonus,
            ));
        }

        let bonus_total: f64 = bonuses.iter().map(|(_, b)| b).sum();
        let score = (base + bonus_total).clamp(0.0, 100.0);

        ScoreOutcome {
            score,
            tier: self.tier_for(score),
            factors,
            confidence: f64::from(present) / 6.0,
            bonuses,
        }
    }

    /// Map a score onto a tier using the configured thresholds
    pub fn tier_for(&self, score: f64) -> LeadTier {
        let t = &self.config.tier_thresholds;
        if score >= t.hot {
            LeadTier::Hot
        } else if score >= t.warm {
            LeadTier::Warm
        } else if score >= t.cold {
            LeadTier::Cold
        } else {
            LeadTier::Unqualified
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    fn weights_for(&self, line: &str) -> DimensionWeights {
        self.config
            .line_weights
            .get(&line.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.config.default_weights)
    }

    // Email and phone each carry half; location data tops it up.
    fn contact_completeness(&self, lead: &Lead) -> f64 {
        let mut value: f64 = 0.0;
        if lead.details.email.is_some() {
            value += 40.0;
        }
        if lead.details.phone.is_some() {
            value += 40.0;
        }
        if lead.city.is_some() {
            value += 10.0;
        }
        if lead.state.is_some() {
            value += 10.0;
        }
        value
    }

    fn budget_alignment(&self, lead: &Lead) -> Option<f64> {
        let budget = lead.details.stated_budget?;
        let typical = self
            .config
            .typical_premiums
            .get(&lead.insurance_line.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.config.default_premium);
        if typical <= 0.0 {
            return Some(0.0);
        }
        // Full marks at or above the typical premium, scaled below it.
        let ratio = (budget / typical).clamp(0.0, 1.0);
        Some(ratio * 100.0)
    }

    fn timeline_urgency(lead: &Lead) -> Option<f64> {
        let days = lead.details.purchase_timeline_days?;
        let value = match days {
            0..=7 => 100.0,
            8..=30 => 75.0,
            31..=90 => 50.0,
            91..=180 => 25.0,
            _ => 10.0,
        };
        Some(value)
    }

    fn domain_knowledge(lead: &Lead) -> Option<f64> {
        let level = lead.details.knowledge_level?;
        Some(f64::from(level.clamp(1, 5)) * 20.0)
    }

    // Fewer competing quotes means a stronger position.
    fn competitive_position(lead: &Lead) -> Option<f64> {
        let quotes = lead.details.competing_quotes?;
        let value = match quotes {
            0 => 100.0,
            1 => 70.0,
            2 => 45.0,
            3 => 25.0,
            _ => 10.0,
        };
        Some(value)
    }

    fn profile_complete(&self, lead: &Lead) -> bool {
        let d = &lead.details;
        d.email.is_some()
            && d.phone.is_some()
            && d.engagement_score.is_some()
            && d.stated_budget.is_some()
            && d.purchase_timeline_days.is_some()
            && lead.city.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::{LeadDetails, LeadId, LeadStatus};
    use chrono::Utc;

    fn lead_with(details: LeadDetails, source: LeadSource) -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId::from("lead-1"),
            insurance_line: "auto".to_string(),
            quality_score: 0.0,
            tier: LeadTier::Unqualified,
            status: LeadStatus::New,
            source,
            city: Some("Austin".to_string()),
            state: Some("TX".to_string()),
            preferred_language: None,
            created_at: now,
            sla_deadline: now,
            details,
        }
    }

    fn rich_details() -> LeadDetails {
        LeadDetails {
            email: Some("a@b.com".to_string()),
            phone: Some("555-0100".to_string()),
            engagement_score: Some(90.0),
            stated_budget: Some(2_000.0),
            purchase_timeline_days: Some(5),
            knowledge_level: Some(4),
            competing_quotes: Some(0),
            existing_policies: 2,
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = LeadScorer::new(ScoringConfig::default());
        let lead = lead_with(rich_details(), LeadSource::Referral);
        let a = scorer.score(&lead);
        let b = scorer.score(&lead);
        assert_eq!(a.score, b.score);
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn rich_referral_lead_is_hot() {
        let scorer = LeadScorer::new(ScoringConfig::default());
        let outcome = scorer.score(&lead_with(rich_details(), LeadSource::Referral));
        assert_eq!(outcome.tier, LeadTier::Hot);
        assert!(outcome.score >= 75.0, "score was {}", outcome.score);
        assert_eq!(outcome.bonuses.len(), 3);
        assert!((outcome.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_lead_is_unqualified_with_low_confidence() {
        let scorer = LeadScorer::new(ScoringConfig::default());
        let mut lead = lead_with(LeadDetails::default(), LeadSource::Other);
        lead.city = None;
        lead.state = None;
        let outcome = scorer.score(&lead);
        assert_eq!(outcome.tier, LeadTier::Unqualified);
        // Only contact completeness is always evaluated.
        assert!(outcome.confidence <= 0.2);
    }

    #[test]
    fn score_is_clamped_to_100() {
        let mut config = ScoringConfig::default();
        config.referral_bonus = 50.0;
        config.multi_policy_bonus = 50.0;
        let scorer = LeadScorer::new(config);
        let outcome = scorer.score(&lead_with(rich_details(), LeadSource::Referral));
        assert!(outcome.score <= 100.0);
    }

    #[test]
    fn tier_thresholds_bucket_correctly() {
        let scorer = LeadScorer::new(ScoringConfig::default());
        assert_eq!(scorer.tier_for(75.0), LeadTier::Hot);
        assert_eq!(scorer.tier_for(74.9), LeadTier::Warm);
        assert_eq!(scorer.tier_for(50.0), LeadTier::Warm);
        assert_eq!(scorer.tier_for(25.0), LeadTier::Cold);
        assert_eq!(scorer.tier_for(24.9), LeadTier::Unqualified);
    }
}
