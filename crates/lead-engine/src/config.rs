//! Engine configuration
//!
//! Plain-Rust sectioned configuration with `Default` impls for every
//! section. The server binary overrides individual fields from CLI
//! arguments; tests construct the sections they care about directly.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::{LeadEngineError, Result};
use crate::routing::RoutingStrategy;

/// Top-level configuration for the lead engine
#[derive(Debug, Clone)]
pub struct LeadEngineConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub scoring: ScoringConfig,
    pub matching: MatchingConfig,
    pub routing: RoutingConfig,
    pub queues: QueueConfig,
}

impl Default for LeadEngineConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            database: DatabaseConfig::default(),
            scoring: ScoringConfig::default(),
            matching: MatchingConfig::default(),
            routing: RoutingConfig::default(),
            queues: QueueConfig::default(),
        }
    }
}

impl LeadEngineConfig {
    /// Validate cross-field invariants (weight sums, thresholds)
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        self.matching.validate()?;
        Ok(())
    }
}

/// General server settings
#[derive(Debug, Clone)]
pub struct GeneralConfig {
    /// Address the HTTP API listens on
    pub listen_addr: SocketAddr,
    /// Deployment domain, used only for log context
    pub domain: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            domain: "lead-engine.local".to_string(),
        }
    }
}

/// Database settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite path; `:memory:` selects an in-memory database
    pub database_path: String,
    pub max_connections: u32,
    /// Per-operation deadline; a timeout surfaces as a retryable failure
    pub op_timeout_ms: u64,
    /// Bounded retry count for retryable store failures
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: "lead_engine.db".to_string(),
            max_connections: 10,
            op_timeout_ms: 5_000,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

/// Weights for the six scoring dimensions; must sum to 1.0 per line
#[derive(Debug, Clone, Copy)]
pub struct DimensionWeights {
    pub contact_completeness: f64,
    pub engagement: f64,
    pub budget_alignment: f64,
    pub timeline_urgency: f64,
    pub domain_knowledge: f64,
    pub competitive_position: f64,
}

impl DimensionWeights {
    pub fn sum(&self) -> f64 {
        self.contact_completeness
            + self.engagement
            + self.budget_alignment
            + self.timeline_urgency
            + self.domain_knowledge
            + self.competitive_position
    }
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            contact_completeness: 0.20,
            engagement: 0.25,
            budget_alignment: 0.20,
            timeline_urgency: 0.15,
            domain_knowledge: 0.10,
            competitive_position: 0.10,
        }
    }
}

/// Score thresholds that map a quality score onto a tier
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    pub hot: f64,
    pub warm: f64,
    pub cold: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            hot: 75.0,
            warm: 50.0,
            cold: 25.0,
        }
    }
}

/// SLA window per tier, in minutes from lead creation
#[derive(Debug, Clone, Copy)]
pub struct SlaWindows {
    pub hot_minutes: i64,
    pub warm_minutes: i64,
    pub cold_minutes: i64,
    pub unqualified_minutes: i64,
}

impl Default for SlaWindows {
    fn default() -> Self {
        Self {
            hot_minutes: 60,
            warm_minutes: 240,
            cold_minutes: 1_440,
            unqualified_minutes: 4_320,
        }
    }
}

/// Scorer settings
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub tier_thresholds: TierThresholds,
    pub sla_windows: SlaWindows,
    /// Per-insurance-line weight tables (keyed by lowercase line name)
    pub line_weights: HashMap<String, DimensionWeights>,
    /// Fallback weights for lines without a dedicated table
    pub default_weights: DimensionWeights,
    /// Typical annual premium per line, for budget alignment
    pub typical_premiums: HashMap<String, f64>,
    pub default_premium: f64,
    // Additive bonuses applied after the weighted base
    pub referral_bonus: f64,
    pub multi_policy_bonus: f64,
    pub complete_profile_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let mut line_weights = HashMap::new();
        // Auto buyers decide fast; life buyers research longer.
        line_weights.insert(
            "auto".to_string(),
            DimensionWeights {
                contact_completeness: 0.15,
                engagement: 0.25,
                budget_alignment: 0.20,
                timeline_urgency: 0.25,
                domain_knowledge: 0.05,
                competitive_position: 0.10,
            },
        );
        line_weights.insert(
            "life".to_string(),
            DimensionWeights {
                contact_completeness: 0.25,
                engagement: 0.20,
                budget_alignment: 0.25,
                timeline_urgency: 0.10,
                domain_knowledge: 0.10,
                competitive_position: 0.10,
            },
        );
        line_weights.insert("home".to_string(), DimensionWeights::default());

        let mut typical_premiums = HashMap::new();
        typical_premiums.insert("auto".to_string(), 1_600.0);
        typical_premiums.insert("home".to_string(), 1_800.0);
        typical_premiums.insert("life".to_string(), 900.0);

        Self {
            tier_thresholds: TierThresholds::default(),
            sla_windows: SlaWindows::default(),
            line_weights,
            default_weights: DimensionWeights::default(),
            typical_premiums,
            default_premium: 1_200.0,
            referral_bonus: 5.0,
            multi_policy_bonus: 7.0,
            complete_profile_bonus: 3.0,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        for (line, weights) in self
            .line_weights
            .iter()
            .map(|(l, w)| (l.as_str(), w))
            .chain(std::iter::once(("default", &self.default_weights)))
        {
            let sum = weights.sum();
            if (sum - 1.0).abs() > 1e-6 {
                return Err(LeadEngineError::configuration(format!(
                    "scoring weights for '{line}' sum to {sum}, expected 1.0"
                )));
            }
        }
        Ok(())
    }
}

/// Matcher settings
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub specialization_weight: f64,
    pub location_weight: f64,
    pub rating_weight: f64,
    pub performance_weight: f64,
    pub capacity_weight: f64,
    /// Accept case-insensitive substring matches on the insurance line
    pub fuzzy_line_match: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            specialization_weight: 0.30,
            location_weight: 0.25,
            rating_weight: 0.20,
            performance_weight: 0.15,
            capacity_weight: 0.10,
            fuzzy_line_match: true,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<()> {
        let sum = self.specialization_weight
            + self.location_weight
            + self.rating_weight
            + self.performance_weight
            + self.capacity_weight;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(LeadEngineError::configuration(format!(
                "matching weights sum to {sum}, expected 1.0"
            )));
        }
        Ok(())
    }
}

/// Router settings
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub default_strategy: RoutingStrategy,
    /// Pending assignments expire after this many hours
    pub assignment_expiry_hours: i64,
    /// Automatic retries after a lost reservation race
    pub max_reservation_retries: u32,
    /// Every Nth hybrid route triggers an optimal re-balance pass
    pub hybrid_rebalance_interval: u64,
    /// Worker bound for batch routing
    pub batch_concurrency: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::Greedy,
            assignment_expiry_hours: 24,
            max_reservation_retries: 1,
            hybrid_rebalance_interval: 10,
            batch_concurrency: 8,
        }
    }
}

/// Queue manager and background sweep settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub sweep_interval_secs: u64,
    /// Max assignments drained per queue per sweep
    pub sweep_batch_size: usize,
    pub sla_monitor_interval_secs: u64,
    pub sla_risk_threshold_minutes: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            sweep_batch_size: 10,
            sla_monitor_interval_secs: 30,
            sla_risk_threshold_minutes: 60,
        }
    }
}
