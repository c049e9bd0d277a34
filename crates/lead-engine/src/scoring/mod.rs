//! # Lead Prioritization
//!
//! Pure scoring of lead quality plus SLA clock management. The scorer
//! is deterministic and side-effect free: the same lead snapshot
//! always produces the same score, tier, and factor breakdown, which
//! keeps rescoring reproducible and the routing explanations honest.
//!
//! Scoring is a weighted sum over six dimensions (contact
//! completeness, engagement, budget alignment, timeline urgency,
//! domain knowledge, competitive position) with per-insurance-line
//! weight tables, followed by additive bonuses (referral source,
//! multi-policy signal, complete profile) and a clamp to [0, 100].
//! Tier thresholds then bucket the score into hot/warm/cold/
//! unqualified, and the SLA window for that tier fixes the routing
//! deadline.

pub mod scorer;
pub mod sla;

pub use scorer::{LeadScorer, ScoreDimension, ScoreFactor, ScoreOutcome};
pub use sla::{sla_deadline, SlaStatus};
