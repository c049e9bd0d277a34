//! SLA clock management

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SlaWindows;
use crate::lead::{Lead, LeadTier};

/// SLA position of a lead at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaStatus {
    pub deadline: DateTime<Utc>,
    pub remaining_minutes: i64,
    pub breached: bool,
}

/// Deadline for a lead created at `created_at` in the given tier
pub fn sla_deadline(
    tier: LeadTier,
    created_at: DateTime<Utc>,
    windows: &SlaWindows,
) -> DateTime<Utc> {
    let minutes = match tier {
        LeadTier::Hot => windows.hot_minutes,
        LeadTier::Warm => windows.warm_minutes,
        LeadTier::Cold => windows.cold_minutes,
        LeadTier::Unqualified => windows.unqualified_minutes,
    };
    created_at + Duration::minutes(minutes)
}

/// Current SLA status of a lead
pub fn status(lead: &Lead, now: DateTime<Utc>) -> SlaStatus {
    let remaining = lead.sla_remaining_minutes(now);
    SlaStatus {
        deadline: lead.sla_deadline,
        remaining_minutes: remaining,
        breached: remaining < 0,
    }
}
