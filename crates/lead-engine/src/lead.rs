//! Lead types
//!
//! A lead is immutable once scored except for status and tier;
//! rescoring updates score, tier, and the derived SLA deadline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeadEngineError;

/// Unique lead identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub String);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LeadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Urgency/quality bucket derived from the quality score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadTier {
    Unqualified,
    Cold,
    Warm,
    Hot,
}

impl LeadTier {
    /// Rank used for priority ordering (hot highest)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Hot => 4,
            Self::Warm => 3,
            Self::Cold => 2,
            Self::Unqualified => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Unqualified => "unqualified",
        }
    }
}

impl fmt::Display for LeadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadTier {
    type Err = LeadEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            "unqualified" => Ok(Self::Unqualified),
            other => Err(LeadEngineError::validation(format!(
                "unknown lead tier '{other}'"
            ))),
        }
    }
}

/// Lead lifecycle status; `Converted` and `Lost` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converted | Self::Lost)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Converted => "converted",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = LeadEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "qualified" => Ok(Self::Qualified),
            "converted" => Ok(Self::Converted),
            "lost" => Ok(Self::Lost),
            other => Err(LeadEngineError::validation(format!(
                "unknown lead status '{other}'"
            ))),
        }
    }
}

/// Where the lead came from; referral sources earn a scoring bonus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    WebForm,
    Call,
    Referral,
    PaidAds,
    Organic,
    SocialMedia,
    Email,
    Partner,
    Other,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebForm => "web_form",
            Self::Call => "call",
            Self::Referral => "referral",
            Self::PaidAds => "paid_ads",
            Self::Organic => "organic",
            Self::SocialMedia => "social_media",
            Self::Email => "email",
            Self::Partner => "partner",
            Self::Other => "other",
        }
    }
}

impl FromStr for LeadSource {
    type Err = LeadEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_form" => Ok(Self::WebForm),
            "call" => Ok(Self::Call),
            "referral" => Ok(Self::Referral),
            "paid_ads" => Ok(Self::PaidAds),
            "organic" => Ok(Self::Organic),
            "social_media" => Ok(Self::SocialMedia),
            "email" => Ok(Self::Email),
            "partner" => Ok(Self::Partner),
            "other" => Ok(Self::Other),
            unknown => Err(LeadEngineError::validation(format!(
                "unknown lead source '{unknown}'"
            ))),
        }
    }
}

/// Raw attributes the scorer consumes; absent data lowers confidence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadDetails {
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Tracking-derived engagement, 0-100
    pub engagement_score: Option<f64>,
    /// Annual budget the prospect stated, in dollars
    pub stated_budget: Option<f64>,
    /// Days until the prospect intends to buy
    pub purchase_timeline_days: Option<u32>,
    /// Self-reported product knowledge, 1-5
    pub knowledge_level: Option<u8>,
    /// Quotes the prospect already collected elsewhere
    pub competing_quotes: Option<u32>,
    /// Policies already held with us; drives the multi-policy bonus
    pub existing_policies: u32,
}

/// A sales lead flowing through the routing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub insurance_line: String,
    /// Quality score in [0, 100]
    pub quality_score: f64,
    pub tier: LeadTier,
    pub status: LeadStatus,
    pub source: LeadSource,
    pub city: Option<String>,
    pub state: Option<String>,
    pub preferred_language: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Derived: created_at + tier-specific SLA window
    pub sla_deadline: DateTime<Utc>,
    pub details: LeadDetails,
}

impl Lead {
    /// Minutes until the SLA deadline; negative once breached
    pub fn sla_remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        (self.sla_deadline - now).num_minutes()
    }
}
