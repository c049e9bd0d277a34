//! Candidate scoring and ranking

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentStatus, Specialization};
use crate::config::MatchingConfig;
use crate::lead::Lead;

/// One ranked candidate with its score breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub agent: Agent,
    /// Weighted match score, 0-100
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Pure, read-only candidate ranking over an agent snapshot
#[derive(Debug, Clone)]
pub struct AgentMatcher {
    config: MatchingConfig,
}

impl AgentMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Rank candidate agents for a lead, best first.
    ///
    /// Hard filters: agent status must be `Available` and at least one
    /// specialization must match the lead's insurance line (exact, or
    /// case-insensitive containment when fuzzy matching is enabled).
    /// Agents already at capacity stay in the list ranked by their
    /// zero free-capacity component; the authoritative capacity gate
    /// is the ledger's atomic reservation.
    pub fn find_candidates(&self, lead: &Lead, agents: &[Agent]) -> Vec<CandidateMatch> {
        let mut matches: Vec<CandidateMatch> = agents
            .iter()
            .filter(|agent| agent.status == AgentStatus::Available)
            .filter_map(|agent| self.score_candidate(lead, agent))
            .collect();

        matches.sort_by(|a, b| {
            cmp_f64_desc(a.score, b.score)
                .then_with(|| cmp_f64_desc(a.agent.rating, b.agent.rating))
                .then_with(|| a.agent.current_capacity.cmp(&b.agent.current_capacity))
                .then_with(|| cmp_released(&a.agent, &b.agent))
        });
        matches
    }

    fn score_candidate(&self, lead: &Lead, agent: &Agent) -> Option<CandidateMatch> {
        let (spec_score, spec) = self.specialization_score(lead, agent)?;
        let mut reasons = Vec::new();

        if let Some(spec) = spec {
            reasons.push(format!(
                "specialization {} (proficiency {})",
                spec.insurance_line, spec.proficiency
            ));
        }

        let location_score = location_score(lead, agent);
        match location_score as u32 {
            100 => reasons.push("same city".to_string()),
            60 => reasons.push("same state".to_string()),
            _ => {}
        }

        let rating_score = (agent.rating * 20.0).clamp(0.0, 100.0);
        let performance_score = (agent.conversion_rate * 100.0).clamp(0.0, 100.0);
        let capacity_score = agent.free_fraction() * 100.0;

        if agent.rating >= 4.5 {
            reasons.push(format!("top rating {:.1}", agent.rating));
        }
        if !agent.has_free_capacity() {
            reasons.push("at capacity".to_string());
        }

        let c = &self.config;
        let score = spec_score * c.specialization_weight
            + location_score * c.location_weight
            + rating_score * c.rating_weight
            + performance_score * c.performance_weight
            + capacity_score * c.capacity_weight;

        Some(CandidateMatch {
            agent: agent.clone(),
            score,
            reasons,
        })
    }

    /// Best specialization match on the lead's line, or None when the
    /// capability filter fails
    fn specialization_score<'a>(
        &self,
        lead: &Lead,
        agent: &'a Agent,
    ) -> Option<(f64, Option<&'a Specialization>)> {
        let line = lead.insurance_line.to_ascii_lowercase();
        let mut best: Option<(f64, &Specialization)> = None;

        for spec in &agent.specializations {
            let spec_line = spec.insurance_line.to_ascii_lowercase();
            let base = if spec_line == line {
                60.0
            } else if self.config.fuzzy_line_match
                && (spec_line.contains(&line) || line.contains(&spec_line))
            {
                30.0
            } else {
                continue;
            };

            let mut value = base + f64::from(spec.proficiency.clamp(1, 5)) * 8.0;
            if let Some(lang) = &lead.preferred_language {
                if spec
                    .languages
                    .iter()
                    .any(|l| l.eq_ignore_ascii_case(lang))
                {
                    value += 10.0;
                }
            }
            let value = value.min(100.0);
            if best.map_or(true, |(b, _)| value > b) {
                best = Some((value, spec));
            }
        }

        best.map(|(score, spec)| (score, Some(spec)))
    }
}

fn location_score(lead: &Lead, agent: &Agent) -> f64 {
    let same_city = match (&lead.city, &agent.city) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    if same_city {
        return 100.0;
    }
    let same_state = match (&lead.state, &agent.state) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    if same_state {
        60.0
    } else {
        20.0
    }
}

fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

// Earliest capacity-freed timestamp wins; never-released sorts first.
fn cmp_released(a: &Agent, b: &Agent) -> Ordering {
    match (&a.last_released_at, &b.last_released_at) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(y),
    }
}
