//! Read-mostly capability index
//!
//! Maps lowercase insurance lines to the agents that carry a matching
//! specialization. Rebuilt whenever an agent's specialization set or
//! status changes; reads are lock-free via `DashMap`.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::agent::{Agent, AgentId};

/// In-process candidate pre-filter keyed by insurance line
#[derive(Debug, Default)]
pub struct CapabilityIndex {
    by_line: DashMap<String, HashSet<AgentId>>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self {
            by_line: DashMap::new(),
        }
    }

    /// Replace the whole index from an agent snapshot
    pub fn rebuild(&self, agents: &[Agent]) {
        self.by_line.clear();
        for agent in agents {
            for spec in &agent.specializations {
                self.by_line
                    .entry(spec.insurance_line.to_ascii_lowercase())
                    .or_default()
                    .insert(agent.id.clone());
            }
        }
    }

    /// Agents with a specialization on the given line, if indexed
    pub fn candidates_for(&self, line: &str) -> Option<HashSet<AgentId>> {
        self.by_line
            .get(&line.to_ascii_lowercase())
            .map(|entry| entry.clone())
    }

    /// Like [`candidates_for`], but with `fuzzy` set the lookup also
    /// unions every indexed line related to the query by substring
    /// containment, mirroring the matcher's capability filter. A
    /// compound line like "auto & motorcycle" is therefore reachable
    /// from a plain "auto" query.
    ///
    /// [`candidates_for`]: Self::candidates_for
    pub fn candidates_matching(&self, line: &str, fuzzy: bool) -> Option<HashSet<AgentId>> {
        let needle = line.to_ascii_lowercase();
        if !fuzzy {
            return self.candidates_for(&needle);
        }
        let mut found = false;
        let mut union = HashSet::new();
        for entry in self.by_line.iter() {
            let key = entry.key();
            if key == &needle || key.contains(&needle) || needle.contains(key.as_str()) {
                found = true;
                union.extend(entry.value().iter().cloned());
            }
        }
        found.then_some(union)
    }

    pub fn is_empty(&self) -> bool {
        self.by_line.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentStatus, Specialization};

    fn agent(id: &str, line: &str) -> Agent {
        Agent {
            id: AgentId::from(id),
            name: id.to_string(),
            status: AgentStatus::Available,
            max_capacity: 5,
            current_capacity: 0,
            specializations: vec![Specialization::new(line, "individual", 3)],
            rating: 4.0,
            conversion_rate: 0.2,
            avg_response_minutes: 10.0,
            city: None,
            state: None,
            last_released_at: None,
        }
    }

    #[test]
    fn index_is_case_insensitive() {
        let index = CapabilityIndex::new();
        index.rebuild(&[agent("a1", "Auto"), agent("a2", "home")]);

        let auto = index.candidates_for("AUTO").expect("auto line indexed");
        assert!(auto.contains(&AgentId::from("a1")));
        assert!(!auto.contains(&AgentId::from("a2")));
        assert!(index.candidates_for("life").is_none());
    }

    #[test]
    fn fuzzy_lookup_reaches_compound_lines() {
        let index = CapabilityIndex::new();
        index.rebuild(&[agent("a1", "Auto & Motorcycle"), agent("a2", "home")]);

        // Exact lookup misses the compound key.
        assert!(index.candidates_for("auto").is_none());

        let fuzzy = index
            .candidates_matching("auto", true)
            .expect("containment match");
        assert!(fuzzy.contains(&AgentId::from("a1")));
        assert!(!fuzzy.contains(&AgentId::from("a2")));

        // Without fuzzy the strict behavior is preserved.
        assert!(index.candidates_matching("auto", false).is_none());
        assert!(index.candidates_matching("travel", true).is_none());
    }
}
