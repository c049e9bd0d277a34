//! sqlx/SQLite implementation of the repository
//!
//! All timestamps are stored as fixed-width RFC 3339 strings
//! (microsecond precision, Z suffix) so lexicographic comparison in
//! SQL matches chronological order. Structured fields (lead details,
//! specializations, match reasons, experiments) are stored as JSON
//! text.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::agent::{Agent, AgentId, AgentStatus, Specialization};
use crate::assignment::{Assignment, AssignmentStatus, RoutingExplanation};
use crate::config::DatabaseConfig;
use crate::error::{LeadEngineError, Result};
use crate::experiment::Experiment;
use crate::lead::{Lead, LeadId, LeadSource, LeadStatus, LeadTier};
use crate::queue::{QueueEntry, QueueStats, QueueType};
use crate::routing::RoutingStrategy;

use super::store::{with_timeout, LeadStore};

const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS leads (
    id TEXT PRIMARY KEY,
    insurance_line TEXT NOT NULL,
    quality_score REAL NOT NULL DEFAULT 0,
    tier TEXT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    city TEXT,
    state TEXT,
    preferred_language TEXT,
    created_at TEXT NOT NULL,
    sla_deadline TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}'
)"#,
    r#"
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    max_capacity INTEGER NOT NULL,
    current_capacity INTEGER NOT NULL DEFAULT 0,
    specializations TEXT NOT NULL DEFAULT '[]',
    rating REAL NOT NULL DEFAULT 0,
    conversion_rate REAL NOT NULL DEFAULT 0,
    avg_response_minutes REAL NOT NULL DEFAULT 0,
    city TEXT,
    state TEXT,
    last_released_at TEXT
)"#,
    r#"
CREATE TABLE IF NOT EXISTS assignments (
    id TEXT PRIMARY KEY,
    lead_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    status TEXT NOT NULL,
    match_score REAL NOT NULL,
    match_reasons TEXT NOT NULL DEFAULT '[]',
    strategy TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_assignments_lead ON assignments(lead_id, status)",
    // One capacity-holding assignment per lead, enforced where the
    // data lives; a racing insert fails instead of double-assigning.
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_one_active
    ON assignments(lead_id) WHERE status IN ('pending', 'accepted')"#,
    r#"
CREATE TABLE IF NOT EXISTS queue_entries (
    lead_id TEXT PRIMARY KEY,
    queue TEXT NOT NULL,
    priority REAL NOT NULL,
    enqueued_at TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_queue_entries_queue ON queue_entries(queue, priority)",
    r#"
CREATE TABLE IF NOT EXISTS routing_explanations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lead_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
    r#"
CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
];

/// Transactional SQLite store; the authoritative store in production
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    op_timeout_ms: u64,
}

impl SqliteStore {
    /// Connect and bootstrap the schema. `:memory:` selects a
    /// single-connection in-memory database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let (url, max_connections) = if config.database_path == ":memory:" {
            // Each pool connection gets its own in-memory database,
            // so the pool must stay at one connection.
            ("sqlite::memory:".to_string(), 1)
        } else {
            (
                format!("sqlite://{}?mode=rwc", config.database_path),
                config.max_connections,
            )
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;

        let store = Self {
            pool,
            op_timeout_ms: config.op_timeout_ms,
        };
        store.init_schema().await?;
        debug!(path = %config.database_path, "sqlite store ready");
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn in_memory() -> Result<Self> {
        let config = DatabaseConfig {
            database_path: ":memory:".to_string(),
            ..DatabaseConfig::default()
        };
        Self::connect(&config).await
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LeadEngineError::internal(format!("bad timestamp '{raw}': {e}")))
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead> {
    let details_json: String = row.try_get("details")?;
    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        insurance_line: row.try_get("insurance_line")?,
        quality_score: row.try_get("quality_score")?,
        tier: LeadTier::from_str(&row.try_get::<String, _>("tier")?)?,
        status: LeadStatus::from_str(&row.try_get::<String, _>("status")?)?,
        source: LeadSource::from_str(&row.try_get::<String, _>("source")?)?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        preferred_language: row.try_get("preferred_language")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        sla_deadline: parse_ts(&row.try_get::<String, _>("sla_deadline")?)?,
        details: serde_json::from_str(&details_json)
            .map_err(|e| LeadEngineError::internal(format!("bad lead details: {e}")))?,
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent> {
    let specs_json: String = row.try_get("specializations")?;
    let released: Option<String> = row.try_get("last_released_at")?;
    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        name: row.try_get("name")?,
        status: AgentStatus::from_str(&row.try_get::<String, _>("status")?)?,
        max_capacity: row.try_get::<i64, _>("max_capacity")? as u32,
        current_capacity: row.try_get::<i64, _>("current_capacity")? as u32,
        specializations: serde_json::from_str(&specs_json)
            .map_err(|e| LeadEngineError::internal(format!("bad specializations: {e}")))?,
        rating: row.try_get("rating")?,
        conversion_rate: row.try_get("conversion_rate")?,
        avg_response_minutes: row.try_get("avg_response_minutes")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        last_released_at: released.as_deref().map(parse_ts).transpose()?,
    })
}

fn assignment_from_row(row: &SqliteRow) -> Result<Assignment> {
    let reasons_json: String = row.try_get("match_reasons")?;
    Ok(Assignment {
        id: row.try_get("id")?,
        lead_id: LeadId(row.try_get("lead_id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        status: AssignmentStatus::from_str(&row.try_get::<String, _>("status")?)?,
        match_score: row.try_get("match_score")?,
        match_reasons: serde_json::from_str(&reasons_json)
            .map_err(|e| LeadEngineError::internal(format!("bad match reasons: {e}")))?,
        strategy: RoutingStrategy::from_str(&row.try_get::<String, _>("strategy")?)?,
        expires_at: parse_ts(&row.try_get::<String, _>("expires_at")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[async_trait]
impl LeadStore for SqliteStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        let details = serde_json::to_string(&lead.details)
            .map_err(|e| LeadEngineError::internal(e.to_string()))?;
        with_timeout("insert_lead", self.op_timeout_ms, async {
            sqlx::query(
                "INSERT INTO leads (id, insurance_line, quality_score, tier, status, source,
                                    city, state, preferred_language, created_at, sla_deadline, details)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&lead.id.0)
            .bind(&lead.insurance_line)
            .bind(lead.quality_score)
            .bind(lead.tier.as_str())
            .bind(lead.status.as_str())
            .bind(lead.source.as_str())
            .bind(&lead.city)
            .bind(&lead.state)
            .bind(&lead.preferred_language)
            .bind(fmt_ts(lead.created_at))
            .bind(fmt_ts(lead.sla_deadline))
            .bind(details)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>> {
        with_timeout("get_lead", self.op_timeout_ms, async {
            let row = sqlx::query("SELECT * FROM leads WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(lead_from_row).transpose()
        })
        .await
    }

    async fn list_non_terminal_leads(&self) -> Result<Vec<Lead>> {
        with_timeout("list_non_terminal_leads", self.op_timeout_ms, async {
            let rows =
                sqlx::query("SELECT * FROM leads WHERE status NOT IN ('converted', 'lost')")
                    .fetch_all(&self.pool)
                    .await?;
            rows.iter().map(lead_from_row).collect()
        })
        .await
    }

    async fn update_lead_score(
        &self,
        id: &LeadId,
        score: f64,
        tier: LeadTier,
        sla_deadline: DateTime<Utc>,
    ) -> Result<()> {
        with_timeout("update_lead_score", self.op_timeout_ms, async {
            let result = sqlx::query(
                "UPDATE leads SET quality_score = ?, tier = ?, sla_deadline = ? WHERE id = ?",
            )
            .bind(score)
            .bind(tier.as_str())
            .bind(fmt_ts(sla_deadline))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("lead", id.0.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<()> {
        with_timeout("update_lead_status", self.op_timeout_ms, async {
            let result = sqlx::query("UPDATE leads SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(&id.0)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("lead", id.0.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let specs = serde_json::to_string(&agent.specializations)
            .map_err(|e| LeadEngineError::internal(e.to_string()))?;
        with_timeout("upsert_agent", self.op_timeout_ms, async {
            sqlx::query(
                "INSERT INTO agents (id, name, status, max_capacity, current_capacity,
                                     specializations, rating, conversion_rate,
                                     avg_response_minutes, city, state, last_released_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     status = excluded.status,
                     max_capacity = excluded.max_capacity,
                     specializations = excluded.specializations,
                     rating = excluded.rating,
                     conversion_rate = excluded.conversion_rate,
                     avg_response_minutes = excluded.avg_response_minutes,
                     city = excluded.city,
                     state = excluded.state",
            )
            .bind(&agent.id.0)
            .bind(&agent.name)
            .bind(agent.status.as_str())
            .bind(i64::from(agent.max_capacity))
            .bind(i64::from(agent.current_capacity))
            .bind(specs)
            .bind(agent.rating)
            .bind(agent.conversion_rate)
            .bind(agent.avg_response_minutes)
            .bind(&agent.city)
            .bind(&agent.state)
            .bind(agent.last_released_at.map(fmt_ts))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        with_timeout("get_agent", self.op_timeout_ms, async {
            let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(agent_from_row).transpose()
        })
        .await
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        with_timeout("list_agents", self.op_timeout_ms, async {
            let rows = sqlx::query("SELECT * FROM agents ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(agent_from_row).collect()
        })
        .await
    }

    async fn list_available_agents(&self) -> Result<Vec<Agent>> {
        with_timeout("list_available_agents", self.op_timeout_ms, async {
            let rows = sqlx::query(
                "SELECT * FROM agents WHERE status = 'available'
                 ORDER BY last_released_at ASC",
            )
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(agent_from_row).collect()
        })
        .await
    }

    async fn update_agent_status(
        &self,
        id: &AgentId,
        status: AgentStatus,
        max_capacity: Option<u32>,
    ) -> Result<()> {
        with_timeout("update_agent_status", self.op_timeout_ms, async {
            let result = sqlx::query(
                "UPDATE agents SET status = ?, max_capacity = COALESCE(?, max_capacity)
                 WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(max_capacity.map(i64::from))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("agent", id.0.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn replace_specializations(
        &self,
        id: &AgentId,
        specializations: Vec<Specialization>,
    ) -> Result<()> {
        let specs = serde_json::to_string(&specializations)
            .map_err(|e| LeadEngineError::internal(e.to_string()))?;
        with_timeout("replace_specializations", self.op_timeout_ms, async {
            let result = sqlx::query("UPDATE agents SET specializations = ? WHERE id = ?")
                .bind(specs)
                .bind(&id.0)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("agent", id.0.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn try_reserve_capacity(&self, id: &AgentId) -> Result<bool> {
        with_timeout("try_reserve_capacity", self.op_timeout_ms, async {
            // Single guarded update: the WHERE clause is the
            // compare, the affected-row count is the outcome.
            let result = sqlx::query(
                "UPDATE agents SET current_capacity = current_capacity + 1
                 WHERE id = ? AND current_capacity < max_capacity",
            )
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn force_reserve_capacity(&self, id: &AgentId) -> Result<()> {
        with_timeout("force_reserve_capacity", self.op_timeout_ms, async {
            let result =
                sqlx::query("UPDATE agents SET current_capacity = current_capacity + 1 WHERE id = ?")
                    .bind(&id.0)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("agent", id.0.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn release_capacity(&self, id: &AgentId) -> Result<()> {
        with_timeout("release_capacity", self.op_timeout_ms, async {
            let result = sqlx::query(
                "UPDATE agents SET current_capacity = MAX(0, current_capacity - 1),
                                   last_released_at = ?
                 WHERE id = ?",
            )
            .bind(fmt_ts(Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("agent", id.0.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<()> {
        let reasons = serde_json::to_string(&assignment.match_reasons)
            .map_err(|e| LeadEngineError::internal(e.to_string()))?;
        with_timeout("insert_assignment", self.op_timeout_ms, async {
            let inserted = sqlx::query(
                "INSERT INTO assignments (id, lead_id, agent_id, status, match_score,
                                          match_reasons, strategy, expires_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&assignment.id)
            .bind(&assignment.lead_id.0)
            .bind(&assignment.agent_id.0)
            .bind(assignment.status.as_str())
            .bind(assignment.match_score)
            .bind(reasons)
            .bind(assignment.strategy.as_str())
            .bind(fmt_ts(assignment.expires_at))
            .bind(fmt_ts(assignment.created_at))
            .execute(&self.pool)
            .await;
            match inserted {
                Ok(_) => Ok(()),
                // The partial unique index on active assignments
                // turns a concurrent double-route into a lost race.
                Err(err)
                    if err
                        .as_database_error()
                        .is_some_and(|db| db.is_unique_violation()) =>
                {
                    Err(LeadEngineError::ConcurrencyConflict {
                        agent_id: assignment.agent_id.clone(),
                    })
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn get_assignment(&self, id: &str) -> Result<Option<Assignment>> {
        with_timeout("get_assignment", self.op_timeout_ms, async {
            let row = sqlx::query("SELECT * FROM assignments WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(assignment_from_row).transpose()
        })
        .await
    }

    async fn get_active_assignment(&self, lead_id: &LeadId) -> Result<Option<Assignment>> {
        with_timeout("get_active_assignment", self.op_timeout_ms, async {
            let row = sqlx::query(
                "SELECT * FROM assignments
                 WHERE lead_id = ? AND status IN ('pending', 'accepted')
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(&lead_id.0)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(assignment_from_row).transpose()
        })
        .await
    }

    async fn update_assignment_status(&self, id: &str, status: AssignmentStatus) -> Result<()> {
        with_timeout("update_assignment_status", self.op_timeout_ms, async {
            let result = sqlx::query("UPDATE assignments SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("assignment", id));
            }
            Ok(())
        })
        .await
    }

    async fn list_expired_pending_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>> {
        with_timeout("list_expired_pending_assignments", self.op_timeout_ms, async {
            let rows = sqlx::query(
                "SELECT * FROM assignments
                 WHERE status = 'pending' AND expires_at <= ?
                 ORDER BY expires_at ASC",
            )
            .bind(fmt_ts(now))
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(assignment_from_row).collect()
        })
        .await
    }

    async fn assignments_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        with_timeout("assignments_created_since", self.op_timeout_ms, async {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM assignments WHERE created_at >= ?")
                .bind(fmt_ts(since))
                .fetch_one(&self.pool)
                .await?;
            Ok(row.try_get::<i64, _>("n")? as u64)
        })
        .await
    }

    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        with_timeout("upsert_queue_entry", self.op_timeout_ms, async {
            sqlx::query(
                "INSERT INTO queue_entries (lead_id, queue, priority, enqueued_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(lead_id) DO UPDATE SET
                     queue = excluded.queue,
                     priority = excluded.priority,
                     enqueued_at = excluded.enqueued_at",
            )
            .bind(&entry.lead_id.0)
            .bind(entry.queue.as_str())
            .bind(entry.priority)
            .bind(fmt_ts(entry.enqueued_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn remove_queue_entry(&self, lead_id: &LeadId) -> Result<()> {
        with_timeout("remove_queue_entry", self.op_timeout_ms, async {
            sqlx::query("DELETE FROM queue_entries WHERE lead_id = ?")
                .bind(&lead_id.0)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn get_queue_entry(&self, lead_id: &LeadId) -> Result<Option<QueueEntry>> {
        with_timeout("get_queue_entry", self.op_timeout_ms, async {
            let row = sqlx::query("SELECT * FROM queue_entries WHERE lead_id = ?")
                .bind(&lead_id.0)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|row| -> Result<QueueEntry> {
                Ok(QueueEntry {
                    lead_id: LeadId(row.try_get("lead_id")?),
                    queue: QueueType::from_str(&row.try_get::<String, _>("queue")?)?,
                    priority: row.try_get("priority")?,
                    enqueued_at: parse_ts(&row.try_get::<String, _>("enqueued_at")?)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn list_queue(&self, queue: QueueType, limit: usize) -> Result<Vec<QueueEntry>> {
        with_timeout("list_queue", self.op_timeout_ms, async {
            let rows = sqlx::query(
                "SELECT * FROM queue_entries WHERE queue = ?
                 ORDER BY priority DESC LIMIT ?",
            )
            .bind(queue.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|row| -> Result<QueueEntry> {
                    Ok(QueueEntry {
                        lead_id: LeadId(row.try_get("lead_id")?),
                        queue: QueueType::from_str(&row.try_get::<String, _>("queue")?)?,
                        priority: row.try_get("priority")?,
                        enqueued_at: parse_ts(&row.try_get::<String, _>("enqueued_at")?)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>> {
        with_timeout("queue_stats", self.op_timeout_ms, async {
            let rows = sqlx::query(
                "SELECT queue, COUNT(*) AS depth, MIN(enqueued_at) AS oldest
                 FROM queue_entries GROUP BY queue",
            )
            .fetch_all(&self.pool)
            .await?;

            let now = Utc::now();
            let mut stats: Vec<QueueStats> = QueueType::ALL
                .iter()
                .map(|&queue| QueueStats {
                    queue,
                    depth: 0,
                    oldest_wait_secs: None,
                })
                .collect();

            for row in rows {
                let queue = QueueType::from_str(&row.try_get::<String, _>("queue")?)?;
                let depth = row.try_get::<i64, _>("depth")? as usize;
                let oldest: Option<String> = row.try_get("oldest")?;
                let oldest_wait_secs = oldest
                    .as_deref()
                    .map(parse_ts)
                    .transpose()?
                    .map(|ts| (now - ts).num_seconds());
                if let Some(entry) = stats.iter_mut().find(|s| s.queue == queue) {
                    entry.depth = depth;
                    entry.oldest_wait_secs = oldest_wait_secs;
                }
            }
            Ok(stats)
        })
        .await
    }

    async fn leads_approaching_sla(&self, threshold_minutes: i64) -> Result<Vec<Lead>> {
        with_timeout("leads_approaching_sla", self.op_timeout_ms, async {
            let limit = Utc::now() + chrono::Duration::minutes(threshold_minutes);
            let rows = sqlx::query(
                "SELECT l.* FROM leads l
                 WHERE l.status NOT IN ('converted', 'lost')
                   AND l.sla_deadline <= ?
                   AND NOT EXISTS (
                       SELECT 1 FROM assignments a
                       WHERE a.lead_id = l.id
                         AND a.status IN ('pending', 'accepted')
                   )
                 ORDER BY l.sla_deadline ASC",
            )
            .bind(fmt_ts(limit))
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(lead_from_row).collect()
        })
        .await
    }

    async fn insert_explanation(&self, explanation: &RoutingExplanation) -> Result<()> {
        let payload = serde_json::to_string(explanation)
            .map_err(|e| LeadEngineError::internal(e.to_string()))?;
        with_timeout("insert_explanation", self.op_timeout_ms, async {
            sqlx::query(
                "INSERT INTO routing_explanations (lead_id, payload, created_at)
                 VALUES (?, ?, ?)",
            )
            .bind(&explanation.lead_id.0)
            .bind(payload)
            .bind(fmt_ts(explanation.decided_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn insert_experiment(&self, experiment: &Experiment) -> Result<()> {
        let payload = serde_json::to_string(experiment)
            .map_err(|e| LeadEngineError::internal(e.to_string()))?;
        with_timeout("insert_experiment", self.op_timeout_ms, async {
            sqlx::query(
                "INSERT INTO experiments (id, status, payload, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&experiment.id)
            .bind(status_str(experiment))
            .bind(payload)
            .bind(fmt_ts(experiment.created_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>> {
        with_timeout("get_experiment", self.op_timeout_ms, async {
            let row = sqlx::query("SELECT payload FROM experiments WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|row| {
                let payload: String = row.try_get("payload")?;
                serde_json::from_str(&payload)
                    .map_err(|e| LeadEngineError::internal(format!("bad experiment payload: {e}")))
            })
            .transpose()
        })
        .await
    }

    async fn list_active_experiments(&self) -> Result<Vec<Experiment>> {
        with_timeout("list_active_experiments", self.op_timeout_ms, async {
            let rows = sqlx::query(
                "SELECT payload FROM experiments WHERE status = 'active' ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|row| {
                    let payload: String = row.try_get("payload")?;
                    serde_json::from_str(&payload).map_err(|e| {
                        LeadEngineError::internal(format!("bad experiment payload: {e}"))
                    })
                })
                .collect()
        })
        .await
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<()> {
        let payload = serde_json::to_string(experiment)
            .map_err(|e| LeadEngineError::internal(e.to_string()))?;
        with_timeout("update_experiment", self.op_timeout_ms, async {
            let result = sqlx::query("UPDATE experiments SET status = ?, payload = ? WHERE id = ?")
                .bind(status_str(experiment))
                .bind(payload)
                .bind(&experiment.id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(LeadEngineError::not_found("experiment", &*experiment.id));
            }
            Ok(())
        })
        .await
    }
}

fn status_str(experiment: &Experiment) -> &'static str {
    match experiment.status {
        crate::experiment::ExperimentStatus::Active => "active",
        crate::experiment::ExperimentStatus::Concluded => "concluded",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::LeadDetails;

    fn lead(id: &str, tier: LeadTier, deadline_offset_min: i64) -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId(id.to_string()),
            insurance_line: "auto".to_string(),
            quality_score: 82.5,
            tier,
            status: LeadStatus::New,
            source: LeadSource::Referral,
            city: Some("Austin".to_string()),
            state: Some("TX".to_string()),
            preferred_language: Some("en".to_string()),
            created_at: now,
            sla_deadline: now + chrono::Duration::minutes(deadline_offset_min),
            details: LeadDetails {
                email: Some("p@example.com".to_string()),
                engagement_score: Some(88.0),
                ..LeadDetails::default()
            },
        }
    }

    fn agent(id: &str) -> Agent {
        Agent {
            id: AgentId(id.to_string()),
            name: id.to_string(),
            status: AgentStatus::Available,
            max_capacity: 5,
            current_capacity: 0,
            specializations: vec![crate::agent::Specialization::new("auto", "individual", 4)],
            rating: 4.2,
            conversion_rate: 0.3,
            avg_response_minutes: 6.0,
            city: None,
            state: Some("TX".to_string()),
            last_released_at: None,
        }
    }

    #[tokio::test]
    async fn lead_round_trips_with_details() {
        let store = SqliteStore::in_memory().await.unwrap();
        let original = lead("l1", LeadTier::Hot, 60);
        store.insert_lead(&original).await.unwrap();

        let loaded = store.get_lead(&original.id).await.unwrap().unwrap();
        assert_eq!(loaded.tier, LeadTier::Hot);
        assert_eq!(loaded.quality_score, 82.5);
        assert_eq!(loaded.details.email.as_deref(), Some("p@example.com"));
        assert_eq!(loaded.details.engagement_score, Some(88.0));
        assert_eq!(loaded.sla_deadline, original.sla_deadline);
    }

    #[tokio::test]
    async fn active_assignment_lookup_ignores_terminal_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_lead(&lead("l1", LeadTier::Hot, 60)).await.unwrap();
        store.upsert_agent(&agent("a1")).await.unwrap();

        let first = Assignment::new(
            LeadId::from("l1"),
            AgentId::from("a1"),
            90.0,
            vec!["specialization auto".to_string()],
            RoutingStrategy::Greedy,
            Utc::now() + chrono::Duration::hours(24),
        );
        store.insert_assignment(&first).await.unwrap();

        let active = store
            .get_active_assignment(&LeadId::from("l1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, first.id);
        assert_eq!(active.strategy, RoutingStrategy::Greedy);

        store
            .update_assignment_status(&first.id, AssignmentStatus::Reassigned)
            .await
            .unwrap();
        assert!(store
            .get_active_assignment(&LeadId::from("l1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn second_active_assignment_for_a_lead_is_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_lead(&lead("l1", LeadTier::Hot, 60)).await.unwrap();
        store.upsert_agent(&agent("a1")).await.unwrap();
        store.upsert_agent(&agent("a2")).await.unwrap();

        let first = Assignment::new(
            LeadId::from("l1"),
            AgentId::from("a1"),
            90.0,
            Vec::new(),
            RoutingStrategy::Greedy,
            Utc::now() + chrono::Duration::hours(24),
        );
        store.insert_assignment(&first).await.unwrap();

        let racing = Assignment::new(
            LeadId::from("l1"),
            AgentId::from("a2"),
            85.0,
            Vec::new(),
            RoutingStrategy::Greedy,
            Utc::now() + chrono::Duration::hours(24),
        );
        let err = store.insert_assignment(&racing).await.unwrap_err();
        assert!(matches!(err, LeadEngineError::ConcurrencyConflict { .. }));

        // A closed first assignment clears the way.
        store
            .update_assignment_status(&first.id, AssignmentStatus::Expired)
            .await
            .unwrap();
        store.insert_assignment(&racing).await.unwrap();
    }

    #[tokio::test]
    async fn expired_pending_assignments_are_listed() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_lead(&lead("overdue", LeadTier::Hot, 60)).await.unwrap();
        store.insert_lead(&lead("fresh", LeadTier::Hot, 60)).await.unwrap();
        store.upsert_agent(&agent("a1")).await.unwrap();

        let overdue = Assignment::new(
            LeadId::from("overdue"),
            AgentId::from("a1"),
            90.0,
            Vec::new(),
            RoutingStrategy::Greedy,
            Utc::now() - chrono::Duration::minutes(5),
        );
        let fresh = Assignment::new(
            LeadId::from("fresh"),
            AgentId::from("a1"),
            90.0,
            Vec::new(),
            RoutingStrategy::Greedy,
            Utc::now() + chrono::Duration::hours(24),
        );
        store.insert_assignment(&overdue).await.unwrap();
        store.insert_assignment(&fresh).await.unwrap();

        let expired = store
            .list_expired_pending_assignments(Utc::now())
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, overdue.id);

        // Accepted assignments never expire.
        store
            .update_assignment_status(&overdue.id, AssignmentStatus::Accepted)
            .await
            .unwrap();
        assert!(store
            .list_expired_pending_assignments(Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn queue_entries_upsert_and_order_by_priority() {
        let store = SqliteStore::in_memory().await.unwrap();
        let urgent = lead("urgent", LeadTier::Hot, 5);
        let relaxed = lead("relaxed", LeadTier::Hot, 120);
        store
            .upsert_queue_entry(&QueueEntry::for_lead(&relaxed, QueueType::Hot))
            .await
            .unwrap();
        store
            .upsert_queue_entry(&QueueEntry::for_lead(&urgent, QueueType::Hot))
            .await
            .unwrap();

        let entries = store.list_queue(QueueType::Hot, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].lead_id, LeadId::from("urgent"));

        // Re-queueing moves the lead; a lead is in one queue at most.
        store
            .upsert_queue_entry(&QueueEntry::for_lead(&urgent, QueueType::Waiting))
            .await
            .unwrap();
        let hot = store.list_queue(QueueType::Hot, 10).await.unwrap();
        assert_eq!(hot.len(), 1);

        let stats = store.queue_stats().await.unwrap();
        let waiting = stats.iter().find(|s| s.queue == QueueType::Waiting).unwrap();
        assert_eq!(waiting.depth, 1);
        assert!(waiting.oldest_wait_secs.is_some());
    }

    #[tokio::test]
    async fn sla_query_filters_assigned_and_far_leads() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_lead(&lead("near", LeadTier::Hot, 30)).await.unwrap();
        store.insert_lead(&lead("far", LeadTier::Cold, 2_000)).await.unwrap();
        store.insert_lead(&lead("assigned", LeadTier::Hot, 10)).await.unwrap();
        store.upsert_agent(&agent("a1")).await.unwrap();
        store
            .insert_assignment(&Assignment::new(
                LeadId::from("assigned"),
                AgentId::from("a1"),
                80.0,
                Vec::new(),
                RoutingStrategy::Greedy,
                Utc::now() + chrono::Duration::hours(24),
            ))
            .await
            .unwrap();

        let at_risk = store.leads_approaching_sla(60).await.unwrap();
        assert_eq!(at_risk.len(), 1);
        assert_eq!(at_risk[0].id, LeadId::from("near"));
    }

    #[tokio::test]
    async fn experiment_payload_round_trips() {
        let store = SqliteStore::in_memory().await.unwrap();
        let experiment = Experiment {
            id: "exp-1".to_string(),
            name: "greedy vs optimal".to_string(),
            success_metric: crate::experiment::SuccessMetric::ConversionRate,
            min_sample_size: 100,
            confidence_level: 95,
            status: crate::experiment::ExperimentStatus::Active,
            variants: Vec::new(),
            winner: None,
            created_at: Utc::now(),
        };
        store.insert_experiment(&experiment).await.unwrap();

        let active = store.list_active_experiments().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "greedy vs optimal");

        let mut concluded = experiment.clone();
        concluded.status = crate::experiment::ExperimentStatus::Concluded;
        concluded.winner = Some("control".to_string());
        store.update_experiment(&concluded).await.unwrap();
        assert!(store.list_active_experiments().await.unwrap().is_empty());
        let loaded = store.get_experiment("exp-1").await.unwrap().unwrap();
        assert_eq!(loaded.winner.as_deref(), Some("control"));
    }
}
