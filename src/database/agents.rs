// Agent table operations

use crate::models::{Agent, AgentStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

impl super::Database {
    /// Insert a new agent row
    pub fn create_agent(&self, agent: &Agent) -> Result<()> {
        self.get_connection().execute(
            "INSERT INTO agents (
                id, name, session_id, status, current_task,
                worktree_branch, started_at, last_heartbeat, capabilities
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                agent.id,
                agent.name,
                agent.session_id,
                agent.status.as_str(),
                agent.current_task,
                agent.worktree_branch,
                agent.started_at.to_rfc3339(),
                agent.last_heartbeat.to_rfc3339(),
                super::vec_to_json(&agent.capabilities),
            ],
        )?;
        Ok(())
    }

    /// Get an agent by ID
    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(
            "SELECT id, name, session_id, status, current_task,
                    worktree_branch, started_at, last_heartbeat, capabilities
             FROM agents WHERE id = ?1",
        )?;

        match stmt.query_row(params![id], |row| Ok(row_to_agent(row))) {
            Ok(agent) => Ok(Some(agent)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Update an agent's heartbeat timestamp; no other side effect.
    /// Returns false if the agent does not exist.
    pub fn touch_agent_heartbeat(&self, id: &str) -> Result<bool> {
        let changed = self.get_connection().execute(
            "UPDATE agents SET last_heartbeat = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    /// Update an agent's status (and optionally its current task).
    /// Agents already in a terminal status are never modified.
    pub fn set_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        current_task: Option<&str>,
    ) -> Result<bool> {
        let changed = self.get_connection().execute(
            "UPDATE agents
             SET status = ?1, current_task = COALESCE(?2, current_task)
             WHERE id = ?3 AND status NOT IN ('completed', 'failed')",
            params![status.as_str(), current_task, id],
        )?;
        Ok(changed > 0)
    }

    /// Agents with status active or idle
    pub fn get_active_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(
            "SELECT id, name, session_id, status, current_task,
                    worktree_branch, started_at, last_heartbeat, capabilities
             FROM agents
             WHERE status IN ('active', 'idle')
             ORDER BY started_at",
        )?;

        let agents = stmt
            .query_map([], |row| Ok(row_to_agent(row)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(agents)
    }

    /// Live agents whose heartbeat predates the cutoff
    pub fn get_stale_agents(&self, cutoff: DateTime<Utc>) -> Result<Vec<Agent>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(
            "SELECT id, name, session_id, status, current_task,
                    worktree_branch, started_at, last_heartbeat, capabilities
             FROM agents
             WHERE status IN ('active', 'idle') AND last_heartbeat < ?1
             ORDER BY last_heartbeat",
        )?;

        let agents = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| Ok(row_to_agent(row)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(agents)
    }
}

/// Convert a database row to an Agent struct
fn row_to_agent(row: &Row) -> Agent {
    let status_str: String = row.get(3).unwrap();
    let started_at: String = row.get(6).unwrap();
    let last_heartbeat: String = row.get(7).unwrap();
    let capabilities: String = row.get(8).unwrap();

    Agent {
        id: row.get(0).unwrap(),
        name: row.get(1).unwrap(),
        session_id: row.get(2).unwrap(),
        status: AgentStatus::parse(&status_str).unwrap_or(AgentStatus::Failed),
        current_task: row.get(4).unwrap(),
        worktree_branch: row.get(5).unwrap(),
        started_at: super::parse_dt(&started_at),
        last_heartbeat: super::parse_dt(&last_heartbeat),
        capabilities: super::json_to_vec(&capabilities),
    }
}
