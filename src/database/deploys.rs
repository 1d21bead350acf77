// Deploy action and batch table operations

use crate::models::state_machine::validate_transition;
use crate::models::{
    ActionPayload, ActionType, BatchResult, BatchStatus, DeployAction, DeployBatch, DeployStatus,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

const ACTION_COLUMNS: &str = "id, agent_id, action_type, target, payload, status, batch_id,
        queued_at, execute_after, priority, dependencies";

impl super::Database {
    /// Insert a new deploy action row
    pub fn insert_action(&self, action: &DeployAction) -> Result<()> {
        self.get_connection().execute(
            "INSERT INTO deploy_actions (
                id, agent_id, action_type, target, payload, status, batch_id,
                queued_at, execute_after, priority, dependencies
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                action.id,
                action.agent_id,
                action.action_type.as_str(),
                action.target,
                serde_json::to_string(&action.payload)?,
                action.status.as_str(),
                action.batch_id,
                action.queued_at.to_rfc3339(),
                action.execute_after.to_rfc3339(),
                action.priority,
                super::vec_to_json(&action.dependencies),
            ],
        )?;
        Ok(())
    }

    /// Get a deploy action by ID
    pub fn get_action(&self, id: &str) -> Result<Option<DeployAction>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTION_COLUMNS} FROM deploy_actions WHERE id = ?1"
        ))?;

        match stmt.query_row(params![id], row_to_action) {
            Ok(action) => Ok(Some(action)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The existing pending row for a mergeable (action_type, target) pair,
    /// if one exists
    pub fn find_mergeable_pending(
        &self,
        action_type: ActionType,
        target: &str,
    ) -> Result<Option<DeployAction>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTION_COLUMNS} FROM deploy_actions
             WHERE action_type = ?1 AND target = ?2 AND status = 'pending'
             ORDER BY queued_at LIMIT 1"
        ))?;

        match stmt.query_row(params![action_type.as_str(), target], row_to_action) {
            Ok(action) => Ok(Some(action)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Rewrite a pending row after an enqueue-time merge
    pub fn update_pending_action(
        &self,
        id: &str,
        payload: &ActionPayload,
        priority: i32,
        execute_after: DateTime<Utc>,
        dependencies: &[String],
    ) -> Result<()> {
        let changed = self.get_connection().execute(
            "UPDATE deploy_actions
             SET payload = ?1, priority = ?2, execute_after = ?3, dependencies = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![
                serde_json::to_string(payload)?,
                priority,
                execute_after.to_rfc3339(),
                super::vec_to_json(dependencies),
                id
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("Pending action {} no longer mergeable", id));
        }
        Ok(())
    }

    /// Pending actions ready to execute, ordered priority desc then FIFO
    pub fn ready_pending_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeployAction>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTION_COLUMNS} FROM deploy_actions
             WHERE status = 'pending' AND execute_after <= ?1
             ORDER BY priority DESC, queued_at ASC
             LIMIT ?2"
        ))?;

        let actions = stmt
            .query_map(params![now.to_rfc3339(), limit as i64], row_to_action)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(actions)
    }

    /// Count of pending actions whose window has elapsed
    pub fn count_ready_pending(&self, now: DateTime<Utc>) -> Result<i64> {
        let count = self.get_connection().query_row(
            "SELECT COUNT(*) FROM deploy_actions
             WHERE status = 'pending' AND execute_after <= ?1",
            params![now.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Move a set of pending actions into a batch, atomically
    pub fn mark_actions_batched(&self, ids: &[String], batch_id: &str) -> Result<()> {
        let tx = self.get_connection().unchecked_transaction()?;
        for id in ids {
            let changed = tx.execute(
                "UPDATE deploy_actions SET status = 'batched', batch_id = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![batch_id, id],
            )?;
            if changed == 0 {
                return Err(anyhow!("Action {} was not pending when batched", id));
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Advance an action's status, enforcing the monotonic state machine
    pub fn set_action_status(&self, id: &str, to: DeployStatus) -> Result<()> {
        let current: String = self.get_connection().query_row(
            "SELECT status FROM deploy_actions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let from = DeployStatus::parse(&current)
            .ok_or_else(|| anyhow!("Unknown status '{}' on action {}", current, id))?;
        validate_transition(from, to)?;

        self.get_connection().execute(
            "UPDATE deploy_actions SET status = ?1 WHERE id = ?2",
            params![to.as_str(), id],
        )?;
        Ok(())
    }

    /// All member actions of a batch, in stored batch order
    pub fn get_actions(&self, ids: &[String]) -> Result<Vec<DeployAction>> {
        let mut actions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(action) = self.get_action(id)? {
                actions.push(action);
            }
        }
        Ok(actions)
    }

    /// Insert a new batch row
    pub fn insert_batch(&self, batch: &DeployBatch) -> Result<()> {
        self.get_connection().execute(
            "INSERT INTO deploy_batches (id, action_ids, created_at, executed_at, status, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                batch.id,
                super::vec_to_json(&batch.action_ids),
                batch.created_at.to_rfc3339(),
                batch.executed_at.map(|t| t.to_rfc3339()),
                batch.status.as_str(),
                batch
                    .result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;
        Ok(())
    }

    /// Get a batch by ID
    pub fn get_batch(&self, id: &str) -> Result<Option<DeployBatch>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(
            "SELECT id, action_ids, created_at, executed_at, status, result
             FROM deploy_batches WHERE id = ?1",
        )?;

        match stmt.query_row(params![id], row_to_batch) {
            Ok(batch) => Ok(Some(batch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a batch as executing
    pub fn set_batch_executing(&self, id: &str) -> Result<()> {
        self.get_connection().execute(
            "UPDATE deploy_batches SET status = 'executing' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Record a batch's final status and aggregated result
    pub fn finish_batch(&self, id: &str, status: BatchStatus, result: &BatchResult) -> Result<()> {
        self.get_connection().execute(
            "UPDATE deploy_batches
             SET status = ?1, result = ?2, executed_at = ?3
             WHERE id = ?4",
            params![
                status.as_str(),
                serde_json::to_string(result)?,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }
}

/// Convert a database row to a DeployAction struct
fn row_to_action(row: &Row) -> rusqlite::Result<DeployAction> {
    let action_type: String = row.get(2)?;
    let payload: String = row.get(4)?;
    let status: String = row.get(5)?;
    let queued_at: String = row.get(7)?;
    let execute_after: String = row.get(8)?;
    let dependencies: String = row.get(10)?;

    let payload: ActionPayload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DeployAction {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        action_type: ActionType::parse(&action_type).unwrap_or_else(|| payload.action_type()),
        target: row.get(3)?,
        payload,
        status: DeployStatus::parse(&status).unwrap_or(DeployStatus::Failed),
        batch_id: row.get(6)?,
        queued_at: super::parse_dt(&queued_at),
        execute_after: super::parse_dt(&execute_after),
        priority: row.get(9)?,
        dependencies: super::json_to_vec(&dependencies),
    })
}

/// Convert a database row to a DeployBatch struct
fn row_to_batch(row: &Row) -> rusqlite::Result<DeployBatch> {
    let action_ids: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let executed_at: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    let result: Option<String> = row.get(5)?;

    Ok(DeployBatch {
        id: row.get(0)?,
        action_ids: super::json_to_vec(&action_ids),
        created_at: super::parse_dt(&created_at),
        executed_at: super::parse_dt_opt(executed_at),
        status: BatchStatus::parse(&status).unwrap_or(BatchStatus::Failed),
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
    })
}
