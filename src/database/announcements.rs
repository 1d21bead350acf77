// Work announcement table operations

use crate::models::{IntentType, WorkAnnouncement};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Row};

const SELECT_COLUMNS: &str = "a.id, a.agent_id, a.agent_name, a.worktree_branch, a.intent_type,
        a.resource, a.description, a.files_affected, a.estimated_completion,
        a.announced_at, a.completed_at";

impl super::Database {
    /// Insert a new announcement row
    pub fn insert_announcement(&self, announcement: &WorkAnnouncement) -> Result<()> {
        self.get_connection().execute(
            "INSERT INTO work_announcements (
                id, agent_id, agent_name, worktree_branch, intent_type,
                resource, description, files_affected, estimated_completion,
                announced_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                announcement.id,
                announcement.agent_id,
                announcement.agent_name,
                announcement.worktree_branch,
                announcement.intent_type.as_str(),
                announcement.resource,
                announcement.description,
                super::vec_to_json(&announcement.files_affected),
                announcement.estimated_completion.map(|t| t.to_rfc3339()),
                announcement.announced_at.to_rfc3339(),
                announcement.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Set `completed_at` on the first open announcement matching
    /// (agent, resource). Returns false when no open row matched, which
    /// makes a second completion call a no-op.
    pub fn complete_announcement(&self, agent_id: &str, resource: &str) -> Result<bool> {
        let changed = self.get_connection().execute(
            "UPDATE work_announcements SET completed_at = ?1
             WHERE id = (
                 SELECT id FROM work_announcements
                 WHERE agent_id = ?2 AND resource = ?3 AND completed_at IS NULL
                 ORDER BY announced_at LIMIT 1
             )",
            params![Utc::now().to_rfc3339(), agent_id, resource],
        )?;
        Ok(changed > 0)
    }

    /// Open announcements whose owning agent is currently live. Filtering
    /// through the agent's status makes a stale agent's announcements
    /// disappear from overlap computation without a separate cleanup pass.
    pub fn get_active_announcements(&self) -> Result<Vec<WorkAnnouncement>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM work_announcements a
             JOIN agents ag ON ag.id = a.agent_id
             WHERE a.completed_at IS NULL AND ag.status IN ('active', 'idle')
             ORDER BY a.announced_at"
        ))?;

        let announcements = stmt
            .query_map([], |row| Ok(row_to_announcement(row)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(announcements)
    }

    /// Active announcements whose resource contains the pattern
    pub fn get_announcements_on_resource(&self, pattern: &str) -> Result<Vec<WorkAnnouncement>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM work_announcements a
             JOIN agents ag ON ag.id = a.agent_id
             WHERE a.completed_at IS NULL
               AND ag.status IN ('active', 'idle')
               AND a.resource LIKE ?1
             ORDER BY a.announced_at"
        ))?;

        let like = format!("%{}%", pattern);
        let announcements = stmt
            .query_map(params![like], |row| Ok(row_to_announcement(row)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(announcements)
    }

    /// Close every open announcement owned by an agent; returns the count
    pub fn close_announcements_for_agent(&self, agent_id: &str) -> Result<usize> {
        let changed = self.get_connection().execute(
            "UPDATE work_announcements SET completed_at = ?1
             WHERE agent_id = ?2 AND completed_at IS NULL",
            params![Utc::now().to_rfc3339(), agent_id],
        )?;
        Ok(changed)
    }

    /// Fetch one announcement by id (for tests and status views)
    pub fn get_announcement(&self, id: &str) -> Result<Option<WorkAnnouncement>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_announcements a WHERE a.id = ?1"
        ))?;

        match stmt.query_row(params![id], |row| Ok(row_to_announcement(row))) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Convert a database row to a WorkAnnouncement struct
fn row_to_announcement(row: &Row) -> WorkAnnouncement {
    let intent: String = row.get(4).unwrap();
    let files: String = row.get(7).unwrap();
    let estimated: Option<String> = row.get(8).unwrap();
    let announced_at: String = row.get(9).unwrap();
    let completed_at: Option<String> = row.get(10).unwrap();

    WorkAnnouncement {
        id: row.get(0).unwrap(),
        agent_id: row.get(1).unwrap(),
        agent_name: row.get(2).unwrap(),
        worktree_branch: row.get(3).unwrap(),
        intent_type: IntentType::parse(&intent).unwrap_or(IntentType::Editing),
        resource: row.get(5).unwrap(),
        description: row.get(6).unwrap(),
        files_affected: super::json_to_vec(&files),
        estimated_completion: super::parse_dt_opt(estimated),
        announced_at: super::parse_dt(&announced_at),
        completed_at: super::parse_dt_opt(completed_at),
    }
}
