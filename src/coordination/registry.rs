// Agent lifecycle: register, heartbeat, status, stale cleanup

use crate::coordination::SharedDatabase;
use crate::models::{Agent, AgentStatus};
use crate::utils::lock_mutex_recover;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

/// Registry of agent sessions working on the shared repository.
///
/// Heartbeats are the liveness signal: callers must invoke `heartbeat`
/// periodically, and a sweep transitions silent agents to failed while
/// releasing everything they held.
pub struct AgentRegistry {
    db: SharedDatabase,
    /// Expected heartbeat cadence
    heartbeat_interval: Duration,
    /// Liveness cutoff is this many missed heartbeats
    stale_after_heartbeats: i64,
}

impl AgentRegistry {
    pub fn new(db: SharedDatabase, heartbeat_interval_secs: i64, stale_after_heartbeats: i64) -> Self {
        Self {
            db,
            heartbeat_interval: Duration::seconds(heartbeat_interval_secs),
            stale_after_heartbeats,
        }
    }

    /// Register a new agent; returns its generated id
    pub fn register(
        &self,
        name: &str,
        capabilities: &[String],
        worktree_branch: Option<&str>,
    ) -> Result<String> {
        let now = Utc::now();
        let agent = Agent {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            status: AgentStatus::Active,
            current_task: None,
            worktree_branch: worktree_branch.map(|s| s.to_string()),
            started_at: now,
            last_heartbeat: now,
            capabilities: capabilities.to_vec(),
        };

        lock_mutex_recover(&self.db).create_agent(&agent)?;
        log::info!("[AgentRegistry] Registered agent {} ({})", name, agent.id);
        Ok(agent.id)
    }

    /// Refresh an agent's heartbeat; no other side effect
    pub fn heartbeat(&self, id: &str) -> Result<bool> {
        lock_mutex_recover(&self.db).touch_agent_heartbeat(id)
    }

    /// Update an agent's status and optionally its current task.
    /// Terminal agents are left untouched.
    pub fn update_status(
        &self,
        id: &str,
        status: AgentStatus,
        current_task: Option<&str>,
    ) -> Result<bool> {
        lock_mutex_recover(&self.db).set_agent_status(id, status, current_task)
    }

    /// Release all claims owned by the agent, then mark it completed
    pub fn deregister(&self, id: &str) -> Result<()> {
        let db = lock_mutex_recover(&self.db);
        let released = db.release_claims_for_agent(id)?;
        db.set_agent_status(id, AgentStatus::Completed, None)?;
        log::info!(
            "[AgentRegistry] Deregistered agent {} ({} claims released)",
            id,
            released
        );
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        lock_mutex_recover(&self.db).get_agent(id)
    }

    /// Agents with status active or idle
    pub fn get_active_agents(&self) -> Result<Vec<Agent>> {
        lock_mutex_recover(&self.db).get_active_agents()
    }

    /// Sweep agents whose heartbeat predates the cutoff: release their
    /// claims, close their open announcements, and mark them failed.
    /// Returns the number of agents affected. Idempotent — agents already
    /// terminal are never selected.
    pub fn cleanup_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = lock_mutex_recover(&self.db);
        let stale = db.get_stale_agents(cutoff)?;

        let mut cleaned = 0;
        for agent in &stale {
            let claims = db.release_claims_for_agent(&agent.id)?;
            let announcements = db.close_announcements_for_agent(&agent.id)?;
            db.set_agent_status(&agent.id, AgentStatus::Failed, None)?;
            cleaned += 1;

            log::warn!(
                "[AgentRegistry] Agent {} ({}) went stale: released {} claims, closed {} announcements",
                agent.name,
                agent.id,
                claims,
                announcements
            );
        }

        Ok(cleaned)
    }

    /// Default liveness sweep: cutoff at N missed heartbeats
    pub fn cleanup_by_liveness(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.heartbeat_interval * self.stale_after_heartbeats as i32;
        self.cleanup_stale(cutoff)
    }

    /// Operator-triggered sweep with an explicit hour threshold
    pub fn cleanup_older_than_hours(&self, hours: i64) -> Result<usize> {
        self.cleanup_stale(Utc::now() - Duration::hours(hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::ClaimType;
    use std::sync::{Arc, Mutex};

    fn registry() -> AgentRegistry {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        AgentRegistry::new(Arc::new(Mutex::new(db)), 30, 3)
    }

    #[test]
    fn test_register_creates_active_agent() {
        let registry = registry();
        let id = registry
            .register("builder", &["rust".to_string()], Some("work/builder"))
            .unwrap();

        let agent = registry.get_agent(&id).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.worktree_branch.as_deref(), Some("work/builder"));
    }

    #[test]
    fn test_heartbeat_unknown_agent() {
        let registry = registry();
        assert!(!registry.heartbeat("nope").unwrap());
    }

    #[test]
    fn test_deregister_releases_claims() {
        let registry = registry();
        let id = registry.register("builder", &[], None).unwrap();

        {
            let db = lock_mutex_recover(&registry.db);
            assert!(db
                .try_insert_claim(&id, "src/auth.rs", ClaimType::Exclusive, 300)
                .unwrap());
        }

        registry.deregister(&id).unwrap();

        let db = lock_mutex_recover(&registry.db);
        assert!(db.exclusive_holder("src/auth.rs").unwrap().is_none());
        let agent = db.get_agent(&id).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
    }

    #[test]
    fn test_cleanup_stale_full_sweep() {
        let registry = registry();
        let id = registry.register("builder", &[], None).unwrap();

        {
            let db = lock_mutex_recover(&registry.db);
            db.try_insert_claim(&id, "src/auth.rs", ClaimType::Exclusive, 300)
                .unwrap();
            db.insert_announcement(&crate::models::WorkAnnouncement {
                id: "w1".to_string(),
                agent_id: id.clone(),
                agent_name: "builder".to_string(),
                worktree_branch: None,
                intent_type: crate::models::IntentType::Editing,
                resource: "src/auth.rs".to_string(),
                description: None,
                files_affected: Vec::new(),
                estimated_completion: None,
                announced_at: Utc::now(),
                completed_at: None,
            })
            .unwrap();
            // Backdate the heartbeat past any reasonable cutoff
            db.get_connection()
                .execute(
                    "UPDATE agents SET last_heartbeat = ?1 WHERE id = ?2",
                    rusqlite::params![
                        (Utc::now() - Duration::hours(2)).to_rfc3339(),
                        id
                    ],
                )
                .unwrap();
        }

        assert_eq!(registry.cleanup_by_liveness().unwrap(), 1);

        let db = lock_mutex_recover(&registry.db);
        let agent = db.get_agent(&id).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
        assert!(db.exclusive_holder("src/auth.rs").unwrap().is_none());
        let announcement = db.get_announcement("w1").unwrap().unwrap();
        assert!(announcement.completed_at.is_some());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let registry = registry();
        let id = registry.register("builder", &[], None).unwrap();

        {
            let db = lock_mutex_recover(&registry.db);
            db.get_connection()
                .execute(
                    "UPDATE agents SET last_heartbeat = ?1 WHERE id = ?2",
                    rusqlite::params![
                        (Utc::now() - Duration::hours(2)).to_rfc3339(),
                        id
                    ],
                )
                .unwrap();
        }

        assert_eq!(registry.cleanup_by_liveness().unwrap(), 1);
        // Agent is now terminal; a second sweep finds nothing
        assert_eq!(registry.cleanup_by_liveness().unwrap(), 0);
    }

    #[test]
    fn test_fresh_agent_survives_cleanup() {
        let registry = registry();
        registry.register("builder", &[], None).unwrap();
        assert_eq!(registry.cleanup_by_liveness().unwrap(), 0);
        assert_eq!(registry.get_active_agents().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_older_than_hours() {
        let registry = registry();
        let id = registry.register("builder", &[], None).unwrap();

        {
            let db = lock_mutex_recover(&registry.db);
            db.get_connection()
                .execute(
                    "UPDATE agents SET last_heartbeat = ?1 WHERE id = ?2",
                    rusqlite::params![
                        (Utc::now() - Duration::hours(5)).to_rfc3339(),
                        id
                    ],
                )
                .unwrap();
        }

        // Not stale for a 6-hour threshold, stale for a 4-hour one
        assert_eq!(registry.cleanup_older_than_hours(6).unwrap(), 0);
        assert_eq!(registry.cleanup_older_than_hours(4).unwrap(), 1);
    }
}
