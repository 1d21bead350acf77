// Exclusive/shared resource leases with TTL

use crate::coordination::SharedDatabase;
use crate::models::{ClaimType, WorkClaim};
use crate::utils::lock_mutex_recover;
use anyhow::Result;

/// Lease manager over resource strings.
///
/// Claims are the only hard locks in the engine. Acquisition failure is
/// expected control flow: callers receive `false` and decide to wait, split
/// the work, or ask for a handoff.
pub struct ClaimStore {
    db: SharedDatabase,
    /// Lease TTL in seconds
    ttl_secs: i64,
}

impl ClaimStore {
    pub fn new(db: SharedDatabase, ttl_secs: i64) -> Self {
        Self { db, ttl_secs }
    }

    /// Attempt to acquire a lease. Returns `false` when the resource is
    /// already held — including when the storage-layer constraint
    /// arbitrates a race the fast-path check missed.
    pub fn claim(&self, agent_id: &str, resource: &str, claim_type: ClaimType) -> Result<bool> {
        let acquired = lock_mutex_recover(&self.db)
            .try_insert_claim(agent_id, resource, claim_type, self.ttl_secs)?;

        if acquired {
            log::debug!(
                "[ClaimStore] {} acquired {} claim on {}",
                agent_id,
                claim_type.as_str(),
                resource
            );
        } else {
            log::debug!(
                "[ClaimStore] {} denied {} claim on {}",
                agent_id,
                claim_type.as_str(),
                resource
            );
        }

        Ok(acquired)
    }

    /// Release a specific lease
    pub fn release(&self, agent_id: &str, resource: &str) -> Result<()> {
        lock_mutex_recover(&self.db).release_claim(agent_id, resource)?;
        Ok(())
    }

    /// Release every lease held by an agent
    pub fn release_all(&self, agent_id: &str) -> Result<usize> {
        lock_mutex_recover(&self.db).release_claims_for_agent(agent_id)
    }

    /// The current exclusive holder of a resource, if any
    pub fn is_claimed(&self, resource: &str) -> Result<Option<String>> {
        lock_mutex_recover(&self.db).exclusive_holder(resource)
    }

    /// All live claims
    pub fn active_claims(&self) -> Result<Vec<WorkClaim>> {
        lock_mutex_recover(&self.db).get_live_claims()
    }

    /// Drop expired rows; readers already ignore them, this just reclaims space
    pub fn prune_expired(&self) -> Result<usize> {
        lock_mutex_recover(&self.db).prune_expired_claims()
    }
}
