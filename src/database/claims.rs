// Work claim table operations

use crate::models::{ClaimType, WorkClaim};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Row};

impl super::Database {
    /// Attempt to acquire a lease on a resource.
    ///
    /// Runs in one transaction: prune expired rows, fast-path conflict
    /// check, insert. The fast-path check is an optimization only — the
    /// partial unique index on exclusive claims is the true arbiter, and a
    /// constraint violation from a lost race is returned as `false`, never
    /// as an error.
    pub fn try_insert_claim(
        &self,
        agent_id: &str,
        resource: &str,
        claim_type: ClaimType,
        ttl_secs: i64,
    ) -> Result<bool> {
        let tx = self.get_connection().unchecked_transaction()?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        // Expired rows would trip the unique index; clear them first
        tx.execute(
            "DELETE FROM work_claims WHERE expires_at <= ?1",
            params![&now_str],
        )?;

        // Fast path: a live exclusive claim blocks everything; an exclusive
        // request is blocked by any live claim.
        let live_exclusive: i64 = tx.query_row(
            "SELECT COUNT(*) FROM work_claims
             WHERE resource = ?1 AND claim_type = 'exclusive' AND expires_at > ?2",
            params![resource, &now_str],
            |row| row.get(0),
        )?;
        if live_exclusive > 0 {
            return Ok(false);
        }

        if claim_type == ClaimType::Exclusive {
            let live_any: i64 = tx.query_row(
                "SELECT COUNT(*) FROM work_claims
                 WHERE resource = ?1 AND expires_at > ?2",
                params![resource, &now_str],
                |row| row.get(0),
            )?;
            if live_any > 0 {
                return Ok(false);
            }
        }

        let expires_at = (now + chrono::Duration::seconds(ttl_secs)).to_rfc3339();
        let inserted = tx.execute(
            "INSERT INTO work_claims (resource, agent_id, claim_type, claimed_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![resource, agent_id, claim_type.as_str(), &now_str, &expires_at],
        );

        match inserted {
            Ok(_) => {
                tx.commit()?;
                Ok(true)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // The fast-path check raced and lost; the store arbitrated
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a specific claim; returns the number of rows removed
    pub fn release_claim(&self, agent_id: &str, resource: &str) -> Result<usize> {
        let changed = self.get_connection().execute(
            "DELETE FROM work_claims WHERE agent_id = ?1 AND resource = ?2",
            params![agent_id, resource],
        )?;
        Ok(changed)
    }

    /// Delete all claims held by an agent
    pub fn release_claims_for_agent(&self, agent_id: &str) -> Result<usize> {
        let changed = self.get_connection().execute(
            "DELETE FROM work_claims WHERE agent_id = ?1",
            params![agent_id],
        )?;
        Ok(changed)
    }

    /// The current live exclusive holder of a resource, if any
    pub fn exclusive_holder(&self, resource: &str) -> Result<Option<String>> {
        let result = self.get_connection().query_row(
            "SELECT agent_id FROM work_claims
             WHERE resource = ?1 AND claim_type = 'exclusive' AND expires_at > ?2",
            params![resource, Utc::now().to_rfc3339()],
            |row| row.get(0),
        );

        match result {
            Ok(agent_id) => Ok(Some(agent_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All live (unexpired) claims
    pub fn get_live_claims(&self) -> Result<Vec<WorkClaim>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(
            "SELECT id, resource, agent_id, claim_type, claimed_at, expires_at
             FROM work_claims
             WHERE expires_at > ?1
             ORDER BY id",
        )?;

        let claims = stmt
            .query_map(params![Utc::now().to_rfc3339()], |row| {
                Ok(row_to_claim(row))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(claims)
    }

    /// Live claims held by one agent
    pub fn get_claims_for_agent(&self, agent_id: &str) -> Result<Vec<WorkClaim>> {
        let conn = self.get_connection();

        let mut stmt = conn.prepare(
            "SELECT id, resource, agent_id, claim_type, claimed_at, expires_at
             FROM work_claims
             WHERE agent_id = ?1 AND expires_at > ?2
             ORDER BY id",
        )?;

        let claims = stmt
            .query_map(params![agent_id, Utc::now().to_rfc3339()], |row| {
                Ok(row_to_claim(row))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(claims)
    }

    /// Delete expired claim rows; returns the number removed
    pub fn prune_expired_claims(&self) -> Result<usize> {
        let changed = self.get_connection().execute(
            "DELETE FROM work_claims WHERE expires_at <= ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(changed)
    }
}

/// Convert a database row to a WorkClaim struct
fn row_to_claim(row: &Row) -> WorkClaim {
    let claim_type: String = row.get(3).unwrap();
    let claimed_at: String = row.get(4).unwrap();
    let expires_at: String = row.get(5).unwrap();

    WorkClaim {
        id: row.get(0).unwrap(),
        resource: row.get(1).unwrap(),
        agent_id: row.get(2).unwrap(),
        claim_type: ClaimType::parse(&claim_type).unwrap_or(ClaimType::Exclusive),
        claimed_at: super::parse_dt(&claimed_at),
        expires_at: super::parse_dt(&expires_at),
    }
}
