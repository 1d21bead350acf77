// SQLite coordination store: connection management and migrations

pub mod agents;
pub mod announcements;
pub mod claims;
pub mod deploys;
pub mod messages;

use crate::config::STATE_DIR;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result};
use std::path::Path;

const SCHEMA_VERSION: i32 = 2;

/// Database file name inside the state directory
pub const DB_FILE: &str = "coordination.db";

/// The shared embedded store. Six tables hold all coordination state; the
/// store's transactional and unique-constraint guarantees are the actual
/// mutex between cooperating processes.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL allows one writer alongside readers from other agent processes
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA foreign_keys=ON;\
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(Self { conn })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;\
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(Self { conn })
    }

    /// Open `<project>/.switchyard/coordination.db`, creating the state
    /// directory if needed.
    pub fn from_project(project_path: &Path) -> Result<Self> {
        let state_dir = project_path.join(STATE_DIR);
        std::fs::create_dir_all(&state_dir).map_err(|e| {
            rusqlite::Error::InvalidParameterName(format!(
                "Failed to create state directory {}: {}",
                state_dir.display(),
                e
            ))
        })?;
        Self::new(state_dir.join(DB_FILE))
    }

    pub fn init(&self) -> Result<()> {
        self.create_metadata_table()?;
        let version = self.get_schema_version()?;

        // Forward compatibility check: refuse databases created by a newer version
        if version > SCHEMA_VERSION {
            return Err(rusqlite::Error::InvalidParameterName(format!(
                "Database schema version {} is newer than engine version {}. Please upgrade.",
                version, SCHEMA_VERSION
            )));
        }

        if version < SCHEMA_VERSION {
            self.run_migrations(version)?;
        }

        Ok(())
    }

    fn create_metadata_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn get_schema_version(&self) -> Result<i32> {
        let version: Result<String> = self.conn.query_row(
            "SELECT value FROM schema_metadata WHERE key = 'version'",
            [],
            |row| row.get(0),
        );

        match version {
            Ok(v) => Ok(v.parse().unwrap_or(0)),
            Err(_) => {
                self.conn.execute(
                    "INSERT INTO schema_metadata (key, value) VALUES ('version', '0')",
                    [],
                )?;
                Ok(0)
            }
        }
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "UPDATE schema_metadata SET value = ?1 WHERE key = 'version'",
            params![version.to_string()],
        )?;
        Ok(())
    }

    fn run_migrations(&self, from_version: i32) -> Result<()> {
        if from_version < 1 {
            self.migrate_to_v1()?;
        }
        if from_version < 2 {
            self.migrate_to_v2()?;
        }
        // Future migrations will be added here
        Ok(())
    }

    fn migrate_to_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_task TEXT,
                worktree_branch TEXT,
                started_at TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                capabilities TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS work_claims (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource TEXT NOT NULL,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                claim_type TEXT NOT NULL,
                claimed_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS work_announcements (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                agent_name TEXT NOT NULL,
                worktree_branch TEXT,
                intent_type TEXT NOT NULL,
                resource TEXT NOT NULL,
                description TEXT,
                files_affected TEXT NOT NULL DEFAULT '[]',
                estimated_completion TEXT,
                announced_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS agent_messages (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                from_agent TEXT NOT NULL,
                to_agent TEXT,
                message_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                created_at TEXT NOT NULL,
                read_at TEXT,
                expires_at TEXT
            );

            CREATE TABLE IF NOT EXISTS deploy_actions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                target TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                batch_id TEXT,
                queued_at TEXT NOT NULL,
                execute_after TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                dependencies TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS deploy_batches (
                id TEXT PRIMARY KEY,
                action_ids TEXT NOT NULL,
                created_at TEXT NOT NULL,
                executed_at TEXT,
                status TEXT NOT NULL,
                result TEXT
            );

            -- The acquire primitive: at most one exclusive claim row per
            -- resource can exist, enforced by the storage layer.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_claims_exclusive_resource
                ON work_claims(resource) WHERE claim_type = 'exclusive';

            CREATE INDEX IF NOT EXISTS idx_claims_agent
                ON work_claims(agent_id);
            CREATE INDEX IF NOT EXISTS idx_claims_expires
                ON work_claims(expires_at);
            CREATE INDEX IF NOT EXISTS idx_announcements_agent
                ON work_announcements(agent_id);
            CREATE INDEX IF NOT EXISTS idx_announcements_resource
                ON work_announcements(resource);
            CREATE INDEX IF NOT EXISTS idx_messages_to_agent
                ON agent_messages(to_agent, read_at);",
        )?;

        self.set_schema_version(1)?;
        Ok(())
    }

    fn migrate_to_v2(&self) -> Result<()> {
        // Indexes for queue scans and liveness sweeps
        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_agents_status
                ON agents(status);
            CREATE INDEX IF NOT EXISTS idx_agents_heartbeat
                ON agents(last_heartbeat);
            CREATE INDEX IF NOT EXISTS idx_actions_status
                ON deploy_actions(status, execute_after);
            CREATE INDEX IF NOT EXISTS idx_actions_pending_target
                ON deploy_actions(action_type, target, status);",
        )?;

        self.set_schema_version(2)?;
        Ok(())
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

/// Parse an RFC 3339 timestamp from a SQLite TEXT column
pub(crate) fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_dt_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_dt(&v))
}

/// Serialize a string list for a JSON TEXT column
pub(crate) fn vec_to_json(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Deserialize a string list from a JSON TEXT column
pub(crate) fn json_to_vec(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}
