// Facade wiring all coordination components over one shared store

use crate::config::EngineConfig;
use crate::coordination::{
    AgentRegistry, AnnouncementBoard, ClaimStore, MessageBus, SharedDatabase,
};
use crate::database::Database;
use crate::deploy::{DeployBatcher, DeployQueue, DeployRunner, ShellRunner};
use crate::utils::lock_mutex_recover;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Aggregate snapshot for status views
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub active_agents: usize,
    pub live_claims: usize,
    pub open_announcements: usize,
    pub ready_actions: i64,
    pub urgent_mode: bool,
}

/// Counts from one maintenance sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub stale_agents: usize,
    pub pruned_claims: usize,
    pub expired_messages: usize,
}

/// The in-process API surface consumed by CLI layers and agent harnesses.
///
/// All components share one embedded store; cooperating agent processes
/// open their own engine over the same database file.
pub struct CoordinationEngine {
    db: SharedDatabase,
    registry: AgentRegistry,
    claims: ClaimStore,
    board: AnnouncementBoard,
    bus: MessageBus,
    queue: DeployQueue,
    batcher: DeployBatcher,
}

impl CoordinationEngine {
    /// Open the engine for a project, loading config from
    /// `.switchyard/config.toml` and shelling out through git/gh.
    pub fn open(project_path: &Path) -> Result<Self> {
        let config = EngineConfig::load_or_default(project_path)?;
        let runner: Arc<dyn DeployRunner> = Arc::new(ShellRunner::new()?);
        let database = Database::from_project(project_path)?;
        Self::assemble(project_path, config, database, runner)
    }

    /// Open with an explicit config and runner (used by embedders that
    /// already resolved their tooling)
    pub fn with_runner(
        project_path: &Path,
        config: EngineConfig,
        runner: Arc<dyn DeployRunner>,
    ) -> Result<Self> {
        let database = Database::from_project(project_path)?;
        Self::assemble(project_path, config, database, runner)
    }

    /// In-memory engine for tests
    pub fn in_memory(
        project_path: &Path,
        config: EngineConfig,
        runner: Arc<dyn DeployRunner>,
    ) -> Result<Self> {
        let database = Database::open_in_memory()?;
        Self::assemble(project_path, config, database, runner)
    }

    fn assemble(
        project_path: &Path,
        config: EngineConfig,
        database: Database,
        runner: Arc<dyn DeployRunner>,
    ) -> Result<Self> {
        database.init()?;
        let db: SharedDatabase = Arc::new(Mutex::new(database));

        let registry = AgentRegistry::new(
            db.clone(),
            config.heartbeat_interval_secs,
            config.stale_after_heartbeats,
        );
        let claims = ClaimStore::new(db.clone(), config.claim_ttl_secs);
        let board = AnnouncementBoard::new(
            db.clone(),
            MessageBus::new(db.clone(), config.default_message_priority),
        );
        let bus = MessageBus::new(db.clone(), config.default_message_priority);
        let queue = DeployQueue::new(db.clone(), &config.deploy);
        let batcher = DeployBatcher::new(db.clone(), runner, project_path, &config.deploy);

        log::info!(
            "[CoordinationEngine] Ready for {} (claim TTL {}s, heartbeat {}s)",
            project_path.display(),
            config.claim_ttl_secs,
            config.heartbeat_interval_secs
        );

        Ok(Self {
            db,
            registry,
            claims,
            board,
            bus,
            queue,
            batcher,
        })
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn claims(&self) -> &ClaimStore {
        &self.claims
    }

    pub fn board(&self) -> &AnnouncementBoard {
        &self.board
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn deploy_queue(&self) -> &DeployQueue {
        &self.queue
    }

    pub fn batcher(&self) -> &DeployBatcher {
        &self.batcher
    }

    /// Swap the deploy queue's window table between defaults and urgent
    pub fn set_urgent_mode(&self, urgent: bool) {
        self.queue.set_urgent_mode(urgent);
    }

    /// Force every ready action out now
    pub async fn flush_deploys(&self) -> Result<Vec<crate::models::BatchResult>> {
        self.batcher.flush_all().await
    }

    /// Periodic maintenance: sweep stale agents (releasing their claims and
    /// closing their announcements), prune expired claims, collect expired
    /// messages.
    pub fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let report = MaintenanceReport {
            stale_agents: self.registry.cleanup_by_liveness()?,
            pruned_claims: self.claims.prune_expired()?,
            expired_messages: self.bus.cleanup_expired()?,
        };
        if report.stale_agents > 0 {
            log::info!(
                "[CoordinationEngine] Maintenance: {} stale agent(s) failed over",
                report.stale_agents
            );
        }
        Ok(report)
    }

    /// Operator-triggered sweep with an explicit hour threshold
    pub fn cleanup_agents_older_than(&self, hours: i64) -> Result<usize> {
        self.registry.cleanup_older_than_hours(hours)
    }

    /// Aggregate snapshot of coordination state
    pub fn status(&self) -> Result<EngineStatus> {
        let ready_actions = self.batcher.ready_count()?;
        let db = lock_mutex_recover(&self.db);
        Ok(EngineStatus {
            active_agents: db.get_active_agents()?.len(),
            live_claims: db.get_live_claims()?.len(),
            open_announcements: db.get_active_announcements()?.len(),
            ready_actions,
            urgent_mode: self.queue.is_urgent(),
        })
    }
}
