// Engine configuration with TOML overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Directory under the coordinated project that holds engine state
pub const STATE_DIR: &str = ".switchyard";

/// Config file name inside the state directory
pub const CONFIG_FILE: &str = "config.toml";

/// Debounce windows per action kind, in seconds.
///
/// Commits favor squashing (multiple small commits collapse into one
/// meaningful history entry); pushes and CI triggers stay fast because they
/// gate visible feedback; deploys get a safety buffer because concurrent
/// deploys to the same target are dangerous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowConfig {
    #[serde(default = "default_commit_window")]
    pub commit_secs: i64,
    #[serde(default = "default_push_window")]
    pub push_secs: i64,
    #[serde(default = "default_merge_window")]
    pub merge_secs: i64,
    #[serde(default = "default_workflow_window")]
    pub workflow_secs: i64,
    #[serde(default = "default_deploy_window")]
    pub deploy_secs: i64,
}

fn default_commit_window() -> i64 {
    30
}
fn default_push_window() -> i64 {
    5
}
fn default_merge_window() -> i64 {
    10
}
fn default_workflow_window() -> i64 {
    5
}
fn default_deploy_window() -> i64 {
    60
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            commit_secs: default_commit_window(),
            push_secs: default_push_window(),
            merge_secs: default_merge_window(),
            workflow_secs: default_workflow_window(),
            deploy_secs: default_deploy_window(),
        }
    }
}

/// Batching and execution limits for the deploy pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    /// Maximum actions pulled into one batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Concurrency bound for parallel-safe actions
    #[serde(default = "default_max_parallel_actions")]
    pub max_parallel_actions: usize,
    /// Per-kind debounce windows
    #[serde(default)]
    pub windows: WindowConfig,
    /// Window applied to every kind while urgent mode is on
    #[serde(default = "default_urgent_window")]
    pub urgent_window_secs: i64,
}

fn default_max_batch_size() -> usize {
    20
}
fn default_max_parallel_actions() -> usize {
    4
}
fn default_urgent_window() -> i64 {
    1
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_parallel_actions: default_max_parallel_actions(),
            windows: WindowConfig::default(),
            urgent_window_secs: default_urgent_window(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Claim lease TTL in seconds
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: i64,
    /// Expected heartbeat cadence for registered agents
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: i64,
    /// Liveness cutoff is this many missed heartbeats
    #[serde(default = "default_stale_after")]
    pub stale_after_heartbeats: i64,
    /// Default message priority when callers don't specify one
    #[serde(default = "default_message_priority")]
    pub default_message_priority: i32,
    #[serde(default)]
    pub deploy: DeployConfig,
}

fn default_claim_ttl() -> i64 {
    300
}
fn default_heartbeat_interval() -> i64 {
    30
}
fn default_stale_after() -> i64 {
    3
}
fn default_message_priority() -> i32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_ttl_secs: default_claim_ttl(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            stale_after_heartbeats: default_stale_after(),
            default_message_priority: default_message_priority(),
            deploy: DeployConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from `<project>/.switchyard/config.toml`, falling back to
    /// defaults when the file is absent. A malformed file is an error rather
    /// than a silent fallback.
    pub fn load_or_default(project_path: &Path) -> Result<Self> {
        let config_path = project_path.join(STATE_DIR).join(CONFIG_FILE);
        if !config_path.exists() {
            log::debug!(
                "[EngineConfig] No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config at {}", config_path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", config_path.display()))?;

        log::info!("[EngineConfig] Loaded config from {}", config_path.display());
        Ok(config)
    }
}
