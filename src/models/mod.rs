// Data models for the coordination store entities

pub mod state_machine;

pub use state_machine::TransitionError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a registered agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Completed,
    Failed,
}

impl AgentStatus {
    /// Terminal statuses are set once and never revert
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A registered agent session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub session_id: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub worktree_branch: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub capabilities: Vec<String>,
}

/// Kind of resource lease
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Exclusive,
    Shared,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exclusive" => Some(Self::Exclusive),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// An enforced lease over a resource string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkClaim {
    pub id: i64,
    pub resource: String,
    pub agent_id: String,
    pub claim_type: ClaimType,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WorkClaim {
    /// A claim is live until its TTL elapses; expired rows are ignored by
    /// readers even before they are pruned.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Declared intent of an announcement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Editing,
    Refactoring,
    Reviewing,
    Testing,
    Documenting,
}

impl IntentType {
    /// Whether work under this intent mutates files (and therefore risks
    /// merge conflicts with other writers)
    pub fn mutates_files(&self) -> bool {
        matches!(self, Self::Editing | Self::Refactoring)
    }

    /// Merge-order rank: read-only work merges first, sweeping refactors
    /// last. Lower rank merges earlier.
    pub fn merge_rank(&self) -> u8 {
        match self {
            Self::Reviewing => 0,
            Self::Testing => 1,
            Self::Documenting => 2,
            Self::Editing => 3,
            Self::Refactoring => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Editing => "editing",
            Self::Refactoring => "refactoring",
            Self::Reviewing => "reviewing",
            Self::Testing => "testing",
            Self::Documenting => "documenting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "editing" => Some(Self::Editing),
            "refactoring" => Some(Self::Refactoring),
            "reviewing" => Some(Self::Reviewing),
            "testing" => Some(Self::Testing),
            "documenting" => Some(Self::Documenting),
            _ => None,
        }
    }
}

/// A non-enforced declaration of work intent on a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkAnnouncement {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub worktree_branch: Option<String>,
    pub intent_type: IntentType,
    pub resource: String,
    pub description: Option<String>,
    pub files_affected: Vec<String>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub announced_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkAnnouncement {
    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Message channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Direct,
    Coordination,
    Review,
    Benchmark,
    Broadcast,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Coordination => "coordination",
            Self::Review => "review",
            Self::Benchmark => "benchmark",
            Self::Broadcast => "broadcast",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "coordination" => Some(Self::Coordination),
            "review" => Some(Self::Review),
            "benchmark" => Some(Self::Benchmark),
            "broadcast" => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// Whether a message expects a reply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Notification,
    Request,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Request => "request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "notification" => Some(Self::Notification),
            "request" => Some(Self::Request),
            _ => None,
        }
    }
}

/// A broadcast or direct message between agents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: String,
    pub channel: Channel,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Kind of deploy action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Commit,
    Push,
    Merge,
    Workflow,
    Deploy,
}

impl ActionType {
    /// Mergeable kinds are unioned into one pending row at enqueue time
    /// rather than duplicated, bounding queue growth.
    pub fn is_mergeable(&self) -> bool {
        matches!(self, Self::Commit | Self::Push | Self::Workflow)
    }

    /// Workflow triggers touch no shared git state and may run concurrently;
    /// everything else mutates the repository and must stay ordered.
    pub fn is_parallel_safe(&self) -> bool {
        matches!(self, Self::Workflow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Push => "push",
            Self::Merge => "merge",
            Self::Workflow => "workflow",
            Self::Deploy => "deploy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(Self::Commit),
            "push" => Some(Self::Push),
            "merge" => Some(Self::Merge),
            "workflow" => Some(Self::Workflow),
            "deploy" => Some(Self::Deploy),
            _ => None,
        }
    }
}

/// Typed payload per action kind.
///
/// The kind tag in the serialized form must agree with the row's
/// `action_type` column; `DeployQueue` derives the column from the payload
/// so producers cannot enqueue a mismatched pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    Commit {
        messages: Vec<String>,
        files: Vec<String>,
    },
    Push {
        remote: String,
        force_with_lease: bool,
    },
    Merge {
        source_branch: String,
        squash: bool,
    },
    Workflow {
        git_ref: String,
        inputs: BTreeMap<String, String>,
    },
    Deploy {
        workflow: String,
        git_ref: String,
        version: Option<String>,
    },
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Commit { .. } => ActionType::Commit,
            Self::Push { .. } => ActionType::Push,
            Self::Merge { .. } => ActionType::Merge,
            Self::Workflow { .. } => ActionType::Workflow,
            Self::Deploy { .. } => ActionType::Deploy,
        }
    }
}

/// Status of a deploy action; transitions are monotonic
/// (pending -> batched -> executing -> completed | failed)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Pending,
    Batched,
    Executing,
    Completed,
    Failed,
}

impl DeployStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Batched => "batched",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "batched" => Some(Self::Batched),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A queued state-mutating operation against the shared repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAction {
    pub id: String,
    pub agent_id: String,
    pub action_type: ActionType,
    pub target: String,
    pub payload: ActionPayload,
    pub status: DeployStatus,
    pub batch_id: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub execute_after: DateTime<Utc>,
    pub priority: i32,
    pub dependencies: Vec<String>,
}

/// Status of a deploy batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Aggregated outcome of a batch execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per failed action: "<actionId> (<type>): <message>"
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn is_partial(&self) -> bool {
        self.failed > 0 && self.succeeded > 0
    }
}

/// A group of deploy actions formed from ready pending actions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployBatch {
    pub id: String,
    pub action_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub result: Option<BatchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_roundtrip() {
        for status in [
            AgentStatus::Active,
            AgentStatus::Idle,
            AgentStatus::Completed,
            AgentStatus::Failed,
        ] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!AgentStatus::Active.is_terminal());
        assert!(!AgentStatus::Idle.is_terminal());
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_intent_merge_rank_ordering() {
        // Read-only intents merge before writers
        assert!(IntentType::Reviewing.merge_rank() < IntentType::Editing.merge_rank());
        assert!(IntentType::Testing.merge_rank() < IntentType::Refactoring.merge_rank());
        assert!(IntentType::Editing.merge_rank() < IntentType::Refactoring.merge_rank());
    }

    #[test]
    fn test_intent_mutates_files() {
        assert!(IntentType::Editing.mutates_files());
        assert!(IntentType::Refactoring.mutates_files());
        assert!(!IntentType::Reviewing.mutates_files());
        assert!(!IntentType::Testing.mutates_files());
        assert!(!IntentType::Documenting.mutates_files());
    }

    #[test]
    fn test_action_type_classification() {
        assert!(ActionType::Commit.is_mergeable());
        assert!(ActionType::Push.is_mergeable());
        assert!(ActionType::Workflow.is_mergeable());
        assert!(!ActionType::Merge.is_mergeable());
        assert!(!ActionType::Deploy.is_mergeable());

        assert!(ActionType::Workflow.is_parallel_safe());
        assert!(!ActionType::Commit.is_parallel_safe());
        assert!(!ActionType::Push.is_parallel_safe());
        assert!(!ActionType::Merge.is_parallel_safe());
        assert!(!ActionType::Deploy.is_parallel_safe());
    }

    #[test]
    fn test_action_payload_tag_matches_type() {
        let payload = ActionPayload::Commit {
            messages: vec!["fix bug".to_string()],
            files: vec!["a.rs".to_string()],
        };
        assert_eq!(payload.action_type(), ActionType::Commit);

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"commit\""));

        let back: ActionPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_claim_liveness() {
        let now = Utc::now();
        let claim = WorkClaim {
            id: 1,
            resource: "src/auth.rs".to_string(),
            agent_id: "a1".to_string(),
            claim_type: ClaimType::Exclusive,
            claimed_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        };
        assert!(claim.is_live(now));
        assert!(!claim.is_live(now + chrono::Duration::minutes(6)));
    }

    #[test]
    fn test_batch_result_partial() {
        let result = BatchResult {
            total: 3,
            succeeded: 2,
            failed: 1,
            errors: vec!["a (commit): boom".to_string()],
        };
        assert!(result.is_partial());

        let clean = BatchResult {
            total: 2,
            succeeded: 2,
            failed: 0,
            errors: Vec::new(),
        };
        assert!(!clean.is_partial());
    }
}
