// Advisory work announcements, overlap detection, and conflict risk

use crate::coordination::{MessageBus, SharedDatabase};
use crate::models::{IntentType, MessageType, WorkAnnouncement};
use crate::utils::lock_mutex_recover;
use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

/// How two announcements were matched
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverlapKind {
    /// Identical resource
    SameFile,
    /// Resource under the announced resource's parent directory
    SameDirectory,
    /// Declared file sets intersect (heuristic)
    FilesOverlap,
}

/// Five-level heuristic classification of merge-conflict likelihood
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRisk {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// How overlapping agents should coordinate their merges
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    /// Work must land one after another in the computed order
    Sequence,
    /// Work can proceed concurrently but should merge in the computed order
    MergeOrder,
    /// No ordering needed
    Parallel,
}

/// A detected co-occurrence of active work on related resources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOverlap {
    pub kind: OverlapKind,
    pub risk: ConflictRisk,
    pub announcements: Vec<WorkAnnouncement>,
    /// Human-readable summary for operators
    pub suggestion: String,
}

/// A structured coordination recommendation derived from one overlap class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationSuggestion {
    pub mode: CollaborationMode,
    pub risk: ConflictRisk,
    pub kind: OverlapKind,
    /// Agent names in recommended merge order (read-only work first)
    pub merge_order: Vec<String>,
    pub reason: String,
}

/// Optional fields for an announcement
#[derive(Debug, Clone, Default)]
pub struct AnnounceOptions {
    pub description: Option<String>,
    pub files_affected: Vec<String>,
    pub estimated_minutes: Option<i64>,
}

/// Result of announcing work: the stored announcement plus everything the
/// board noticed about concurrent work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceOutcome {
    pub announcement: WorkAnnouncement,
    pub overlaps: Vec<WorkOverlap>,
    pub suggestions: Vec<CollaborationSuggestion>,
}

/// Non-locking intent publication with overlap detection.
///
/// Announcements never block anyone — agents work in isolated worktrees, so
/// the board only has to reduce merge-time pain, not prevent concurrent
/// edits. Announce, don't lock.
pub struct AnnouncementBoard {
    db: SharedDatabase,
    bus: MessageBus,
}

impl AnnouncementBoard {
    pub fn new(db: SharedDatabase, bus: MessageBus) -> Self {
        Self { db, bus }
    }

    /// Publish intent on a resource and report overlapping active work.
    ///
    /// The full announce -> detect -> suggest -> broadcast sequence completes
    /// before this returns.
    pub fn announce_work(
        &self,
        agent_id: &str,
        resource: &str,
        intent: IntentType,
        opts: AnnounceOptions,
    ) -> Result<AnnounceOutcome> {
        let (announcement, others) = {
            let db = lock_mutex_recover(&self.db);
            let agent = db
                .get_agent(agent_id)?
                .ok_or_else(|| anyhow!("Unknown agent: {}", agent_id))?;

            let now = Utc::now();
            let announcement = WorkAnnouncement {
                id: uuid::Uuid::new_v4().to_string(),
                agent_id: agent_id.to_string(),
                agent_name: agent.name.clone(),
                worktree_branch: agent.worktree_branch.clone(),
                intent_type: intent,
                resource: resource.to_string(),
                description: opts.description,
                files_affected: opts.files_affected,
                estimated_completion: opts.estimated_minutes.map(|m| now + Duration::minutes(m)),
                announced_at: now,
                completed_at: None,
            };
            db.insert_announcement(&announcement)?;

            // An agent never overlaps with itself
            let others: Vec<WorkAnnouncement> = db
                .get_active_announcements()?
                .into_iter()
                .filter(|a| a.agent_id != agent_id)
                .collect();

            (announcement, others)
        };

        let overlaps = detect_overlaps(&announcement, &others);
        let suggestions = overlaps
            .iter()
            .map(|o| generate_collaboration_suggestion(&announcement, o))
            .collect::<Vec<_>>();

        if !overlaps.is_empty() {
            log::info!(
                "[AnnouncementBoard] {} announced {} on {}: {} overlap class(es), max risk {:?}",
                announcement.agent_name,
                intent.as_str(),
                resource,
                overlaps.len(),
                overlaps.iter().map(|o| o.risk).max().unwrap_or(ConflictRisk::None)
            );

            self.bus.broadcast(
                agent_id,
                crate::models::Channel::Coordination,
                MessageType::Notification,
                serde_json::json!({
                    "event": "work_overlap_detected",
                    "resource": resource,
                    "overlaps": overlaps,
                    "suggestions": suggestions,
                }),
                None,
                None,
            )?;
        }

        Ok(AnnounceOutcome {
            announcement,
            overlaps,
            suggestions,
        })
    }

    /// Close the first open announcement for (agent, resource) and broadcast
    /// completion. Calling it again is a no-op returning false.
    pub fn complete_work(&self, agent_id: &str, resource: &str) -> Result<bool> {
        let completed = lock_mutex_recover(&self.db).complete_announcement(agent_id, resource)?;

        if completed {
            self.bus.broadcast(
                agent_id,
                crate::models::Channel::Coordination,
                MessageType::Notification,
                serde_json::json!({
                    "event": "work_completed",
                    "agentId": agent_id,
                    "resource": resource,
                }),
                None,
                None,
            )?;
        }

        Ok(completed)
    }

    /// All open announcements owned by live agents
    pub fn get_active_work(&self) -> Result<Vec<WorkAnnouncement>> {
        lock_mutex_recover(&self.db).get_active_announcements()
    }

    /// Open announcements on resources containing the pattern
    pub fn get_work_on_resource(&self, pattern: &str) -> Result<Vec<WorkAnnouncement>> {
        lock_mutex_recover(&self.db).get_announcements_on_resource(pattern)
    }
}

/// Parent directory of a resource path ("" when there is none)
fn parent_dir(resource: &str) -> &str {
    resource.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Bidirectional substring containment.
///
/// Intentionally approximate: cheap, advisory, and known to false-positive
/// on unrelated paths sharing short fragments. Kept as documented heuristic
/// behavior; tightening it is a product decision.
fn paths_overlap(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Classify active announcements into the three overlap classes
fn detect_overlaps(new: &WorkAnnouncement, others: &[WorkAnnouncement]) -> Vec<WorkOverlap> {
    let parent = parent_dir(&new.resource);
    let dir_prefix = format!("{}/", parent);

    let mut same_file = Vec::new();
    let mut same_dir = Vec::new();
    let mut files_overlap = Vec::new();

    for other in others {
        if other.resource == new.resource {
            same_file.push(other.clone());
        } else if !parent.is_empty() && other.resource.starts_with(&dir_prefix) {
            same_dir.push(other.clone());
        } else if other
            .files_affected
            .iter()
            .any(|f| paths_overlap(f, &new.resource))
        {
            files_overlap.push(other.clone());
        }
    }

    let mut overlaps = Vec::new();
    for (kind, members) in [
        (OverlapKind::SameFile, same_file),
        (OverlapKind::SameDirectory, same_dir),
        (OverlapKind::FilesOverlap, files_overlap),
    ] {
        if members.is_empty() {
            continue;
        }
        let risk = assess_conflict_risk(kind, new, &members);
        let suggestion = describe_overlap(kind, risk, &new.resource, &members);
        overlaps.push(WorkOverlap {
            kind,
            risk,
            announcements: members,
            suggestion,
        });
    }

    overlaps
}

/// Classify how likely an overlap class is to cause a merge conflict.
///
/// The announcer counts among the participants: two concurrent writers on
/// the same file are critical no matter who announced first.
pub fn assess_conflict_risk(
    kind: OverlapKind,
    new: &WorkAnnouncement,
    others: &[WorkAnnouncement],
) -> ConflictRisk {
    if others.is_empty() {
        return ConflictRisk::None;
    }

    let participants = || others.iter().chain(std::iter::once(new));
    let writers = participants()
        .filter(|a| a.intent_type.mutates_files())
        .count();
    let any_refactoring = participants().any(|a| a.intent_type == IntentType::Refactoring);

    if writers == 0 {
        // Reviewing/testing/documenting can pile up safely
        return ConflictRisk::Low;
    }

    match kind {
        OverlapKind::SameFile => {
            if writers >= 2 {
                ConflictRisk::Critical
            } else {
                // One writer coexisting with any other work
                ConflictRisk::High
            }
        }
        OverlapKind::SameDirectory => {
            if any_refactoring {
                ConflictRisk::High
            } else {
                ConflictRisk::Medium
            }
        }
        // Heuristic matches never claim the strongest signal
        OverlapKind::FilesOverlap => {
            if writers >= 2 {
                ConflictRisk::High
            } else {
                ConflictRisk::Medium
            }
        }
    }
}

/// Map an overlap to a structured coordination recommendation
pub fn generate_collaboration_suggestion(
    new: &WorkAnnouncement,
    overlap: &WorkOverlap,
) -> CollaborationSuggestion {
    let mode = match overlap.risk {
        ConflictRisk::Critical | ConflictRisk::High => CollaborationMode::Sequence,
        ConflictRisk::Medium => CollaborationMode::MergeOrder,
        ConflictRisk::Low | ConflictRisk::None => CollaborationMode::Parallel,
    };

    let merge_order = match mode {
        CollaborationMode::Parallel => Vec::new(),
        _ => compute_merge_order(new, &overlap.announcements),
    };

    let reason = match mode {
        CollaborationMode::Sequence => format!(
            "{:?} risk on {}: land changes one at a time in the suggested order",
            overlap.risk, new.resource
        ),
        CollaborationMode::MergeOrder => format!(
            "{:?} risk on {}: work can continue in parallel, merge in the suggested order",
            overlap.risk, new.resource
        ),
        CollaborationMode::Parallel => format!(
            "{:?} risk on {}: no ordering needed",
            overlap.risk, new.resource
        ),
    };

    CollaborationSuggestion {
        mode,
        risk: overlap.risk,
        kind: overlap.kind,
        merge_order,
        reason,
    }
}

/// Agent names sorted by intent priority (read-only work merges first,
/// sweeping refactors last), ties broken by announce time
fn compute_merge_order(new: &WorkAnnouncement, others: &[WorkAnnouncement]) -> Vec<String> {
    let mut participants: Vec<&WorkAnnouncement> =
        others.iter().chain(std::iter::once(new)).collect();
    participants.sort_by_key(|a| (a.intent_type.merge_rank(), a.announced_at));

    let mut order = Vec::with_capacity(participants.len());
    for participant in participants {
        if !order.contains(&participant.agent_name) {
            order.push(participant.agent_name.clone());
        }
    }
    order
}

/// Human-readable per-class summary
fn describe_overlap(
    kind: OverlapKind,
    risk: ConflictRisk,
    resource: &str,
    members: &[WorkAnnouncement],
) -> String {
    let names: Vec<&str> = members.iter().map(|a| a.agent_name.as_str()).collect();
    match kind {
        OverlapKind::SameFile => format!(
            "{} agent(s) already working on {} ({}), risk {:?}",
            members.len(),
            resource,
            names.join(", "),
            risk
        ),
        OverlapKind::SameDirectory => format!(
            "{} agent(s) working in the same directory as {} ({}), risk {:?}",
            members.len(),
            resource,
            names.join(", "),
            risk
        ),
        OverlapKind::FilesOverlap => format!(
            "{} agent(s) declared files overlapping {} ({}), risk {:?}",
            members.len(),
            resource,
            names.join(", "),
            risk
        ),
    }
}
