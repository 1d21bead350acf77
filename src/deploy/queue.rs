// Deploy action queue with per-kind debounce windows and enqueue-time merging

use crate::config::{DeployConfig, WindowConfig};
use crate::coordination::SharedDatabase;
use crate::models::{ActionPayload, ActionType, DeployAction, DeployStatus};
use crate::utils::lock_mutex_recover;
use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

/// Optional fields for queueing an action
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub priority: i32,
    pub dependencies: Vec<String>,
    /// Collapse this action's window to the urgent window
    pub urgent: bool,
}

/// Queue of pending deploy actions.
///
/// Mergeable kinds (commit, push, workflow) sharing (action_type, target)
/// are unioned into one pending row at enqueue time instead of duplicated —
/// the mechanism that keeps redundant CI and push operations bounded.
pub struct DeployQueue {
    db: SharedDatabase,
    windows: WindowConfig,
    urgent_window_secs: i64,
    urgent_mode: AtomicBool,
}

impl DeployQueue {
    pub fn new(db: SharedDatabase, config: &DeployConfig) -> Self {
        Self {
            db,
            windows: config.windows.clone(),
            urgent_window_secs: config.urgent_window_secs,
            urgent_mode: AtomicBool::new(false),
        }
    }

    /// Swap the active window table between defaults and the urgent table
    pub fn set_urgent_mode(&self, urgent: bool) {
        self.urgent_mode.store(urgent, Ordering::Relaxed);
        log::info!("[DeployQueue] Urgent mode {}", if urgent { "on" } else { "off" });
    }

    pub fn is_urgent(&self) -> bool {
        self.urgent_mode.load(Ordering::Relaxed)
    }

    fn window_secs(&self, action_type: ActionType, urgent: bool) -> i64 {
        if urgent || self.is_urgent() {
            return self.urgent_window_secs;
        }
        match action_type {
            ActionType::Commit => self.windows.commit_secs,
            ActionType::Push => self.windows.push_secs,
            ActionType::Merge => self.windows.merge_secs,
            ActionType::Workflow => self.windows.workflow_secs,
            ActionType::Deploy => self.windows.deploy_secs,
        }
    }

    /// Queue a deploy action; returns the id of the pending row (the
    /// existing row's id when the action merged into one).
    pub fn queue(
        &self,
        agent_id: &str,
        target: &str,
        payload: ActionPayload,
        opts: QueueOptions,
    ) -> Result<String> {
        let action_type = payload.action_type();
        let now = Utc::now();
        let execute_after = now + Duration::seconds(self.window_secs(action_type, opts.urgent));

        let db = lock_mutex_recover(&self.db);

        if action_type.is_mergeable() {
            if let Some(existing) = db.find_mergeable_pending(action_type, target)? {
                let merged = merge_payloads(existing.payload.clone(), payload);
                let priority = existing.priority.max(opts.priority);
                let execute_after = existing.execute_after.min(execute_after);
                let mut dependencies = existing.dependencies.clone();
                for dep in opts.dependencies {
                    if !dependencies.contains(&dep) {
                        dependencies.push(dep);
                    }
                }
                db.update_pending_action(
                    &existing.id,
                    &merged,
                    priority,
                    execute_after,
                    &dependencies,
                )?;

                log::debug!(
                    "[DeployQueue] Merged {} on {} into pending action {}",
                    action_type.as_str(),
                    target,
                    existing.id
                );
                return Ok(existing.id);
            }
        }

        let action = DeployAction {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            action_type,
            target: target.to_string(),
            payload,
            status: DeployStatus::Pending,
            batch_id: None,
            queued_at: now,
            execute_after,
            priority: opts.priority,
            dependencies: opts.dependencies,
        };
        db.insert_action(&action)?;

        log::debug!(
            "[DeployQueue] Queued {} on {} as {} (window {}s)",
            action_type.as_str(),
            target,
            action.id,
            self.window_secs(action_type, opts.urgent)
        );
        Ok(action.id)
    }

    /// Fetch one queued action (for status views and tests)
    pub fn get_action(&self, id: &str) -> Result<Option<DeployAction>> {
        lock_mutex_recover(&self.db).get_action(id)
    }
}

/// Union a new payload into an existing pending one: array fields unioned
/// and deduplicated preserving first-seen order, scalar fields overwritten
/// by the newer value, workflow inputs merged key-wise with newer values
/// winning.
fn merge_payloads(existing: ActionPayload, incoming: ActionPayload) -> ActionPayload {
    match (existing, incoming) {
        (
            ActionPayload::Commit {
                messages: mut existing_messages,
                files: mut existing_files,
            },
            ActionPayload::Commit { messages, files },
        ) => {
            for message in messages {
                if !existing_messages.contains(&message) {
                    existing_messages.push(message);
                }
            }
            for file in files {
                if !existing_files.contains(&file) {
                    existing_files.push(file);
                }
            }
            ActionPayload::Commit {
                messages: existing_messages,
                files: existing_files,
            }
        }
        (
            ActionPayload::Push { .. },
            ActionPayload::Push {
                remote,
                force_with_lease,
            },
        ) => ActionPayload::Push {
            remote,
            force_with_lease,
        },
        (
            ActionPayload::Workflow {
                inputs: mut existing_inputs,
                ..
            },
            ActionPayload::Workflow { git_ref, inputs },
        ) => {
            existing_inputs.extend(inputs);
            ActionPayload::Workflow {
                git_ref,
                inputs: existing_inputs,
            }
        }
        // Kinds always match here (the queue merges within one action_type)
        // and merge/deploy are never mergeable; keep the newer payload.
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn queue() -> DeployQueue {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        DeployQueue::new(Arc::new(Mutex::new(db)), &DeployConfig::default())
    }

    fn commit(messages: &[&str], files: &[&str]) -> ActionPayload {
        ActionPayload::Commit {
            messages: messages.iter().map(|s| s.to_string()).collect(),
            files: files.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_two_commits_same_target_merge_into_one_row() {
        let queue = queue();

        let first = queue
            .queue("a1", "main", commit(&["fix bug"], &["a.rs"]), Default::default())
            .unwrap();
        let second = queue
            .queue("a1", "main", commit(&["fix bug2"], &["b.rs", "a.rs"]), Default::default())
            .unwrap();

        assert_eq!(first, second);

        let action = queue.get_action(&first).unwrap().unwrap();
        match action.payload {
            ActionPayload::Commit { messages, files } => {
                assert_eq!(messages, vec!["fix bug".to_string(), "fix bug2".to_string()]);
                // Deduplicated union
                assert_eq!(files, vec!["a.rs".to_string(), "b.rs".to_string()]);
            }
            other => panic!("Unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_different_targets_never_merge() {
        let queue = queue();

        let first = queue
            .queue("a1", "main", commit(&["m1"], &["a.rs"]), Default::default())
            .unwrap();
        let second = queue
            .queue("a1", "develop", commit(&["m2"], &["b.rs"]), Default::default())
            .unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_different_types_never_merge() {
        let queue = queue();

        let first = queue
            .queue("a1", "main", commit(&["m1"], &["a.rs"]), Default::default())
            .unwrap();
        let second = queue
            .queue(
                "a1",
                "main",
                ActionPayload::Push {
                    remote: "origin".to_string(),
                    force_with_lease: false,
                },
                Default::default(),
            )
            .unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_merge_actions_never_merge_even_on_same_target() {
        let queue = queue();

        let payload = ActionPayload::Merge {
            source_branch: "work/a1".to_string(),
            squash: true,
        };
        let first = queue
            .queue("a1", "main", payload.clone(), Default::default())
            .unwrap();
        let second = queue.queue("a1", "main", payload, Default::default()).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_merge_takes_max_priority_and_min_window() {
        let queue = queue();

        let first = queue
            .queue(
                "a1",
                "main",
                commit(&["m1"], &[]),
                QueueOptions {
                    priority: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        let before = queue.get_action(&first).unwrap().unwrap();

        queue
            .queue(
                "a1",
                "main",
                commit(&["m2"], &[]),
                QueueOptions {
                    priority: 8,
                    urgent: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let after = queue.get_action(&first).unwrap().unwrap();

        assert_eq!(after.priority, 8);
        // The urgent duplicate accelerated the merged row
        assert!(after.execute_after < before.execute_after);
    }

    #[test]
    fn test_workflow_inputs_merge_key_wise() {
        let queue = queue();

        let mut inputs1 = BTreeMap::new();
        inputs1.insert("suite".to_string(), "unit".to_string());
        inputs1.insert("shard".to_string(), "1".to_string());
        let mut inputs2 = BTreeMap::new();
        inputs2.insert("shard".to_string(), "2".to_string());

        let id = queue
            .queue(
                "a1",
                "ci.yml",
                ActionPayload::Workflow {
                    git_ref: "main".to_string(),
                    inputs: inputs1,
                },
                Default::default(),
            )
            .unwrap();
        queue
            .queue(
                "a1",
                "ci.yml",
                ActionPayload::Workflow {
                    git_ref: "develop".to_string(),
                    inputs: inputs2,
                },
                Default::default(),
            )
            .unwrap();

        let action = queue.get_action(&id).unwrap().unwrap();
        match action.payload {
            ActionPayload::Workflow { git_ref, inputs } => {
                // Scalar overwritten, inputs merged with newer values winning
                assert_eq!(git_ref, "develop");
                assert_eq!(inputs.get("suite").map(String::as_str), Some("unit"));
                assert_eq!(inputs.get("shard").map(String::as_str), Some("2"));
            }
            other => panic!("Unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_urgent_mode_collapses_windows() {
        let queue = queue();
        queue.set_urgent_mode(true);

        let id = queue
            .queue("a1", "prod", ActionPayload::Deploy {
                workflow: "deploy.yml".to_string(),
                git_ref: "main".to_string(),
                version: None,
            }, Default::default())
            .unwrap();

        let action = queue.get_action(&id).unwrap().unwrap();
        let window = action.execute_after - action.queued_at;
        // Urgent window instead of the 60s deploy buffer
        assert!(window <= Duration::seconds(2));

        queue.set_urgent_mode(false);
        assert!(!queue.is_urgent());
    }

    #[test]
    fn test_default_windows_applied_per_kind() {
        let queue = queue();

        let commit_id = queue
            .queue("a1", "main", commit(&["m"], &[]), Default::default())
            .unwrap();
        let push_id = queue
            .queue(
                "a1",
                "main",
                ActionPayload::Push {
                    remote: "origin".to_string(),
                    force_with_lease: false,
                },
                Default::default(),
            )
            .unwrap();

        let commit_action = queue.get_action(&commit_id).unwrap().unwrap();
        let push_action = queue.get_action(&push_id).unwrap().unwrap();

        let commit_window = commit_action.execute_after - commit_action.queued_at;
        let push_window = push_action.execute_after - push_action.queued_at;
        assert!(commit_window >= Duration::seconds(29));
        assert!(push_window <= Duration::seconds(6));
    }

    #[test]
    fn test_merged_action_not_found_after_batching() {
        let queue = queue();

        let id = queue
            .queue("a1", "main", commit(&["m1"], &[]), Default::default())
            .unwrap();
        {
            let db = lock_mutex_recover(&queue.db);
            db.mark_actions_batched(&[id.clone()], "b1").unwrap();
        }

        // A batched row no longer absorbs new work
        let fresh = queue
            .queue("a1", "main", commit(&["m2"], &[]), Default::default())
            .unwrap();
        assert_ne!(id, fresh);
    }
}
