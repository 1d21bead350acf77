// Batch formation, squashing, and ordered/parallel execution

use crate::config::DeployConfig;
use crate::coordination::SharedDatabase;
use crate::deploy::runner::{DeployRunner, Tool};
use crate::models::{
    ActionPayload, ActionType, BatchResult, BatchStatus, DeployAction, DeployBatch, DeployStatus,
};
use crate::utils::lock_mutex_recover;
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One external invocation planned from a squashed group of actions.
/// A failing step fails every member action of the group.
#[derive(Debug, Clone)]
struct PlannedInvocation {
    action_type: ActionType,
    target: String,
    member_ids: Vec<String>,
    steps: Vec<(Tool, Vec<String>)>,
}

/// Forms batches from ready actions and executes them against the shared
/// repository.
///
/// Execution splits into a strictly ordered sequential pass (commit, push,
/// merge, deploy — everything that mutates shared git state) and a bounded
/// parallel fan-out for workflow triggers. Failures are isolated per
/// invocation and recorded; nothing is rolled back (at-least-once — a
/// partially applied batch needs operator intervention to undo).
pub struct DeployBatcher {
    db: SharedDatabase,
    runner: Arc<dyn DeployRunner>,
    repo_path: PathBuf,
    max_batch_size: usize,
    max_parallel_actions: usize,
}

impl DeployBatcher {
    pub fn new(
        db: SharedDatabase,
        runner: Arc<dyn DeployRunner>,
        repo_path: &Path,
        config: &DeployConfig,
    ) -> Self {
        Self {
            db,
            runner,
            repo_path: repo_path.to_path_buf(),
            max_batch_size: config.max_batch_size,
            max_parallel_actions: config.max_parallel_actions.max(1),
        }
    }

    /// Form a batch from ready pending actions (window elapsed), ordered
    /// priority desc then FIFO. Returns None when nothing is ready.
    pub fn create_batch(&self) -> Result<Option<DeployBatch>> {
        let db = lock_mutex_recover(&self.db);
        let ready = db.ready_pending_actions(Utc::now(), self.max_batch_size)?;
        if ready.is_empty() {
            return Ok(None);
        }

        let batch = DeployBatch {
            id: uuid::Uuid::new_v4().to_string(),
            action_ids: ready.iter().map(|a| a.id.clone()).collect(),
            created_at: Utc::now(),
            executed_at: None,
            status: BatchStatus::Pending,
            result: None,
        };

        db.mark_actions_batched(&batch.action_ids, &batch.id)?;
        db.insert_batch(&batch)?;

        log::info!(
            "[DeployBatcher] Created batch {} with {} action(s)",
            batch.id,
            batch.action_ids.len()
        );
        Ok(Some(batch))
    }

    /// Execute a batch: squash groups, run sequential invocations in order,
    /// fan out parallel-safe ones, record per-action outcomes.
    pub async fn execute_batch(&self, batch_id: &str) -> Result<BatchResult> {
        let actions = {
            let db = lock_mutex_recover(&self.db);
            let batch = db
                .get_batch(batch_id)?
                .ok_or_else(|| anyhow!("Unknown batch: {}", batch_id))?;
            db.set_batch_executing(batch_id)?;
            db.get_actions(&batch.action_ids)?
        };

        let invocations = plan_invocations(&actions);
        let (parallel, sequential): (Vec<_>, Vec<_>) = invocations
            .into_iter()
            .partition(|inv| inv.action_type.is_parallel_safe());

        let mut outcomes: Vec<(PlannedInvocation, std::result::Result<(), String>)> = Vec::new();

        // Sequential invocations strictly in batch order; a failure is
        // recorded and the loop continues to the next action
        for invocation in sequential {
            self.mark_members(&invocation, DeployStatus::Executing)?;
            let outcome = self.run_one(invocation.clone()).await;
            self.record_outcome(&invocation, &outcome)?;
            outcomes.push((invocation, outcome));
        }

        // Parallel-safe invocations in bounded chunks; one failing trigger
        // does not block the others
        for chunk in parallel.chunks(self.max_parallel_actions) {
            for invocation in chunk {
                self.mark_members(invocation, DeployStatus::Executing)?;
            }

            let handles: Vec<_> = chunk
                .iter()
                .map(|invocation| {
                    let runner = self.runner.clone();
                    let repo = self.repo_path.clone();
                    let invocation = invocation.clone();
                    tokio::task::spawn_blocking(move || {
                        run_invocation(runner.as_ref(), &repo, &invocation)
                    })
                })
                .collect();

            for (invocation, joined) in chunk.iter().zip(join_all(handles).await) {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => Err(format!("execution task panicked: {}", e)),
                };
                self.record_outcome(invocation, &outcome)?;
                outcomes.push((invocation.clone(), outcome));
            }
        }

        // Aggregate per-action results
        let mut succeeded = 0;
        let mut failed = 0;
        let mut errors = Vec::new();
        for (invocation, outcome) in &outcomes {
            match outcome {
                Ok(()) => succeeded += invocation.member_ids.len(),
                Err(message) => {
                    failed += invocation.member_ids.len();
                    for id in &invocation.member_ids {
                        errors.push(format!(
                            "{} ({}): {}",
                            id,
                            invocation.action_type.as_str(),
                            message
                        ));
                    }
                }
            }
        }

        let result = BatchResult {
            total: actions.len(),
            succeeded,
            failed,
            errors,
        };
        let status = if failed == 0 || succeeded > 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        };

        lock_mutex_recover(&self.db).finish_batch(batch_id, status, &result)?;

        if result.failed > 0 {
            log::warn!(
                "[DeployBatcher] Batch {} finished {:?}: {}/{} action(s) failed",
                batch_id,
                status,
                result.failed,
                result.total
            );
        } else {
            log::info!(
                "[DeployBatcher] Batch {} completed: {} action(s)",
                batch_id,
                result.total
            );
        }

        Ok(result)
    }

    /// Repeatedly form and execute batches until no ready pending actions
    /// remain — the "force everything out now" operation.
    pub async fn flush_all(&self) -> Result<Vec<BatchResult>> {
        let mut results = Vec::new();
        while let Some(batch) = self.create_batch()? {
            results.push(self.execute_batch(&batch.id).await?);
        }
        Ok(results)
    }

    /// Count of pending actions whose window has elapsed
    pub fn ready_count(&self) -> Result<i64> {
        lock_mutex_recover(&self.db).count_ready_pending(Utc::now())
    }

    /// Fetch a batch row (for status views and tests)
    pub fn get_batch(&self, id: &str) -> Result<Option<DeployBatch>> {
        lock_mutex_recover(&self.db).get_batch(id)
    }

    async fn run_one(&self, invocation: PlannedInvocation) -> std::result::Result<(), String> {
        let runner = self.runner.clone();
        let repo = self.repo_path.clone();
        match tokio::task::spawn_blocking(move || run_invocation(runner.as_ref(), &repo, &invocation))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => Err(format!("execution task panicked: {}", e)),
        }
    }

    fn mark_members(&self, invocation: &PlannedInvocation, status: DeployStatus) -> Result<()> {
        let db = lock_mutex_recover(&self.db);
        for id in &invocation.member_ids {
            db.set_action_status(id, status)?;
        }
        Ok(())
    }

    fn record_outcome(
        &self,
        invocation: &PlannedInvocation,
        outcome: &std::result::Result<(), String>,
    ) -> Result<()> {
        let status = match outcome {
            Ok(()) => DeployStatus::Completed,
            Err(_) => DeployStatus::Failed,
        };
        self.mark_members(invocation, status)
    }
}

/// Run one invocation's steps in order; the first failing step aborts the
/// invocation with its output surfaced verbatim.
fn run_invocation(
    runner: &dyn DeployRunner,
    repo: &Path,
    invocation: &PlannedInvocation,
) -> std::result::Result<(), String> {
    for (tool, args) in &invocation.steps {
        let output = runner
            .run(*tool, args, repo)
            .map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(output.failure_message());
        }
    }
    Ok(())
}

/// Group batch members by (action_type, target) preserving batch order,
/// then squash each group into planned invocations.
fn plan_invocations(actions: &[DeployAction]) -> Vec<PlannedInvocation> {
    let mut groups: Vec<((ActionType, String), Vec<&DeployAction>)> = Vec::new();
    for action in actions {
        let key = (action.action_type, action.target.clone());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(action),
            None => groups.push((key, vec![action])),
        }
    }

    let mut invocations = Vec::new();
    for ((action_type, target), members) in groups {
        match action_type {
            // Multiple commits collapse into one whose message enumerates
            // the constituents and whose file set is the union
            ActionType::Commit => invocations.push(squash_commits(target, &members)),
            // Idempotent operations collapse to the first representative
            ActionType::Push | ActionType::Workflow => {
                let mut invocation = build_invocation(members[0]);
                invocation.member_ids = members.iter().map(|a| a.id.clone()).collect();
                invocations.push(invocation);
            }
            // Never squashed; each executes on its own
            ActionType::Merge | ActionType::Deploy => {
                invocations.extend(members.iter().map(|a| build_invocation(a)));
            }
        }
    }
    invocations
}

/// Collapse a group of commit actions into one invocation
fn squash_commits(target: String, members: &[&DeployAction]) -> PlannedInvocation {
    let mut messages: Vec<String> = Vec::new();
    let mut files: Vec<String> = Vec::new();
    for action in members {
        if let ActionPayload::Commit {
            messages: m,
            files: f,
        } = &action.payload
        {
            for message in m {
                if !messages.contains(message) {
                    messages.push(message.clone());
                }
            }
            for file in f {
                if !files.contains(file) {
                    files.push(file.clone());
                }
            }
        }
    }

    let mut steps = Vec::new();
    if files.is_empty() {
        steps.push((Tool::Git, vec!["add".to_string(), "-A".to_string()]));
    } else {
        let mut args = vec!["add".to_string()];
        args.extend(files.iter().cloned());
        steps.push((Tool::Git, args));
    }
    steps.push((
        Tool::Git,
        vec!["commit".to_string(), "-m".to_string(), messages.join("\n\n")],
    ));

    PlannedInvocation {
        action_type: ActionType::Commit,
        target,
        member_ids: members.iter().map(|a| a.id.clone()).collect(),
        steps,
    }
}

/// Plan the external command(s) for a single action
fn build_invocation(action: &DeployAction) -> PlannedInvocation {
    let steps = match &action.payload {
        ActionPayload::Commit { .. } => {
            // Single commits go through the same squash path
            return squash_commits(action.target.clone(), &[action]);
        }
        ActionPayload::Push {
            remote,
            force_with_lease,
        } => {
            let mut args = vec!["push".to_string()];
            if *force_with_lease {
                args.push("--force-with-lease".to_string());
            }
            args.push(remote.clone());
            args.push(action.target.clone());
            vec![(Tool::Git, args)]
        }
        ActionPayload::Merge {
            source_branch,
            squash,
        } => {
            let mut args = vec!["merge".to_string()];
            if *squash {
                args.push("--squash".to_string());
            }
            args.push(source_branch.clone());
            vec![(Tool::Git, args)]
        }
        ActionPayload::Workflow { git_ref, inputs } => {
            let mut args = vec![
                "workflow".to_string(),
                "run".to_string(),
                action.target.clone(),
                "--ref".to_string(),
                git_ref.clone(),
            ];
            for (key, value) in inputs {
                args.push("-f".to_string());
                args.push(format!("{}={}", key, value));
            }
            vec![(Tool::Gh, args)]
        }
        ActionPayload::Deploy {
            workflow,
            git_ref,
            version,
        } => {
            let mut args = vec![
                "workflow".to_string(),
                "run".to_string(),
                workflow.clone(),
                "--ref".to_string(),
                git_ref.clone(),
                "-f".to_string(),
                format!("environment={}", action.target),
            ];
            if let Some(version) = version {
                args.push("-f".to_string());
                args.push(format!("version={}", version));
            }
            vec![(Tool::Gh, args)]
        }
    };

    PlannedInvocation {
        action_type: action.action_type,
        target: action.target.clone(),
        member_ids: vec![action.id.clone()],
        steps,
    }
}
