// End-to-end deploy pipeline: enqueue merging, batching, squash, execution

use std::path::Path;
use std::sync::{Arc, Mutex};

use switchyard::deploy::{CommandOutput, DeployRunner, Tool};
use switchyard::{
    ActionPayload, CoordinationEngine, DeployStatus, EngineConfig,
};

/// Records every external invocation; optionally fails matching ones
struct RecordingRunner {
    calls: Mutex<Vec<(Tool, Vec<String>)>>,
    fail_when_contains: Option<String>,
}

impl RecordingRunner {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_when_contains: None,
        }
    }

    fn failing_on(pattern: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_when_contains: Some(pattern.to_string()),
        }
    }

    fn calls(&self) -> Vec<(Tool, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl DeployRunner for RecordingRunner {
    fn run(&self, tool: Tool, args: &[String], _cwd: &Path) -> anyhow::Result<CommandOutput> {
        self.calls.lock().unwrap().push((tool, args.to_vec()));
        if let Some(pattern) = &self.fail_when_contains {
            if args.iter().any(|a| a.contains(pattern.as_str())) {
                return Ok(CommandOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: format!("remote rejected ({})", pattern),
                });
            }
        }
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn engine(runner: Arc<RecordingRunner>) -> CoordinationEngine {
    let engine = CoordinationEngine::in_memory(
        Path::new("/tmp/project"),
        EngineConfig::default(),
        runner,
    )
    .unwrap();
    // Tests should not wait out the real debounce windows
    engine.set_urgent_mode(true);
    engine
}

fn commit(messages: &[&str], files: &[&str]) -> ActionPayload {
    ActionPayload::Commit {
        messages: messages.iter().map(|s| s.to_string()).collect(),
        files: files.iter().map(|s| s.to_string()).collect(),
    }
}

async fn wait_for_window() {
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
}

#[tokio::test]
async fn test_commit_merge_and_squash_scenario() {
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine(runner.clone());
    let a1 = engine.registry().register("alice", &[], None).unwrap();

    let first = engine
        .deploy_queue()
        .queue(&a1, "main", commit(&["fix bug"], &["a.ts"]), Default::default())
        .unwrap();
    let second = engine
        .deploy_queue()
        .queue(&a1, "main", commit(&["fix bug2"], &["b.ts"]), Default::default())
        .unwrap();

    // Enqueue-time merge produced exactly one pending row
    assert_eq!(first, second);

    wait_for_window().await;
    let batch = engine.batcher().create_batch().unwrap().unwrap();
    assert_eq!(batch.action_ids.len(), 1);

    let result = engine.batcher().execute_batch(&batch.id).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.succeeded, 1);

    // One add + one commit; message enumerates both originals, file set is
    // the union
    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    let (_, add_args) = &calls[0];
    assert_eq!(add_args[0], "add");
    assert!(add_args.contains(&"a.ts".to_string()));
    assert!(add_args.contains(&"b.ts".to_string()));
    let (_, commit_args) = &calls[1];
    assert_eq!(commit_args[0], "commit");
    assert!(commit_args[2].contains("fix bug"));
    assert!(commit_args[2].contains("fix bug2"));
}

#[tokio::test]
async fn test_distinct_pairs_never_merge() {
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine(runner);
    let a1 = engine.registry().register("alice", &[], None).unwrap();

    let on_main = engine
        .deploy_queue()
        .queue(&a1, "main", commit(&["m1"], &[]), Default::default())
        .unwrap();
    let on_develop = engine
        .deploy_queue()
        .queue(&a1, "develop", commit(&["m2"], &[]), Default::default())
        .unwrap();
    let push = engine
        .deploy_queue()
        .queue(
            &a1,
            "main",
            ActionPayload::Push {
                remote: "origin".to_string(),
                force_with_lease: false,
            },
            Default::default(),
        )
        .unwrap();

    assert_ne!(on_main, on_develop);
    assert_ne!(on_main, push);

    wait_for_window().await;
    let batch = engine.batcher().create_batch().unwrap().unwrap();
    assert_eq!(batch.action_ids.len(), 3);
}

#[tokio::test]
async fn test_sequential_failure_isolation_and_statuses() {
    let runner = Arc::new(RecordingRunner::failing_on("push"));
    let engine = engine(runner.clone());
    let a1 = engine.registry().register("alice", &[], None).unwrap();

    let commit_id = engine
        .deploy_queue()
        .queue(&a1, "main", commit(&["ok"], &["a.ts"]), Default::default())
        .unwrap();
    let push_id = engine
        .deploy_queue()
        .queue(
            &a1,
            "main",
            ActionPayload::Push {
                remote: "origin".to_string(),
                force_with_lease: true,
            },
            Default::default(),
        )
        .unwrap();

    wait_for_window().await;
    let batch = engine.batcher().create_batch().unwrap().unwrap();
    let result = engine.batcher().execute_batch(&batch.id).await.unwrap();

    assert_eq!(result.total, 2);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    assert!(result.is_partial());
    // Failure recorded as "<actionId> (<type>): <message>" with the output
    // surfaced verbatim
    assert!(result.errors[0].starts_with(&push_id));
    assert!(result.errors[0].contains("(push)"));
    assert!(result.errors[0].contains("remote rejected"));

    // Terminal statuses are final per action
    let commit_action = engine.deploy_queue().get_action(&commit_id).unwrap().unwrap();
    let push_action = engine.deploy_queue().get_action(&push_id).unwrap().unwrap();
    assert_eq!(commit_action.status, DeployStatus::Completed);
    assert_eq!(push_action.status, DeployStatus::Failed);
}

#[tokio::test]
async fn test_failed_action_is_not_requeued() {
    let runner = Arc::new(RecordingRunner::failing_on("push"));
    let engine = engine(runner.clone());
    let a1 = engine.registry().register("alice", &[], None).unwrap();

    engine
        .deploy_queue()
        .queue(
            &a1,
            "main",
            ActionPayload::Push {
                remote: "origin".to_string(),
                force_with_lease: false,
            },
            Default::default(),
        )
        .unwrap();

    wait_for_window().await;
    engine.flush_deploys().await.unwrap();
    let attempts = runner.calls().len();

    // A second flush finds nothing: the failed action stays terminal
    assert!(engine.flush_deploys().await.unwrap().is_empty());
    assert_eq!(runner.calls().len(), attempts);
}

#[tokio::test]
async fn test_flush_drains_mixed_queue() {
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine(runner.clone());
    let a1 = engine.registry().register("alice", &[], None).unwrap();

    engine
        .deploy_queue()
        .queue(&a1, "main", commit(&["m"], &["a.ts"]), Default::default())
        .unwrap();
    engine
        .deploy_queue()
        .queue(
            &a1,
            "ci.yml",
            ActionPayload::Workflow {
                git_ref: "main".to_string(),
                inputs: Default::default(),
            },
            Default::default(),
        )
        .unwrap();
    engine
        .deploy_queue()
        .queue(
            &a1,
            "staging",
            ActionPayload::Deploy {
                workflow: "deploy.yml".to_string(),
                git_ref: "main".to_string(),
                version: None,
            },
            Default::default(),
        )
        .unwrap();

    wait_for_window().await;
    let results = engine.flush_deploys().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].total, 3);
    assert_eq!(results[0].failed, 0);
    assert_eq!(engine.batcher().ready_count().unwrap(), 0);

    // git for commit steps, gh for workflow and deploy triggers
    let calls = runner.calls();
    assert!(calls.iter().any(|(tool, _)| *tool == Tool::Git));
    assert_eq!(calls.iter().filter(|(tool, _)| *tool == Tool::Gh).count(), 2);
}

#[tokio::test]
async fn test_workflow_trigger_command_shape() {
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine(runner.clone());
    let a1 = engine.registry().register("alice", &[], None).unwrap();

    let mut inputs = std::collections::BTreeMap::new();
    inputs.insert("suite".to_string(), "integration".to_string());
    engine
        .deploy_queue()
        .queue(
            &a1,
            "ci.yml",
            ActionPayload::Workflow {
                git_ref: "work/alice".to_string(),
                inputs,
            },
            Default::default(),
        )
        .unwrap();

    wait_for_window().await;
    engine.flush_deploys().await.unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    let (tool, args) = &calls[0];
    assert_eq!(*tool, Tool::Gh);
    assert_eq!(
        args[..5],
        [
            "workflow".to_string(),
            "run".to_string(),
            "ci.yml".to_string(),
            "--ref".to_string(),
            "work/alice".to_string(),
        ]
    );
    assert!(args.contains(&"suite=integration".to_string()));
}
