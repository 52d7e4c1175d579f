//! End-to-end runs with scripted generators and real shell execution.
//!
//! Generated files are `.sh` scripts so the tests only need `sh`.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::mpsc;

use lisa::{
    Executor, Feedback, GeneratorSet, Orchestrator, ProcessExecutor, RunEvent, RunOutcome,
    ScriptedGenerator, Stage, StepKind, StepStatus, TerminalStatus, Workspace, MAX_RETRIES,
};

const HELLO_PLAN: &str = r#"```json
{
  "files": [{"path": "hello.sh", "description": "prints hello"}],
  "instructions": ["Print hello"]
}
```"#;

struct Harness {
    _tmp: TempDir,
    workspace: Workspace,
    coder: Arc<ScriptedGenerator>,
    reviewer: Arc<ScriptedGenerator>,
    orchestrator: Orchestrator,
}

fn harness(plan: &str, coder: ScriptedGenerator, reviewer: ScriptedGenerator, timeout: Duration) -> Harness {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let workspace = Workspace::new(tmp.path().join("workspace"));
    let coder = Arc::new(coder);
    let reviewer = Arc::new(reviewer);

    let orchestrator = Orchestrator::new(
        GeneratorSet::new(
            Arc::new(ScriptedGenerator::new().with_response(plan)),
            coder.clone(),
            reviewer.clone(),
        ),
        workspace.clone(),
        Arc::new(ProcessExecutor::new(workspace.clone())),
    )
    .with_execution_timeout(timeout);

    Harness {
        _tmp: tmp,
        workspace,
        coder,
        reviewer,
        orchestrator,
    }
}

async fn run_collecting(orchestrator: &Orchestrator, request: &str) -> (lisa::RunState, Vec<RunEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let state = orchestrator.run_with_events(request, tx).await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (state, events)
}

fn step_kinds(events: &[RunEvent]) -> Vec<StepKind> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Step(step) => Some(step.step),
            RunEvent::Terminal(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn happy_path_is_approved_without_retry() {
    let h = harness(
        HELLO_PLAN,
        ScriptedGenerator::new().with_response("```sh\necho hello\n```"),
        ScriptedGenerator::new(),
        Duration::from_secs(10),
    );

    let (state, events) = run_collecting(&h.orchestrator, "say hello").await;

    assert_eq!(state.outcome(), RunOutcome::Approved);
    assert_eq!(state.feedback, Some(Feedback::Approved));
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.last_execution_summary, "hello.sh PASSED execution.");
    assert_eq!(h.workspace.read("hello.sh").unwrap(), "echo hello");
    assert!(h.reviewer.prompts().is_empty());

    assert_eq!(
        step_kinds(&events),
        vec![StepKind::Planning, StepKind::Generating, StepKind::Verifying]
    );
    match events.last().unwrap() {
        RunEvent::Terminal(t) => assert_eq!(t.status, TerminalStatus::Complete),
        other => panic!("expected terminal event, got {:?}", other),
    }
}

#[tokio::test]
async fn one_retry_then_success() {
    let h = harness(
        HELLO_PLAN,
        ScriptedGenerator::new()
            .with_response("echo NameError >&2\nexit 1")
            .with_response("echo hello"),
        ScriptedGenerator::new().with_response("Stop failing and print hello."),
        Duration::from_secs(10),
    );

    let (state, events) = run_collecting(&h.orchestrator, "say hello").await;

    assert_eq!(state.outcome(), RunOutcome::Approved);
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.generated_log, vec!["FIXED hello.sh: wrote 10 bytes"]);

    // The reviewer saw the failing stderr.
    assert!(h.reviewer.prompts()[0].contains("hello.sh FAILED:\nNameError"));

    // The fix pass saw the prior content and the reviewer's instruction.
    let prompts = h.coder.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("echo NameError >&2"));
    assert!(prompts[1].contains("Stop failing and print hello."));

    assert_eq!(
        step_kinds(&events),
        vec![
            StepKind::Planning,
            StepKind::Generating,
            StepKind::Verifying,
            StepKind::Generating,
            StepKind::Verifying,
        ]
    );
}

#[tokio::test]
async fn exhausted_retries_end_in_error() {
    let mut coder = ScriptedGenerator::new();
    let mut reviewer = ScriptedGenerator::new();
    for attempt in 0..=MAX_RETRIES {
        coder = coder.with_response(format!("echo attempt {} >&2\nexit 1", attempt));
        reviewer = reviewer.with_response(format!("still broken after attempt {}", attempt));
    }
    let h = harness(HELLO_PLAN, coder, reviewer, Duration::from_secs(10));

    let (state, events) = run_collecting(&h.orchestrator, "say hello").await;

    assert_eq!(state.outcome(), RunOutcome::RetriesExhausted);
    assert_eq!(state.retry_count, MAX_RETRIES);
    assert!(state.error.is_none());
    assert!(!state.feedback.as_ref().unwrap().is_approved());
    assert!(state.last_execution_summary.contains("attempt 3"));

    // 1 plan + 4 generate + 4 verify, then the terminal record.
    assert_eq!(step_kinds(&events).len(), 9);
    assert_eq!(events.len(), 10);
    match events.last().unwrap() {
        RunEvent::Terminal(t) => {
            assert_eq!(t.status, TerminalStatus::Error);
            assert!(t.message.contains("still broken after attempt 3"));
        }
        other => panic!("expected terminal event, got {:?}", other),
    }
}

#[tokio::test]
async fn retry_count_never_decreases() {
    let mut coder = ScriptedGenerator::new();
    let mut reviewer = ScriptedGenerator::new();
    for _ in 0..=MAX_RETRIES {
        coder = coder.with_response("exit 2");
        reviewer = reviewer.with_response("try again");
    }
    let h = harness(HELLO_PLAN, coder, reviewer, Duration::from_secs(10));

    let mut state = lisa::RunState::new("say hello");
    let mut previous = 0;
    let mut transitions = 0;
    while !state.is_done() {
        state = h.orchestrator.advance(state).await.0;
        assert!(state.retry_count >= previous);
        assert!(state.retry_count <= MAX_RETRIES);
        previous = state.retry_count;
        transitions += 1;
    }

    assert!(transitions <= 9);
}

#[tokio::test]
async fn escaping_plan_is_rejected_and_nothing_is_written() {
    let plan = r#"{"files": [{"path": "../../etc/passwd", "description": "overwrite it"}]}"#;
    let h = harness(
        plan,
        ScriptedGenerator::new().with_response("root::0:0::/:/bin/sh"),
        ScriptedGenerator::new(),
        Duration::from_secs(10),
    );

    let (state, events) = run_collecting(&h.orchestrator, "break out").await;

    assert_eq!(state.outcome(), RunOutcome::PlanFailed);
    assert!(h.coder.prompts().is_empty());
    assert!(!h.workspace.root().exists());

    match &events[0] {
        RunEvent::Step(step) => {
            assert_eq!(step.step, StepKind::Planning);
            assert_eq!(step.status, StepStatus::Error);
        }
        other => panic!("expected planning record, got {:?}", other),
    }
    assert_eq!(events.len(), 2);
    assert!(events[1].is_terminal());
}

#[tokio::test]
async fn infinite_loop_times_out_within_bound() {
    let tmp = TempDir::new().unwrap();
    let workspace = Workspace::new(tmp.path());
    workspace.write("spin.sh", "while true; do :; done").unwrap();
    let executor = ProcessExecutor::new(workspace);

    let started = Instant::now();
    let result = executor.run("spin.sh", Duration::from_secs(1)).await;
    let elapsed = started.elapsed();

    assert_eq!(result.exit_code, -1);
    assert!(result.stderr.contains("timed out"), "stderr: {}", result.stderr);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(10));
}

#[tokio::test]
async fn timeout_is_a_verification_failure_that_can_be_fixed() {
    let h = harness(
        HELLO_PLAN,
        ScriptedGenerator::new()
            .with_response("while true; do :; done")
            .with_response("echo hello"),
        ScriptedGenerator::new().with_response("Remove the infinite loop."),
        Duration::from_secs(1),
    );

    let state = h.orchestrator.run("say hello").await;

    assert_eq!(state.outcome(), RunOutcome::Approved);
    assert_eq!(state.retry_count, 1);
    assert!(h.reviewer.prompts()[0].contains("Execution timed out (1s limit)."));
}

#[tokio::test]
async fn partial_generation_failure_is_surfaced_by_verification() {
    let plan = r#"{"files": [
        {"path": "a.sh", "description": "first"},
        {"path": "lib/b.sh", "description": "second"}
    ]}"#;
    let h = harness(
        plan,
        ScriptedGenerator::new()
            .with_failure("coder crashed")
            .with_response("echo b")
            .with_response("echo a")
            .with_response("echo b"),
        ScriptedGenerator::new().with_response("a.sh is missing, write it."),
        Duration::from_secs(10),
    );

    let (state, _) = run_collecting(&h.orchestrator, "two files").await;

    assert_eq!(state.outcome(), RunOutcome::Approved);
    assert_eq!(state.retry_count, 1);
    assert_eq!(h.workspace.list().unwrap(), vec!["a.sh", "lib/b.sh"]);

    let review = &h.reviewer.prompts()[0];
    assert!(review.contains("a.sh FAILED:\nFile a.sh does not exist."));
    assert!(review.contains("lib/b.sh PASSED execution."));
}

#[tokio::test]
async fn stepwise_driving_can_stop_at_any_boundary() {
    let h = harness(
        HELLO_PLAN,
        ScriptedGenerator::new().with_response("echo hello"),
        ScriptedGenerator::new(),
        Duration::from_secs(10),
    );

    let state = lisa::RunState::new("say hello");
    let (state, _) = h.orchestrator.advance(state).await;
    let (state, _) = h.orchestrator.advance(state).await;

    assert_eq!(state.stage, Stage::Verifying);
    assert_eq!(state.outcome(), RunOutcome::InProgress);
    assert!(h.workspace.contains("hello.sh"));
}
