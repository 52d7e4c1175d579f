//! Bounded plan, generate and verify state machine.
//!
//! ```text
//! PLANNING -> GENERATING -> VERIFYING -> DONE
//!                 ^              |
//!                 +-- retry -----+
//! ```
//!
//! [`Orchestrator::advance`] performs exactly one transition, so a caller can
//! stop between any two steps. [`Orchestrator::run`] drives it to `Done`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::{GeneratorConfig, RunConfig, MAX_RETRIES};
use crate::error::Result;
use crate::events::{RunEvent, StepKind, StepStatus};
use crate::llm::{generator_for, TextGenerator};
use crate::plan::Plan;
use crate::sandbox::{Executor, ProcessExecutor, Workspace};
use crate::steps::{self, Feedback, GenerationMode};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Generating,
    Verifying,
    Done,
}

/// How a run ended, derived from [`RunState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The last verification approved every file.
    Approved,
    /// The retry ceiling was reached without approval.
    RetriesExhausted,
    /// Planning failed; nothing was generated.
    PlanFailed,
    /// The run has not reached `Done`.
    InProgress,
}

/// The record threaded through a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub request: String,
    pub stage: Stage,
    pub plan: Option<Plan>,
    /// Log lines from the most recent generation pass.
    pub generated_log: Vec<String>,
    /// Verdict of the most recent verification pass.
    pub feedback: Option<Feedback>,
    pub last_execution_summary: String,
    /// Fix passes started so far. Never exceeds [`MAX_RETRIES`].
    pub retry_count: u32,
    /// Set only when planning failed.
    pub error: Option<String>,
}

impl RunState {
    /// Creates the initial state for `request`.
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            stage: Stage::Planning,
            plan: None,
            generated_log: Vec::new(),
            feedback: None,
            last_execution_summary: String::new(),
            retry_count: 0,
            error: None,
        }
    }

    /// Returns true once the run has reached `Done`.
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Classifies the run.
    pub fn outcome(&self) -> RunOutcome {
        if !self.is_done() {
            RunOutcome::InProgress
        } else if self.error.is_some() {
            RunOutcome::PlanFailed
        } else if self.feedback.as_ref().is_some_and(Feedback::is_approved) {
            RunOutcome::Approved
        } else {
            RunOutcome::RetriesExhausted
        }
    }

    fn finish_with_error(&mut self, message: String) -> RunEvent {
        self.stage = Stage::Done;
        self.error = Some(message.clone());
        RunEvent::error(message)
    }
}

/// Text generators for each role.
#[derive(Clone)]
pub struct GeneratorSet {
    pub planner: Arc<dyn TextGenerator>,
    pub coder: Arc<dyn TextGenerator>,
    pub reviewer: Arc<dyn TextGenerator>,
}

impl GeneratorSet {
    /// Creates a set with a distinct generator per role.
    pub fn new(
        planner: Arc<dyn TextGenerator>,
        coder: Arc<dyn TextGenerator>,
        reviewer: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            planner,
            coder,
            reviewer,
        }
    }

    /// Uses one generator for every role.
    pub fn uniform(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            planner: generator.clone(),
            coder: generator.clone(),
            reviewer: generator,
        }
    }

    /// Builds CLI generators from configuration.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        Ok(Self {
            planner: generator_for(&config.planner)?,
            coder: generator_for(&config.coder)?,
            reviewer: generator_for(&config.reviewer)?,
        })
    }
}

/// Sequences the planner, generator and verifier steps for one run at a time.
pub struct Orchestrator {
    generators: GeneratorSet,
    workspace: Workspace,
    executor: Arc<dyn Executor>,
    execution_timeout: Duration,
}

impl Orchestrator {
    /// Creates an orchestrator with the default 30 second execution timeout.
    pub fn new(generators: GeneratorSet, workspace: Workspace, executor: Arc<dyn Executor>) -> Self {
        Self {
            generators,
            workspace,
            executor,
            execution_timeout: RunConfig::default().execution_timeout(),
        }
    }

    /// Builds an orchestrator with CLI generators and a process executor.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let generators = GeneratorSet::from_config(&config.generators)?;
        let workspace = Workspace::new(config.workspace_root.clone());
        let executor = ProcessExecutor::new(workspace.clone())
            .with_interpreters(config.interpreter_map())
            .with_output_limit(config.max_output_bytes);

        Ok(Self::new(generators, workspace, Arc::new(executor))
            .with_execution_timeout(config.execution_timeout()))
    }

    /// Sets the per-file execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Returns the workspace generated files are written to.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Performs one transition and returns the events it produced.
    ///
    /// Calling this on a finished state is a no-op.
    pub async fn advance(&self, mut state: RunState) -> (RunState, Vec<RunEvent>) {
        let mut events = Vec::new();

        match state.stage {
            Stage::Planning => {
                let planned = self.plan(&state.request).await;
                match planned {
                    Ok(plan) => {
                        events.push(RunEvent::step(
                            StepKind::Planning,
                            StepStatus::Success,
                            json!({ "plan": &plan, "markdown": plan.to_markdown() }),
                        ));
                        state.plan = Some(plan);
                        state.stage = Stage::Generating;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "planning failed");
                        events.push(RunEvent::step(
                            StepKind::Planning,
                            StepStatus::Error,
                            json!({ "error": e.to_string() }),
                        ));
                        events.push(state.finish_with_error(format!("Planning failed: {}", e)));
                    }
                }
            }

            Stage::Generating => {
                let Some(plan) = state.plan.as_ref() else {
                    events.push(state.finish_with_error("Cannot generate without a plan".to_string()));
                    return (state, events);
                };

                let mode = GenerationMode::for_feedback(state.feedback.as_ref());
                tracing::info!(retry_count = state.retry_count, mode = mode.tag(), "generating files");

                let log = steps::generate(
                    plan,
                    &self.workspace,
                    state.feedback.as_ref(),
                    &state.last_execution_summary,
                    self.generators.coder.as_ref(),
                )
                .await;

                events.push(RunEvent::step(
                    StepKind::Generating,
                    StepStatus::Success,
                    json!({
                        "mode": mode.tag(),
                        "retry_count": state.retry_count,
                        "failures": log.failures,
                        "log": &log.lines,
                    }),
                ));
                state.generated_log = log.lines;
                state.stage = Stage::Verifying;
            }

            Stage::Verifying => {
                let Some(plan) = state.plan.as_ref() else {
                    events.push(state.finish_with_error("Cannot verify without a plan".to_string()));
                    return (state, events);
                };

                let result = steps::verify(
                    plan,
                    self.executor.as_ref(),
                    self.generators.reviewer.as_ref(),
                    self.execution_timeout,
                )
                .await;

                events.push(RunEvent::step(
                    StepKind::Verifying,
                    StepStatus::Success,
                    json!({
                        "feedback": &result.feedback,
                        "summary": &result.summary,
                        "any_failed": result.any_failed,
                        "failed": &result.failed,
                    }),
                ));

                state.last_execution_summary = result.summary;
                let approved = result.feedback.is_approved();
                state.feedback = Some(result.feedback);

                if approved {
                    tracing::info!(retry_count = state.retry_count, "all files approved");
                    state.stage = Stage::Done;
                    events.push(RunEvent::complete("All files passed execution."));
                } else if state.retry_count >= MAX_RETRIES {
                    tracing::warn!(retry_count = state.retry_count, "retries exhausted");
                    state.stage = Stage::Done;
                    let last = state.feedback.as_ref().map(Feedback::text).unwrap_or_default();
                    events.push(RunEvent::error(format!(
                        "Retries exhausted after {} attempts. Last feedback: {}",
                        state.retry_count, last
                    )));
                } else {
                    state.retry_count += 1;
                    tracing::info!(retry_count = state.retry_count, "verification failed, retrying");
                    state.stage = Stage::Generating;
                }
            }

            Stage::Done => {}
        }

        (state, events)
    }

    async fn plan(&self, request: &str) -> Result<Plan> {
        tracing::info!(planner = self.generators.planner.name(), "planning");
        steps::plan(request, self.generators.planner.as_ref()).await
    }

    /// Runs `request` to completion and returns the final state.
    pub async fn run(&self, request: impl Into<String>) -> RunState {
        let mut state = RunState::new(request);
        while !state.is_done() {
            state = self.advance(state).await.0;
        }
        state
    }

    /// Runs `request` to completion, sending every event to `tx`.
    ///
    /// If the receiver goes away the run stops at the next step boundary and
    /// the state reached so far is returned.
    pub async fn run_with_events(&self, request: impl Into<String>, tx: mpsc::Sender<RunEvent>) -> RunState {
        let mut state = RunState::new(request);
        while !state.is_done() {
            let (next, events) = self.advance(state).await;
            state = next;
            for event in events {
                if tx.send(event).await.is_err() {
                    tracing::warn!(stage = ?state.stage, "event receiver dropped, abandoning run");
                    return state;
                }
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGenerator;
    use crate::sandbox::ExecutionResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const PLAN: &str = r#"{"files": [{"path": "hello.py", "description": "prints hello"}]}"#;

    /// Executor that fails the first `failures` runs, then passes.
    struct FlakyExecutor {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyExecutor {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for FlakyExecutor {
        async fn run(&self, _path: &str, _timeout: Duration) -> ExecutionResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                ExecutionResult {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "NameError".to_string(),
                }
            } else {
                ExecutionResult {
                    exit_code: 0,
                    stdout: "hello".to_string(),
                    stderr: String::new(),
                }
            }
        }
    }

    fn orchestrator(
        tmp: &TempDir,
        planner: ScriptedGenerator,
        coder: ScriptedGenerator,
        reviewer: ScriptedGenerator,
        executor: FlakyExecutor,
    ) -> Orchestrator {
        Orchestrator::new(
            GeneratorSet::new(Arc::new(planner), Arc::new(coder), Arc::new(reviewer)),
            Workspace::new(tmp.path().join("ws")),
            Arc::new(executor),
        )
    }

    #[tokio::test]
    async fn advance_walks_stages_in_order() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(
            &tmp,
            ScriptedGenerator::new().with_response(PLAN),
            ScriptedGenerator::new().with_response("print('hello')"),
            ScriptedGenerator::new(),
            FlakyExecutor::new(0),
        );

        let state = RunState::new("say hello");
        let (state, events) = orch.advance(state).await;
        assert_eq!(state.stage, Stage::Generating);
        assert_eq!(events.len(), 1);

        let (state, _) = orch.advance(state).await;
        assert_eq!(state.stage, Stage::Verifying);
        assert_eq!(state.generated_log, vec!["GENERATED hello.py: wrote 14 bytes"]);

        let (state, events) = orch.advance(state).await;
        assert_eq!(state.outcome(), RunOutcome::Approved);
        assert!(events.last().unwrap().is_terminal());

        let (state, events) = orch.advance(state).await;
        assert!(state.is_done());
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn plan_failure_is_terminal_without_retry() {
        let tmp = TempDir::new().unwrap();
        let coder = ScriptedGenerator::new();
        let orch = orchestrator(
            &tmp,
            ScriptedGenerator::new().with_response("not json at all"),
            coder,
            ScriptedGenerator::new(),
            FlakyExecutor::new(0),
        );

        let state = orch.run("anything").await;

        assert_eq!(state.outcome(), RunOutcome::PlanFailed);
        assert_eq!(state.retry_count, 0);
        assert!(state.plan.is_none());
        assert!(state.error.unwrap().contains("Planning failed"));
    }

    #[tokio::test]
    async fn one_failure_then_fix_is_approved() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(
            &tmp,
            ScriptedGenerator::new().with_response(PLAN),
            ScriptedGenerator::new()
                .with_response("print(helo)")
                .with_response("print('hello')"),
            ScriptedGenerator::new().with_response("Quote the string."),
            FlakyExecutor::new(1),
        );

        let state = orch.run("say hello").await;

        assert_eq!(state.outcome(), RunOutcome::Approved);
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.generated_log, vec!["FIXED hello.py: wrote 14 bytes"]);
    }

    #[tokio::test]
    async fn retries_stop_at_ceiling() {
        let tmp = TempDir::new().unwrap();
        let mut coder = ScriptedGenerator::new();
        let mut reviewer = ScriptedGenerator::new();
        for i in 0..=MAX_RETRIES {
            coder = coder.with_response(format!("attempt {}", i));
            reviewer = reviewer.with_response(format!("fix {}", i));
        }
        let orch = orchestrator(
            &tmp,
            ScriptedGenerator::new().with_response(PLAN),
            coder,
            reviewer,
            FlakyExecutor::new(usize::MAX),
        );

        let (tx, mut rx) = mpsc::channel(64);
        let state = orch.run_with_events("say hello", tx).await;

        assert_eq!(state.outcome(), RunOutcome::RetriesExhausted);
        assert_eq!(state.retry_count, MAX_RETRIES);
        assert_eq!(state.feedback, Some(Feedback::NeedsFix("fix 3".to_string())));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        // 1 plan + 4 generate + 4 verify + terminal.
        assert_eq!(events.len(), 10);
        match events.last().unwrap() {
            RunEvent::Terminal(t) => assert!(t.message.contains("fix 3")),
            other => panic!("expected terminal event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropped_receiver_abandons_run() {
        let tmp = TempDir::new().unwrap();
        let coder = Arc::new(ScriptedGenerator::new().with_response("print('hello')"));
        let orch = Orchestrator::new(
            GeneratorSet::new(
                Arc::new(ScriptedGenerator::new().with_response(PLAN)),
                coder.clone(),
                Arc::new(ScriptedGenerator::new()),
            ),
            Workspace::new(tmp.path().join("ws")),
            Arc::new(FlakyExecutor::new(0)),
        );

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let state = orch.run_with_events("say hello", tx).await;

        assert_eq!(state.stage, Stage::Generating);
        assert!(coder.prompts().is_empty());
    }

    #[test]
    fn uniform_set_shares_generator() {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::new());
        let set = GeneratorSet::uniform(generator.clone());

        assert!(Arc::ptr_eq(&set.planner, &generator));
        assert!(Arc::ptr_eq(&set.reviewer, &generator));
    }
}
