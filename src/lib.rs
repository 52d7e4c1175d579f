//! LISA - plan, generate and verify code with a bounded self-correction loop
//!
//! This library sequences a planner, a coder and a reviewer over a jailed
//! workspace. Generated files are executed in a subprocess sandbox and any
//! failure is fed back to the coder, at most [`config::MAX_RETRIES`] times.

pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod llm;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod sandbox;
pub mod session;
pub mod steps;

pub use error::{Error, Result};

pub use config::{
    BackendConfig, GeneratorConfig, RunConfig, Validate, ValidationResult, KNOWN_BACKENDS,
    MAX_RETRIES,
};
pub use events::{RunEvent, StepEvent, StepKind, StepStatus, TerminalEvent, TerminalStatus};
pub use llm::{generator_for, Backend, CliGenerator, ScriptedGenerator, TextGenerator};
pub use orchestrator::{GeneratorSet, Orchestrator, RunOutcome, RunState, Stage};
pub use plan::{parse_plan, validate_plan, FileSpec, Plan};
pub use sandbox::{ExecutionResult, Executor, InterpreterMap, ProcessExecutor, Workspace};
pub use session::{spawn_run, InMemorySessionStore, SessionId, SessionStore};
pub use steps::{Feedback, GenerationLog, GenerationMode, VerificationResult};
