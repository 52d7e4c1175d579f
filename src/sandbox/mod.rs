//! Sandbox module for jailed storage and execution of generated code.
//!
//! [`Workspace`] confines every file to a single root directory and
//! [`ProcessExecutor`] runs those files as child processes under a timeout.

mod execution;
mod workspace;

pub use execution::{
    ExecutionResult, Executor, InterpreterMap, ProcessExecutor, FAILURE_EXIT_CODE,
};
pub use workspace::{check_relative_path, Workspace};
