//! The three workflow steps. Each is a plain async function over its inputs,
//! so it can be exercised without the orchestrator.

pub mod generator;
pub mod planner;
pub mod verifier;

pub use generator::{generate, GenerationLog, GenerationMode};
pub use planner::plan;
pub use verifier::{verify, Feedback, VerificationResult, APPROVED};
