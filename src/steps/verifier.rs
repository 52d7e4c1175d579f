//! Verifier step: execute every planned file and turn failures into feedback.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::debug;
use crate::llm::TextGenerator;
use crate::plan::Plan;
use crate::prompts::ReviewPromptBuilder;
use crate::sandbox::Executor;

/// Display text of [`Feedback::Approved`].
pub const APPROVED: &str = "Approved";

/// Verdict handed from the verifier to the next generation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Feedback {
    /// Every file ran cleanly.
    Approved,
    /// At least one file failed; carries the reviewer's fix instruction.
    NeedsFix(String),
    /// Files failed and the reviewer could not be consulted.
    Fatal(String),
}

impl Feedback {
    /// Returns true for [`Feedback::Approved`].
    pub fn is_approved(&self) -> bool {
        matches!(self, Feedback::Approved)
    }

    /// Returns the feedback text passed to the coder.
    pub fn text(&self) -> &str {
        match self {
            Feedback::Approved => APPROVED,
            Feedback::NeedsFix(text) | Feedback::Fatal(text) => text,
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Aggregate outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Approval or the instruction for the next fix pass.
    pub feedback: Feedback,
    /// Per-file result lines, joined with newlines.
    pub summary: String,
    /// True if any file exited non-zero.
    pub any_failed: bool,
    /// Paths that failed, in plan order.
    pub failed: Vec<String>,
}

/// Runs each planned file through `executor` in plan order.
///
/// When anything fails, `reviewer` is asked once for a fix instruction over
/// all result lines. A reviewer failure yields [`Feedback::Fatal`], never
/// approval.
pub async fn verify(
    plan: &Plan,
    executor: &dyn Executor,
    reviewer: &dyn TextGenerator,
    timeout: Duration,
) -> VerificationResult {
    let mut lines = Vec::with_capacity(plan.files.len());
    let mut failed = Vec::new();

    for file in &plan.files {
        let result = executor.run(&file.path, timeout).await;
        if result.passed() {
            tracing::info!(path = %file.path, "file passed execution");
            lines.push(format!("{} PASSED execution.", file.path));
        } else {
            tracing::info!(path = %file.path, exit_code = result.exit_code, "file failed execution");
            lines.push(format!("{} FAILED:\n{}", file.path, result.stderr));
            failed.push(file.path.clone());
        }
    }

    let summary = lines.join("\n");
    if failed.is_empty() {
        return VerificationResult {
            feedback: Feedback::Approved,
            summary,
            any_failed: false,
            failed,
        };
    }

    let prompt = ReviewPromptBuilder::new(summary.as_str()).build();
    debug::debug_generation(reviewer.name(), "reviewer", &prompt);

    let feedback = match reviewer.generate(&prompt).await {
        Ok(instruction) => Feedback::NeedsFix(instruction),
        Err(e) => {
            tracing::error!(error = %e, "failed to summarize execution feedback");
            Feedback::Fatal(format!("Feedback summarization failed: {}", e))
        }
    };

    VerificationResult {
        feedback,
        summary,
        any_failed: true,
        failed,
    }
}
