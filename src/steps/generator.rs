//! Generator step: write one source file per planned entry.

use std::fmt;

use crate::debug;
use crate::llm::TextGenerator;
use crate::plan::Plan;
use crate::prompts::{CodePromptBuilder, NO_PRIOR_CONTENT};
use crate::sandbox::Workspace;

use super::verifier::Feedback;

/// Whether a pass creates files from scratch or repairs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// Prompt from path and description only.
    Fresh,
    /// Prompt with the current content, feedback and execution summary.
    Fix,
}

impl GenerationMode {
    /// Picks the mode for the given prior feedback.
    pub fn for_feedback(feedback: Option<&Feedback>) -> Self {
        match feedback {
            Some(feedback) if !feedback.is_approved() => GenerationMode::Fix,
            _ => GenerationMode::Fresh,
        }
    }

    /// Tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            GenerationMode::Fresh => "GENERATED",
            GenerationMode::Fix => "FIXED",
        }
    }
}

/// Ordered per-file log of a generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationLog {
    /// One line per planned file, in plan order.
    pub lines: Vec<String>,
    /// Number of files that could not be generated or written.
    pub failures: usize,
}

impl fmt::Display for GenerationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

/// Generates every file in `plan` and stores it in `workspace`.
///
/// Files are processed sequentially. A failure on one file is logged and the
/// remaining files are still attempted.
pub async fn generate(
    plan: &Plan,
    workspace: &Workspace,
    feedback: Option<&Feedback>,
    summary: &str,
    coder: &dyn TextGenerator,
) -> GenerationLog {
    let mode = GenerationMode::for_feedback(feedback);
    let mut log = GenerationLog::default();

    for file in &plan.files {
        let prompt = match (mode, feedback) {
            (GenerationMode::Fix, Some(feedback)) => {
                let current = workspace.read(&file.path).unwrap_or_else(|e| {
                    tracing::debug!(path = %file.path, error = %e, "no prior content for fix");
                    NO_PRIOR_CONTENT.to_string()
                });
                CodePromptBuilder::new(file)
                    .with_fix(&current, feedback.text(), summary)
                    .build()
            }
            _ => CodePromptBuilder::new(file).build(),
        };
        debug::debug_generation(coder.name(), "coder", &prompt);

        let outcome = match coder.generate(&prompt).await {
            Ok(text) => workspace.write(&file.path, &strip_code_fences(&text)),
            Err(e) => Err(e),
        };

        let line = match outcome {
            Ok(bytes) => {
                tracing::info!(path = %file.path, mode = mode.tag(), bytes, "file written");
                format!("{} {}: wrote {} bytes", mode.tag(), file.path, bytes)
            }
            Err(e) => {
                tracing::warn!(path = %file.path, mode = mode.tag(), error = %e, "file generation failed");
                log.failures += 1;
                format!("{} {}: FAILED: {}", mode.tag(), file.path, e)
            }
        };
        log.lines.push(line);
    }

    log
}

/// Strips a surrounding markdown code fence and trims whitespace.
///
/// Prose before the opening fence or after the closing one is dropped.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let mut lines = trimmed.lines();

    // Only a line that begins with a fence opens a block.
    if !lines.by_ref().any(is_fence_line) {
        return trimmed.to_string();
    }

    let body: Vec<&str> = lines.take_while(|line| !is_fence_line(line)).collect();
    body.join("\n").trim().to_string()
}

fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with("```")
}
