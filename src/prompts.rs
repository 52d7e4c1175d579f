//! Prompt builders for the planner, coder and reviewer roles.

use crate::plan::FileSpec;

/// Placeholder used in fix prompts when the previous file cannot be read.
pub const NO_PRIOR_CONTENT: &str = "(no prior content)";

/// Builder for planner prompts.
pub struct PlanPromptBuilder {
    request: String,
}

impl PlanPromptBuilder {
    /// Creates a new plan prompt builder.
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
        }
    }

    /// Builds the prompt.
    pub fn build(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Plan Generation Request\n\n");
        prompt.push_str("You are a Software Architect. Break the request below into the files ");
        prompt.push_str("needed to implement it.\n\n");

        prompt.push_str("### Request\n\n");
        prompt.push_str(&self.request);
        prompt.push_str("\n\n");

        prompt.push_str("### Rules\n\n");
        prompt.push_str("- Every path must be relative to the project root.\n");
        prompt.push_str("- Never use absolute paths, drive letters or `..` segments.\n");
        prompt.push_str("- List each file once, in the order it should be written.\n\n");

        prompt.push_str("### Output Format\n\n");
        prompt.push_str("Respond with a JSON object and nothing else:\n");
        prompt.push_str("```json\n");
        prompt.push_str("{\n");
        prompt.push_str("  \"files\": [\n");
        prompt.push_str("    {\n");
        prompt.push_str("      \"path\": \"relative/path.py\",\n");
        prompt.push_str("      \"description\": \"what this file does\",\n");
        prompt.push_str("      \"dependencies\": [\"module or library\"]\n");
        prompt.push_str("    }\n");
        prompt.push_str("  ],\n");
        prompt.push_str("  \"instructions\": [\"step 1\", \"step 2\"]\n");
        prompt.push_str("}\n");
        prompt.push_str("```\n");

        prompt
    }
}

/// Builder for coder prompts, in fresh or fix mode.
pub struct CodePromptBuilder<'a> {
    file: &'a FileSpec,
    fix: Option<FixContext<'a>>,
}

struct FixContext<'a> {
    current_code: &'a str,
    feedback: &'a str,
    summary: &'a str,
}

impl<'a> CodePromptBuilder<'a> {
    /// Creates a fresh-mode builder for `file`.
    pub fn new(file: &'a FileSpec) -> Self {
        Self { file, fix: None }
    }

    /// Switches to fix mode with the previous content and failure feedback.
    pub fn with_fix(mut self, current_code: &'a str, feedback: &'a str, summary: &'a str) -> Self {
        self.fix = Some(FixContext {
            current_code,
            feedback,
            summary,
        });
        self
    }

    /// Builds the prompt.
    pub fn build(&self) -> String {
        let mut prompt = String::new();

        match &self.fix {
            None => {
                prompt.push_str("## Code Generation Request\n\n");
                prompt.push_str("You are an expert Coder. Write the complete file described below.\n\n");
            }
            Some(_) => {
                prompt.push_str("## Code Fix Request\n\n");
                prompt.push_str("You are an expert Coder. The file below failed verification. ");
                prompt.push_str("Rewrite it so that it runs successfully.\n\n");
            }
        }

        prompt.push_str(&format!("### File: `{}`\n\n", self.file.path));
        prompt.push_str(&self.file.description);
        prompt.push_str("\n\n");

        if !self.file.dependencies.is_empty() {
            let deps: Vec<&str> = self.file.dependencies.iter().map(String::as_str).collect();
            prompt.push_str(&format!("Dependencies: {}\n\n", deps.join(", ")));
        }

        if let Some(fix) = &self.fix {
            prompt.push_str("### Current Code\n\n");
            prompt.push_str("```\n");
            prompt.push_str(fix.current_code);
            prompt.push_str("\n```\n\n");

            prompt.push_str("### Reviewer Feedback\n\n");
            prompt.push_str(fix.feedback);
            prompt.push_str("\n\n");

            if !fix.summary.is_empty() {
                prompt.push_str("### Execution Results\n\n");
                prompt.push_str(fix.summary);
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str("### Output Format\n\n");
        prompt.push_str("Return only the file content. No explanations.\n");

        prompt
    }
}

/// Builder for reviewer prompts summarizing execution failures.
pub struct ReviewPromptBuilder {
    results: String,
}

impl ReviewPromptBuilder {
    /// Creates a review prompt over the joined per-file result lines.
    pub fn new(results: impl Into<String>) -> Self {
        Self {
            results: results.into(),
        }
    }

    /// Builds the prompt.
    pub fn build(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Execution Review Request\n\n");
        prompt.push_str("You are a QA Engineer. The generated files were executed and some failed.\n\n");

        prompt.push_str("### Execution Results\n\n");
        prompt.push_str(&self.results);
        prompt.push_str("\n\n");

        prompt.push_str("### Response Format\n\n");
        prompt.push_str("Explain what went wrong and give a concise instruction for the Coder ");
        prompt.push_str("to fix it.\n");

        prompt
    }
}
