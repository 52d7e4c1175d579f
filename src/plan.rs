//! Structured plans produced by the planner step.

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::check_relative_path;

/// One file the plan asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    /// Path relative to the workspace root.
    #[serde(alias = "filename")]
    pub path: String,
    /// What the file should do.
    pub description: String,
    /// Libraries or modules the file relies on.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl FileSpec {
    /// Creates a file spec with no dependencies.
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Sets the dependencies.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Ordered list of files plus step-by-step instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    /// Files to generate, in generation and verification order.
    pub files: Vec<FileSpec>,
    /// Implementation steps, in order.
    #[serde(default, alias = "step_by_step_instructions")]
    pub instructions: Vec<String>,
}

impl Plan {
    /// Creates a plan from files with no instructions.
    pub fn new(files: Vec<FileSpec>) -> Self {
        Self {
            files,
            instructions: Vec::new(),
        }
    }

    /// Sets the instructions.
    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Renders the plan as a markdown document.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("## Files ({})\n\n", self.files.len()));
        for file in &self.files {
            md.push_str(&format!("- `{}`: {}", file.path, file.description));
            if !file.dependencies.is_empty() {
                let deps: Vec<&str> = file.dependencies.iter().map(String::as_str).collect();
                md.push_str(&format!(" *(depends on {})*", deps.join(", ")));
            }
            md.push('\n');
        }

        if !self.instructions.is_empty() {
            md.push_str("\n## Instructions\n\n");
            for (i, step) in self.instructions.iter().enumerate() {
                md.push_str(&format!("{}. {}\n", i + 1, step));
            }
        }

        md
    }
}

/// Parses and validates a plan from generated text.
///
/// The JSON may be wrapped in a ```json fence or surrounded by prose. Any
/// shape mismatch is a [`Error::Plan`]; nothing is coerced.
pub fn parse_plan(output: &str) -> Result<Plan> {
    let json_str =
        extract_json(output).ok_or_else(|| Error::Plan("no JSON object found in output".to_string()))?;

    let plan: Plan = serde_json::from_str(json_str)
        .map_err(|e| Error::Plan(format!("failed to parse plan JSON: {}", e)))?;

    validate_plan(&plan)?;
    Ok(plan)
}

/// Extracts JSON from output that may contain markdown code blocks.
pub(crate) fn extract_json(output: &str) -> Option<&str> {
    if let Some(start) = output.find("```json") {
        let json_start = start + 7;
        if let Some(end) = output[json_start..].find("```") {
            return Some(output[json_start..json_start + end].trim());
        }
    }

    let json_start = output.find('{')?;
    let json_end = output.rfind('}')?;
    if json_start < json_end {
        Some(&output[json_start..=json_end])
    } else {
        None
    }
}

/// Validates a parsed plan.
///
/// Rejects empty plans, blank descriptions, duplicate paths, and any path
/// that is not a plain relative path.
pub fn validate_plan(plan: &Plan) -> Result<()> {
    if plan.files.is_empty() {
        return Err(Error::Plan("plan lists no files".to_string()));
    }

    let mut seen = HashSet::new();
    for file in &plan.files {
        check_relative_path(&file.path)
            .map_err(|e| Error::Plan(format!("invalid file path: {}", e)))?;

        if file.description.trim().is_empty() {
            return Err(Error::Plan(format!("file {} has no description", file.path)));
        }

        if !seen.insert(normalized_path(&file.path)) {
            return Err(Error::Plan(format!("file {} is listed twice", file.path)));
        }
    }

    Ok(())
}

/// Reduces a checked relative path to its normal components, so `./a.py`
/// and `a.py` compare equal.
fn normalized_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    Path::new(&unified)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
