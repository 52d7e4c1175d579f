//! Run configuration and validation.
//!
//! Configuration is read from a TOML or YAML file, then environment
//! overrides are applied:
//! - `LISA_WORKSPACE` - workspace root directory
//! - `LISA_EXECUTION_TIMEOUT` - execution timeout in seconds

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::InterpreterMap;

/// Fixed ceiling on fix attempts per run.
pub const MAX_RETRIES: u32 = 3;

/// Known text-generation backends.
pub const KNOWN_BACKENDS: &[&str] = &["claude", "gemini", "ollama"];

/// Text-generation backend for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend identifier (`claude`, `gemini` or `ollama`).
    pub backend: String,
    /// Model to request, if the backend takes one.
    #[serde(default)]
    pub model: Option<String>,
}

impl BackendConfig {
    /// Creates an ollama backend for `model`.
    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            backend: "ollama".to_string(),
            model: Some(model.into()),
        }
    }
}

/// Per-role backends. Each step may use a different model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Backend that turns the request into a plan.
    #[serde(default = "default_planner")]
    pub planner: BackendConfig,
    /// Backend that writes and fixes source files.
    #[serde(default = "default_coder")]
    pub coder: BackendConfig,
    /// Backend that summarizes execution failures.
    #[serde(default = "default_reviewer")]
    pub reviewer: BackendConfig,
}

fn default_planner() -> BackendConfig {
    BackendConfig::ollama("llama3.1:8b")
}

fn default_coder() -> BackendConfig {
    BackendConfig::ollama("qwen2.5-coder:7b")
}

fn default_reviewer() -> BackendConfig {
    BackendConfig::ollama("mistral-nemo")
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            planner: default_planner(),
            coder: default_coder(),
            reviewer: default_reviewer(),
        }
    }
}

impl GeneratorConfig {
    /// Points every role at the same backend, keeping each role's model
    /// only when the backend is unchanged.
    pub fn with_backend(mut self, backend: &str) -> Self {
        for role in [&mut self.planner, &mut self.coder, &mut self.reviewer] {
            if role.backend != backend {
                role.backend = backend.to_string();
                role.model = None;
            }
        }
        self
    }
}

/// Configuration for a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Wall-clock limit for each file execution, in seconds.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
    /// Directory under which all generated files live.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Interpreter for files whose extension has no entry in `interpreters`.
    #[serde(default = "default_interpreter")]
    pub default_interpreter: String,
    /// Extension to interpreter command line.
    #[serde(default = "default_interpreters")]
    pub interpreters: BTreeMap<String, String>,
    /// Bytes kept from each of stdout and stderr.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Text-generation backends per role.
    #[serde(default)]
    pub generators: GeneratorConfig,
}

fn default_execution_timeout() -> u64 {
    30
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_interpreters() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("py".to_string(), "python3".to_string()),
        ("sh".to_string(), "sh".to_string()),
        ("js".to_string(), "node".to_string()),
    ])
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_execution_timeout(),
            workspace_root: default_workspace_root(),
            default_interpreter: default_interpreter(),
            interpreters: default_interpreters(),
            max_output_bytes: default_max_output_bytes(),
            generators: GeneratorConfig::default(),
        }
    }
}

impl RunConfig {
    /// Loads configuration from a `.toml`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid YAML in {}: {}", path.display(), e))),
            Some("toml") => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid TOML in {}: {}", path.display(), e))),
            _ => Err(Error::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// Applies `LISA_WORKSPACE` and `LISA_EXECUTION_TIMEOUT` from the environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(
            std::env::var("LISA_WORKSPACE").ok(),
            std::env::var("LISA_EXECUTION_TIMEOUT").ok(),
        )
    }

    fn with_overrides(mut self, workspace: Option<String>, timeout: Option<String>) -> Result<Self> {
        if let Some(root) = workspace.filter(|v| !v.trim().is_empty()) {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(secs) = timeout {
            self.execution_timeout_secs = secs.trim().parse().map_err(|_| {
                Error::Config(format!("LISA_EXECUTION_TIMEOUT must be whole seconds, got '{}'", secs))
            })?;
        }
        Ok(self)
    }

    /// The retry ceiling. Always [`MAX_RETRIES`].
    pub fn max_retries(&self) -> u32 {
        MAX_RETRIES
    }

    /// Returns the execution timeout as a Duration.
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Builds the interpreter map for the execution sandbox.
    pub fn interpreter_map(&self) -> InterpreterMap {
        self.interpreters
            .iter()
            .fold(InterpreterMap::new(&self.default_interpreter), |m, (ext, cmd)| {
                m.with(ext.clone(), cmd.clone())
            })
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for BackendConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !KNOWN_BACKENDS.contains(&self.backend.as_str()) {
            result.add_error(format!("unknown backend '{}'", self.backend));
        }

        if self.backend == "ollama" && self.model.is_none() {
            result.add_error("ollama backend requires a model");
        }

        result
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.execution_timeout_secs == 0 {
            result.add_error("execution_timeout_secs must be at least 1");
        }

        if self.execution_timeout_secs > 600 {
            result.add_warning("execution_timeout_secs over 10 minutes lets runaway programs stall a run");
        }

        if self.default_interpreter.trim().is_empty() {
            result.add_error("default_interpreter cannot be empty");
        }

        for (ext, cmd) in &self.interpreters {
            if cmd.trim().is_empty() {
                result.add_error(format!("interpreter for '.{}' cannot be empty", ext));
            }
        }

        if self.max_output_bytes == 0 {
            result.add_warning("max_output_bytes = 0 discards all program output");
        }

        if self.workspace_root.is_relative() {
            result.add_warning(format!(
                "workspace_root '{}' is relative to the current directory",
                self.workspace_root.display()
            ));
        }

        result.merge(self.generators.planner.validate());
        result.merge(self.generators.coder.validate());
        result.merge(self.generators.reviewer.validate());

        result
    }
}
