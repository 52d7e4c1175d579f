//! CLI-backed text generation (claude, gemini, ollama).

use std::fmt;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::TextGenerator;

/// Supported generation CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Claude Code CLI in print mode.
    Claude,
    /// Gemini CLI in non-interactive mode.
    Gemini,
    /// Local ollama models.
    Ollama,
}

impl Backend {
    /// Default binary name for this backend.
    pub fn default_cli(&self) -> &'static str {
        match self {
            Backend::Claude => "claude",
            Backend::Gemini => "gemini",
            Backend::Ollama => "ollama",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_cli())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(Backend::Claude),
            "gemini" => Ok(Backend::Gemini),
            "ollama" => Ok(Backend::Ollama),
            other => Err(Error::Config(format!("unknown generator backend: {}", other))),
        }
    }
}

/// Generator that runs a model CLI once per prompt and returns its stdout.
#[derive(Debug, Clone)]
pub struct CliGenerator {
    backend: Backend,
    cli_path: String,
    model: Option<String>,
}

impl CliGenerator {
    /// Creates a generator for `backend` using its default binary.
    ///
    /// Ollama has no default model, so `model` is required there.
    pub fn new(backend: Backend, model: Option<String>) -> Result<Self> {
        if backend == Backend::Ollama && model.is_none() {
            return Err(Error::Config("the ollama backend requires a model".to_string()));
        }
        Ok(Self {
            backend,
            cli_path: backend.default_cli().to_string(),
            model,
        })
    }

    /// Overrides the CLI binary path.
    pub fn with_cli_path(mut self, cli_path: impl Into<String>) -> Self {
        self.cli_path = cli_path.into();
        self
    }

    /// Returns the backend.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Builds the command arguments for one prompt.
    fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = Vec::new();

        match self.backend {
            Backend::Claude => {
                args.push("--print".to_string());
                if let Some(model) = &self.model {
                    args.push("--model".to_string());
                    args.push(model.clone());
                }
                args.push("-p".to_string());
                args.push(prompt.to_string());
            }
            Backend::Gemini => {
                if let Some(model) = &self.model {
                    args.push("--model".to_string());
                    args.push(model.clone());
                }
                args.push("--prompt".to_string());
                args.push(prompt.to_string());
            }
            Backend::Ollama => {
                args.push("run".to_string());
                if let Some(model) = &self.model {
                    args.push(model.clone());
                }
                args.push(prompt.to_string());
            }
        }

        args
    }
}

#[async_trait]
impl TextGenerator for CliGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let args = self.build_args(prompt);

        tracing::debug!(
            cli = %self.cli_path,
            model = ?self.model,
            prompt_len = prompt.len(),
            "invoking generation CLI"
        );

        let output = Command::new(&self.cli_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Generation(format!("failed to spawn {}: {}", self.cli_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(cli = %self.cli_path, status = ?output.status.code(), "generation CLI failed");
            return Err(Error::Generation(format!(
                "{} exited with {:?}: {}",
                self.cli_path,
                output.status.code(),
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.trim().is_empty() {
            return Err(Error::Generation(format!("{} returned no output", self.cli_path)));
        }

        Ok(text)
    }

    fn name(&self) -> &str {
        self.backend.default_cli()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Claude".parse::<Backend>().unwrap(), Backend::Claude);
        assert_eq!(" gemini ".parse::<Backend>().unwrap(), Backend::Gemini);
        assert!("gpt".parse::<Backend>().is_err());
    }

    #[test]
    fn claude_builds_print_args_with_model() {
        let generator = CliGenerator::new(Backend::Claude, Some("sonnet".to_string())).unwrap();

        let args = generator.build_args("write code");

        assert_eq!(args, vec!["--print", "--model", "sonnet", "-p", "write code"]);
    }

    #[test]
    fn gemini_builds_prompt_args() {
        let generator = CliGenerator::new(Backend::Gemini, None).unwrap();

        assert_eq!(generator.build_args("hi"), vec!["--prompt", "hi"]);
    }

    #[test]
    fn ollama_runs_model() {
        let generator = CliGenerator::new(Backend::Ollama, Some("mistral-nemo".to_string())).unwrap();

        assert_eq!(generator.build_args("hi"), vec!["run", "mistral-nemo", "hi"]);
        assert_eq!(generator.name(), "ollama");
    }

    #[test]
    fn ollama_requires_model() {
        assert!(CliGenerator::new(Backend::Ollama, None).is_err());
    }

    #[tokio::test]
    async fn missing_cli_is_a_generation_error() {
        let generator = CliGenerator::new(Backend::Claude, None)
            .unwrap()
            .with_cli_path("definitely-not-a-cli-xyz");

        let err = generator.generate("hi").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_generation_error() {
        let generator = CliGenerator::new(Backend::Gemini, None)
            .unwrap()
            .with_cli_path("false");

        let err = generator.generate("hi").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_is_returned() {
        // `echo` prints its arguments, so the prompt comes back verbatim.
        let generator = CliGenerator::new(Backend::Gemini, None)
            .unwrap()
            .with_cli_path("echo");

        let text = generator.generate("hello").await.unwrap();
        assert_eq!(text.trim(), "--prompt hello");
    }
}
