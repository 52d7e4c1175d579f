//! Structured records emitted by a run.
//!
//! A run emits zero or more [`StepEvent`]s followed by exactly one
//! [`TerminalEvent`].

use serde::{Deserialize, Serialize};

/// The step a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Planning,
    Generating,
    Verifying,
}

/// Whether the step itself ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Error,
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Complete,
    Error,
}

/// One step completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub step: StepKind,
    pub status: StepStatus,
    /// Step-specific data.
    pub payload: serde_json::Value,
}

/// The final record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub status: TerminalStatus,
    pub message: String,
}

/// Any record on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunEvent {
    Step(StepEvent),
    Terminal(TerminalEvent),
}

impl RunEvent {
    /// Creates a step record.
    pub fn step(step: StepKind, status: StepStatus, payload: serde_json::Value) -> Self {
        RunEvent::Step(StepEvent {
            step,
            status,
            payload,
        })
    }

    /// Creates a successful terminal record.
    pub fn complete(message: impl Into<String>) -> Self {
        RunEvent::Terminal(TerminalEvent {
            status: TerminalStatus::Complete,
            message: message.into(),
        })
    }

    /// Creates a failed terminal record.
    pub fn error(message: impl Into<String>) -> Self {
        RunEvent::Terminal(TerminalEvent {
            status: TerminalStatus::Error,
            message: message.into(),
        })
    }

    /// Returns true for the final record of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Terminal(_))
    }

    /// Serializes the record as a single JSON line.
    pub fn to_json_line(&self) -> String {
        // A tree of strings and JSON values always serializes.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","message":"unserializable event: {}"}}"#, e)
        })
    }
}
