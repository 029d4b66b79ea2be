//! Core types shared by the controller and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a single controller invocation.
/// Uses `UUIDv7` so log lines sort by start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(pub String);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a task runs as a single legacy turn or as a bounded multi-turn loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SingleShot,
    MultiTurn,
}

impl ExecutionMode {
    /// Mode implied by a (clamped) iteration count.
    pub fn for_iterations(max_iterations: u32) -> Self {
        if max_iterations > 1 {
            Self::MultiTurn
        } else {
            Self::SingleShot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleShot => "single_shot",
            Self::MultiTurn => "multi_turn",
        }
    }
}

/// Terminal state of the execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// A turn was classified as complete.
    Success,
    /// Iterations or time budget ran out before a completion verdict.
    Exhausted,
    /// The final turn exited non-zero, or the task never got a turn.
    Failed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Exhausted => "EXHAUSTED",
            Self::Failed => "FAILED",
        }
    }
}

/// One executed turn. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// 1-based turn index.
    pub turn: u32,
    /// Raw stdout of the worker for this turn.
    pub output: String,
    pub duration_ms: u64,
    pub completed: bool,
    pub started_at: DateTime<Utc>,
}

/// Final result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Stdout of the most recent turn.
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub turns_used: u32,
    /// Only populated for multi-turn requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_outputs: Option<Vec<TurnRecord>>,
}

impl ExecutionResult {
    /// Result for a task that failed before any turn ran.
    pub fn failed_before_start(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
            turns_used: 0,
            turn_outputs: None,
        }
    }
}
