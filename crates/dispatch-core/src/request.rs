//! Task request intake.
//!
//! `RawTaskRequest` is the wire shape; `TaskRequest` is the validated,
//! immutable value the controller consumes. Bad credentials and bad
//! iteration counts degrade to defaults rather than rejecting the request.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::credentials::ProviderCredentials;

pub const DEFAULT_MAX_ITERATIONS: u32 = 1;
pub const MAX_ITERATIONS_CAP: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field must not be empty: {0}")]
    EmptyField(&'static str),
    #[error("invalid request body: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Request body as received from the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTaskRequest {
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub task_subject: Option<String>,
    pub task_description: Option<String>,
    pub soul_content: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub team_context: Option<String>,
    #[serde(default)]
    pub methodology_context: Option<String>,
    #[serde(default)]
    pub agent_memory: Option<String>,
    #[serde(default)]
    pub project_memory: Option<String>,
    #[serde(default)]
    pub project_communications: Option<String>,
    #[serde(default)]
    pub project_document_index: Option<String>,
    #[serde(default)]
    pub api_credentials: Option<Value>,
    #[serde(default)]
    pub max_iterations: Option<Value>,
}

/// Optional free-text context blocks, in prompt order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentContext {
    pub soul: String,
    pub team: Option<String>,
    pub agent_memory: Option<String>,
    pub project_memory: Option<String>,
    pub project_communications: Option<String>,
    pub document_index: Option<String>,
    pub methodology: Option<String>,
}

/// A validated task. Built once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub agent_id: String,
    pub task_id: String,
    pub subject: String,
    pub description: String,
    pub context: AgentContext,
    pub model_override: Option<String>,
    pub credentials: Option<ProviderCredentials>,
    pub max_iterations: u32,
}

impl TaskRequest {
    /// Parse and validate a JSON request body.
    pub fn from_json(body: &str) -> Result<Self> {
        let raw: RawTaskRequest =
            serde_json::from_str(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    pub fn is_multi_turn(&self) -> bool {
        self.max_iterations > 1
    }
}

impl TryFrom<RawTaskRequest> for TaskRequest {
    type Error = ValidationError;

    fn try_from(raw: RawTaskRequest) -> Result<Self> {
        let agent_id = required(raw.agent_id, "agent_id")?;
        let task_id = required(raw.task_id, "task_id")?;
        let subject = required(raw.task_subject, "task_subject")?;
        let description = raw
            .task_description
            .ok_or(ValidationError::MissingField("task_description"))?;
        let soul = required(raw.soul_content, "soul_content")?;

        Ok(Self {
            agent_id,
            task_id,
            subject,
            description,
            context: AgentContext {
                soul,
                team: optional(raw.team_context),
                agent_memory: optional(raw.agent_memory),
                project_memory: optional(raw.project_memory),
                project_communications: optional(raw.project_communications),
                document_index: optional(raw.project_document_index),
                methodology: optional(raw.methodology_context),
            },
            model_override: optional(raw.model_override),
            credentials: raw
                .api_credentials
                .as_ref()
                .and_then(ProviderCredentials::from_value),
            max_iterations: clamp_iterations(raw.max_iterations.as_ref()),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
    match value {
        None => Err(ValidationError::MissingField(field)),
        Some(v) if v.trim().is_empty() => Err(ValidationError::EmptyField(field)),
        Some(v) => Ok(v),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Normalize `max_iterations`: anything that is not an integer becomes the
/// default, integers are clamped into `[1, MAX_ITERATIONS_CAP]`.
///
/// Integer-valued floats (`3.0`, `1e3`) and integers beyond `i64` count as
/// integers.
pub fn clamp_iterations(value: Option<&Value>) -> u32 {
    let Some(value) = value else {
        return DEFAULT_MAX_ITERATIONS;
    };
    let cap = i64::from(MAX_ITERATIONS_CAP);
    let n = if let Some(n) = value.as_i64() {
        n
    } else if value.as_u64().is_some() {
        cap
    } else {
        match value.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 => f.clamp(1.0, cap as f64) as i64,
            _ => return DEFAULT_MAX_ITERATIONS,
        }
    };
    n.clamp(1, cap) as u32
}
