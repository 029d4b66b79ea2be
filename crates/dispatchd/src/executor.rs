//! Single-turn execution: prompt, worker invocation, classification.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dispatch_core::completion::{assess, Verdict};
use dispatch_core::prompt::{build_first_turn_prompt, build_follow_up_prompt};
use dispatch_core::shell::quote;
use dispatch_core::{TaskRequest, TurnRecord};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::runner::{CommandSpec, ProcessRunner, RunnerError};

/// Exit code reported when the worker produced none (killed or signalled).
pub const UNSET_EXIT_CODE: i32 = -1;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("worker invocation failed: {0}")]
    Runner(#[from] RunnerError),
}

/// Everything one turn produced. The record goes into the turn history;
/// exit code and stderr only feed the loop's decision and error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub record: TurnRecord,
    pub exit_code: i32,
    pub stderr: String,
    pub verdict: Verdict,
    pub timed_out: bool,
}

/// Runs individual turns against the worker CLI.
#[derive(Clone)]
pub struct TurnExecutor {
    runner: Arc<dyn ProcessRunner>,
    worker_bin: PathBuf,
}

impl std::fmt::Debug for TurnExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnExecutor")
            .field("worker_bin", &self.worker_bin)
            .finish_non_exhaustive()
    }
}

impl TurnExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, worker_bin: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            worker_bin: worker_bin.into(),
        }
    }

    /// Prompt for `turn`: full context on turn 1, abbreviated afterwards.
    pub fn prompt_for(request: &TaskRequest, turn: u32, prior_output: Option<&str>) -> String {
        match prior_output {
            Some(previous) if turn > 1 => build_follow_up_prompt(
                request,
                turn,
                previous,
                turn == request.max_iterations,
            ),
            _ => build_first_turn_prompt(request, request.is_multi_turn()),
        }
    }

    /// Shell command line invoking the worker for one prompt.
    pub fn build_command(&self, request: &TaskRequest, prompt: &str) -> String {
        let mut command = format!(
            "{} agent --agent {}",
            quote(&self.worker_bin.to_string_lossy()),
            quote(&request.agent_id)
        );
        if let Some(model) = &request.model_override {
            command.push_str(&format!(" --model {}", quote(model)));
        }
        command.push_str(&format!(" --message {}", quote(prompt)));
        command
    }

    /// Execute one turn with the given deadline.
    ///
    /// A timed-out or signalled worker is a normal (failed) turn, not an
    /// error. Only a runner failure, such as a process that cannot be
    /// started, is.
    pub async fn run_turn(
        &self,
        request: &TaskRequest,
        turn: u32,
        timeout: Duration,
        prior_output: Option<&str>,
    ) -> Result<TurnOutcome, TurnError> {
        let prompt = Self::prompt_for(request, turn, prior_output);
        let spec = CommandSpec {
            command: self.build_command(request, &prompt),
            env: request
                .credentials
                .as_ref()
                .map(|c| c.env_vars())
                .unwrap_or_default(),
            timeout,
        };

        debug!(
            turn,
            prompt_chars = prompt.chars().count(),
            provider = request.credentials.as_ref().map(|c| c.provider.as_str()),
            model = request.model_override.as_deref(),
            "starting turn"
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let output = self.runner.run(&spec).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let exit_code = output.exit_code.unwrap_or(UNSET_EXIT_CODE);
        let mut stderr = output.stderr;
        if output.timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "worker timed out after {}s and was killed",
                timeout.as_secs()
            ));
        }

        let verdict = assess(&output.stdout, exit_code);

        info!(
            turn,
            exit_code,
            duration_ms,
            output_bytes = output.stdout.len(),
            verdict = verdict.as_str(),
            timed_out = output.timed_out,
            output_preview = %preview(&output.stdout),
            "turn finished"
        );

        Ok(TurnOutcome {
            record: TurnRecord {
                turn,
                output: output.stdout,
                duration_ms,
                completed: verdict.is_complete(),
                started_at,
            },
            exit_code,
            stderr,
            verdict,
            timed_out: output.timed_out,
        })
    }
}

/// Last three lines of output joined with ` | `, cut to 120 characters.
fn preview(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let joined = lines[lines.len().saturating_sub(3)..].join(" | ");
    truncate_chars(&joined, 120)
}

/// Truncate to `max_chars` characters, adding "..." if anything was cut.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
