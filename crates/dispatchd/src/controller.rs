//! Multi-turn execution loop.
//!
//! ```text
//! TurnPending(1) -> TurnPending(n+1) -> ... -> Stopped{Success|Exhausted|Failed}
//! ```
//!
//! Turns run strictly one after another; each follow-up prompt carries the
//! previous turn's stdout. The loop never starts a turn the budget cannot
//! cover and never runs more than `max_iterations` turns.

use std::sync::Arc;

use dispatch_core::{
    BudgetPolicy, ExecutionMode, ExecutionResult, InvocationId, StopReason, TaskRequest,
    TurnRecord,
};
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::executor::{TurnExecutor, TurnOutcome};
use crate::readiness::Readiness;

/// Error text is cut to this many characters.
pub const MAX_ERROR_CHARS: usize = 500;

pub const NO_OUTPUT_ERROR: &str = "no output produced";

/// What the loop does after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Continue,
    Stop(StopReason),
}

/// Decide the next state after turn `turn` of `max_iterations`.
///
/// A non-zero exit on the final turn fails the task. Otherwise a completion
/// verdict stops with success, and running out of turns stops exhausted.
pub fn next_transition(
    turn: u32,
    max_iterations: u32,
    exit_code: i32,
    completed: bool,
) -> Transition {
    let is_last = turn >= max_iterations;
    if exit_code != 0 && is_last {
        Transition::Stop(StopReason::Failed)
    } else if completed {
        Transition::Stop(StopReason::Success)
    } else if is_last {
        Transition::Stop(StopReason::Exhausted)
    } else {
        Transition::Continue
    }
}

/// Drives a task through its turns.
#[derive(Clone)]
pub struct Controller {
    executor: TurnExecutor,
    readiness: Arc<dyn Readiness>,
    budget: BudgetPolicy,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("executor", &self.executor)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(
        executor: TurnExecutor,
        readiness: Arc<dyn Readiness>,
        budget: BudgetPolicy,
    ) -> Self {
        Self {
            executor,
            readiness,
            budget,
        }
    }

    /// Run a task to a terminal state. Always yields a well-formed result.
    pub async fn execute(&self, request: &TaskRequest) -> ExecutionResult {
        let invocation_id = InvocationId::new();
        let span = info_span!(
            "task",
            invocation_id = %invocation_id,
            task_id = %request.task_id,
            agent_id = %request.agent_id,
        );
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(&self, request: &TaskRequest) -> ExecutionResult {
        let started = Instant::now();
        let max_iterations = request.max_iterations;
        let mode = ExecutionMode::for_iterations(max_iterations);

        info!(
            max_iterations,
            mode = mode.as_str(),
            model = request.model_override.as_deref(),
            "task received"
        );

        if let Err(err) = self.readiness.ensure_ready().await {
            warn!(error = %err, "worker gateway not ready");
            return ExecutionResult::failed_before_start(
                truncate_error(&format!("worker gateway not ready: {err}")),
                elapsed_ms(started),
            );
        }

        let mut records: Vec<TurnRecord> = Vec::new();
        let mut last: Option<TurnOutcome> = None;
        let mut stop = StopReason::Exhausted;

        for turn in 1..=max_iterations {
            let elapsed = started.elapsed();
            let Some(timeout) = self.budget.next_timeout(mode, elapsed) else {
                info!(
                    turn,
                    elapsed_ms = elapsed.as_millis() as u64,
                    turns_used = records.len(),
                    "time budget exhausted; not starting turn"
                );
                break;
            };

            info!(turn, timeout_ms = timeout.as_millis() as u64, "starting turn");

            let prior_output = last.as_ref().map(|o| o.record.output.as_str());
            let outcome = match self
                .executor
                .run_turn(request, turn, timeout, prior_output)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(turn, error = %err, "turn could not run; failing task");
                    let mut result = assemble(
                        StopReason::Failed,
                        &records,
                        last.as_ref(),
                        max_iterations,
                        elapsed_ms(started),
                    );
                    result.error = Some(truncate_error(&err.to_string()));
                    return result;
                }
            };

            records.push(outcome.record.clone());
            let transition = next_transition(
                turn,
                max_iterations,
                outcome.exit_code,
                outcome.record.completed,
            );
            last = Some(outcome);

            match transition {
                Transition::Continue => {}
                Transition::Stop(reason) => {
                    stop = reason;
                    break;
                }
            }
        }

        let result = assemble(
            stop,
            &records,
            last.as_ref(),
            max_iterations,
            elapsed_ms(started),
        );
        info!(
            stop_reason = stop.as_str(),
            success = result.success,
            turns_used = result.turns_used,
            duration_ms = result.duration_ms,
            "task finished"
        );
        result
    }
}

/// Build the caller-facing result from the terminal state.
fn assemble(
    stop: StopReason,
    records: &[TurnRecord],
    last: Option<&TurnOutcome>,
    max_iterations: u32,
    duration_ms: u64,
) -> ExecutionResult {
    let turns_used = records.len() as u32;
    let success = match stop {
        StopReason::Success => true,
        StopReason::Failed => false,
        StopReason::Exhausted => last.is_some_and(|o| o.exit_code == 0),
    };

    let error = (!success).then(|| {
        let stderr = last.map(|o| o.stderr.as_str()).unwrap_or_default();
        if !stderr.trim().is_empty() {
            truncate_error(stderr)
        } else if stop == StopReason::Exhausted && turns_used > 0 {
            format!("task not completed after {turns_used} turns")
        } else {
            NO_OUTPUT_ERROR.to_string()
        }
    });

    ExecutionResult {
        success,
        output: records.last().map(|r| r.output.clone()).unwrap_or_default(),
        error,
        duration_ms,
        turns_used,
        turn_outputs: (max_iterations > 1).then(|| records.to_vec()),
    }
}

fn truncate_error(text: &str) -> String {
    text.chars().take(MAX_ERROR_CHARS).collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
