//! Completion classification for worker output.
//!
//! Signals are checked in a fixed priority order and the first match wins:
//! 1. `[DONE]` anywhere in the output: complete, whatever the exit code.
//! 2. Non-zero exit code: incomplete.
//! 3. `[NEEDS_MORE_WORK]` anywhere in the output: incomplete.
//! 4. More than 100 characters and no failure indicator (case-insensitive):
//!    complete.
//! 5. Otherwise incomplete.
//!
//! Rule 4 is a lexical heuristic. Long output that merely discusses an
//! "error" is rejected, and short but finished output is not accepted.

use serde::{Deserialize, Serialize};

/// Marker a worker emits when the task is finished.
pub const DONE_MARKER: &str = "[DONE]";

/// Marker a worker emits to request another pass.
pub const NEEDS_MORE_WORK_MARKER: &str = "[NEEDS_MORE_WORK]";

/// Output must be strictly longer than this (in characters) for rule 4.
pub const HEURISTIC_MIN_CHARS: usize = 100;

/// Substrings that veto heuristic acceptance. Matched against lowercased output.
pub const FAILURE_INDICATORS: &[&str] = &[
    "error:",
    "failed",
    "todo:",
    "fixme",
    "not implemented",
    "incomplete",
    "missing",
    "broken",
];

/// Which rule decided the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    DoneMarker,
    NonZeroExit,
    NeedsMoreWorkMarker,
    HeuristicAccept,
    Inconclusive,
}

impl Verdict {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::DoneMarker | Self::HeuristicAccept)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoneMarker => "done_marker",
            Self::NonZeroExit => "non_zero_exit",
            Self::NeedsMoreWorkMarker => "needs_more_work_marker",
            Self::HeuristicAccept => "heuristic_accept",
            Self::Inconclusive => "inconclusive",
        }
    }
}

/// Classify one turn's output, reporting which rule fired.
///
/// # Example
/// ```
/// use dispatch_core::completion::{assess, Verdict};
///
/// assert_eq!(assess("All set. [DONE]", 0), Verdict::DoneMarker);
/// assert_eq!(assess("[DONE]", 1), Verdict::DoneMarker);
/// assert_eq!(assess("ok", 2), Verdict::NonZeroExit);
/// assert_eq!(assess("ok [NEEDS_MORE_WORK]", 0), Verdict::NeedsMoreWorkMarker);
/// assert_eq!(assess("ok", 0), Verdict::Inconclusive);
/// ```
pub fn assess(output: &str, exit_code: i32) -> Verdict {
    if output.contains(DONE_MARKER) {
        return Verdict::DoneMarker;
    }
    if exit_code != 0 {
        return Verdict::NonZeroExit;
    }
    if output.contains(NEEDS_MORE_WORK_MARKER) {
        return Verdict::NeedsMoreWorkMarker;
    }
    if output.chars().count() > HEURISTIC_MIN_CHARS && !has_failure_indicator(output) {
        return Verdict::HeuristicAccept;
    }
    Verdict::Inconclusive
}

/// `true` when the output counts as a finished task.
pub fn classify(output: &str, exit_code: i32) -> bool {
    assess(output, exit_code).is_complete()
}

fn has_failure_indicator(output: &str) -> bool {
    let lowered = output.to_lowercase();
    FAILURE_INDICATORS
        .iter()
        .any(|indicator| lowered.contains(indicator))
}
