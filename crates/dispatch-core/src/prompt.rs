//! Prompt assembly for worker turns.
//!
//! Turn 1 carries the full agent context. Later turns carry only a task
//! reminder and the previous turn's output, so the prompt stays bounded no
//! matter how many passes a task takes.

use crate::completion::{DONE_MARKER, NEEDS_MORE_WORK_MARKER};
use crate::request::TaskRequest;

/// Previous output longer than this (in characters) is cut to its tail.
pub const MAX_PREVIOUS_OUTPUT_CHARS: usize = 8000;

pub const TRUNCATION_NOTICE: &str = "[... earlier output truncated ...]";

pub const EMPTY_DESCRIPTION: &str = "No description provided.";

/// Subject prefix that forces planning mode.
pub const PLAN_PREFIX: &str = "[PLAN]";

/// Lowercased keywords that mark a task as planning work. Matched as whole
/// words, so "explanation" does not count as "plan".
pub const PLANNING_KEYWORDS: &[&str] = &[
    "plan",
    "plans",
    "planning",
    "break down",
    "breakdown",
    "decompose",
    "roadmap",
    "subtasks",
    "create tasks",
    "task list",
    "milestones",
];

/// Agent that generates tasks for others.
pub const GENERATION_AGENT_ID: &str = "task-generator";

/// Line prefix of the structured action protocol.
pub const ACTION_PREFIX: &str = "TASK_ACTION";

const SECTION_RULE: &str = "\n\n---\n\n";

/// Whether the task should be answered with structured task actions.
pub fn is_planning_task(request: &TaskRequest) -> bool {
    if request.subject.trim_start().starts_with(PLAN_PREFIX) {
        return true;
    }

    let text = format!("{} {}", request.subject, request.description);
    let lowered = text.to_lowercase();
    if PLANNING_KEYWORDS.iter().any(|kw| contains_word(&lowered, kw)) {
        return true;
    }

    request.agent_id == GENERATION_AGENT_ID && text.contains(ACTION_PREFIX)
}

/// Whether `needle` occurs in `haystack` with no alphanumeric character
/// directly on either side.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Prompt for the first (or only) turn.
pub fn build_first_turn_prompt(request: &TaskRequest, multi_turn: bool) -> String {
    let ctx = &request.context;
    let optional = [
        ("Agent Context", Some(ctx.soul.as_str())),
        ("Team", ctx.team.as_deref()),
        ("Agent Memory", ctx.agent_memory.as_deref()),
        ("Project Memory", ctx.project_memory.as_deref()),
        ("Project Communications", ctx.project_communications.as_deref()),
        ("Document Index", ctx.document_index.as_deref()),
        ("Methodology", ctx.methodology.as_deref()),
    ];

    let mut sections: Vec<String> = optional
        .into_iter()
        .filter_map(|(label, body)| {
            body.map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| format!("## {label}\n\n{b}"))
        })
        .collect();

    sections.push(task_details(request));

    if is_planning_task(request) {
        sections.push(action_protocol());
    }

    sections.push(instructions(multi_turn));

    sections.join(SECTION_RULE)
}

/// Prompt for turn 2 and later.
pub fn build_follow_up_prompt(
    request: &TaskRequest,
    turn: u32,
    previous_output: &str,
    is_final_turn: bool,
) -> String {
    let mut prompt = format!("# Agent {}: turn {turn}\n\n", request.agent_id);

    prompt.push_str("## Your Previous Output\n\n");
    prompt.push_str(&truncate_previous_output(previous_output));
    prompt.push_str(SECTION_RULE);

    prompt.push_str(&format!(
        "## Task Reminder\n\n- ID: {}\n- Subject: {}",
        request.task_id, request.subject
    ));
    prompt.push_str(SECTION_RULE);

    prompt.push_str(
        "## Instructions\n\n\
         Review your previous output against the task. Fix anything wrong, \
         fill in anything missing, and tighten what is already there. \
         Respond with the complete, updated result rather than a diff.\n\n",
    );
    if is_final_turn {
        prompt.push_str(
            "This is your final turn. Deliver the best possible output now; \
             there will be no further passes.\n\n",
        );
    }
    prompt.push_str(&marker_instruction());

    prompt
}

/// Keep the last `MAX_PREVIOUS_OUTPUT_CHARS` characters, prefixed with a
/// notice when anything was dropped.
pub fn truncate_previous_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_PREVIOUS_OUTPUT_CHARS {
        return output.to_string();
    }
    let tail: String = output.chars().skip(total - MAX_PREVIOUS_OUTPUT_CHARS).collect();
    format!("{TRUNCATION_NOTICE}\n{tail}")
}

fn task_details(request: &TaskRequest) -> String {
    let description = if request.description.trim().is_empty() {
        EMPTY_DESCRIPTION
    } else {
        request.description.trim()
    };
    format!(
        "## Task Details\n\n- ID: {}\n- Subject: {}\n- Description: {description}",
        request.task_id, request.subject
    )
}

fn action_protocol() -> String {
    format!(
        "## Structured Task Actions\n\n\
         This is a planning task. In addition to your written answer, emit one \
         line per action, each starting with `{ACTION_PREFIX}` followed by a \
         single-line JSON object:\n\n\
         {ACTION_PREFIX} {{\"action\": \"create_task\", \"subject\": \"...\", \"description\": \"...\", \"assignee\": \"<agent id, optional>\"}}\n\
         {ACTION_PREFIX} {{\"action\": \"update_task\", \"task_id\": \"...\", \"status\": \"...\"}}\n\
         {ACTION_PREFIX} {{\"action\": \"add_note\", \"task_id\": \"...\", \"note\": \"...\"}}\n\n\
         Put each action on its own line with no line breaks inside the JSON."
    )
}

fn instructions(multi_turn: bool) -> String {
    let mut text = String::from(
        "## Instructions\n\n\
         1. Read the task details and the context above.\n\
         2. Do the work the task asks for.\n\
         3. Check your result against the task description.\n\
         4. Reply with the finished result and a short summary of what you did.",
    );
    if multi_turn {
        text.push_str("\n\n");
        text.push_str(&marker_instruction());
    }
    text
}

fn marker_instruction() -> String {
    format!(
        "End your response with `{DONE_MARKER}` if the task is complete, or \
         `{NEEDS_MORE_WORK_MARKER}` if it needs another pass."
    )
}
