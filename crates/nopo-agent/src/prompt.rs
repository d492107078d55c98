use std::collections::BTreeMap;

use nopo_core::action::AgentKind;

const SYSTEM_COMMON: &str = "You are the automation agent for a GitHub issue lifecycle. \
Work only from the information in the prompt. Respond with a single JSON object and \
nothing else: no prose, no markdown fences.";

const TRIAGE_INSTRUCTION: &str = "Triage issue #{issue_number} ('{issue_title}') in \
{owner}/{repo}. Classify it, list the affected areas of the codebase, and raise any \
questions that block grooming.\n\n\
Output JSON: {\"summary\": string, \"labels\": [string], \"affected_areas\": [string], \
\"questions\": [{\"id\": string, \"text\": string}], \"needs_info\": bool}";

const GROOMING_INSTRUCTION: &str = "Groom issue #{issue_number} ('{issue_title}') in \
{owner}/{repo}. Produce a description, an implementation approach, a todo list, and \
acceptance criteria. If the work is large, decompose it into ordered phases; each phase \
becomes its own sub-issue.\n\n\
Output JSON: {\"description\": string, \"approach\": string, \
\"todos\": [{\"text\": string, \"manual\": bool}], \"acceptance_criteria\": [string], \
\"phases\": [{\"number\": int, \"title\": string, \"description\": string, \
\"affected_areas\": [string], \"todos\": [{\"text\": string, \"manual\": bool}]}]}";

const ITERATE_INSTRUCTION: &str = "Implement the next unchecked todos of issue \
#{issue_number} ('{issue_title}') in {owner}/{repo}. Commit your work to the issue \
branch.\n\n\
Output JSON: {\"summary\": string, \"commit_sha\": string|null, \
\"completed_todos\": [string], \"notes\": [string], \"request_review\": bool}";

const RETRY_INSTRUCTION: &str = "CI failed ({ci_result}) for issue #{issue_number} \
('{issue_title}') in {owner}/{repo}. Diagnose the failure from the run at {run_url}, fix \
it, and commit.\n\n\
Output JSON: {\"summary\": string, \"commit_sha\": string|null, \
\"completed_todos\": [string], \"notes\": [string], \"request_review\": bool}";

const REVIEW_INSTRUCTION: &str = "Review the pull request for issue #{issue_number} \
('{issue_title}') in {owner}/{repo}. Check the diff against the issue's todos and \
acceptance criteria.\n\n\
Output JSON: {\"decision\": \"approve\"|\"request_changes\"|\"comment\", \
\"summary\": string, \"comments\": [string]}";

const PR_RESPONSE_INSTRUCTION: &str = "Address the review feedback on the pull request \
for issue #{issue_number} ('{issue_title}') in {owner}/{repo}. Apply the requested \
changes and commit.\n\n\
Output JSON: {\"summary\": string, \"commit_sha\": string|null, \"resolved\": bool}";

const COMMENT_INSTRUCTION: &str = "Reply to this comment by {comment_author} on issue \
#{issue_number} ('{issue_title}') in {owner}/{repo}:\n\n{comment_body}\n\n\
Output JSON: {\"reply\": string}";

const PIVOT_INSTRUCTION: &str = "The direction of issue #{issue_number} \
('{issue_title}') in {owner}/{repo} is changing: {comment_body}. Rework the plan \
accordingly.\n\n\
Output JSON: {\"summary\": string, \"commit_sha\": string|null, \
\"completed_todos\": [string], \"notes\": [string], \"request_review\": bool}";

const ORCHESTRATE_INSTRUCTION: &str = "Re-plan the remaining phases of issue \
#{issue_number} ('{issue_title}') in {owner}/{repo} given the current sub-issue state.\n\n\
Output JSON: {\"description\": string, \"approach\": string, \
\"todos\": [{\"text\": string, \"manual\": bool}], \"acceptance_criteria\": [string], \
\"phases\": [{\"number\": int, \"title\": string, \"description\": string, \
\"affected_areas\": [string], \"todos\": [{\"text\": string, \"manual\": bool}]}]}";

const DISCUSSION_INSTRUCTION: &str = "Work on discussion #{issue_number} in \
{owner}/{repo} ({comment_body}).\n\nOutput JSON: {\"reply\": string}";

/// Instruction template for a kind. Placeholders are `{name}` and resolve
/// from the prompt vars; unresolved placeholders are left intact so a bad
/// template is visible in the transcript rather than silently blank.
pub fn instruction_template(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Triage => TRIAGE_INSTRUCTION,
        AgentKind::Grooming => GROOMING_INSTRUCTION,
        AgentKind::Iterate => ITERATE_INSTRUCTION,
        AgentKind::Retry => RETRY_INSTRUCTION,
        AgentKind::Review => REVIEW_INSTRUCTION,
        AgentKind::PrResponse => PR_RESPONSE_INSTRUCTION,
        AgentKind::Comment => COMMENT_INSTRUCTION,
        AgentKind::Pivot => PIVOT_INSTRUCTION,
        AgentKind::Orchestrate => ORCHESTRATE_INSTRUCTION,
        AgentKind::DiscussionResearch
        | AgentKind::DiscussionSummarize
        | AgentKind::DiscussionPlan
        | AgentKind::DiscussionComplete => DISCUSSION_INSTRUCTION,
    }
}

pub fn system_prompt(_kind: AgentKind) -> &'static str {
    SYSTEM_COMMON
}

/// Build the full instruction for one invocation by substituting
/// `{name}` placeholders from the ordered prompt vars.
pub fn build_instruction(kind: AgentKind, vars: &BTreeMap<String, String>) -> String {
    let mut out = instruction_template(kind).to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
