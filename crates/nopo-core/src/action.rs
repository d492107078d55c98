use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::types::ProjectStatus;

// ── Agent kinds ──────────────────────────────────────────────────────────

/// Which prompt family the Agent is invoked with. Each kind declares its
/// own output schema (see [`AgentOutput`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    Triage,
    Grooming,
    Iterate,
    Retry,
    Review,
    PrResponse,
    Comment,
    Pivot,
    Orchestrate,
    DiscussionResearch,
    DiscussionSummarize,
    DiscussionPlan,
    DiscussionComplete,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Grooming => "grooming",
            Self::Iterate => "iterate",
            Self::Retry => "retry",
            Self::Review => "review",
            Self::PrResponse => "pr-response",
            Self::Comment => "comment",
            Self::Pivot => "pivot",
            Self::Orchestrate => "orchestrate",
            Self::DiscussionResearch => "discussion-research",
            Self::DiscussionSummarize => "discussion-summarize",
            Self::DiscussionPlan => "discussion-plan",
            Self::DiscussionComplete => "discussion-complete",
        }
    }
}

// ── Agent output schemas ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoSpec {
    pub text: String,
    #[serde(default)]
    pub manual: bool,
}

/// One phase the grooming agent wants decomposed into a sub-issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default)]
    pub todos: Vec<TodoSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageOutput {
    pub summary: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
    /// Triage could not produce a complete picture; the issue gets the
    /// `needs-info` label.
    #[serde(default)]
    pub needs_info: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroomingOutput {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub todos: Vec<TodoSpec>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Empty means the issue stays single-phase.
    #[serde(default)]
    pub phases: Vec<PhaseSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrSpec {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationOutput {
    pub summary: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    /// Todo texts the agent completed this pass.
    #[serde(default)]
    pub completed_todos: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub request_review: bool,
    /// The agent may ask for a PR; creation still goes through the
    /// runner's idempotent `createPR` action.
    #[serde(default)]
    pub pr: Option<PrSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub decision: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrResponseOutput {
    pub summary: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyOutput {
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AgentOutput {
    Triage(TriageOutput),
    Grooming(GroomingOutput),
    Iteration(IterationOutput),
    Review(ReviewOutput),
    PrResponse(PrResponseOutput),
    Reply(ReplyOutput),
}

/// Parse and validate the Agent's stdout against the schema its kind
/// declares. Schema mismatch is an [`CoreError::AgentFailure`].
pub fn parse_agent_output(kind: AgentKind, raw: &str) -> Result<AgentOutput, CoreError> {
    let fail = |e: serde_json::Error| CoreError::AgentFailure {
        kind: kind.as_str().into(),
        message: format!("output does not match schema: {e}"),
    };
    let raw = raw.trim();
    match kind {
        AgentKind::Triage => serde_json::from_str(raw).map(AgentOutput::Triage).map_err(fail),
        AgentKind::Grooming | AgentKind::Orchestrate => serde_json::from_str(raw)
            .map(AgentOutput::Grooming)
            .map_err(fail),
        AgentKind::Iterate | AgentKind::Retry | AgentKind::Pivot => serde_json::from_str(raw)
            .map(AgentOutput::Iteration)
            .map_err(fail),
        AgentKind::Review => serde_json::from_str(raw).map(AgentOutput::Review).map_err(fail),
        AgentKind::PrResponse => serde_json::from_str(raw)
            .map(AgentOutput::PrResponse)
            .map_err(fail),
        AgentKind::Comment
        | AgentKind::DiscussionResearch
        | AgentKind::DiscussionSummarize
        | AgentKind::DiscussionPlan
        | AgentKind::DiscussionComplete => {
            serde_json::from_str(raw).map(AgentOutput::Reply).map_err(fail)
        }
    }
}

// ── Pending actions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Ci,
    Agent,
    Review,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ci => "ci",
            Self::Agent => "agent",
            Self::Review => "review",
        }
    }
}

/// The typed action catalog. Every variant carries the minimal
/// serializable input its executor needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    RunClaude {
        kind: AgentKind,
        issue_number: u64,
        prompt_vars: BTreeMap<String, String>,
    },
    ApplyTriageOutput {
        issue_number: u64,
    },
    ApplyGroomingOutput {
        issue_number: u64,
    },
    ApplyIterationOutput {
        issue_number: u64,
    },
    ApplyReviewOutput {
        issue_number: u64,
    },
    ApplyPrResponseOutput {
        issue_number: u64,
    },
    /// Post the preceding reply-kind output as a comment.
    ApplyCommentOutput {
        issue_number: u64,
    },
    ReconcileSubIssues {
        issue_number: u64,
    },
    UpdateProjectStatus {
        issue_number: u64,
        status: ProjectStatus,
    },
    IncrementIteration {
        issue_number: u64,
    },
    ClearFailures {
        issue_number: u64,
    },
    RecordFailure {
        issue_number: u64,
        kind: FailureKind,
    },
    AppendHistory {
        issue_number: u64,
        #[serde(default)]
        phase: Option<u32>,
        message: String,
        #[serde(default)]
        sha: Option<String>,
        #[serde(default)]
        run_link: Option<String>,
    },
    CreateBranch {
        branch: String,
        base: String,
    },
    CreatePr {
        issue_number: u64,
        branch: String,
        title: String,
        body: String,
        draft: bool,
    },
    MarkPrReady {
        pr_number: u64,
    },
    ConvertPrToDraft {
        pr_number: u64,
    },
    RequestReviewer {
        pr_number: u64,
        username: String,
    },
    RemoveReviewer {
        pr_number: u64,
        username: String,
    },
    UnassignUser {
        issue_number: u64,
        username: String,
    },
    AddAssignees {
        issue_number: u64,
        usernames: Vec<String>,
    },
    CloseIssue {
        issue_number: u64,
    },
    ResetIssue {
        issue_number: u64,
    },
    RemoveFromProject {
        issue_number: u64,
    },
    AddComment {
        issue_number: u64,
        body: String,
    },
    AddReaction {
        comment_id: u64,
        reaction: crate::types::Reaction,
    },
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunClaude { .. } => "run_claude",
            Self::ApplyTriageOutput { .. } => "apply_triage_output",
            Self::ApplyGroomingOutput { .. } => "apply_grooming_output",
            Self::ApplyIterationOutput { .. } => "apply_iteration_output",
            Self::ApplyReviewOutput { .. } => "apply_review_output",
            Self::ApplyPrResponseOutput { .. } => "apply_pr_response_output",
            Self::ApplyCommentOutput { .. } => "apply_comment_output",
            Self::ReconcileSubIssues { .. } => "reconcile_sub_issues",
            Self::UpdateProjectStatus { .. } => "update_project_status",
            Self::IncrementIteration { .. } => "increment_iteration",
            Self::ClearFailures { .. } => "clear_failures",
            Self::RecordFailure { .. } => "record_failure",
            Self::AppendHistory { .. } => "append_history",
            Self::CreateBranch { .. } => "create_branch",
            Self::CreatePr { .. } => "create_pr",
            Self::MarkPrReady { .. } => "mark_pr_ready",
            Self::ConvertPrToDraft { .. } => "convert_pr_to_draft",
            Self::RequestReviewer { .. } => "request_reviewer",
            Self::RemoveReviewer { .. } => "remove_reviewer",
            Self::UnassignUser { .. } => "unassign_user",
            Self::AddAssignees { .. } => "add_assignees",
            Self::CloseIssue { .. } => "close_issue",
            Self::ResetIssue { .. } => "reset_issue",
            Self::RemoveFromProject { .. } => "remove_from_project",
            Self::AddComment { .. } => "add_comment",
            Self::AddReaction { .. } => "add_reaction",
        }
    }

    /// Whether a failure of this action aborts the rest of the queue.
    /// Agent runs and output application are fatal (later actions depend
    /// on their result); plain mutations are retried by the next dispatch.
    pub fn fatal(&self) -> bool {
        matches!(
            self,
            Self::RunClaude { .. }
                | Self::ApplyTriageOutput { .. }
                | Self::ApplyGroomingOutput { .. }
                | Self::ApplyIterationOutput { .. }
                | Self::ApplyReviewOutput { .. }
                | Self::ApplyPrResponseOutput { .. }
                | Self::ApplyCommentOutput { .. }
                | Self::ReconcileSubIssues { .. }
                | Self::ResetIssue { .. }
        )
    }
}

/// A queued action plus its optional idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl PendingAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            idempotency_key: None,
        }
    }

    pub fn keyed(kind: ActionKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            idempotency_key: Some(key.into()),
        }
    }
}

impl From<ActionKind> for PendingAction {
    fn from(kind: ActionKind) -> Self {
        Self::new(kind)
    }
}
