use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::markdown::Document;

// ── Reserved labels ──────────────────────────────────────────────────────

pub const LABEL_TRIAGED: &str = "triaged";
pub const LABEL_GROOMED: &str = "groomed";
pub const LABEL_NEEDS_INFO: &str = "needs-info";
pub const LABEL_SUPERSEDED: &str = "superseded";
pub const LABEL_SKIP_DISPATCH: &str = "skip-dispatch";
pub const LABEL_TEST_AUTOMATION: &str = "test:automation";

// ── Enums ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// Project board Status field values.
///
/// The board stores `Ready` where the machine reasons about `In progress`;
/// [`ProjectStatus::canonical`] maps reads and [`ProjectStatus::board_name`]
/// maps writes, so the machine only ever sees the canonical set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    Backlog,
    Triaged,
    Groomed,
    #[serde(rename = "In progress")]
    InProgress,
    Ready,
    #[serde(rename = "In review")]
    InReview,
    Blocked,
    Done,
    Error,
}

impl ProjectStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Backlog" => Some(Self::Backlog),
            "Triaged" => Some(Self::Triaged),
            "Groomed" => Some(Self::Groomed),
            "In progress" => Some(Self::InProgress),
            "Ready" => Some(Self::Ready),
            "In review" => Some(Self::InReview),
            "Blocked" => Some(Self::Blocked),
            "Done" => Some(Self::Done),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Normalize a board value for machine consumption (`Ready` reads as
    /// `In progress`).
    pub fn canonical(self) -> Self {
        match self {
            Self::Ready => Self::InProgress,
            other => other,
        }
    }

    /// The string written back to the board (`In progress` writes as
    /// `Ready`).
    pub fn board_name(self) -> &'static str {
        match self {
            Self::Backlog => "Backlog",
            Self::Triaged => "Triaged",
            Self::Groomed => "Groomed",
            Self::InProgress | Self::Ready => "Ready",
            Self::InReview => "In review",
            Self::Blocked => "Blocked",
            Self::Done => "Done",
            Self::Error => "Error",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Backlog => "Backlog",
            Self::Triaged => "Triaged",
            Self::Groomed => "Groomed",
            Self::InProgress => "In progress",
            Self::Ready => "Ready",
            Self::InReview => "In review",
            Self::Blocked => "Blocked",
            Self::Done => "Done",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiResult {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl CiResult {
    /// Map a workflow-run conclusion to a CI result.
    pub fn from_conclusion(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" | "error" | "timed_out" => Some(Self::Failure),
            "cancelled" => Some(Self::Cancelled),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Commented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

// ── Triggers ─────────────────────────────────────────────────────────────

/// What caused this dispatch, as seen by the state machine.
///
/// The router maps jobs to triggers via a fixed table unless the event
/// payload already carries a `trigger_type` (which wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    IssueTriage,
    IssueGroom,
    IssueAssigned,
    IssueOrchestrate,
    SubIssueClosed,
    IssueReset,
    IssuePivot,
    IssueComment,
    IssueRetry,
    PrPush,
    WorkflowRunCompleted,
    PrReviewRequested,
    PrReviewSubmitted,
    PrReviewApproved,
    PrMerged,
    MergeQueueEntered,
    DeployedStage,
    DeployedProd,
    DiscussionCreated,
    DiscussionCommand,
    ManualDispatch,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueTriage => "issue-triage",
            Self::IssueGroom => "issue-groom",
            Self::IssueAssigned => "issue-assigned",
            Self::IssueOrchestrate => "issue-orchestrate",
            Self::SubIssueClosed => "sub-issue-closed",
            Self::IssueReset => "issue-reset",
            Self::IssuePivot => "issue-pivot",
            Self::IssueComment => "issue-comment",
            Self::IssueRetry => "issue-retry",
            Self::PrPush => "pr-push",
            Self::WorkflowRunCompleted => "workflow-run-completed",
            Self::PrReviewRequested => "pr-review-requested",
            Self::PrReviewSubmitted => "pr-review-submitted",
            Self::PrReviewApproved => "pr-review-approved",
            Self::PrMerged => "pr-merged",
            Self::MergeQueueEntered => "merge-queue-entered",
            Self::DeployedStage => "deployed-stage",
            Self::DeployedProd => "deployed-prod",
            Self::DiscussionCreated => "discussion-created",
            Self::DiscussionCommand => "discussion-command",
            Self::ManualDispatch => "manual-dispatch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }
}

// ── Issue aggregate ──────────────────────────────────────────────────────

/// A single review on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInfo {
    pub author: String,
    pub state: ReviewState,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrInfo {
    pub number: u64,
    pub state: PrState,
    pub is_draft: bool,
    pub title: String,
    pub head_ref: String,
    pub base_ref: String,
    pub labels: Vec<String>,
    pub reviews: Vec<ReviewInfo>,
    /// Latest CI rollup on the head commit (`SUCCESS`, `FAILURE`, ...).
    #[serde(default)]
    pub check_state: Option<String>,
    /// Upstream review decision (`APPROVED`, `CHANGES_REQUESTED`,
    /// `REVIEW_REQUIRED`).
    #[serde(default)]
    pub review_decision: Option<String>,
}

impl PrInfo {
    /// Newest `CHANGES_REQUESTED` review that has not been dismissed.
    pub fn latest_changes_requested(&self) -> Option<&ReviewInfo> {
        self.reviews
            .iter()
            .filter(|r| r.state == ReviewState::ChangesRequested)
            .max_by_key(|r| r.submitted_at)
    }

    pub fn is_approved(&self) -> bool {
        self.reviews.iter().any(|r| r.state == ReviewState::Approved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentInfo {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A sub-issue as seen from its parent. Ordered by `[Phase N]` prefix
/// ascending, ties broken by number; entries with no phase follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubIssue {
    pub number: u64,
    pub title: String,
    pub body: Document,
    pub state: IssueState,
    pub project_status: Option<ProjectStatus>,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub branch: Option<String>,
    pub pr: Option<PrInfo>,
}

impl SubIssue {
    /// Phase number from a `[Phase N]` title prefix.
    pub fn phase(&self) -> Option<u32> {
        crate::body::phase_from_title(&self.title)
    }

    pub fn is_superseded(&self) -> bool {
        self.labels.iter().any(|l| l == LABEL_SUPERSEDED)
    }

    pub fn is_done(&self) -> bool {
        self.project_status.map(ProjectStatus::canonical) == Some(ProjectStatus::Done)
            || self.state == IssueState::Closed
    }
}

/// The issue at the center of a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    pub body: Document,
    pub state: IssueState,
    pub project_status: Option<ProjectStatus>,
    pub iteration: u32,
    pub failures: u32,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub sub_issues: Vec<SubIssue>,
    pub comments: Vec<CommentInfo>,
    pub branch: Option<String>,
    pub pr: Option<PrInfo>,
    pub parent_issue_number: Option<u64>,
}

impl IssueInfo {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn has_assignee(&self, user: &str) -> bool {
        self.assignees.iter().any(|a| a == user)
    }

    /// An issue is a sub-issue iff it has a parent.
    pub fn is_sub_issue(&self) -> bool {
        self.parent_issue_number.is_some()
    }

    pub fn has_sub_issues(&self) -> bool {
        !self.sub_issues.is_empty()
    }
}

/// Aggregate root fetched once per dispatch and persisted at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueData {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub issue: IssueInfo,
    /// Parent snapshot, one level up, sub-issues omitted.
    pub parent_issue: Option<IssueInfo>,
}

// ── Machine context ──────────────────────────────────────────────────────

/// Comment that triggered this dispatch (slash command or mention).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentContext {
    pub comment_id: u64,
    pub author: String,
    pub body: String,
    /// `/pivot` argument, when present.
    pub pivot_description: Option<String>,
}

/// Workflow-run metadata carried through from CI events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub run_id: Option<u64>,
    pub run_url: Option<String>,
    pub commit_sha: Option<String>,
}

/// Input to the state machine. Built once per dispatch; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineContext {
    pub trigger: Trigger,
    pub owner: String,
    pub repo: String,
    pub issue: IssueInfo,
    pub parent_issue: Option<IssueInfo>,
    /// First sub-issue (phase order) that is OPEN and not Done.
    pub current_sub_issue: Option<SubIssue>,
    pub current_phase: Option<u32>,
    pub total_phases: u32,
    pub pr: Option<PrInfo>,
    pub has_pr: bool,
    pub ci_result: Option<CiResult>,
    pub review_decision: Option<ReviewDecision>,
    pub branch: Option<String>,
    pub has_branch: bool,
    pub comment_context: Option<CommentContext>,
    pub max_retries: u32,
    pub bot_username: String,
    pub reviewer_username: String,
    pub workflow: WorkflowMeta,
}

// ── Routing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Issue,
    Pr,
    Discussion,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Pr => "pr",
            Self::Discussion => "discussion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Job {
    IssueTriage,
    IssueGroom,
    IssueIterate,
    IssueOrchestrate,
    IssueReset,
    IssuePivot,
    IssueComment,
    PrPush,
    PrReviewRequested,
    PrReviewApproved,
    PrResponse,
    PrHumanResponse,
    MergeQueueLogging,
    DiscussionResearch,
    DiscussionSummarize,
    DiscussionPlan,
    DiscussionComplete,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueTriage => "issue-triage",
            Self::IssueGroom => "issue-groom",
            Self::IssueIterate => "issue-iterate",
            Self::IssueOrchestrate => "issue-orchestrate",
            Self::IssueReset => "issue-reset",
            Self::IssuePivot => "issue-pivot",
            Self::IssueComment => "issue-comment",
            Self::PrPush => "pr-push",
            Self::PrReviewRequested => "pr-review-requested",
            Self::PrReviewApproved => "pr-review-approved",
            Self::PrResponse => "pr-response",
            Self::PrHumanResponse => "pr-human-response",
            Self::MergeQueueLogging => "merge-queue-logging",
            Self::DiscussionResearch => "discussion-research",
            Self::DiscussionSummarize => "discussion-summarize",
            Self::DiscussionPlan => "discussion-plan",
            Self::DiscussionComplete => "discussion-complete",
        }
    }

    /// Fixed job → trigger table; a `trigger_type` on the event wins.
    pub fn default_trigger(&self) -> Trigger {
        match self {
            Self::IssueTriage => Trigger::IssueTriage,
            Self::IssueGroom => Trigger::IssueGroom,
            Self::IssueIterate => Trigger::IssueAssigned,
            Self::IssueOrchestrate => Trigger::IssueOrchestrate,
            Self::IssueReset => Trigger::IssueReset,
            Self::IssuePivot => Trigger::IssuePivot,
            Self::IssueComment => Trigger::IssueComment,
            Self::PrPush => Trigger::PrPush,
            Self::PrReviewRequested => Trigger::PrReviewRequested,
            Self::PrReviewApproved => Trigger::PrReviewApproved,
            Self::PrResponse | Self::PrHumanResponse => Trigger::PrReviewSubmitted,
            Self::MergeQueueLogging => Trigger::MergeQueueEntered,
            Self::DiscussionResearch => Trigger::DiscussionCreated,
            Self::DiscussionSummarize | Self::DiscussionPlan | Self::DiscussionComplete => {
                Trigger::DiscussionCommand
            }
        }
    }

    /// PR review family shares a concurrency group per PR.
    pub fn is_review_family(&self) -> bool {
        matches!(
            self,
            Self::PrPush
                | Self::PrReviewRequested
                | Self::PrReviewApproved
                | Self::PrResponse
                | Self::PrHumanResponse
        )
    }

    pub fn is_discussion(&self) -> bool {
        matches!(
            self,
            Self::DiscussionResearch
                | Self::DiscussionSummarize
                | Self::DiscussionPlan
                | Self::DiscussionComplete
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    Eyes,
    Rocket,
}

impl Reaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eyes => "eyes",
            Self::Rocket => "rocket",
        }
    }
}

/// The router's single output per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub job: Option<Job>,
    pub trigger: Option<Trigger>,
    pub resource_type: ResourceType,
    pub resource_number: u64,
    pub parent_issue: Option<u64>,
    pub comment_id: Option<u64>,
    /// Extra context-specific fields surfaced in `context_json`.
    pub context: BTreeMap<String, String>,
    pub skip: bool,
    pub skip_reason: String,
    pub concurrency_group: String,
    pub cancel_in_progress: bool,
    /// Branch the orchestrator must ensure exists before context load.
    pub branch: Option<String>,
    /// Reaction ack for slash commands: (comment id, reaction).
    pub ack_reaction: Option<(u64, Reaction)>,
    pub ci_result: Option<CiResult>,
    pub review_decision: Option<ReviewDecision>,
    pub comment_context: Option<CommentContext>,
    pub workflow: WorkflowMeta,
}

impl RoutingDecision {
    /// Render the flat `context_json` object written to the environment.
    pub fn to_context_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "job".into(),
            self.job.map(|j| j.as_str()).unwrap_or_default().into(),
        );
        map.insert(
            "trigger".into(),
            self.trigger.map(|t| t.as_str()).unwrap_or_default().into(),
        );
        map.insert("resource_type".into(), self.resource_type.as_str().into());
        map.insert(
            "resource_number".into(),
            self.resource_number.to_string().into(),
        );
        map.insert(
            "parent_issue".into(),
            self.parent_issue.unwrap_or(0).to_string().into(),
        );
        map.insert(
            "comment_id".into(),
            self.comment_id
                .map(|c| c.to_string())
                .unwrap_or_default()
                .into(),
        );
        map.insert(
            "concurrency_group".into(),
            self.concurrency_group.clone().into(),
        );
        map.insert("cancel_in_progress".into(), self.cancel_in_progress.into());
        map.insert("skip".into(), self.skip.into());
        map.insert("skip_reason".into(), self.skip_reason.clone().into());
        for (k, v) in &self.context {
            map.insert(k.clone(), v.clone().into());
        }
        serde_json::Value::Object(map)
    }
}

// ── Dispatch result ──────────────────────────────────────────────────────

/// What the orchestrator returns for one dispatch. All failure modes are
/// data; nothing panics across this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub decision: RoutingDecision,
    pub state: Option<crate::machine::State>,
    pub execution: Option<crate::runner::ExecutionResult>,
    /// True for pseudo-transient states that expect another dispatch.
    pub retrigger: bool,
    pub error: Option<String>,
}
