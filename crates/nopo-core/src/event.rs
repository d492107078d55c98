use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Payload fragments ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRef {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubIssuesSummary {
    pub total: u32,
}

/// Issue as carried on `issues` / `issue_comment` payloads. Fields beyond
/// the upstream webhook shape (`parent_issue_number`, `project_status`)
/// are enrichments the ingress attaches when it has them; the router
/// treats them as optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelRef>,
    #[serde(default)]
    pub assignees: Vec<UserRef>,
    /// Present when the "issue" is really a pull request (comment events).
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
    #[serde(default)]
    pub sub_issues_summary: Option<SubIssuesSummary>,
    #[serde(default)]
    pub parent_issue_number: Option<u64>,
    #[serde(default)]
    pub project_status: Option<String>,
}

impl IssuePayload {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn has_assignee(&self, login: &str) -> bool {
        self.assignees.iter().any(|a| a.login == login)
    }

    pub fn has_sub_issues(&self) -> bool {
        self.sub_issues_summary
            .as_ref()
            .is_some_and(|s| s.total > 0)
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitRefPayload {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default)]
    pub sha: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub user: UserRef,
    pub state: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrPayload {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub merged: Option<bool>,
    pub head: GitRefPayload,
    #[serde(default)]
    pub base: GitRefPayload,
    #[serde(default)]
    pub labels: Vec<LabelRef>,
    /// Review history, attached by the ingress for comment-triggered
    /// review routing.
    #[serde(default)]
    pub reviews: Vec<ReviewPayload>,
    /// Labels of the linked issue, attached by the ingress so push events
    /// on test-automation issues can be refused without a fetch.
    #[serde(default)]
    pub linked_issue_labels: Vec<String>,
}

impl PrPayload {
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentPayload {
    pub id: u64,
    pub body: String,
    pub user: UserRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRunPayload {
    pub id: u64,
    pub name: String,
    pub head_branch: String,
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: String,
    /// Labels of the issue behind the run's branch, attached by the
    /// ingress so CI on test-automation issues can be refused.
    #[serde(default)]
    pub linked_issue_labels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeGroupPr {
    pub number: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub head_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeGroupPayload {
    pub head_ref: String,
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub pull_request: Option<MergeGroupPr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscussionPayload {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: UserRef,
}

/// Inputs of a manual `workflow_dispatch`. Gating fields (`labels`,
/// `has_sub_issues`) are optional; when absent the dispatch routes
/// straight to iterate/orchestrate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchInputs {
    #[serde(default)]
    pub resource_number: Option<u64>,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub has_sub_issues: Option<bool>,
    #[serde(default)]
    pub parent_issue_number: Option<u64>,
}

// ── RawEvent ─────────────────────────────────────────────────────────────

/// One variant per upstream event kind the router understands. Carries the
/// payload verbatim plus the event name as the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_name", rename_all = "snake_case")]
pub enum RawEvent {
    Issues {
        action: String,
        issue: IssuePayload,
        #[serde(default)]
        label: Option<LabelRef>,
        #[serde(default)]
        assignee: Option<UserRef>,
        sender: UserRef,
    },
    IssueComment {
        action: String,
        issue: IssuePayload,
        comment: CommentPayload,
        sender: UserRef,
        /// Linked PR detail when the comment target is a pull request.
        #[serde(default)]
        pull_request: Option<PrPayload>,
    },
    PullRequest {
        action: String,
        pull_request: PrPayload,
        #[serde(default)]
        requested_reviewer: Option<UserRef>,
        /// Post-push head sha on `synchronize`.
        #[serde(default)]
        after: Option<String>,
        sender: UserRef,
    },
    PullRequestReview {
        action: String,
        pull_request: PrPayload,
        review: ReviewPayload,
        sender: UserRef,
    },
    WorkflowRun {
        action: String,
        workflow_run: WorkflowRunPayload,
        sender: UserRef,
    },
    MergeGroup {
        action: String,
        merge_group: MergeGroupPayload,
    },
    Discussion {
        action: String,
        discussion: DiscussionPayload,
        sender: UserRef,
    },
    DiscussionComment {
        action: String,
        discussion: DiscussionPayload,
        comment: CommentPayload,
        sender: UserRef,
    },
    WorkflowDispatch {
        #[serde(default)]
        inputs: DispatchInputs,
        sender: UserRef,
    },
    #[serde(other)]
    Unknown,
}
