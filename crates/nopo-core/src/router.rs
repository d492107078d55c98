use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::body::phase_from_title;
use crate::event::{
    DispatchInputs, IssuePayload, PrPayload, RawEvent, ReviewPayload,
};
use crate::types::{
    CiResult, CommentContext, Job, Reaction, ResourceType, ReviewDecision, RoutingDecision,
    Trigger, WorkflowMeta, LABEL_GROOMED, LABEL_NEEDS_INFO, LABEL_SKIP_DISPATCH,
    LABEL_TEST_AUTOMATION, LABEL_TRIAGED,
};

#[allow(clippy::expect_used)]
fn linked_issue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:fixes|closes|resolves)\s+#(\d+)").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn issue_branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^claude/issue/(\d+)(?:/phase-(\d+))?$").expect("valid regex")
    })
}

#[allow(clippy::expect_used)]
fn merge_group_pr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"pr-(\d+)").expect("valid regex"))
}

/// Configuration the router needs to recognize its own actors.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub bot_username: String,
    pub reviewer_username: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bot_username: "nopo-bot".into(),
            reviewer_username: "nopo-reviewer".into(),
        }
    }
}

impl RouterConfig {
    /// Accounts whose `edited` events and comments must not re-trigger
    /// dispatches.
    pub fn is_bot_actor(&self, login: &str) -> bool {
        login == self.bot_username
            || login == self.reviewer_username
            || login == "claude[bot]"
            || login == "github-actions[bot]"
    }

    /// The reviewer identity that produces automated reviews.
    pub fn is_claude_reviewer(&self, login: &str) -> bool {
        login == self.reviewer_username || login.contains("claude")
    }
}

/// Standalone branch: `claude/issue/<n>`. Sub-issue of `parent` with phase
/// `K`: `claude/issue/<parent>/phase-<K>` (K falls back to the sub-issue
/// number when the title carries no phase).
pub fn branch_for_issue(issue: &IssuePayload) -> String {
    match issue.parent_issue_number {
        Some(parent) => {
            let phase = phase_from_title(&issue.title).unwrap_or(issue.number as u32);
            format!("claude/issue/{parent}/phase-{phase}")
        }
        None => format!("claude/issue/{}", issue.number),
    }
}

// ── Decision assembly ────────────────────────────────────────────────────

struct Decision {
    inner: RoutingDecision,
}

impl Decision {
    fn new(resource_type: ResourceType, resource_number: u64) -> Self {
        Self {
            inner: RoutingDecision {
                job: None,
                trigger: None,
                resource_type,
                resource_number,
                parent_issue: None,
                comment_id: None,
                context: BTreeMap::new(),
                skip: false,
                skip_reason: String::new(),
                concurrency_group: String::new(),
                cancel_in_progress: false,
                branch: None,
                ack_reaction: None,
                ci_result: None,
                review_decision: None,
                comment_context: None,
                workflow: WorkflowMeta::default(),
            },
        }
    }

    fn skip(mut self, reason: impl Into<String>) -> RoutingDecision {
        self.inner.skip = true;
        self.inner.skip_reason = reason.into();
        self.finish()
    }

    fn job(mut self, job: Job) -> Self {
        self.inner.job = Some(job);
        self.inner.trigger = Some(job.default_trigger());
        self
    }

    fn trigger(mut self, trigger: Trigger) -> Self {
        self.inner.trigger = Some(trigger);
        self
    }

    fn parent(mut self, parent: Option<u64>) -> Self {
        self.inner.parent_issue = parent;
        self
    }

    fn context(mut self, key: &str, value: impl ToString) -> Self {
        self.inner.context.insert(key.into(), value.to_string());
        self
    }

    fn branch(mut self, branch: String) -> Self {
        self.inner.branch = Some(branch);
        self
    }

    fn comment(mut self, ctx: CommentContext, reaction: Reaction) -> Self {
        self.inner.comment_id = Some(ctx.comment_id);
        self.inner.ack_reaction = Some((ctx.comment_id, reaction));
        self.inner.comment_context = Some(ctx);
        self
    }

    fn ci(mut self, result: Option<CiResult>) -> Self {
        self.inner.ci_result = result;
        self
    }

    fn review(mut self, decision: ReviewDecision) -> Self {
        self.inner.review_decision = Some(decision);
        self
    }

    fn workflow(mut self, meta: WorkflowMeta) -> Self {
        self.inner.workflow = meta;
        self
    }

    /// Compute the concurrency key and seal the decision.
    fn finish(mut self) -> RoutingDecision {
        let d = &mut self.inner;
        match d.job {
            Some(job) if job.is_review_family() => {
                d.concurrency_group = format!("claude-job-review-{}", d.resource_number);
                d.cancel_in_progress = job == Job::PrPush;
            }
            Some(job) if job.is_discussion() => {
                d.concurrency_group = format!("claude-job-discussion-{}", d.resource_number);
            }
            _ => {
                let key = d.parent_issue.unwrap_or(d.resource_number);
                d.concurrency_group = format!("claude-job-issue-{key}");
            }
        }
        self.inner
    }
}

// ── Universal skip rules ─────────────────────────────────────────────────

/// First match wins. Title `[TEST]` together with the `test:automation`
/// label is testing mode and bypasses the first two rules.
fn universal_skip(
    cfg: &RouterConfig,
    title: &str,
    labels: &[String],
    branch: Option<&str>,
    sender: &str,
    action: &str,
) -> Option<String> {
    let has = |l: &str| labels.iter().any(|x| x == l);
    let test_title = title.starts_with("[TEST]");
    let test_label = has(LABEL_TEST_AUTOMATION);
    if !(test_title && test_label) {
        if test_label {
            return Some("Resource has test:automation label".into());
        }
        if test_title {
            return Some("Resource title starts with [TEST]".into());
        }
    }
    if has(LABEL_SKIP_DISPATCH) {
        return Some("Resource has skip-dispatch label".into());
    }
    if let Some(branch) = branch {
        if branch.starts_with("test/") {
            return Some(format!("Branch {branch} is a test branch"));
        }
    }
    if action == "edited" && cfg.is_bot_actor(sender) {
        return Some(format!("Edit made by bot/automated account ({sender})"));
    }
    None
}

/// Resolve the issue a PR belongs to: `Fixes/Closes/Resolves #N` in the
/// body, else the `claude/issue/<n>` branch pattern.
fn linked_issue(body: Option<&str>, head_ref: &str) -> Option<u64> {
    if let Some(body) = body {
        if let Some(caps) = linked_issue_re().captures(body) {
            return caps.get(1)?.as_str().parse().ok();
        }
    }
    issue_branch_re()
        .captures(head_ref)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn body_has_main_state(body: Option<&str>) -> bool {
    body.is_some_and(|b| b.contains("CLAUDE_MAIN_STATE"))
}

// ── Router entry ─────────────────────────────────────────────────────────

/// Classify one inbound event into exactly one routing decision. Pure; the
/// orchestrator performs any I/O the decision calls for (reaction acks,
/// branch creation).
pub fn route(event: &RawEvent, cfg: &RouterConfig) -> RoutingDecision {
    match event {
        RawEvent::Issues {
            action,
            issue,
            label,
            assignee,
            sender,
        } => route_issue(cfg, action, issue, label.as_ref().map(|l| l.name.as_str()), assignee, sender),
        RawEvent::IssueComment {
            action,
            issue,
            comment,
            sender,
            pull_request,
        } => route_issue_comment(cfg, action, issue, comment, sender, pull_request.as_ref()),
        RawEvent::PullRequest {
            action,
            pull_request,
            requested_reviewer,
            after,
            sender,
        } => route_pull_request(
            cfg,
            action,
            pull_request,
            requested_reviewer.as_ref().map(|u| u.login.as_str()),
            after.as_deref(),
            sender,
        ),
        RawEvent::PullRequestReview {
            action,
            pull_request,
            review,
            ..
        } => route_pr_review(cfg, action, pull_request, review),
        RawEvent::WorkflowRun {
            action,
            workflow_run,
            ..
        } => route_workflow_run(action, workflow_run),
        RawEvent::MergeGroup {
            action,
            merge_group,
        } => route_merge_group(action, merge_group),
        RawEvent::Discussion {
            action, discussion, ..
        } => {
            let d = Decision::new(ResourceType::Discussion, discussion.number);
            if action == "created" {
                d.job(Job::DiscussionResearch).finish()
            } else {
                d.skip(format!("unhandled discussion action '{action}'"))
            }
        }
        RawEvent::DiscussionComment {
            action,
            discussion,
            comment,
            sender,
        } => route_discussion_comment(cfg, action, discussion.number, comment, sender),
        RawEvent::WorkflowDispatch { inputs, .. } => route_dispatch(inputs),
        RawEvent::Unknown => {
            Decision::new(ResourceType::Issue, 0).skip("unrecognized event")
        }
    }
}

fn route_issue(
    cfg: &RouterConfig,
    action: &str,
    issue: &IssuePayload,
    removed_label: Option<&str>,
    assignee: &Option<crate::event::UserRef>,
    sender: &crate::event::UserRef,
) -> RoutingDecision {
    let labels = issue.label_names();
    let d = Decision::new(ResourceType::Issue, issue.number);
    if let Some(reason) =
        universal_skip(cfg, &issue.title, &labels, None, &sender.login, action)
    {
        return d.skip(reason);
    }

    let is_sub = issue.parent_issue_number.is_some() || phase_from_title(&issue.title).is_some();
    let triaged = issue.has_label(LABEL_TRIAGED);
    let groomed = issue.has_label(LABEL_GROOMED);
    let needs_info = issue.has_label(LABEL_NEEDS_INFO);
    let bot_assigned = issue.has_assignee(&cfg.bot_username);
    let orchestratable = issue.has_sub_issues() || body_has_main_state(issue.body.as_deref());

    match action {
        "opened" => {
            if is_sub {
                d.skip("sub-issues are not triaged")
            } else {
                d.job(Job::IssueTriage).finish()
            }
        }
        "unlabeled" => {
            if removed_label == Some(LABEL_TRIAGED) && !is_sub {
                d.job(Job::IssueTriage).finish()
            } else {
                d.skip("unlabel does not affect routing")
            }
        }
        "edited" => {
            if bot_assigned {
                if matches!(
                    issue.project_status.as_deref(),
                    Some("Done" | "Blocked" | "Error")
                ) {
                    return d.skip("issue is in a terminal project status");
                }
                if is_sub {
                    d.job(Job::IssueIterate)
                        .parent(issue.parent_issue_number)
                        .finish()
                } else if orchestratable {
                    d.job(Job::IssueOrchestrate).finish()
                } else {
                    d.job(Job::IssueIterate).finish()
                }
            } else if !triaged && !is_sub {
                d.job(Job::IssueTriage).finish()
            } else if triaged && !groomed && !needs_info && !is_sub {
                d.job(Job::IssueGroom).finish()
            } else {
                d.skip("edit does not affect routing")
            }
        }
        "closed" => match issue.parent_issue_number {
            Some(parent) => Decision::new(ResourceType::Issue, parent)
                .job(Job::IssueOrchestrate)
                .trigger(Trigger::SubIssueClosed)
                .context("closed_sub_issue", issue.number)
                .finish(),
            None => d.skip("closed issue has no parent to orchestrate"),
        },
        "assigned" => {
            if assignee.as_ref().map(|a| a.login.as_str()) != Some(cfg.bot_username.as_str()) {
                return d.skip("assigned to a non-automation account");
            }
            if !triaged && !orchestratable && !is_sub {
                return d.skip("issue is not triaged and has no sub-issues");
            }
            let branch = branch_for_issue(issue);
            if is_sub {
                d.job(Job::IssueIterate)
                    .parent(issue.parent_issue_number)
                    .branch(branch)
                    .finish()
            } else if orchestratable {
                d.job(Job::IssueOrchestrate).branch(branch).finish()
            } else {
                d.job(Job::IssueIterate).branch(branch).finish()
            }
        }
        _ => d.skip(format!("unhandled issue action '{action}'")),
    }
}

fn route_issue_comment(
    cfg: &RouterConfig,
    action: &str,
    issue: &IssuePayload,
    comment: &crate::event::CommentPayload,
    sender: &crate::event::UserRef,
    pull_request: Option<&PrPayload>,
) -> RoutingDecision {
    let d = Decision::new(ResourceType::Issue, issue.number);
    if action != "created" {
        return d.skip(format!("unhandled comment action '{action}'"));
    }
    if cfg.is_bot_actor(&sender.login) {
        return d.skip(format!(
            "Comment made by bot/automated account ({})",
            sender.login
        ));
    }
    let labels = issue.label_names();
    if let Some(reason) = universal_skip(cfg, &issue.title, &labels, None, &sender.login, action) {
        return d.skip(reason);
    }

    let body = comment.body.trim();
    let ctx = |pivot: Option<String>| CommentContext {
        comment_id: comment.id,
        author: sender.login.clone(),
        body: comment.body.clone(),
        pivot_description: pivot,
    };

    if body.starts_with("/reset") {
        return d
            .job(Job::IssueReset)
            .comment(ctx(None), Reaction::Eyes)
            .finish();
    }

    if let Some(rest) = body.strip_prefix("/pivot") {
        let description = rest.trim().to_string();
        let target = issue.parent_issue_number.unwrap_or(issue.number);
        return Decision::new(ResourceType::Issue, target)
            .job(Job::IssuePivot)
            .parent(issue.parent_issue_number)
            .comment(ctx(Some(description.clone())), Reaction::Eyes)
            .context("pivot_description", description)
            .finish();
    }

    let is_go_command = ["/implement", "/continue", "/lfg"]
        .iter()
        .any(|c| body.starts_with(c));
    if is_go_command {
        if issue.is_pull_request() {
            return route_pr_go_command(cfg, issue.number, comment, sender, pull_request);
        }
        // On an issue: route like assignment, grooming first when needed.
        let triaged = issue.has_label(LABEL_TRIAGED);
        let groomed = issue.has_label(LABEL_GROOMED);
        let orchestratable = issue.has_sub_issues() || body_has_main_state(issue.body.as_deref());
        let is_sub =
            issue.parent_issue_number.is_some() || phase_from_title(&issue.title).is_some();
        if triaged && !groomed && !is_sub {
            return d
                .job(Job::IssueGroom)
                .comment(ctx(None), Reaction::Rocket)
                .finish();
        }
        if !triaged && !orchestratable && !is_sub {
            return d.skip("issue is not triaged and has no sub-issues");
        }
        let branch = branch_for_issue(issue);
        let job = if is_sub {
            Job::IssueIterate
        } else if orchestratable {
            Job::IssueOrchestrate
        } else {
            Job::IssueIterate
        };
        return d
            .job(job)
            .parent(issue.parent_issue_number)
            .branch(branch)
            .comment(ctx(None), Reaction::Rocket)
            .finish();
    }

    if body.contains("@claude") {
        return d
            .job(Job::IssueComment)
            .comment(ctx(None), Reaction::Eyes)
            .finish();
    }

    d.skip("comment carries no command or mention")
}

/// `/implement` family on a PR: respond to the newest live
/// changes-requested review.
fn route_pr_go_command(
    cfg: &RouterConfig,
    pr_number: u64,
    comment: &crate::event::CommentPayload,
    sender: &crate::event::UserRef,
    pull_request: Option<&PrPayload>,
) -> RoutingDecision {
    let d = Decision::new(ResourceType::Pr, pr_number);
    let Some(pr) = pull_request else {
        return d.skip("comment references a PR the event does not carry");
    };
    if pr.draft {
        return d.skip("PR is a draft");
    }
    if pr
        .reviews
        .iter()
        .any(|r| r.state.eq_ignore_ascii_case("approved"))
    {
        return d.skip("PR is already approved");
    }
    let newest_changes = pr
        .reviews
        .iter()
        .filter(|r| r.state.eq_ignore_ascii_case("changes_requested"))
        .max_by_key(|r| r.submitted_at);
    let job = match newest_changes {
        Some(review) if cfg.is_claude_reviewer(&review.user.login) => Job::PrResponse,
        Some(_) => Job::PrHumanResponse,
        None => Job::PrResponse,
    };
    d.job(job)
        .comment(
            CommentContext {
                comment_id: comment.id,
                author: sender.login.clone(),
                body: comment.body.clone(),
                pivot_description: None,
            },
            Reaction::Rocket,
        )
        .review(ReviewDecision::ChangesRequested)
        .finish()
}

fn route_pull_request(
    cfg: &RouterConfig,
    action: &str,
    pr: &PrPayload,
    requested_reviewer: Option<&str>,
    after: Option<&str>,
    sender: &crate::event::UserRef,
) -> RoutingDecision {
    let labels = pr.label_names();
    let d = Decision::new(ResourceType::Pr, pr.number);
    if let Some(reason) = universal_skip(
        cfg,
        &pr.title,
        &labels,
        Some(&pr.head.ref_name),
        &sender.login,
        action,
    ) {
        return d.skip(reason);
    }

    match action {
        "synchronize" => {
            let head = pr.head.ref_name.as_str();
            if head == "main" || head.starts_with("gh-readonly-queue/") {
                return d.skip("push to main or merge-queue branch");
            }
            if pr
                .linked_issue_labels
                .iter()
                .any(|l| l == LABEL_TEST_AUTOMATION)
            {
                return d.skip("linked issue has test:automation label");
            }
            let Some(issue) = linked_issue(pr.body.as_deref(), head) else {
                return d.skip("PR has no linked issue");
            };
            let sha = after.unwrap_or(pr.head.sha.as_str()).to_string();
            d.job(Job::PrPush)
                .parent(Some(issue))
                .context("linked_issue", issue)
                .context("ci_commit_sha", &sha)
                .workflow(WorkflowMeta {
                    run_id: None,
                    run_url: None,
                    commit_sha: Some(sha),
                })
                .finish()
        }
        "closed" if pr.merged == Some(true) => {
            let Some(issue) = linked_issue(pr.body.as_deref(), &pr.head.ref_name) else {
                return d.skip("merged PR has no linked issue");
            };
            Decision::new(ResourceType::Issue, issue)
                .job(Job::IssueIterate)
                .trigger(Trigger::PrMerged)
                .context("merged_pr", pr.number)
                .finish()
        }
        "review_requested" => {
            if pr.draft {
                return d.skip("PR is a draft");
            }
            match requested_reviewer {
                Some(user)
                    if user == cfg.bot_username || user == cfg.reviewer_username =>
                {
                    d.job(Job::PrReviewRequested).finish()
                }
                _ => d.skip("review requested from a non-automation account"),
            }
        }
        _ => d.skip(format!("unhandled pull_request action '{action}'")),
    }
}

fn route_pr_review(
    cfg: &RouterConfig,
    action: &str,
    pr: &PrPayload,
    review: &ReviewPayload,
) -> RoutingDecision {
    let d = Decision::new(ResourceType::Pr, pr.number);
    if action != "submitted" {
        return d.skip(format!("unhandled review action '{action}'"));
    }
    let author = review.user.login.as_str();
    match review.state.to_ascii_lowercase().as_str() {
        "approved" if author == cfg.reviewer_username => d
            .job(Job::PrReviewApproved)
            .review(ReviewDecision::Approved)
            .finish(),
        "approved" => d.skip("approval from a non-automation reviewer"),
        state @ ("changes_requested" | "commented") => {
            let decision = if state == "changes_requested" {
                ReviewDecision::ChangesRequested
            } else {
                ReviewDecision::Commented
            };
            if cfg.is_claude_reviewer(author) {
                d.job(Job::PrResponse).review(decision).finish()
            } else if pr.head.ref_name.starts_with("claude/") {
                d.job(Job::PrHumanResponse).review(decision).finish()
            } else {
                d.skip("review on a non-automation PR")
            }
        }
        other => d.skip(format!("unhandled review state '{other}'")),
    }
}

fn route_workflow_run(action: &str, run: &crate::event::WorkflowRunPayload) -> RoutingDecision {
    if action != "completed" {
        return Decision::new(ResourceType::Issue, 0)
            .skip(format!("unhandled workflow_run action '{action}'"));
    }
    if run.head_branch.starts_with("test/") {
        return Decision::new(ResourceType::Issue, 0)
            .skip(format!("Branch {} is a test branch", run.head_branch));
    }
    let Some(caps) = issue_branch_re().captures(&run.head_branch) else {
        return Decision::new(ResourceType::Issue, 0)
            .skip("workflow run is not on an automation branch");
    };
    let issue: u64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    if run
        .linked_issue_labels
        .iter()
        .any(|l| l == LABEL_TEST_AUTOMATION)
    {
        return Decision::new(ResourceType::Issue, issue)
            .skip("linked issue has test:automation label");
    }
    let phase: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let ci = run.conclusion.as_deref().and_then(CiResult::from_conclusion);
    let mut d = Decision::new(ResourceType::Issue, issue)
        .job(Job::IssueIterate)
        .trigger(Trigger::WorkflowRunCompleted)
        .ci(ci)
        .context("ci_result", run.conclusion.clone().unwrap_or_default())
        .context("ci_run_url", &run.html_url)
        .context("ci_commit_sha", &run.head_sha)
        .workflow(WorkflowMeta {
            run_id: Some(run.id),
            run_url: Some(run.html_url.clone()),
            commit_sha: Some(run.head_sha.clone()),
        });
    if let Some(phase) = phase {
        d = d.context("phase", phase);
    }
    d.finish()
}

fn route_merge_group(action: &str, group: &crate::event::MergeGroupPayload) -> RoutingDecision {
    let pr_number: Option<u64> = merge_group_pr_re()
        .captures(&group.head_ref)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    let Some(pr_number) = pr_number else {
        return Decision::new(ResourceType::Issue, 0)
            .skip("merge group head_ref carries no PR number");
    };
    let issue = group.pull_request.as_ref().and_then(|pr| {
        linked_issue(pr.body.as_deref(), pr.head_ref.as_deref().unwrap_or(""))
    });
    let Some(issue) = issue else {
        return Decision::new(ResourceType::Issue, 0)
            .skip("cannot resolve the issue behind the merge group entry");
    };
    let d = Decision::new(ResourceType::Issue, issue)
        .job(Job::MergeQueueLogging)
        .context("pr_number", pr_number);
    if action == "destroyed" {
        d.ci(Some(CiResult::Failure)).finish()
    } else {
        d.finish()
    }
}

fn route_discussion_comment(
    cfg: &RouterConfig,
    action: &str,
    number: u64,
    comment: &crate::event::CommentPayload,
    sender: &crate::event::UserRef,
) -> RoutingDecision {
    let d = Decision::new(ResourceType::Discussion, number);
    if action != "created" {
        return d.skip(format!("unhandled discussion_comment action '{action}'"));
    }
    // Bot comments are skipped to prevent reply loops.
    if cfg.is_bot_actor(&sender.login) {
        return d.skip(format!(
            "Comment made by bot/automated account ({})",
            sender.login
        ));
    }
    let body = comment.body.trim();
    let job = if body.starts_with("/summarize") {
        Job::DiscussionSummarize
    } else if body.starts_with("/plan") {
        Job::DiscussionPlan
    } else if body.starts_with("/complete") || body.starts_with("/lfg") {
        Job::DiscussionComplete
    } else if body.starts_with("/research") {
        Job::DiscussionResearch
    } else {
        return d.skip("discussion comment carries no command");
    };
    d.job(job)
        .comment(
            CommentContext {
                comment_id: comment.id,
                author: sender.login.clone(),
                body: comment.body.clone(),
                pivot_description: None,
            },
            Reaction::Eyes,
        )
        .finish()
}

/// Manual dispatch: a synthetic assignment on the given resource,
/// respecting triage/grooming gating when the inputs carry labels.
fn route_dispatch(inputs: &DispatchInputs) -> RoutingDecision {
    let Some(number) = inputs.resource_number else {
        return Decision::new(ResourceType::Issue, 0)
            .skip("dispatch without a resource number");
    };
    let mut d = Decision::new(ResourceType::Issue, number);
    let labels = inputs.labels.clone().unwrap_or_default();
    let has = |l: &str| labels.iter().any(|x| x == l);
    let job = if inputs.labels.is_some() && !has(LABEL_TRIAGED) {
        Job::IssueTriage
    } else if inputs.labels.is_some() && !has(LABEL_GROOMED) {
        Job::IssueGroom
    } else if inputs.has_sub_issues == Some(true) {
        Job::IssueOrchestrate
    } else {
        Job::IssueIterate
    };
    d = d.job(job).parent(inputs.parent_issue_number);
    if let Some(t) = inputs.trigger_type.as_deref().and_then(Trigger::parse) {
        d = d.trigger(t);
    }
    d.finish()
}
