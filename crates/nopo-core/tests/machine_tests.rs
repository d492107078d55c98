use nopo_core::action::{ActionKind, AgentKind, FailureKind};
use nopo_core::machine::{run, State};
use nopo_core::markdown;
use nopo_core::types::{
    CiResult, CommentContext, IssueInfo, IssueState, MachineContext, PrInfo, PrState,
    ProjectStatus, ReviewDecision, SubIssue, Trigger, WorkflowMeta,
};

const OPEN_TODOS: &str = "## Todos\n\n- [ ] Build the thing\n- [ ] Test the thing\n";
const DONE_TODOS: &str = "## Todos\n\n- [x] Build the thing\n- [x] Test the thing\n- [ ] [Manual] Smoke test on device\n";

fn issue(number: u64, labels: &[&str], body: &str) -> IssueInfo {
    IssueInfo {
        number,
        title: "Add dark mode".into(),
        body: markdown::parse(body),
        state: IssueState::Open,
        project_status: None,
        iteration: 0,
        failures: 0,
        assignees: Vec::new(),
        labels: labels.iter().map(|l| (*l).to_string()).collect(),
        sub_issues: Vec::new(),
        comments: Vec::new(),
        branch: None,
        pr: None,
        parent_issue_number: None,
    }
}

fn draft_pr(number: u64) -> PrInfo {
    PrInfo {
        number,
        state: PrState::Open,
        is_draft: true,
        title: "Add dark mode".into(),
        head_ref: "claude/issue/42".into(),
        base_ref: "main".into(),
        labels: Vec::new(),
        reviews: Vec::new(),
        check_state: None,
        review_decision: None,
    }
}

fn ctx(trigger: Trigger, issue: IssueInfo) -> MachineContext {
    let pr = issue.pr.clone();
    let branch = issue.branch.clone();
    MachineContext {
        trigger,
        owner: "kevin-mind".into(),
        repo: "nopo".into(),
        parent_issue: None,
        current_sub_issue: None,
        current_phase: None,
        total_phases: 0,
        has_pr: pr.is_some(),
        pr,
        ci_result: None,
        review_decision: None,
        has_branch: branch.is_some(),
        branch,
        comment_context: None,
        max_retries: 5,
        bot_username: "nopo-bot".into(),
        reviewer_username: "nopo-reviewer".into(),
        workflow: WorkflowMeta::default(),
        issue,
    }
}

fn action_names(outcome: &nopo_core::machine::Outcome) -> Vec<&'static str> {
    outcome.actions.iter().map(|a| a.kind.type_name()).collect()
}

// ── §8 scenario 1 ────────────────────────────────────────────────────────

#[test]
fn fresh_issue_triages() {
    let outcome = run(&ctx(Trigger::IssueTriage, issue(17, &[], "")));
    assert_eq!(outcome.state, State::Triaging);
    assert!(outcome.retrigger);
    let names = action_names(&outcome);
    let run_pos = names.iter().position(|n| *n == "run_claude").unwrap();
    let apply_pos = names.iter().position(|n| *n == "apply_triage_output").unwrap();
    let status_pos = names
        .iter()
        .position(|n| *n == "update_project_status")
        .unwrap();
    assert!(run_pos < apply_pos && apply_pos < status_pos);
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::RunClaude { kind: AgentKind::Triage, .. }
    )));
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::UpdateProjectStatus { status: ProjectStatus::Triaged, .. }
    )));
}

// ── §8 scenario 2 ────────────────────────────────────────────────────────

#[test]
fn ready_issue_transitions_to_review() {
    let mut base = issue(42, &["triaged", "groomed"], DONE_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.branch = Some("claude/issue/42".into());
    base.project_status = Some(ProjectStatus::InProgress);
    base.pr = Some(draft_pr(7));
    let mut context = ctx(Trigger::IssueAssigned, base);
    context.ci_result = Some(CiResult::Success);
    let outcome = run(&context);

    assert_eq!(outcome.state, State::Reviewing);
    assert_eq!(
        action_names(&outcome),
        vec![
            "clear_failures",
            "mark_pr_ready",
            "update_project_status",
            "request_reviewer",
        ]
    );
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::UpdateProjectStatus { status: ProjectStatus::InReview, .. }
    )));
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::RequestReviewer { username, .. } if username == "nopo-bot"
    )));
}

// ── §8 scenarios 3 & 4 ───────────────────────────────────────────────────

fn ci_failure_ctx(failures: u32) -> MachineContext {
    let mut base = issue(42, &["triaged", "groomed"], OPEN_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.branch = Some("claude/issue/42".into());
    base.project_status = Some(ProjectStatus::InProgress);
    base.failures = failures;
    base.pr = Some(draft_pr(7));
    let mut context = ctx(Trigger::WorkflowRunCompleted, base);
    context.ci_result = Some(CiResult::Failure);
    context.workflow = WorkflowMeta {
        run_id: Some(555),
        run_url: Some("https://ci.example/runs/555".into()),
        commit_sha: Some("cisha".into()),
    };
    context
}

#[test]
fn ci_failure_below_cap_retries() {
    let outcome = run(&ci_failure_ctx(4));
    assert_eq!(outcome.state, State::IteratingFix);
    let names = action_names(&outcome);
    assert_eq!(
        names,
        vec![
            "record_failure",
            "update_project_status",
            "increment_iteration",
            "append_history",
            "run_claude",
            "apply_iteration_output",
        ]
    );
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::RecordFailure { kind: FailureKind::Ci, .. }
    )));
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::RunClaude { kind: AgentKind::Retry, .. }
    )));
    // History rows from CI runs are keyed by the run id.
    assert!(outcome
        .actions
        .iter()
        .any(|a| a.idempotency_key.as_deref() == Some("555")));
}

#[test]
fn ci_failure_at_cap_blocks_and_unassigns() {
    let outcome = run(&ci_failure_ctx(5));
    assert_eq!(outcome.state, State::Blocked);
    assert_eq!(
        action_names(&outcome),
        vec!["update_project_status", "unassign_user", "append_history"]
    );
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::UpdateProjectStatus { status: ProjectStatus::Blocked, .. }
    )));
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::UnassignUser { username, .. } if username == "nopo-bot"
    )));
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::AppendHistory { message, .. }
            if message == "Blocked: Max failures reached (5)"
    )));
}

// ── §8 scenario 5 ────────────────────────────────────────────────────────

#[test]
fn pivot_blocks_and_records() {
    let mut context = ctx(Trigger::IssuePivot, issue(100, &["triaged", "groomed"], ""));
    context.comment_context = Some(CommentContext {
        comment_id: 900,
        author: "alice".into(),
        body: "/pivot rewrite auth in module X".into(),
        pivot_description: Some("rewrite auth in module X".into()),
    });
    let outcome = run(&context);
    assert_eq!(outcome.state, State::Pivoting);
    assert_eq!(
        action_names(&outcome),
        vec!["update_project_status", "append_history"]
    );
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::AppendHistory { message, .. }
            if message == "Pivot requested: rewrite auth in module X"
    )));
}

// ── §8 scenario 6 ────────────────────────────────────────────────────────

#[test]
fn approved_review_awaits_merge() {
    let mut base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.pr = Some(draft_pr(7));
    let mut context = ctx(Trigger::PrReviewApproved, base);
    context.review_decision = Some(ReviewDecision::Approved);
    let outcome = run(&context);
    assert_eq!(outcome.state, State::AwaitingMerge);
    assert_eq!(action_names(&outcome), vec!["append_history"]);
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::AppendHistory { message, .. }
            if message == "Review approved, awaiting merge"
    )));
}

// ── Detection precedence ─────────────────────────────────────────────────

#[test]
fn done_with_merged_pr_is_terminal() {
    let mut base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    base.project_status = Some(ProjectStatus::Done);
    let mut pr = draft_pr(7);
    pr.state = PrState::Merged;
    base.pr = Some(pr);
    let outcome = run(&ctx(Trigger::IssueAssigned, base));
    assert_eq!(outcome.state, State::Done);
    assert!(outcome.actions.is_empty());
}

#[test]
fn blocked_status_short_circuits() {
    let mut base = issue(9, &["triaged", "groomed"], OPEN_TODOS);
    base.project_status = Some(ProjectStatus::Blocked);
    let outcome = run(&ctx(Trigger::IssueAssigned, base));
    assert_eq!(outcome.state, State::AlreadyBlocked);
    assert!(outcome.actions.is_empty());
}

#[test]
fn unassigned_sub_issue_idles() {
    let mut base = issue(101, &[], OPEN_TODOS);
    base.parent_issue_number = Some(100);
    let outcome = run(&ctx(Trigger::IssueAssigned, base));
    assert_eq!(outcome.state, State::SubIssueIdle);
    assert!(outcome.actions.is_empty());
}

#[test]
fn status_ready_reads_as_in_progress() {
    // `Ready` on the board must not look terminal or blocked.
    let mut base = issue(9, &["triaged", "groomed"], OPEN_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.project_status = Some(ProjectStatus::Ready);
    base.branch = Some("claude/issue/9".into());
    base.pr = Some(draft_pr(7));
    let outcome = run(&ctx(Trigger::IssueAssigned, base));
    assert_eq!(outcome.state, State::Iterating);
}

// ── Orchestration ────────────────────────────────────────────────────────

fn sub(number: u64, phase: u32, status: Option<ProjectStatus>, state: IssueState) -> SubIssue {
    SubIssue {
        number,
        title: format!("[Phase {phase}] Step {phase}"),
        body: markdown::parse(OPEN_TODOS),
        state,
        project_status: status,
        assignees: Vec::new(),
        labels: Vec::new(),
        branch: None,
        pr: None,
    }
}

#[test]
fn orchestration_dispatches_first_open_phase() {
    let mut base = issue(100, &["triaged", "groomed"], "");
    base.assignees = vec!["nopo-bot".into()];
    base.sub_issues = vec![
        sub(101, 1, Some(ProjectStatus::Done), IssueState::Closed),
        sub(102, 2, None, IssueState::Open),
        sub(103, 3, None, IssueState::Open),
    ];
    let mut context = ctx(Trigger::IssueOrchestrate, base);
    context.current_sub_issue = Some(context.issue.sub_issues[1].clone());
    context.current_phase = Some(2);
    context.total_phases = 3;

    let outcome = run(&context);
    assert_eq!(outcome.state, State::OrchestrationRunning);
    assert!(outcome.retrigger);
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::AddAssignees { issue_number: 102, usernames }
            if usernames == &vec!["nopo-bot".to_string()]
    )));
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::AppendHistory { issue_number: 100, message, .. }
            if message == "Phase 2 dispatched"
    )));
}

#[test]
fn orchestration_completes_when_all_phases_done() {
    let mut base = issue(100, &["triaged", "groomed"], "");
    base.assignees = vec!["nopo-bot".into()];
    base.project_status = Some(ProjectStatus::InProgress);
    base.sub_issues = vec![
        sub(101, 1, Some(ProjectStatus::Done), IssueState::Closed),
        sub(102, 2, None, IssueState::Closed),
    ];
    let context = ctx(Trigger::IssueOrchestrate, base);
    let outcome = run(&context);
    assert_eq!(outcome.state, State::OrchestrationComplete);
    assert_eq!(
        action_names(&outcome),
        vec!["update_project_status", "close_issue", "append_history"]
    );
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::UpdateProjectStatus { status: ProjectStatus::Done, .. }
    )));
}

#[test]
fn superseded_sub_issues_do_not_block_completion() {
    let mut base = issue(100, &["triaged", "groomed"], "");
    base.assignees = vec!["nopo-bot".into()];
    base.project_status = Some(ProjectStatus::InProgress);
    let mut dropped = sub(103, 3, None, IssueState::Open);
    dropped.labels = vec!["superseded".into()];
    base.sub_issues = vec![
        sub(101, 1, Some(ProjectStatus::Done), IssueState::Closed),
        dropped,
    ];
    let outcome = run(&ctx(Trigger::IssueOrchestrate, base));
    assert_eq!(outcome.state, State::OrchestrationComplete);
}

// ── PR review request gating ─────────────────────────────────────────────

#[test]
fn review_request_with_green_ci_reviews() {
    let mut base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.pr = Some(draft_pr(7));
    let mut context = ctx(Trigger::PrReviewRequested, base);
    context.ci_result = Some(CiResult::Success);
    let outcome = run(&context);
    assert_eq!(outcome.state, State::PrReviewing);
    assert_eq!(action_names(&outcome), vec!["run_claude", "apply_review_output"]);
}

#[test]
fn review_request_with_unknown_ci_waits() {
    let mut base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.pr = Some(draft_pr(7));
    let outcome = run(&ctx(Trigger::PrReviewRequested, base));
    assert_eq!(outcome.state, State::PrReviewAssigned);
    assert!(outcome.retrigger);
}

#[test]
fn review_request_with_red_ci_skips_review() {
    let mut base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.pr = Some(draft_pr(7));
    let mut context = ctx(Trigger::PrReviewRequested, base);
    context.ci_result = Some(CiResult::Failure);
    let outcome = run(&context);
    assert_eq!(outcome.state, State::PrReviewSkipped);
}

// ── Review responses ─────────────────────────────────────────────────────

#[test]
fn changes_requested_iterates_with_pr_response() {
    let mut base = issue(9, &["triaged", "groomed"], OPEN_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.branch = Some("claude/issue/9".into());
    base.pr = Some(draft_pr(7));
    let mut context = ctx(Trigger::PrReviewSubmitted, base);
    context.review_decision = Some(ReviewDecision::ChangesRequested);
    let outcome = run(&context);
    assert_eq!(outcome.state, State::Iterating);
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::RunClaude { kind: AgentKind::PrResponse, .. }
    )));
    assert!(outcome
        .actions
        .iter()
        .any(|a| a.kind.type_name() == "apply_pr_response_output"));
}

// ── PR push ──────────────────────────────────────────────────────────────

#[test]
fn pr_push_reverts_to_draft_and_in_progress() {
    let mut base = issue(9, &["triaged", "groomed"], OPEN_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    let mut pr = draft_pr(21);
    pr.is_draft = false;
    base.pr = Some(pr);
    let outcome = run(&ctx(Trigger::PrPush, base));
    assert_eq!(outcome.state, State::PrPush);
    assert_eq!(
        action_names(&outcome),
        vec![
            "convert_pr_to_draft",
            "remove_reviewer",
            "update_project_status",
            "append_history",
        ]
    );
}

// ── Merged PRs ───────────────────────────────────────────────────────────

#[test]
fn merged_standalone_pr_closes_out() {
    let mut base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    base.assignees = vec!["nopo-bot".into()];
    base.pr = Some(draft_pr(7));
    let outcome = run(&ctx(Trigger::PrMerged, base));
    assert_eq!(outcome.state, State::Done);
    assert_eq!(
        action_names(&outcome),
        vec!["update_project_status", "close_issue", "append_history"]
    );
}

#[test]
fn merged_sub_issue_pr_continues_orchestration() {
    let mut base = issue(102, &[], DONE_TODOS);
    base.parent_issue_number = Some(100);
    base.assignees = vec!["nopo-bot".into()];
    base.pr = Some(draft_pr(7));
    let outcome = run(&ctx(Trigger::PrMerged, base));
    assert_eq!(outcome.state, State::OrchestrationRunning);
    assert!(outcome
        .actions
        .iter()
        .any(|a| a.kind.type_name() == "close_issue"));
}

// ── Invalid iteration guard ──────────────────────────────────────────────

#[test]
fn assigned_issue_without_todos_is_invalid() {
    let mut base = issue(9, &["triaged", "groomed"], "## Description\n\nWords.\n");
    base.assignees = vec!["nopo-bot".into()];
    let outcome = run(&ctx(Trigger::IssueAssigned, base));
    assert_eq!(outcome.state, State::InvalidIteration);
    assert_eq!(
        action_names(&outcome),
        vec!["append_history", "add_comment", "update_project_status"]
    );
}

// ── Reset ────────────────────────────────────────────────────────────────

#[test]
fn reset_reenters_backlog_and_clears_sub_issues() {
    let mut base = issue(100, &["triaged", "groomed"], OPEN_TODOS);
    base.sub_issues = vec![
        sub(101, 1, Some(ProjectStatus::InProgress), IssueState::Open),
        sub(102, 2, None, IssueState::Open),
    ];
    let outcome = run(&ctx(Trigger::IssueReset, base));
    assert_eq!(outcome.state, State::Resetting);
    assert!(outcome.retrigger);
    let names = action_names(&outcome);
    assert_eq!(
        names,
        vec![
            "reset_issue",
            "update_project_status",
            "clear_failures",
            "remove_from_project",
            "remove_from_project",
        ]
    );
    assert!(outcome.actions.iter().any(|a| matches!(
        &a.kind,
        ActionKind::UpdateProjectStatus { status: ProjectStatus::Backlog, .. }
    )));
}

// ── Logging states ───────────────────────────────────────────────────────

#[test]
fn merge_queue_states_log_one_row() {
    let base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    let outcome = run(&ctx(Trigger::MergeQueueEntered, base.clone()));
    assert_eq!(outcome.state, State::MergeQueueLogging);
    assert_eq!(action_names(&outcome), vec!["append_history"]);

    let mut failure = ctx(Trigger::MergeQueueEntered, base);
    failure.ci_result = Some(CiResult::Failure);
    let outcome = run(&failure);
    assert_eq!(outcome.state, State::MergeQueueFailureLogging);
}

#[test]
fn deploy_states_split_on_ci_result() {
    let base = issue(9, &["triaged", "groomed"], DONE_TODOS);
    assert_eq!(
        run(&ctx(Trigger::DeployedStage, base.clone())).state,
        State::DeployedStageLogging
    );
    let mut failed = ctx(Trigger::DeployedProd, base);
    failed.ci_result = Some(CiResult::Failure);
    assert_eq!(run(&failed).state, State::DeployedProdFailureLogging);
}

// ── §8 property 1: determinism ───────────────────────────────────────────

#[test]
fn runs_are_deterministic() {
    let contexts = vec![
        ctx(Trigger::IssueTriage, issue(17, &[], "")),
        ci_failure_ctx(4),
        ci_failure_ctx(5),
        ctx(Trigger::MergeQueueEntered, issue(9, &["triaged", "groomed"], DONE_TODOS)),
    ];
    for context in contexts {
        let first = run(&context);
        let second = run(&context);
        assert_eq!(first, second);
        let a = serde_json::to_string(&first).unwrap();
        let b = serde_json::to_string(&second).unwrap();
        assert_eq!(a, b);
    }
}
