use nopo_core::event::{
    CommentPayload, GitRefPayload, IssuePayload, LabelRef, MergeGroupPayload, MergeGroupPr,
    PrPayload, RawEvent, ReviewPayload, SubIssuesSummary, UserRef, WorkflowRunPayload,
};
use nopo_core::router::{route, RouterConfig};
use nopo_core::types::{CiResult, Job, Reaction, ResourceType, Trigger};

fn cfg() -> RouterConfig {
    RouterConfig::default()
}

fn user(login: &str) -> UserRef {
    UserRef {
        login: login.into(),
    }
}

fn labels(names: &[&str]) -> Vec<LabelRef> {
    names
        .iter()
        .map(|n| LabelRef {
            name: (*n).to_string(),
        })
        .collect()
}

fn issue(number: u64, title: &str, label_names: &[&str]) -> IssuePayload {
    IssuePayload {
        number,
        title: title.into(),
        labels: labels(label_names),
        ..IssuePayload::default()
    }
}

fn issues_event(action: &str, payload: IssuePayload, sender: &str) -> RawEvent {
    RawEvent::Issues {
        action: action.into(),
        issue: payload,
        label: None,
        assignee: None,
        sender: user(sender),
    }
}

// ── §8 scenario 1 ────────────────────────────────────────────────────────

#[test]
fn issue_opened_routes_to_triage() {
    let decision = route(
        &issues_event("opened", issue(17, "Add dark mode", &[]), "alice"),
        &cfg(),
    );
    assert!(!decision.skip);
    assert_eq!(decision.job, Some(Job::IssueTriage));
    assert_eq!(decision.trigger, Some(Trigger::IssueTriage));
    assert_eq!(decision.resource_number, 17);
    assert_eq!(decision.concurrency_group, "claude-job-issue-17");
    assert!(!decision.cancel_in_progress);
}

// ── Universal skip rules ─────────────────────────────────────────────────

#[test]
fn test_automation_label_skips() {
    let decision = route(
        &issues_event(
            "opened",
            issue(5, "Regular title", &["test:automation"]),
            "alice",
        ),
        &cfg(),
    );
    assert!(decision.skip);
    assert!(!decision.skip_reason.is_empty());
}

#[test]
fn test_title_without_label_skips() {
    let decision = route(
        &issues_event("opened", issue(5, "[TEST] probe", &[]), "alice"),
        &cfg(),
    );
    assert!(decision.skip);
}

#[test]
fn test_title_with_test_label_is_testing_mode() {
    let decision = route(
        &issues_event("opened", issue(5, "[TEST] probe", &["test:automation"]), "alice"),
        &cfg(),
    );
    assert!(!decision.skip);
    assert_eq!(decision.job, Some(Job::IssueTriage));
}

#[test]
fn skip_dispatch_label_skips() {
    let decision = route(
        &issues_event("opened", issue(5, "Anything", &["skip-dispatch"]), "alice"),
        &cfg(),
    );
    assert!(decision.skip);
}

#[test]
fn bot_edit_skips_with_actor_in_reason() {
    let decision = route(
        &issues_event("edited", issue(5, "Anything", &["triaged"]), "nopo-bot"),
        &cfg(),
    );
    assert!(decision.skip);
    assert_eq!(
        decision.skip_reason,
        "Edit made by bot/automated account (nopo-bot)"
    );
}

// ── Issue lifecycle routing ──────────────────────────────────────────────

#[test]
fn edited_triaged_ungroomed_routes_to_groom() {
    let decision = route(
        &issues_event("edited", issue(8, "Add search", &["triaged"]), "alice"),
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueGroom));
}

#[test]
fn edited_needs_info_does_not_groom() {
    let decision = route(
        &issues_event(
            "edited",
            issue(8, "Add search", &["triaged", "needs-info"]),
            "alice",
        ),
        &cfg(),
    );
    assert!(decision.skip);
}

#[test]
fn edited_with_bot_assigned_iterates() {
    let mut payload = issue(8, "Add search", &["triaged", "groomed"]);
    payload.assignees = vec![user("nopo-bot")];
    let decision = route(&issues_event("edited", payload, "alice"), &cfg());
    assert_eq!(decision.job, Some(Job::IssueIterate));
    assert_eq!(decision.trigger, Some(Trigger::IssueAssigned));
}

#[test]
fn edited_terminal_status_skips() {
    let mut payload = issue(8, "Add search", &["triaged", "groomed"]);
    payload.assignees = vec![user("nopo-bot")];
    payload.project_status = Some("Done".into());
    let decision = route(&issues_event("edited", payload, "alice"), &cfg());
    assert!(decision.skip);
}

#[test]
fn edited_parent_with_sub_issues_orchestrates() {
    let mut payload = issue(8, "Epic", &["triaged", "groomed"]);
    payload.assignees = vec![user("nopo-bot")];
    payload.sub_issues_summary = Some(SubIssuesSummary { total: 3 });
    let decision = route(&issues_event("edited", payload, "alice"), &cfg());
    assert_eq!(decision.job, Some(Job::IssueOrchestrate));
}

#[test]
fn sub_issue_closed_orchestrates_parent() {
    let mut payload = issue(101, "[Phase 1] Schema", &[]);
    payload.parent_issue_number = Some(100);
    let decision = route(&issues_event("closed", payload, "alice"), &cfg());
    assert_eq!(decision.job, Some(Job::IssueOrchestrate));
    assert_eq!(decision.resource_number, 100);
    assert_eq!(decision.trigger, Some(Trigger::SubIssueClosed));
    assert_eq!(
        decision.context.get("closed_sub_issue").map(String::as_str),
        Some("101")
    );
    assert_eq!(decision.concurrency_group, "claude-job-issue-100");
}

#[test]
fn assignment_without_triage_gate_skips() {
    let payload = issue(9, "Raw idea", &[]);
    let decision = route(
        &RawEvent::Issues {
            action: "assigned".into(),
            issue: payload,
            label: None,
            assignee: Some(user("nopo-bot")),
            sender: user("alice"),
        },
        &cfg(),
    );
    assert!(decision.skip);
}

#[test]
fn assignment_computes_standalone_branch() {
    let payload = issue(9, "Add search", &["triaged", "groomed"]);
    let decision = route(
        &RawEvent::Issues {
            action: "assigned".into(),
            issue: payload,
            label: None,
            assignee: Some(user("nopo-bot")),
            sender: user("alice"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueIterate));
    assert_eq!(decision.branch.as_deref(), Some("claude/issue/9"));
}

#[test]
fn assignment_computes_phase_branch_for_sub_issue() {
    let mut payload = issue(102, "[Phase 2] Wire toggle", &[]);
    payload.parent_issue_number = Some(100);
    let decision = route(
        &RawEvent::Issues {
            action: "assigned".into(),
            issue: payload,
            label: None,
            assignee: Some(user("nopo-bot")),
            sender: user("alice"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueIterate));
    assert_eq!(decision.parent_issue, Some(100));
    assert_eq!(decision.branch.as_deref(), Some("claude/issue/100/phase-2"));
    assert_eq!(decision.concurrency_group, "claude-job-issue-100");
}

// ── Slash commands ───────────────────────────────────────────────────────

fn comment_event(payload: IssuePayload, body: &str, sender: &str) -> RawEvent {
    RawEvent::IssueComment {
        action: "created".into(),
        issue: payload,
        comment: CommentPayload {
            id: 900,
            body: body.into(),
            user: user(sender),
        },
        sender: user(sender),
        pull_request: None,
    }
}

#[test]
fn reset_command_routes_with_eyes() {
    let decision = route(&comment_event(issue(7, "Thing", &[]), "/reset", "alice"), &cfg());
    assert_eq!(decision.job, Some(Job::IssueReset));
    assert_eq!(decision.ack_reaction, Some((900, Reaction::Eyes)));
}

// §8 scenario 5: pivot on a sub-issue targets the parent.
#[test]
fn pivot_on_sub_issue_targets_parent() {
    let mut payload = issue(101, "[Phase 1] Schema", &[]);
    payload.parent_issue_number = Some(100);
    let decision = route(
        &comment_event(payload, "/pivot rewrite auth in module X", "alice"),
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssuePivot));
    assert_eq!(decision.resource_number, 100);
    assert_eq!(
        decision.context.get("pivot_description").map(String::as_str),
        Some("rewrite auth in module X")
    );
    assert_eq!(decision.ack_reaction, Some((900, Reaction::Eyes)));
}

#[test]
fn bot_comment_is_skipped_to_prevent_loops() {
    let decision = route(
        &comment_event(issue(7, "Thing", &[]), "/implement", "nopo-bot"),
        &cfg(),
    );
    assert!(decision.skip);
}

#[test]
fn implement_on_issue_grooms_first_when_needed() {
    let decision = route(
        &comment_event(issue(7, "Thing", &["triaged"]), "/implement", "alice"),
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueGroom));
    assert_eq!(decision.ack_reaction, Some((900, Reaction::Rocket)));
}

#[test]
fn go_command_on_phase_titled_issue_never_grooms() {
    // A sub-issue whose parent link has not propagated yet is still
    // recognizable by its title and must not be groomed.
    let decision = route(
        &comment_event(
            issue(101, "[Phase 1] Schema", &["triaged"]),
            "/implement",
            "alice",
        ),
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueIterate));
}

#[test]
fn lfg_on_pr_routes_by_newest_changes_requested_review() {
    let mut payload = issue(33, "Add search", &[]);
    payload.pull_request = Some(serde_json::json!({}));
    let pr = PrPayload {
        number: 33,
        title: "Add search".into(),
        draft: false,
        head: GitRefPayload {
            ref_name: "claude/issue/9".into(),
            sha: "abc".into(),
        },
        reviews: vec![
            ReviewPayload {
                user: user("human-dev"),
                state: "CHANGES_REQUESTED".into(),
                submitted_at: Some("2026-01-01T00:00:00Z".parse().unwrap()),
            },
            ReviewPayload {
                user: user("nopo-reviewer"),
                state: "CHANGES_REQUESTED".into(),
                submitted_at: Some("2026-01-02T00:00:00Z".parse().unwrap()),
            },
        ],
        ..PrPayload::default()
    };
    let decision = route(
        &RawEvent::IssueComment {
            action: "created".into(),
            issue: payload,
            comment: CommentPayload {
                id: 901,
                body: "/lfg".into(),
                user: user("alice"),
            },
            sender: user("alice"),
            pull_request: Some(pr),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::PrResponse));
    assert_eq!(decision.resource_type, ResourceType::Pr);
    assert_eq!(decision.concurrency_group, "claude-job-review-33");
    assert_eq!(decision.ack_reaction, Some((901, Reaction::Rocket)));
}

#[test]
fn mention_routes_to_issue_comment() {
    let decision = route(
        &comment_event(issue(7, "Thing", &[]), "hey @claude what is left?", "alice"),
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueComment));
}

// ── PR events ────────────────────────────────────────────────────────────

fn pr_payload(number: u64, head: &str, body: Option<&str>) -> PrPayload {
    PrPayload {
        number,
        title: "Add search".into(),
        body: body.map(str::to_string),
        head: GitRefPayload {
            ref_name: head.into(),
            sha: "headsha".into(),
        },
        base: GitRefPayload {
            ref_name: "main".into(),
            sha: String::new(),
        },
        ..PrPayload::default()
    }
}

// §8 boundary: PR push → cancel_in_progress = true.
#[test]
fn pr_push_cancels_in_progress() {
    let decision = route(
        &RawEvent::PullRequest {
            action: "synchronize".into(),
            pull_request: pr_payload(21, "claude/issue/9", Some("Fixes #9")),
            requested_reviewer: None,
            after: Some("newsha".into()),
            sender: user("alice"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::PrPush));
    assert_eq!(decision.concurrency_group, "claude-job-review-21");
    assert!(decision.cancel_in_progress);
    assert_eq!(
        decision.context.get("ci_commit_sha").map(String::as_str),
        Some("newsha")
    );
}

#[test]
fn pr_push_on_test_automation_issue_skips() {
    let mut pr = pr_payload(21, "claude/issue/9", Some("Fixes #9"));
    pr.linked_issue_labels = vec!["test:automation".into()];
    let decision = route(
        &RawEvent::PullRequest {
            action: "synchronize".into(),
            pull_request: pr,
            requested_reviewer: None,
            after: Some("newsha".into()),
            sender: user("alice"),
        },
        &cfg(),
    );
    assert!(decision.skip);
    assert_eq!(decision.skip_reason, "linked issue has test:automation label");
}

#[test]
fn pr_push_on_test_branch_skips() {
    let decision = route(
        &RawEvent::PullRequest {
            action: "synchronize".into(),
            pull_request: pr_payload(21, "test/probe", None),
            requested_reviewer: None,
            after: None,
            sender: user("alice"),
        },
        &cfg(),
    );
    assert!(decision.skip);
}

#[test]
fn review_request_to_reviewer_routes() {
    let decision = route(
        &RawEvent::PullRequest {
            action: "review_requested".into(),
            pull_request: pr_payload(21, "claude/issue/9", None),
            requested_reviewer: Some(user("nopo-reviewer")),
            after: None,
            sender: user("alice"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::PrReviewRequested));
}

#[test]
fn merged_pr_routes_to_linked_issue() {
    let mut pr = pr_payload(21, "claude/issue/9", Some("Fixes #9"));
    pr.merged = Some(true);
    let decision = route(
        &RawEvent::PullRequest {
            action: "closed".into(),
            pull_request: pr,
            requested_reviewer: None,
            after: None,
            sender: user("alice"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueIterate));
    assert_eq!(decision.trigger, Some(Trigger::PrMerged));
    assert_eq!(decision.resource_number, 9);
}

// §8 scenario 6.
#[test]
fn approved_review_by_reviewer_routes() {
    let decision = route(
        &RawEvent::PullRequestReview {
            action: "submitted".into(),
            pull_request: pr_payload(7, "claude/issue/9", None),
            review: ReviewPayload {
                user: user("nopo-reviewer"),
                state: "approved".into(),
                submitted_at: None,
            },
            sender: user("nopo-reviewer"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::PrReviewApproved));
    assert_eq!(decision.concurrency_group, "claude-job-review-7");
}

#[test]
fn human_changes_requested_on_claude_pr_routes_to_human_response() {
    let decision = route(
        &RawEvent::PullRequestReview {
            action: "submitted".into(),
            pull_request: pr_payload(7, "claude/issue/9", None),
            review: ReviewPayload {
                user: user("human-dev"),
                state: "changes_requested".into(),
                submitted_at: None,
            },
            sender: user("human-dev"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::PrHumanResponse));
}

// ── Workflow runs ────────────────────────────────────────────────────────

// §8 scenario 3, router half.
#[test]
fn workflow_run_completed_routes_to_iterate() {
    let decision = route(
        &RawEvent::WorkflowRun {
            action: "completed".into(),
            workflow_run: WorkflowRunPayload {
                id: 555,
                name: "CI".into(),
                head_branch: "claude/issue/42".into(),
                head_sha: "cisha".into(),
                conclusion: Some("failure".into()),
                html_url: "https://ci.example/runs/555".into(),
                ..WorkflowRunPayload::default()
            },
            sender: user("github-actions[bot]"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueIterate));
    assert_eq!(decision.trigger, Some(Trigger::WorkflowRunCompleted));
    assert_eq!(decision.resource_number, 42);
    assert_eq!(decision.ci_result, Some(CiResult::Failure));
    assert_eq!(decision.workflow.run_id, Some(555));
}

#[test]
fn workflow_run_on_phase_branch_carries_phase() {
    let decision = route(
        &RawEvent::WorkflowRun {
            action: "completed".into(),
            workflow_run: WorkflowRunPayload {
                id: 556,
                name: "CI".into(),
                head_branch: "claude/issue/100/phase-2".into(),
                head_sha: "cisha".into(),
                conclusion: Some("success".into()),
                html_url: "https://ci.example/runs/556".into(),
                ..WorkflowRunPayload::default()
            },
            sender: user("github-actions[bot]"),
        },
        &cfg(),
    );
    assert_eq!(decision.resource_number, 100);
    assert_eq!(decision.context.get("phase").map(String::as_str), Some("2"));
}

#[test]
fn workflow_run_on_test_automation_issue_skips() {
    let decision = route(
        &RawEvent::WorkflowRun {
            action: "completed".into(),
            workflow_run: WorkflowRunPayload {
                id: 558,
                name: "CI".into(),
                head_branch: "claude/issue/42".into(),
                head_sha: "cisha".into(),
                conclusion: Some("success".into()),
                html_url: "https://ci.example/runs/558".into(),
                linked_issue_labels: vec!["test:automation".into()],
            },
            sender: user("github-actions[bot]"),
        },
        &cfg(),
    );
    assert!(decision.skip);
    assert_eq!(decision.skip_reason, "linked issue has test:automation label");
    assert_eq!(decision.resource_number, 42);
}

#[test]
fn workflow_run_on_foreign_branch_skips() {
    let decision = route(
        &RawEvent::WorkflowRun {
            action: "completed".into(),
            workflow_run: WorkflowRunPayload {
                id: 557,
                name: "CI".into(),
                head_branch: "feature/manual-work".into(),
                head_sha: String::new(),
                conclusion: Some("success".into()),
                html_url: String::new(),
                ..WorkflowRunPayload::default()
            },
            sender: user("github-actions[bot]"),
        },
        &cfg(),
    );
    assert!(decision.skip);
}

// ── Merge group ──────────────────────────────────────────────────────────

#[test]
fn merge_group_resolves_issue_through_pr_body() {
    let decision = route(
        &RawEvent::MergeGroup {
            action: "checks_requested".into(),
            merge_group: MergeGroupPayload {
                head_ref: "gh-readonly-queue/main/pr-21-deadbeef".into(),
                head_sha: "deadbeef".into(),
                pull_request: Some(MergeGroupPr {
                    number: 21,
                    body: Some("Fixes #9".into()),
                    head_ref: Some("claude/issue/9".into()),
                }),
            },
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::MergeQueueLogging));
    assert_eq!(decision.trigger, Some(Trigger::MergeQueueEntered));
    assert_eq!(decision.resource_number, 9);
    assert_eq!(decision.context.get("pr_number").map(String::as_str), Some("21"));
}

// ── Discussions ──────────────────────────────────────────────────────────

#[test]
fn discussion_created_routes_to_research() {
    let decision = route(
        &RawEvent::Discussion {
            action: "created".into(),
            discussion: nopo_core::event::DiscussionPayload {
                number: 12,
                title: "Where next".into(),
                body: None,
                user: user("alice"),
            },
            sender: user("alice"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::DiscussionResearch));
    assert_eq!(decision.concurrency_group, "claude-job-discussion-12");
    assert!(!decision.cancel_in_progress);
}

#[test]
fn discussion_bot_comment_skips() {
    let decision = route(
        &RawEvent::DiscussionComment {
            action: "created".into(),
            discussion: nopo_core::event::DiscussionPayload {
                number: 12,
                title: "Where next".into(),
                body: None,
                user: user("alice"),
            },
            comment: CommentPayload {
                id: 1,
                body: "/summarize".into(),
                user: user("nopo-bot"),
            },
            sender: user("nopo-bot"),
        },
        &cfg(),
    );
    assert!(decision.skip);
}

// ── Dispatch & context_json ──────────────────────────────────────────────

#[test]
fn dispatch_trigger_type_wins_over_job_table() {
    let decision = route(
        &RawEvent::WorkflowDispatch {
            inputs: nopo_core::event::DispatchInputs {
                resource_number: Some(42),
                trigger_type: Some("issue-retry".into()),
                ..Default::default()
            },
            sender: user("alice"),
        },
        &cfg(),
    );
    assert_eq!(decision.job, Some(Job::IssueIterate));
    assert_eq!(decision.trigger, Some(Trigger::IssueRetry));
}

#[test]
fn context_json_has_stable_shape() {
    let decision = route(
        &issues_event("opened", issue(17, "Add dark mode", &[]), "alice"),
        &cfg(),
    );
    let json = decision.to_context_json();
    assert_eq!(json["job"], "issue-triage");
    assert_eq!(json["resource_type"], "issue");
    assert_eq!(json["resource_number"], "17");
    assert_eq!(json["parent_issue"], "0");
    assert_eq!(json["comment_id"], "");
    assert_eq!(json["skip"], false);
    assert_eq!(json["concurrency_group"], "claude-job-issue-17");
}

// §8 property 4: every skip carries a reason.
#[test]
fn every_skip_has_a_reason() {
    let skipped = [
        route(
            &issues_event("opened", issue(5, "[TEST] probe", &[]), "alice"),
            &cfg(),
        ),
        route(
            &issues_event("edited", issue(5, "X", &["triaged"]), "nopo-bot"),
            &cfg(),
        ),
        route(&comment_event(issue(7, "T", &[]), "just words", "alice"), &cfg()),
        route(&RawEvent::Unknown, &cfg()),
    ];
    for decision in skipped {
        assert!(decision.skip);
        assert!(!decision.skip_reason.is_empty());
    }
}
