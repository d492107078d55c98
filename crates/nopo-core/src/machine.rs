use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::action::{ActionKind, AgentKind, FailureKind, PendingAction};
use crate::body;
use crate::types::{
    CiResult, MachineContext, PrState, ProjectStatus, ReviewDecision, Trigger, LABEL_GROOMED,
    LABEL_TRIAGED,
};

/// Every state of the chart. A single `DETECT` pass resolves `Detecting`
/// through the intermediate `Processing*` states down to a settled state,
/// whose action queue is the machine's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum State {
    Detecting,
    Done,
    AlreadyBlocked,
    Error,
    SubIssueIdle,
    Resetting,
    Pivoting,
    Triaging,
    Grooming,
    Orchestrating,
    OrchestrationRunning,
    OrchestrationComplete,
    PrReviewing,
    PrReviewAssigned,
    PrReviewSkipped,
    ProcessingCi,
    Blocked,
    IteratingFix,
    Iterating,
    Reviewing,
    TransitioningToReview,
    ProcessingReview,
    AwaitingMerge,
    ProcessingMerge,
    PrPush,
    Commenting,
    MergeQueueLogging,
    MergeQueueFailureLogging,
    DeployedStageLogging,
    DeployedProdLogging,
    DeployedStageFailureLogging,
    DeployedProdFailureLogging,
    InvalidIteration,
    DiscussionResearching,
    DiscussionResponding,
}

impl State {
    /// Pseudo-transient states that expect another dispatch to follow.
    pub fn retrigger(&self) -> bool {
        matches!(
            self,
            Self::Triaging
                | Self::Grooming
                | Self::Resetting
                | Self::OrchestrationRunning
                | Self::PrReviewAssigned
        )
    }
}

/// Output of one machine run. Byte-identical for a fixed context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub state: State,
    pub actions: Vec<PendingAction>,
    pub retrigger: bool,
}

// ── Guards ───────────────────────────────────────────────────────────────

fn status(ctx: &MachineContext) -> Option<ProjectStatus> {
    ctx.issue.project_status.map(ProjectStatus::canonical)
}

fn is_already_done(ctx: &MachineContext) -> bool {
    status(ctx) == Some(ProjectStatus::Done)
        && ctx.pr.as_ref().map(|pr| pr.state) == Some(PrState::Merged)
}

fn bot_assigned(ctx: &MachineContext) -> bool {
    ctx.issue.has_assignee(&ctx.bot_username)
}

fn needs_triage(ctx: &MachineContext) -> bool {
    !ctx.issue.is_sub_issue() && !ctx.issue.has_label(LABEL_TRIAGED)
}

/// `needs-info` does not block re-grooming; grooming re-evaluates.
fn needs_grooming(ctx: &MachineContext) -> bool {
    !ctx.issue.is_sub_issue()
        && ctx.issue.has_label(LABEL_TRIAGED)
        && !ctx.issue.has_label(LABEL_GROOMED)
}

fn max_failures_reached(ctx: &MachineContext) -> bool {
    ctx.issue.failures >= ctx.max_retries
}

fn todo_doc(ctx: &MachineContext) -> &crate::markdown::Document {
    ctx.current_sub_issue
        .as_ref()
        .map(|s| &s.body)
        .unwrap_or(&ctx.issue.body)
}

fn todos_done(ctx: &MachineContext) -> bool {
    body::todo_stats(todo_doc(ctx)).unchecked_non_manual == 0
}

fn has_todos(ctx: &MachineContext) -> bool {
    body::todo_stats(todo_doc(ctx)).total > 0
}

fn ci_passed(ctx: &MachineContext) -> bool {
    ctx.ci_result == Some(CiResult::Success)
}

fn ci_failed(ctx: &MachineContext) -> bool {
    ctx.ci_result == Some(CiResult::Failure)
}

fn ready_for_review(ctx: &MachineContext) -> bool {
    ci_passed(ctx) && has_todos(ctx) && todos_done(ctx)
}

fn should_continue_iterating(ctx: &MachineContext) -> bool {
    ci_failed(ctx) && !max_failures_reached(ctx)
}

fn should_block(ctx: &MachineContext) -> bool {
    ci_failed(ctx) && max_failures_reached(ctx)
}

/// Parent is complete when groomed and every live sub-issue is Done or
/// CLOSED (superseded sub-issues are ignored).
fn all_phases_done(ctx: &MachineContext) -> bool {
    ctx.issue.has_label(LABEL_GROOMED)
        && ctx.issue.has_sub_issues()
        && ctx
            .issue
            .sub_issues
            .iter()
            .filter(|s| !s.is_superseded())
            .all(|s| s.is_done())
}

fn needs_parent_init(ctx: &MachineContext) -> bool {
    ctx.issue.has_sub_issues()
        && matches!(status(ctx), None | Some(ProjectStatus::Backlog))
}

fn invalid_iteration(ctx: &MachineContext) -> bool {
    !ctx.issue.is_sub_issue()
        && bot_assigned(ctx)
        && !ctx.issue.has_sub_issues()
        && !has_todos(ctx)
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Run the machine: resolve the chart to a single settled state and emit
/// its action queue. Pure; performs no I/O.
pub fn run(ctx: &MachineContext) -> Outcome {
    let mut state = State::Detecting;
    while let Some(next) = step(state, ctx) {
        state = next;
    }
    Outcome {
        state,
        actions: emit(state, ctx),
        retrigger: state.retrigger(),
    }
}

/// One transition. `None` means the state is settled.
fn step(state: State, ctx: &MachineContext) -> Option<State> {
    match state {
        State::Detecting => Some(detect(ctx)),
        State::Orchestrating => Some(if all_phases_done(ctx) {
            State::OrchestrationComplete
        } else {
            State::OrchestrationRunning
        }),
        State::ProcessingCi => Some(if should_block(ctx) {
            State::Blocked
        } else if ready_for_review(ctx) {
            State::TransitioningToReview
        } else if should_continue_iterating(ctx) {
            State::IteratingFix
        } else {
            State::Iterating
        }),
        State::ProcessingReview => Some(match ctx.review_decision {
            Some(ReviewDecision::Approved) => State::AwaitingMerge,
            Some(ReviewDecision::ChangesRequested) => State::Iterating,
            Some(ReviewDecision::Commented) | None => State::Reviewing,
        }),
        State::ProcessingMerge => Some(if ctx.issue.is_sub_issue() {
            State::OrchestrationRunning
        } else {
            State::Done
        }),
        _ => None,
    }
}

/// First-match detection guards, in spec order.
fn detect(ctx: &MachineContext) -> State {
    if is_already_done(ctx) {
        return State::Done;
    }
    match status(ctx) {
        Some(ProjectStatus::Blocked) => return State::AlreadyBlocked,
        Some(ProjectStatus::Error) => return State::Error,
        _ => {}
    }
    if ctx.issue.is_sub_issue() && !bot_assigned(ctx) {
        return State::SubIssueIdle;
    }
    match ctx.trigger {
        Trigger::IssueReset => return State::Resetting,
        Trigger::IssuePivot => return State::Pivoting,
        Trigger::IssueRetry => return State::Iterating,
        _ => {}
    }
    if ctx.trigger == Trigger::IssueTriage || needs_triage(ctx) {
        return State::Triaging;
    }
    if ctx.trigger == Trigger::IssueGroom || needs_grooming(ctx) {
        return State::Grooming;
    }
    match ctx.trigger {
        Trigger::IssueOrchestrate | Trigger::SubIssueClosed => return State::Orchestrating,
        Trigger::PrReviewRequested => {
            return match ctx.ci_result {
                Some(CiResult::Success) => State::PrReviewing,
                Some(CiResult::Failure) => State::PrReviewSkipped,
                _ => State::PrReviewAssigned,
            };
        }
        Trigger::WorkflowRunCompleted => return State::ProcessingCi,
        Trigger::PrReviewSubmitted | Trigger::PrReviewApproved => return State::ProcessingReview,
        Trigger::PrMerged => return State::ProcessingMerge,
        Trigger::PrPush => return State::PrPush,
        Trigger::IssueComment => return State::Commenting,
        Trigger::MergeQueueEntered => {
            return if ci_failed(ctx) {
                State::MergeQueueFailureLogging
            } else {
                State::MergeQueueLogging
            };
        }
        Trigger::DeployedStage => {
            return if ci_failed(ctx) {
                State::DeployedStageFailureLogging
            } else {
                State::DeployedStageLogging
            };
        }
        Trigger::DeployedProd => {
            return if ci_failed(ctx) {
                State::DeployedProdFailureLogging
            } else {
                State::DeployedProdLogging
            };
        }
        Trigger::DiscussionCreated => return State::DiscussionResearching,
        Trigger::DiscussionCommand => return State::DiscussionResponding,
        _ => {}
    }
    if ready_for_review(ctx) {
        return State::Reviewing;
    }
    if invalid_iteration(ctx) {
        return State::InvalidIteration;
    }
    if ctx.issue.has_sub_issues() {
        State::Orchestrating
    } else {
        State::Iterating
    }
}

// ── Emission ─────────────────────────────────────────────────────────────

/// The issue whose board fields, body, and agent work this dispatch is
/// really about: the current sub-issue when one is in flight.
fn target(ctx: &MachineContext) -> u64 {
    ctx.current_sub_issue
        .as_ref()
        .map(|s| s.number)
        .unwrap_or(ctx.issue.number)
}

fn parent_number(ctx: &MachineContext) -> u64 {
    ctx.issue.parent_issue_number.unwrap_or(ctx.issue.number)
}

fn branch_name(ctx: &MachineContext) -> String {
    if let Some(branch) = &ctx.branch {
        return branch.clone();
    }
    match (&ctx.current_sub_issue, ctx.issue.parent_issue_number) {
        (Some(sub), _) => {
            let phase = sub.phase().unwrap_or(sub.number as u32);
            format!("claude/issue/{}/phase-{phase}", ctx.issue.number)
        }
        (None, Some(parent)) => {
            let phase = body::phase_from_title(&ctx.issue.title)
                .unwrap_or(ctx.issue.number as u32);
            format!("claude/issue/{parent}/phase-{phase}")
        }
        (None, None) => format!("claude/issue/{}", ctx.issue.number),
    }
}

fn prompt_vars(ctx: &MachineContext) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("issue_number".into(), target(ctx).to_string());
    vars.insert("issue_title".into(), ctx.issue.title.clone());
    vars.insert("owner".into(), ctx.owner.clone());
    vars.insert("repo".into(), ctx.repo.clone());
    if let Some(phase) = ctx.current_phase {
        vars.insert("phase".into(), phase.to_string());
    }
    if let Some(ci) = &ctx.ci_result {
        if let Ok(v) = serde_json::to_value(ci) {
            if let Some(s) = v.as_str() {
                vars.insert("ci_result".into(), s.to_string());
            }
        }
    }
    if let Some(comment) = &ctx.comment_context {
        vars.insert("comment_body".into(), comment.body.clone());
        vars.insert("comment_author".into(), comment.author.clone());
    }
    if let Some(url) = &ctx.workflow.run_url {
        vars.insert("run_url".into(), url.clone());
    }
    vars
}

fn run_claude(ctx: &MachineContext, kind: AgentKind) -> PendingAction {
    ActionKind::RunClaude {
        kind,
        issue_number: target(ctx),
        prompt_vars: prompt_vars(ctx),
    }
    .into()
}

fn history_on(ctx: &MachineContext, issue_number: u64, message: &str) -> PendingAction {
    let kind = ActionKind::AppendHistory {
        issue_number,
        phase: ctx.current_phase,
        message: message.to_string(),
        sha: ctx.workflow.commit_sha.clone(),
        run_link: ctx.workflow.run_url.clone(),
    };
    match ctx.workflow.run_id {
        Some(run_id) => PendingAction::keyed(kind, run_id.to_string()),
        None => kind.into(),
    }
}

fn history(ctx: &MachineContext, message: &str) -> PendingAction {
    history_on(ctx, target(ctx), message)
}

fn set_status(issue_number: u64, status: ProjectStatus) -> PendingAction {
    ActionKind::UpdateProjectStatus {
        issue_number,
        status,
    }
    .into()
}

/// Deterministic action queue for a settled state.
fn emit(state: State, ctx: &MachineContext) -> Vec<PendingAction> {
    let target = target(ctx);
    match state {
        State::Triaging => vec![
            history(ctx, "Triage started"),
            run_claude(ctx, AgentKind::Triage),
            ActionKind::ApplyTriageOutput {
                issue_number: target,
            }
            .into(),
            set_status(target, ProjectStatus::Triaged),
        ],
        State::Grooming => vec![
            history(ctx, "Grooming started"),
            run_claude(ctx, AgentKind::Grooming),
            ActionKind::ApplyGroomingOutput {
                issue_number: target,
            }
            .into(),
            ActionKind::ReconcileSubIssues {
                issue_number: target,
            }
            .into(),
        ],
        State::Iterating | State::IteratingFix => emit_iteration(ctx, state),
        State::TransitioningToReview => {
            let mut queue = vec![ActionKind::ClearFailures {
                issue_number: target,
            }
            .into()];
            if let Some(pr) = &ctx.pr {
                if pr.is_draft {
                    queue.push(ActionKind::MarkPrReady { pr_number: pr.number }.into());
                }
            }
            queue.push(set_status(target, ProjectStatus::InReview));
            queue.push(
                ActionKind::RequestReviewer {
                    pr_number: ctx.pr.as_ref().map(|p| p.number).unwrap_or(0),
                    username: ctx.bot_username.clone(),
                }
                .into(),
            );
            queue.push(run_claude(ctx, AgentKind::Review));
            queue.push(
                ActionKind::ApplyReviewOutput {
                    issue_number: target,
                }
                .into(),
            );
            queue
        }
        State::Reviewing => {
            // Already in review: nothing to reconcile.
            if status(ctx) == Some(ProjectStatus::InReview) {
                return Vec::new();
            }
            let mut queue = vec![ActionKind::ClearFailures {
                issue_number: target,
            }
            .into()];
            if let Some(pr) = &ctx.pr {
                if pr.is_draft {
                    queue.push(ActionKind::MarkPrReady { pr_number: pr.number }.into());
                }
            }
            queue.push(set_status(target, ProjectStatus::InReview));
            queue.push(
                ActionKind::RequestReviewer {
                    pr_number: ctx.pr.as_ref().map(|p| p.number).unwrap_or(0),
                    username: ctx.bot_username.clone(),
                }
                .into(),
            );
            queue
        }
        State::Blocked => vec![
            set_status(target, ProjectStatus::Blocked),
            ActionKind::UnassignUser {
                issue_number: target,
                username: ctx.bot_username.clone(),
            }
            .into(),
            history(
                ctx,
                &format!("Blocked: Max failures reached ({})", ctx.max_retries),
            ),
        ],
        State::PrPush => {
            let mut queue = Vec::new();
            if let Some(pr) = &ctx.pr {
                if !pr.is_draft {
                    queue.push(ActionKind::ConvertPrToDraft { pr_number: pr.number }.into());
                }
                queue.push(
                    ActionKind::RemoveReviewer {
                        pr_number: pr.number,
                        username: ctx.bot_username.clone(),
                    }
                    .into(),
                );
            }
            queue.push(set_status(target, ProjectStatus::InProgress));
            queue.push(history(ctx, "New commits pushed, PR back to draft"));
            queue
        }
        State::OrchestrationRunning => emit_orchestration_running(ctx),
        State::OrchestrationComplete => vec![
            set_status(ctx.issue.number, ProjectStatus::Done),
            ActionKind::CloseIssue {
                issue_number: ctx.issue.number,
            }
            .into(),
            history_on(ctx, ctx.issue.number, "All phases complete"),
        ],
        State::Resetting => {
            let mut queue = vec![
                ActionKind::ResetIssue {
                    issue_number: ctx.issue.number,
                }
                .into(),
                set_status(ctx.issue.number, ProjectStatus::Backlog),
                ActionKind::ClearFailures {
                    issue_number: ctx.issue.number,
                }
                .into(),
            ];
            for sub in &ctx.issue.sub_issues {
                queue.push(
                    ActionKind::RemoveFromProject {
                        issue_number: sub.number,
                    }
                    .into(),
                );
            }
            queue
        }
        State::Pivoting => {
            let description = ctx
                .comment_context
                .as_ref()
                .and_then(|c| c.pivot_description.clone())
                .unwrap_or_default();
            vec![
                set_status(ctx.issue.number, ProjectStatus::Blocked),
                history_on(ctx, ctx.issue.number, &format!("Pivot requested: {description}")),
            ]
        }
        State::AwaitingMerge => vec![history(ctx, "Review approved, awaiting merge")],
        State::Done => {
            if ctx.trigger == Trigger::PrMerged {
                vec![
                    set_status(ctx.issue.number, ProjectStatus::Done),
                    ActionKind::CloseIssue {
                        issue_number: ctx.issue.number,
                    }
                    .into(),
                    history_on(ctx, ctx.issue.number, "PR merged"),
                ]
            } else {
                Vec::new()
            }
        }
        State::PrReviewing => vec![
            run_claude(ctx, AgentKind::Review),
            ActionKind::ApplyReviewOutput {
                issue_number: target,
            }
            .into(),
        ],
        State::PrReviewAssigned => vec![history(ctx, "Review requested, waiting for CI")],
        State::PrReviewSkipped => vec![history(ctx, "Review skipped: CI failing")],
        State::Commenting => vec![
            run_claude(ctx, AgentKind::Comment),
            ActionKind::ApplyCommentOutput {
                issue_number: target,
            }
            .into(),
        ],
        State::MergeQueueLogging => vec![history(ctx, "Entered merge queue")],
        State::MergeQueueFailureLogging => vec![history(ctx, "Removed from merge queue")],
        State::DeployedStageLogging => vec![history(ctx, "Deployed to stage")],
        State::DeployedProdLogging => vec![history(ctx, "Deployed to production")],
        State::DeployedStageFailureLogging => vec![history(ctx, "Stage deploy failed")],
        State::DeployedProdFailureLogging => vec![history(ctx, "Production deploy failed")],
        State::InvalidIteration => vec![
            history(ctx, "Invalid iteration: no todos"),
            ActionKind::AddComment {
                issue_number: ctx.issue.number,
                body: "Iteration was dispatched but this issue has no todos to work on. \
                       Groom the issue (or add a Todos section), then re-assign the bot."
                    .into(),
            }
            .into(),
            set_status(ctx.issue.number, ProjectStatus::Blocked),
        ],
        State::DiscussionResearching => vec![
            run_claude(ctx, AgentKind::DiscussionResearch),
            ActionKind::ApplyCommentOutput {
                issue_number: target,
            }
            .into(),
        ],
        State::DiscussionResponding => {
            let kind = match ctx
                .comment_context
                .as_ref()
                .map(|c| c.body.trim_start())
            {
                Some(body) if body.starts_with("/summarize") => AgentKind::DiscussionSummarize,
                Some(body) if body.starts_with("/plan") => AgentKind::DiscussionPlan,
                Some(body) if body.starts_with("/research") => AgentKind::DiscussionResearch,
                _ => AgentKind::DiscussionComplete,
            };
            vec![
                run_claude(ctx, kind),
                ActionKind::ApplyCommentOutput {
                    issue_number: target,
                }
                .into(),
            ]
        }
        // Settled states with nothing to reconcile.
        State::Detecting
        | State::AlreadyBlocked
        | State::Error
        | State::SubIssueIdle
        | State::Orchestrating
        | State::ProcessingCi
        | State::ProcessingReview
        | State::ProcessingMerge => Vec::new(),
    }
}

/// Iteration queue: optional CI-failure prelude, status, branch, counters,
/// agent, output application, PR creation.
fn emit_iteration(ctx: &MachineContext, state: State) -> Vec<PendingAction> {
    let target = target(ctx);
    let mut queue = Vec::new();

    if ci_failed(ctx) {
        queue.push(
            ActionKind::RecordFailure {
                issue_number: target,
                kind: FailureKind::Ci,
            }
            .into(),
        );
    }
    queue.push(set_status(target, ProjectStatus::InProgress));
    if !ctx.has_branch {
        queue.push(
            ActionKind::CreateBranch {
                branch: branch_name(ctx),
                base: "main".into(),
            }
            .into(),
        );
    }
    queue.push(
        ActionKind::IncrementIteration {
            issue_number: target,
        }
        .into(),
    );

    // Pick the agent flavor: review responses beat CI retries.
    let (kind, apply, message) = if ctx.review_decision == Some(ReviewDecision::ChangesRequested) {
        (
            AgentKind::PrResponse,
            ActionKind::ApplyPrResponseOutput {
                issue_number: target,
            },
            "Addressing review feedback",
        )
    } else if state == State::IteratingFix || ci_failed(ctx) {
        (
            AgentKind::Retry,
            ActionKind::ApplyIterationOutput {
                issue_number: target,
            },
            "Retrying after CI failure",
        )
    } else {
        (
            AgentKind::Iterate,
            ActionKind::ApplyIterationOutput {
                issue_number: target,
            },
            "Iteration started",
        )
    };
    queue.push(history(ctx, message));
    queue.push(run_claude(ctx, kind));
    queue.push(apply.into());

    if !ctx.has_pr {
        let title = ctx
            .current_sub_issue
            .as_ref()
            .map(|s| s.title.clone())
            .unwrap_or_else(|| ctx.issue.title.clone());
        queue.push(
            ActionKind::CreatePr {
                issue_number: target,
                branch: branch_name(ctx),
                title,
                body: format!("Fixes #{target}"),
                draft: true,
            }
            .into(),
        );
    }
    queue
}

/// Orchestration tick. On a parent: initialize the board, hand the current
/// phase to the bot. On a just-merged sub-issue: close it out so the close
/// event re-dispatches orchestration on the parent.
fn emit_orchestration_running(ctx: &MachineContext) -> Vec<PendingAction> {
    if ctx.issue.is_sub_issue() {
        return vec![
            set_status(ctx.issue.number, ProjectStatus::Done),
            ActionKind::CloseIssue {
                issue_number: ctx.issue.number,
            }
            .into(),
            history(
                ctx,
                &format!("Phase complete on #{}", parent_number(ctx)),
            ),
        ];
    }
    let mut queue = Vec::new();
    if needs_parent_init(ctx) {
        queue.push(set_status(ctx.issue.number, ProjectStatus::InProgress));
    }
    match &ctx.current_sub_issue {
        Some(sub) => {
            if !sub.assignees.iter().any(|a| a == &ctx.bot_username) {
                queue.push(
                    ActionKind::AddAssignees {
                        issue_number: sub.number,
                        usernames: vec![ctx.bot_username.clone()],
                    }
                    .into(),
                );
            }
            let phase = sub.phase().unwrap_or(0);
            queue.push(history_on(
                ctx,
                ctx.issue.number,
                &format!("Phase {phase} dispatched"),
            ));
        }
        None => queue.push(history_on(
            ctx,
            ctx.issue.number,
            "Orchestration waiting on sub-issues",
        )),
    }
    queue
}
