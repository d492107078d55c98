use crate::config::Config;
use crate::types::{
    CiResult, IssueData, MachineContext, ProjectStatus, ReviewDecision, RoutingDecision, Trigger,
};

/// Compose the machine context from the fetched aggregate and the routing
/// decision's event-specific fields. Every default is explicit; the
/// context is never mutated after this.
pub fn build(data: &IssueData, decision: &RoutingDecision, config: &Config) -> MachineContext {
    let mut issue = data.issue.clone();
    // The machine reasons about the canonical status set only.
    issue.project_status = issue.project_status.map(ProjectStatus::canonical);
    for sub in &mut issue.sub_issues {
        sub.project_status = sub.project_status.map(ProjectStatus::canonical);
    }

    let pr = issue.pr.clone();
    let ci_result = decision.ci_result.or_else(|| derive_ci(&issue));
    let review_decision = decision.review_decision.or_else(|| derive_review(&issue));

    // First phase still open, in phase order.
    let current_sub_issue = issue
        .sub_issues
        .iter()
        .find(|s| !s.is_superseded() && !s.is_done())
        .cloned();
    let current_phase = current_sub_issue.as_ref().and_then(|s| s.phase());
    let total_phases = issue
        .sub_issues
        .iter()
        .filter(|s| !s.is_superseded())
        .count() as u32;

    let branch = issue.branch.clone().or_else(|| decision.branch.clone());

    MachineContext {
        trigger: decision.trigger.unwrap_or(Trigger::ManualDispatch),
        owner: data.owner.clone(),
        repo: data.repo.clone(),
        parent_issue: data.parent_issue.clone(),
        current_sub_issue,
        current_phase,
        total_phases,
        has_pr: pr.is_some(),
        pr,
        ci_result,
        review_decision,
        has_branch: branch.is_some(),
        branch,
        comment_context: decision.comment_context.clone(),
        max_retries: config.max_retries,
        bot_username: config.bot_username.clone(),
        reviewer_username: config.reviewer_username.clone(),
        workflow: decision.workflow.clone(),
        issue,
    }
}

/// CI result from the linked PR's latest status rollup when the event
/// itself carried none.
fn derive_ci(issue: &crate::types::IssueInfo) -> Option<CiResult> {
    match issue.pr.as_ref()?.check_state.as_deref()? {
        "SUCCESS" => Some(CiResult::Success),
        "FAILURE" | "ERROR" => Some(CiResult::Failure),
        _ => None,
    }
}

/// Review decision from the PR when the event carried none.
/// `REVIEW_REQUIRED` reads as a comment-level decision.
fn derive_review(issue: &crate::types::IssueInfo) -> Option<ReviewDecision> {
    match issue.pr.as_ref()?.review_decision.as_deref()? {
        "APPROVED" => Some(ReviewDecision::Approved),
        "CHANGES_REQUESTED" => Some(ReviewDecision::ChangesRequested),
        "REVIEW_REQUIRED" => Some(ReviewDecision::Commented),
        _ => None,
    }
}
