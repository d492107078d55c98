use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::action::{
    parse_agent_output, ActionKind, AgentOutput, GroomingOutput, PendingAction,
};
use crate::agent::{AgentBackend, AgentRequest};
use crate::body::{self, NewHistoryRow, TodoItem};
use crate::error::CoreError;
use crate::github::{RepoRef, VcsClient};
use crate::markdown::{self, Document, Node};
use crate::types::{IssueData, IssueState, PrInfo, PrState, ProjectStatus};

// ── Results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionStatus {
    Ok,
    Skipped,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One record per queued action, in queue order. `fatal_index` marks the
/// action whose failure aborted the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub actions: Vec<ActionOutcome>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_index: Option<usize>,
}

// ── Runner context ───────────────────────────────────────────────────────

/// Everything the executors need, built at orchestrator entry.
pub struct RunnerContext {
    pub repo: RepoRef,
    pub client: Arc<dyn VcsClient>,
    /// Separate identity for submitting reviews (bot reviews its own PRs
    /// through this client).
    pub reviewer_client: Option<Arc<dyn VcsClient>>,
    pub agent: Arc<dyn AgentBackend>,
    pub project_number: u64,
    pub max_retries: u32,
    pub bot_username: String,
    pub dry_run: bool,
    pub run_id: Option<u64>,
    pub run_url: Option<String>,
}

/// Executes a pending-action queue against the aggregate and the VCS.
/// Mutations on the loaded issue happen in memory and persist at dispatch
/// end; everything else goes through the client with per-action
/// idempotency checks.
pub struct ActionRunner<'a> {
    ctx: &'a RunnerContext,
    data: &'a mut IssueData,
    last_output: Option<AgentOutput>,
}

impl<'a> ActionRunner<'a> {
    pub fn new(ctx: &'a RunnerContext, data: &'a mut IssueData) -> Self {
        Self {
            ctx,
            data,
            last_output: None,
        }
    }

    /// Execute actions in order. A fatal failure aborts the queue and
    /// reports the remainder as not-run; other failures are recorded and
    /// execution continues. The machine is never re-run mid-queue.
    pub async fn execute(&mut self, queue: &[PendingAction]) -> ExecutionResult {
        let mut outcomes = Vec::with_capacity(queue.len());
        let mut fatal_index = None;

        for (i, action) in queue.iter().enumerate() {
            if fatal_index.is_some() {
                outcomes.push(ActionOutcome {
                    action: action.kind.type_name().into(),
                    status: ActionStatus::NotRun,
                    error: None,
                });
                continue;
            }
            if self.ctx.dry_run {
                info!(action = action.kind.type_name(), "dry-run: skipping");
                outcomes.push(ActionOutcome {
                    action: action.kind.type_name().into(),
                    status: ActionStatus::Skipped,
                    error: None,
                });
                continue;
            }
            match self.execute_one(action).await {
                Ok(status) => outcomes.push(ActionOutcome {
                    action: action.kind.type_name().into(),
                    status,
                    error: None,
                }),
                Err(e) => {
                    warn!(action = action.kind.type_name(), "action failed: {e}");
                    outcomes.push(ActionOutcome {
                        action: action.kind.type_name().into(),
                        status: ActionStatus::Failed,
                        error: Some(e.to_string()),
                    });
                    if action.kind.fatal() {
                        fatal_index = Some(i);
                    }
                }
            }
        }

        let success = fatal_index.is_none()
            && outcomes.iter().all(|o| o.status != ActionStatus::Failed);
        ExecutionResult {
            actions: outcomes,
            success,
            fatal_index,
        }
    }

    // ── Aggregate access ─────────────────────────────────────────────────

    fn is_root(&self, number: u64) -> bool {
        number == self.data.issue.number
    }

    fn body_mut(&mut self, number: u64) -> Option<&mut Document> {
        if self.is_root(number) {
            return Some(&mut self.data.issue.body);
        }
        self.data
            .issue
            .sub_issues
            .iter_mut()
            .find(|s| s.number == number)
            .map(|s| &mut s.body)
    }

    fn pr_number(&self) -> Result<u64, CoreError> {
        self.data
            .issue
            .pr
            .as_ref()
            .map(|pr| pr.number)
            .ok_or_else(|| {
                CoreError::InvariantViolation(format!(
                    "issue #{} has no linked PR",
                    self.data.issue.number
                ))
            })
    }

    fn take_grooming(&self) -> Result<GroomingOutput, CoreError> {
        match &self.last_output {
            Some(AgentOutput::Grooming(g)) => Ok(g.clone()),
            _ => Err(CoreError::InvariantViolation(
                "no grooming output available to apply".into(),
            )),
        }
    }

    // ── Dispatch per kind ────────────────────────────────────────────────

    async fn execute_one(&mut self, action: &PendingAction) -> Result<ActionStatus, CoreError> {
        let vcs = |e: anyhow::Error| CoreError::vcs(e.to_string());
        let repo = &self.ctx.repo;
        let client = Arc::clone(&self.ctx.client);

        match &action.kind {
            ActionKind::RunClaude {
                kind,
                issue_number,
                prompt_vars,
            } => {
                let req = AgentRequest::new(*kind, *issue_number, prompt_vars.clone());
                let invocation = self
                    .ctx
                    .agent
                    .invoke(&req)
                    .await
                    .map_err(|e| CoreError::agent(kind.as_str(), e.to_string()))?;
                if !invocation.success {
                    return Err(CoreError::agent(
                        kind.as_str(),
                        "agent exited unsuccessfully",
                    ));
                }
                self.last_output = Some(parse_agent_output(*kind, &invocation.output)?);
                Ok(ActionStatus::Ok)
            }

            ActionKind::ApplyTriageOutput { .. } => {
                let AgentOutput::Triage(output) = self
                    .last_output
                    .clone()
                    .ok_or_else(|| CoreError::InvariantViolation("no triage output".into()))?
                else {
                    return Err(CoreError::InvariantViolation(
                        "preceding output is not a triage output".into(),
                    ));
                };
                let issue = &mut self.data.issue;
                let mut add = |label: &str| {
                    if !issue.labels.iter().any(|l| l == label) {
                        issue.labels.push(label.to_string());
                    }
                };
                add(crate::types::LABEL_TRIAGED);
                for label in &output.labels {
                    add(label);
                }
                if output.needs_info {
                    add(crate::types::LABEL_NEEDS_INFO);
                }
                if !output.summary.is_empty()
                    && !body::body_structure(&self.data.issue.body).has_description
                {
                    body::replace_section(
                        &mut self.data.issue.body,
                        "Description",
                        2,
                        vec![Node::Paragraph {
                            children: vec![Node::Text {
                                value: output.summary.clone(),
                            }],
                        }],
                    );
                }
                if !output.affected_areas.is_empty() {
                    body::set_affected_areas(&mut self.data.issue.body, &output.affected_areas);
                }
                if !output.questions.is_empty() {
                    let items: Vec<_> = output
                        .questions
                        .iter()
                        .map(|q| body::QuestionItem {
                            id: Some(q.id.clone()),
                            text: q.text.clone(),
                            answered: false,
                        })
                        .collect();
                    body::set_questions(&mut self.data.issue.body, &items);
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::ApplyGroomingOutput { .. } => {
                let output = self.take_grooming()?;
                let issue = &mut self.data.issue;
                if !issue.labels.iter().any(|l| l == crate::types::LABEL_GROOMED) {
                    issue.labels.push(crate::types::LABEL_GROOMED.into());
                }
                if !output.description.is_empty() {
                    body::replace_section(
                        &mut issue.body,
                        "Description",
                        2,
                        vec![paragraph(&output.description)],
                    );
                }
                if !output.approach.is_empty() {
                    body::replace_section(
                        &mut issue.body,
                        "Approach",
                        2,
                        vec![paragraph(&output.approach)],
                    );
                }
                if !output.todos.is_empty() {
                    let items: Vec<TodoItem> = output
                        .todos
                        .iter()
                        .map(|t| TodoItem {
                            text: if t.manual && !t.text.contains("[Manual]") {
                                format!("[Manual] {}", t.text)
                            } else {
                                t.text.clone()
                            },
                            checked: false,
                            manual: t.manual,
                        })
                        .collect();
                    body::set_todos(&mut issue.body, &items);
                }
                if !output.acceptance_criteria.is_empty() {
                    let list = Node::List {
                        ordered: false,
                        children: output
                            .acceptance_criteria
                            .iter()
                            .map(|c| Node::ListItem {
                                checked: None,
                                children: vec![Node::Text { value: c.clone() }],
                            })
                            .collect(),
                    };
                    body::replace_section(&mut issue.body, "Acceptance Criteria", 2, vec![list]);
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::ReconcileSubIssues { issue_number } => {
                self.reconcile_sub_issues(*issue_number).await
            }

            ActionKind::ApplyIterationOutput { issue_number } => {
                let output = match self.last_output.clone() {
                    Some(AgentOutput::Iteration(out)) => out,
                    _ => {
                        return Err(CoreError::InvariantViolation(
                            "no iteration output available to apply".into(),
                        ))
                    }
                };
                let run_id = self
                    .ctx
                    .run_id
                    .map(|id| id.to_string())
                    .or_else(|| output.commit_sha.clone());
                let run_url = self.ctx.run_url.clone();
                let Some(doc) = self.body_mut(*issue_number) else {
                    return Err(CoreError::InvariantViolation(format!(
                        "issue #{issue_number} is not part of this dispatch"
                    )));
                };
                // Check off the todos the agent reports done.
                let mut todos = body::todos(doc);
                let mut changed = false;
                for todo in &mut todos {
                    if !todo.checked
                        && output
                            .completed_todos
                            .iter()
                            .any(|done| todo.text.contains(done.as_str()))
                    {
                        todo.checked = true;
                        changed = true;
                    }
                }
                if changed {
                    body::set_todos(doc, &todos);
                }
                if !output.notes.is_empty() {
                    body::append_agent_notes(
                        doc,
                        run_id.as_deref().unwrap_or("0"),
                        run_url.as_deref().unwrap_or(""),
                        Utc::now(),
                        &output.notes,
                    );
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::ApplyReviewOutput { .. } => {
                let output = match self.last_output.clone() {
                    Some(AgentOutput::Review(out)) => out,
                    _ => {
                        return Err(CoreError::InvariantViolation(
                            "no review output available to apply".into(),
                        ))
                    }
                };
                let pr = self.pr_number()?;
                let event = match output.decision.to_ascii_lowercase().as_str() {
                    "approve" | "approved" => "APPROVE",
                    "request_changes" | "changes_requested" => "REQUEST_CHANGES",
                    _ => "COMMENT",
                };
                let mut review_body = output.summary.clone();
                for comment in &output.comments {
                    review_body.push_str("\n\n");
                    review_body.push_str(comment);
                }
                let reviewer = self
                    .ctx
                    .reviewer_client
                    .as_ref()
                    .map(Arc::clone)
                    .unwrap_or_else(|| Arc::clone(&client));
                reviewer
                    .submit_review(repo, pr, event, review_body.trim())
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }

            ActionKind::ApplyPrResponseOutput { .. } => {
                let output = match self.last_output.clone() {
                    Some(AgentOutput::PrResponse(out)) => out,
                    _ => {
                        return Err(CoreError::InvariantViolation(
                            "no PR response output available to apply".into(),
                        ))
                    }
                };
                let pr = self.pr_number()?;
                client
                    .add_comment(repo, pr, &output.summary)
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }

            ActionKind::ApplyCommentOutput { issue_number } => {
                let reply = match &self.last_output {
                    Some(AgentOutput::Reply(r)) => r.reply.clone(),
                    _ => {
                        return Err(CoreError::InvariantViolation(
                            "no reply output available to apply".into(),
                        ))
                    }
                };
                client
                    .add_comment(repo, *issue_number, &reply)
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }

            ActionKind::UpdateProjectStatus {
                issue_number,
                status,
            } => {
                if self.is_root(*issue_number) {
                    self.data.issue.project_status = Some(*status);
                } else {
                    client
                        .update_project_status(
                            repo,
                            self.ctx.project_number,
                            *issue_number,
                            status.board_name(),
                        )
                        .await
                        .map_err(vcs)?;
                    if let Some(sub) = self
                        .data
                        .issue
                        .sub_issues
                        .iter_mut()
                        .find(|s| s.number == *issue_number)
                    {
                        sub.project_status = Some(*status);
                    }
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::IncrementIteration { issue_number } => {
                if !self.is_root(*issue_number) {
                    return Err(CoreError::InvariantViolation(format!(
                        "iteration counter on #{issue_number}, which is not the loaded issue"
                    )));
                }
                self.data.issue.iteration += 1;
                Ok(ActionStatus::Ok)
            }

            ActionKind::ClearFailures { issue_number } => {
                if self.is_root(*issue_number) {
                    self.data.issue.failures = 0;
                } else {
                    client
                        .update_project_number_field(
                            repo,
                            self.ctx.project_number,
                            *issue_number,
                            "Failures",
                            0.0,
                        )
                        .await
                        .map_err(vcs)?;
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::RecordFailure { issue_number, kind } => {
                if !self.is_root(*issue_number) {
                    return Err(CoreError::InvariantViolation(format!(
                        "failure counter on #{issue_number}, which is not the loaded issue"
                    )));
                }
                // Never persist failures beyond the retry cap.
                let failures = &mut self.data.issue.failures;
                *failures = (*failures + 1).min(self.ctx.max_retries);
                info!(
                    issue = issue_number,
                    kind = kind.as_str(),
                    failures = *failures,
                    "recorded failure"
                );
                Ok(ActionStatus::Ok)
            }

            ActionKind::AppendHistory {
                issue_number,
                phase,
                message,
                sha,
                run_link,
            } => {
                let row = NewHistoryRow {
                    phase: *phase,
                    action: message.clone(),
                    sha: sha.clone(),
                    run_link: run_link.clone(),
                    timestamp: Utc::now(),
                    idempotency_key: action.idempotency_key.clone(),
                };
                let Some(doc) = self.body_mut(*issue_number) else {
                    return Err(CoreError::InvariantViolation(format!(
                        "issue #{issue_number} is not part of this dispatch"
                    )));
                };
                if body::append_history_row(doc, &row) {
                    Ok(ActionStatus::Ok)
                } else {
                    Ok(ActionStatus::Skipped)
                }
            }

            ActionKind::CreateBranch { branch, base } => {
                if client.get_ref(repo, branch).await.map_err(vcs)?.is_some() {
                    return Ok(ActionStatus::Skipped);
                }
                let sha = if base == "main" {
                    client.default_branch_sha(repo).await.map_err(vcs)?
                } else {
                    client
                        .get_ref(repo, base)
                        .await
                        .map_err(vcs)?
                        .ok_or_else(|| {
                            CoreError::vcs(format!("base branch '{base}' does not exist"))
                        })?
                };
                client.create_ref(repo, branch, &sha).await.map_err(vcs)?;
                self.data.issue.branch = Some(branch.clone());
                Ok(ActionStatus::Ok)
            }

            ActionKind::CreatePr {
                issue_number,
                branch,
                title,
                body: pr_body,
                draft,
            } => {
                if self.data.issue.pr.is_some() {
                    return Ok(ActionStatus::Skipped);
                }
                if let Some(existing) =
                    client.find_pr_by_head(repo, branch).await.map_err(vcs)?
                {
                    self.data.issue.pr = Some(minimal_pr(existing, branch, title, *draft));
                    return Ok(ActionStatus::Skipped);
                }
                let number = client
                    .create_pr(repo, branch, "main", title, pr_body, *draft)
                    .await
                    .map_err(vcs)?;
                info!(issue = issue_number, pr = number, "created PR");
                self.data.issue.pr = Some(minimal_pr(number, branch, title, *draft));
                Ok(ActionStatus::Ok)
            }

            ActionKind::MarkPrReady { pr_number } => {
                if let Some(pr) = &self.data.issue.pr {
                    if pr.number == *pr_number && !pr.is_draft {
                        return Ok(ActionStatus::Skipped);
                    }
                }
                client.mark_pr_ready(repo, *pr_number).await.map_err(vcs)?;
                if let Some(pr) = &mut self.data.issue.pr {
                    if pr.number == *pr_number {
                        pr.is_draft = false;
                    }
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::ConvertPrToDraft { pr_number } => {
                if let Some(pr) = &self.data.issue.pr {
                    if pr.number == *pr_number && pr.is_draft {
                        return Ok(ActionStatus::Skipped);
                    }
                }
                client
                    .convert_pr_to_draft(repo, *pr_number)
                    .await
                    .map_err(vcs)?;
                if let Some(pr) = &mut self.data.issue.pr {
                    if pr.number == *pr_number {
                        pr.is_draft = true;
                    }
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::RequestReviewer {
                pr_number,
                username,
            } => {
                client
                    .request_reviewer(repo, *pr_number, username)
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }

            ActionKind::RemoveReviewer {
                pr_number,
                username,
            } => {
                client
                    .remove_reviewer(repo, *pr_number, username)
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }

            ActionKind::UnassignUser {
                issue_number,
                username,
            } => {
                if self.is_root(*issue_number) {
                    self.data.issue.assignees.retain(|a| a != username);
                } else {
                    client
                        .remove_assignees(repo, *issue_number, &[username.clone()])
                        .await
                        .map_err(vcs)?;
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::AddAssignees {
                issue_number,
                usernames,
            } => {
                if self.is_root(*issue_number) {
                    for user in usernames {
                        if !self.data.issue.assignees.contains(user) {
                            self.data.issue.assignees.push(user.clone());
                        }
                    }
                } else {
                    client
                        .add_assignees(repo, *issue_number, usernames)
                        .await
                        .map_err(vcs)?;
                    if let Some(sub) = self
                        .data
                        .issue
                        .sub_issues
                        .iter_mut()
                        .find(|s| s.number == *issue_number)
                    {
                        for user in usernames {
                            if !sub.assignees.contains(user) {
                                sub.assignees.push(user.clone());
                            }
                        }
                    }
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::CloseIssue { issue_number } => {
                if self.is_root(*issue_number) {
                    if self.data.issue.state == IssueState::Closed {
                        return Ok(ActionStatus::Skipped);
                    }
                    self.data.issue.state = IssueState::Closed;
                } else {
                    client.close_issue(repo, *issue_number).await.map_err(vcs)?;
                    if let Some(sub) = self
                        .data
                        .issue
                        .sub_issues
                        .iter_mut()
                        .find(|s| s.number == *issue_number)
                    {
                        sub.state = IssueState::Closed;
                    }
                }
                Ok(ActionStatus::Ok)
            }

            ActionKind::ResetIssue { issue_number } => {
                if !self.is_root(*issue_number) {
                    return Err(CoreError::InvariantViolation(format!(
                        "reset on #{issue_number}, which is not the loaded issue"
                    )));
                }
                let issue = &mut self.data.issue;
                issue
                    .labels
                    .retain(|l| l != crate::types::LABEL_GROOMED && l != crate::types::LABEL_NEEDS_INFO);
                body::remove_section(&mut issue.body, "Iteration History");
                body::remove_section(&mut issue.body, "Agent Notes");
                let mut todos = body::todos(&issue.body);
                if !todos.is_empty() {
                    for todo in &mut todos {
                        todo.checked = false;
                    }
                    body::set_todos(&mut issue.body, &todos);
                }
                issue.iteration = 0;
                Ok(ActionStatus::Ok)
            }

            ActionKind::RemoveFromProject { issue_number } => {
                client
                    .remove_from_project(repo, self.ctx.project_number, *issue_number)
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }

            ActionKind::AddComment { issue_number, body } => {
                client
                    .add_comment(repo, *issue_number, body)
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }

            ActionKind::AddReaction {
                comment_id,
                reaction,
            } => {
                client
                    .add_reaction(repo, *comment_id, reaction.as_str())
                    .await
                    .map_err(vcs)?;
                Ok(ActionStatus::Ok)
            }
        }
    }

    /// Reconcile the parent's sub-issues against the grooming output:
    /// create missing `[Phase N]` sub-issues, supersede phases the output
    /// dropped, preserve CLOSED/merged ones, refresh the hidden marker.
    async fn reconcile_sub_issues(&mut self, issue_number: u64) -> Result<ActionStatus, CoreError> {
        let vcs = |e: anyhow::Error| CoreError::vcs(e.to_string());
        let output = self.take_grooming()?;
        if output.phases.is_empty() {
            return Ok(ActionStatus::Skipped);
        }
        for phase in &output.phases {
            if phase.number == 0 {
                return Err(CoreError::InvariantViolation(format!(
                    "grooming proposed phase 0 ('{}'); phase numbers start at 1",
                    phase.title
                )));
            }
        }

        let existing = body::sub_issue_specs(&self.data.issue.sub_issues);
        let client = Arc::clone(&self.ctx.client);
        let repo = self.ctx.repo.clone();

        for phase in &output.phases {
            if existing.iter().any(|e| e.phase == Some(phase.number)) {
                continue;
            }
            let title = format!("[Phase {}] {}", phase.number, phase.title);
            let body_doc = phase_body(phase);
            let number = client
                .create_issue(&repo, &title, &markdown::render(&body_doc), &[])
                .await
                .map_err(vcs)?;
            client
                .add_sub_issue(&repo, issue_number, number)
                .await
                .map_err(vcs)?;
            info!(parent = issue_number, sub = number, title = %title, "created sub-issue");
            self.data.issue.sub_issues.push(crate::types::SubIssue {
                number,
                title,
                body: body_doc,
                state: IssueState::Open,
                project_status: None,
                assignees: Vec::new(),
                labels: Vec::new(),
                branch: None,
                pr: None,
            });
        }

        // Phases the output no longer wants are superseded, never deleted.
        for entry in &existing {
            let Some(phase) = entry.phase else { continue };
            if entry.closed || entry.merged {
                continue;
            }
            if !output.phases.iter().any(|p| p.number == phase) {
                client
                    .add_labels(
                        &repo,
                        entry.number,
                        &[crate::types::LABEL_SUPERSEDED.to_string()],
                    )
                    .await
                    .map_err(vcs)?;
                if let Some(sub) = self
                    .data
                    .issue
                    .sub_issues
                    .iter_mut()
                    .find(|s| s.number == entry.number)
                {
                    sub.labels.push(crate::types::LABEL_SUPERSEDED.into());
                }
            }
        }

        self.data
            .issue
            .sub_issues
            .sort_by_key(|s| (s.phase().unwrap_or(u32::MAX), s.number));
        let numbers: Vec<u64> = self.data.issue.sub_issues.iter().map(|s| s.number).collect();
        body::set_main_state_marker(&mut self.data.issue.body, &numbers);
        Ok(ActionStatus::Ok)
    }
}

fn paragraph(text: &str) -> Node {
    Node::Paragraph {
        children: vec![Node::Text {
            value: text.to_string(),
        }],
    }
}

/// Body for a freshly decomposed phase sub-issue.
fn phase_body(phase: &crate::action::PhaseSpec) -> Document {
    let mut doc = Document::default();
    if !phase.description.is_empty() {
        body::replace_section(&mut doc, "Description", 2, vec![paragraph(&phase.description)]);
    }
    if !phase.affected_areas.is_empty() {
        body::set_affected_areas(&mut doc, &phase.affected_areas);
    }
    let todos: Vec<TodoItem> = phase
        .todos
        .iter()
        .map(|t| TodoItem {
            text: if t.manual && !t.text.contains("[Manual]") {
                format!("[Manual] {}", t.text)
            } else {
                t.text.clone()
            },
            checked: false,
            manual: t.manual,
        })
        .collect();
    if !todos.is_empty() {
        body::set_todos(&mut doc, &todos);
    }
    doc
}

fn minimal_pr(number: u64, branch: &str, title: &str, draft: bool) -> PrInfo {
    PrInfo {
        number,
        state: PrState::Open,
        is_draft: draft,
        title: title.to_string(),
        head_ref: branch.to_string(),
        base_ref: "main".into(),
        labels: Vec::new(),
        reviews: Vec::new(),
        check_state: None,
        review_decision: None,
    }
}
