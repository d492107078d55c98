use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::AgentBackend;
use crate::config::Config;
use crate::context;
use crate::event::RawEvent;
use crate::github::{RepoRef, VcsClient};
use crate::machine;
use crate::repo::{IssueRepository, ParseOptions};
use crate::router;
use crate::runner::{ActionRunner, RunnerContext};
use crate::types::{
    DispatchResult, IssueData, IssueInfo, IssueState, ResourceType, RoutingDecision,
};

/// The per-dispatch entry point: route → load → run machine → execute
/// queue → persist. Single-shot; retries across dispatches come from the
/// environment re-invoking it.
pub struct Orchestrator {
    config: Config,
    client: Arc<dyn VcsClient>,
    reviewer_client: Option<Arc<dyn VcsClient>>,
    agent: Arc<dyn AgentBackend>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        client: Arc<dyn VcsClient>,
        reviewer_client: Option<Arc<dyn VcsClient>>,
        agent: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            config,
            client,
            reviewer_client,
            agent,
        }
    }

    pub async fn dispatch(&self, event: &RawEvent) -> DispatchResult {
        let decision = router::route(event, &self.config.router());
        info!(
            job = decision.job.map(|j| j.as_str()).unwrap_or("-"),
            resource = decision.resource_number,
            skip = decision.skip,
            "routed event"
        );
        if decision.skip {
            return DispatchResult {
                decision,
                state: None,
                execution: None,
                retrigger: false,
                error: None,
            };
        }

        let repo_ref = RepoRef::new(&self.config.owner, &self.config.repo);

        // Acknowledge slash commands before any heavy work.
        if let Some((comment_id, reaction)) = decision.ack_reaction {
            if let Err(e) = self
                .client
                .add_reaction(&repo_ref, comment_id, reaction.as_str())
                .await
            {
                warn!(comment_id, "reaction ack failed: {e}");
            }
        }

        // The router computed the branch; make sure it exists before the
        // context sees it.
        if let Some(branch) = &decision.branch {
            if let Err(e) = self.ensure_branch(&repo_ref, branch).await {
                warn!(branch = %branch, "branch ensure failed: {e}");
            }
        }

        let (mut data, snapshot) = match self.load(&repo_ref, &decision).await {
            Ok(pair) => pair,
            Err(e) => {
                return DispatchResult {
                    decision,
                    state: None,
                    execution: None,
                    retrigger: false,
                    error: Some(format!("context unavailable: {e}")),
                };
            }
        };

        let ctx = context::build(&data, &decision, &self.config);
        let outcome = machine::run(&ctx);
        info!(state = ?outcome.state, actions = outcome.actions.len(), "machine resolved");

        let runner_ctx = RunnerContext {
            repo: repo_ref.clone(),
            client: Arc::clone(&self.client),
            reviewer_client: self.reviewer_client.as_ref().map(Arc::clone),
            agent: Arc::clone(&self.agent),
            project_number: self.config.project_number,
            max_retries: self.config.max_retries,
            bot_username: self.config.bot_username.clone(),
            dry_run: self.config.dry_run,
            run_id: decision.workflow.run_id,
            run_url: decision.workflow.run_url.clone(),
        };
        let mut runner = ActionRunner::new(&runner_ctx, &mut data);
        let execution = runner.execute(&outcome.actions).await;

        // A failed triage/grooming agent leaves the issue with an
        // explanation instead of silently stalling.
        if let Some(idx) = execution.fatal_index {
            let failed_agent = execution
                .actions
                .get(idx)
                .is_some_and(|a| a.action == "run_claude");
            let explanation = match outcome.state {
                machine::State::Triaging => {
                    Some("Automated triage failed. Edit the issue or remove and re-add the `triaged` label to retry.")
                }
                machine::State::Grooming => {
                    Some("Automated grooming failed. Edit the issue to retry.")
                }
                _ => None,
            };
            if let (true, Some(body), false) = (failed_agent, explanation, self.config.dry_run) {
                if let Err(e) = self
                    .client
                    .add_comment(&repo_ref, data.issue.number, body)
                    .await
                {
                    warn!("failure comment could not be posted: {e}");
                }
            }
        }

        let mut error = None;
        if !self.config.dry_run {
            let repo = IssueRepository::new(Arc::clone(&self.client), repo_ref);
            if let Err(e) = repo
                .persist(&snapshot, &data, self.config.project_number)
                .await
            {
                warn!("persist failed: {e}");
                error = Some(format!("persist failed: {e}"));
            }
        }

        DispatchResult {
            decision,
            state: Some(outcome.state),
            execution: Some(execution),
            retrigger: outcome.retrigger,
            error,
        }
    }

    /// Create the branch off main when it does not exist yet.
    async fn ensure_branch(&self, repo: &RepoRef, branch: &str) -> anyhow::Result<()> {
        if self.client.get_ref(repo, branch).await?.is_some() {
            return Ok(());
        }
        if self.config.dry_run {
            info!(branch, "dry-run: would create branch");
            return Ok(());
        }
        let sha = self.client.default_branch_sha(repo).await?;
        self.client.create_ref(repo, branch, &sha).await?;
        info!(branch, "created branch");
        Ok(())
    }

    /// Load the aggregate the dispatch operates on. When a CI event names
    /// a phase branch, the aggregate is the phase's sub-issue so counter
    /// and body mutations land on the right board item.
    async fn load(
        &self,
        repo_ref: &RepoRef,
        decision: &RoutingDecision,
    ) -> anyhow::Result<(IssueData, IssueData)> {
        if decision.resource_type == ResourceType::Discussion {
            let data = discussion_aggregate(repo_ref, decision.resource_number);
            return Ok((data.clone(), data));
        }

        let repo = IssueRepository::new(Arc::clone(&self.client), repo_ref.clone());
        let opts = ParseOptions {
            project_number: self.config.project_number,
            bot_username: self.config.bot_username.clone(),
            fetch_prs: true,
            fetch_parent: true,
        };
        let (data, snapshot) = repo.parse_issue(decision.resource_number, &opts).await?;

        let phase: Option<u32> = decision
            .context
            .get("phase")
            .and_then(|p| p.parse().ok());
        if let Some(phase) = phase {
            if let Some(sub) = data
                .issue
                .sub_issues
                .iter()
                .find(|s| s.phase() == Some(phase))
            {
                return repo.parse_issue(sub.number, &opts).await;
            }
        }
        Ok((data, snapshot))
    }
}

/// Discussions have no issue aggregate; the machine only needs a shell to
/// hang the comment context on.
fn discussion_aggregate(repo: &RepoRef, number: u64) -> IssueData {
    IssueData {
        owner: repo.owner.clone(),
        repo: repo.repo.clone(),
        number,
        issue: IssueInfo {
            number,
            title: String::new(),
            body: crate::markdown::Document::default(),
            state: IssueState::Open,
            project_status: None,
            iteration: 0,
            failures: 0,
            assignees: Vec::new(),
            labels: Vec::new(),
            sub_issues: Vec::new(),
            comments: Vec::new(),
            branch: None,
            pr: None,
            parent_issue_number: None,
        },
        parent_issue: None,
    }
}
