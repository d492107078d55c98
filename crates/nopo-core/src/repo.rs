use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::body::phase_from_title;
use crate::github::{RepoRef, VcsClient};
use crate::markdown;
use crate::types::{
    CommentInfo, IssueData, IssueInfo, IssueState, PrInfo, PrState, ProjectStatus, ReviewInfo,
    ReviewState, SubIssue,
};

/// Fetch options for [`IssueRepository::parse_issue`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub project_number: u64,
    pub bot_username: String,
    pub fetch_prs: bool,
    pub fetch_parent: bool,
}

/// Materializes the [`IssueData`] aggregate from the VCS and persists the
/// diff between a snapshot and its mutated successor.
pub struct IssueRepository {
    client: Arc<dyn VcsClient>,
    repo: RepoRef,
}

const ISSUE_QUERY: &str = r"
    query($owner: String!, $repo: String!, $number: Int!) {
      repository(owner: $owner, name: $repo) {
        issue(number: $number) {
          number
          title
          body
          state
          labels(first: 50) { nodes { name } }
          assignees(first: 20) { nodes { login } }
          parent { number }
          subIssues(first: 50) {
            nodes {
              number
              title
              body
              state
              labels(first: 20) { nodes { name } }
              assignees(first: 10) { nodes { login } }
              projectItems(first: 10) {
                nodes {
                  project { number }
                  fieldValues(first: 20) {
                    nodes {
                      ... on ProjectV2ItemFieldSingleSelectValue {
                        name field { ... on ProjectV2FieldCommon { name } }
                      }
                    }
                  }
                }
              }
            }
          }
          comments(last: 20) {
            nodes { databaseId author { login } body createdAt }
          }
          projectItems(first: 10) {
            nodes {
              project { number }
              fieldValues(first: 20) {
                nodes {
                  ... on ProjectV2ItemFieldSingleSelectValue {
                    name field { ... on ProjectV2FieldCommon { name } }
                  }
                  ... on ProjectV2ItemFieldNumberValue {
                    number field { ... on ProjectV2FieldCommon { name } }
                  }
                }
              }
            }
          }
        }
      }
    }";

const PR_QUERY: &str = r"
    query($owner: String!, $repo: String!, $head: String!) {
      repository(owner: $owner, name: $repo) {
        pullRequests(headRefName: $head, first: 1, orderBy: { field: CREATED_AT, direction: DESC }) {
          nodes {
            number
            state
            isDraft
            title
            headRefName
            baseRefName
            reviewDecision
            labels(first: 20) { nodes { name } }
            reviews(last: 20) {
              nodes { author { login } state submittedAt }
            }
            commits(last: 1) {
              nodes { commit { statusCheckRollup { state } } }
            }
          }
        }
      }
    }";

impl IssueRepository {
    pub fn new(client: Arc<dyn VcsClient>, repo: RepoRef) -> Self {
        Self { client, repo }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn client(&self) -> &Arc<dyn VcsClient> {
        &self.client
    }

    /// One aggregate fetch. Returns the working copy and the pristine
    /// snapshot [`persist`](Self::persist) diffs against.
    pub async fn parse_issue(
        &self,
        number: u64,
        opts: &ParseOptions,
    ) -> Result<(IssueData, IssueData)> {
        let value = self
            .client
            .graphql(
                ISSUE_QUERY,
                json!({
                    "owner": self.repo.owner,
                    "repo": self.repo.repo,
                    "number": number,
                }),
            )
            .await?;
        let issue_value = &value["data"]["repository"]["issue"];
        if issue_value.is_null() {
            return Err(anyhow!("issue #{number} not found in {}", self.repo));
        }

        let mut issue = parse_issue_node(issue_value, opts.project_number)?;
        issue.sub_issues.sort_by_key(sub_sort_key);

        if opts.fetch_prs {
            let branch = branch_for(&issue);
            if let Some(pr) = self.fetch_pr(&branch).await? {
                issue.branch = Some(branch);
                issue.pr = Some(pr);
            } else {
                // A branch may exist without a PR yet.
                issue.branch = self
                    .client
                    .get_ref(&self.repo, &branch)
                    .await?
                    .map(|_| branch);
            }
        }

        let parent_issue = match (opts.fetch_parent, issue.parent_issue_number) {
            (true, Some(parent)) => {
                let value = self
                    .client
                    .graphql(
                        ISSUE_QUERY,
                        json!({
                            "owner": self.repo.owner,
                            "repo": self.repo.repo,
                            "number": parent,
                        }),
                    )
                    .await?;
                let node = &value["data"]["repository"]["issue"];
                if node.is_null() {
                    None
                } else {
                    let mut parent = parse_issue_node(node, opts.project_number)?;
                    // Parent snapshot is one level only.
                    parent.sub_issues.clear();
                    Some(parent)
                }
            }
            _ => None,
        };

        let data = IssueData {
            owner: self.repo.owner.clone(),
            repo: self.repo.repo.clone(),
            number,
            issue,
            parent_issue,
        };
        debug!(issue = number, "parsed issue aggregate");
        Ok((data.clone(), data))
    }

    async fn fetch_pr(&self, head: &str) -> Result<Option<PrInfo>> {
        let value = self
            .client
            .graphql(
                PR_QUERY,
                json!({
                    "owner": self.repo.owner,
                    "repo": self.repo.repo,
                    "head": head,
                }),
            )
            .await?;
        let Some(node) = value["data"]["repository"]["pullRequests"]["nodes"]
            .as_array()
            .and_then(|nodes| nodes.first())
        else {
            return Ok(None);
        };
        Ok(Some(parse_pr_node(node)))
    }

    /// Apply only the diff between `snapshot` and `next`: label and
    /// assignee set-diffs, body replace when the AST changed, project
    /// field updates. Safe to call again after a partial failure.
    pub async fn persist(
        &self,
        snapshot: &IssueData,
        next: &IssueData,
        project_number: u64,
    ) -> Result<()> {
        let number = next.issue.number;
        let old = &snapshot.issue;
        let new = &next.issue;

        let added: Vec<String> = new
            .labels
            .iter()
            .filter(|l| !old.labels.contains(l))
            .cloned()
            .collect();
        if !added.is_empty() {
            self.client.add_labels(&self.repo, number, &added).await?;
        }
        for label in old.labels.iter().filter(|l| !new.labels.contains(l)) {
            self.client.remove_label(&self.repo, number, label).await?;
        }

        let assigned: Vec<String> = new
            .assignees
            .iter()
            .filter(|a| !old.assignees.contains(a))
            .cloned()
            .collect();
        if !assigned.is_empty() {
            self.client
                .add_assignees(&self.repo, number, &assigned)
                .await?;
        }
        let unassigned: Vec<String> = old
            .assignees
            .iter()
            .filter(|a| !new.assignees.contains(a))
            .cloned()
            .collect();
        if !unassigned.is_empty() {
            self.client
                .remove_assignees(&self.repo, number, &unassigned)
                .await?;
        }

        if old.body != new.body {
            self.client
                .update_issue_body(&self.repo, number, &markdown::render(&new.body))
                .await?;
        }

        // Changed sub-issue bodies ride along (reconciliation edits them
        // in the aggregate).
        for sub in &new.sub_issues {
            let unchanged = old
                .sub_issues
                .iter()
                .find(|s| s.number == sub.number)
                .map(|s| s.body == sub.body)
                .unwrap_or(false);
            if !unchanged {
                self.client
                    .update_issue_body(&self.repo, sub.number, &markdown::render(&sub.body))
                    .await?;
            }
        }

        if old.project_status != new.project_status {
            if let Some(status) = new.project_status {
                self.client
                    .update_project_status(
                        &self.repo,
                        project_number,
                        number,
                        status.board_name(),
                    )
                    .await?;
            }
        }
        if old.iteration != new.iteration {
            self.client
                .update_project_number_field(
                    &self.repo,
                    project_number,
                    number,
                    "Iteration",
                    f64::from(new.iteration),
                )
                .await?;
        }
        if old.failures != new.failures {
            self.client
                .update_project_number_field(
                    &self.repo,
                    project_number,
                    number,
                    "Failures",
                    f64::from(new.failures),
                )
                .await?;
        }

        if old.state != new.state && new.state == IssueState::Closed {
            self.client.close_issue(&self.repo, number).await?;
        }

        info!(issue = number, "persisted issue aggregate diff");
        Ok(())
    }
}

/// Branch owned by this issue for its lifetime.
fn branch_for(issue: &IssueInfo) -> String {
    match issue.parent_issue_number {
        Some(parent) => {
            let phase = phase_from_title(&issue.title).unwrap_or(issue.number as u32);
            format!("claude/issue/{parent}/phase-{phase}")
        }
        None => format!("claude/issue/{}", issue.number),
    }
}

/// `[Phase N]` ascending, ties by number; no-phase entries follow.
fn sub_sort_key(sub: &SubIssue) -> (u32, u64) {
    (sub.phase().unwrap_or(u32::MAX), sub.number)
}

// ── GraphQL node parsing ─────────────────────────────────────────────────

fn names(value: &Value, field: &str) -> Vec<String> {
    value[field]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| {
                    n["name"]
                        .as_str()
                        .or_else(|| n["login"].as_str())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_issue_state(value: &Value) -> IssueState {
    match value.as_str() {
        Some("CLOSED") => IssueState::Closed,
        _ => IssueState::Open,
    }
}

fn parse_issue_node(value: &Value, project_number: u64) -> Result<IssueInfo> {
    let number = value["number"]
        .as_u64()
        .ok_or_else(|| anyhow!("issue node has no number"))?;
    let body = markdown::parse(value["body"].as_str().unwrap_or_default());

    let (project_status, iteration, failures) = parse_project_fields(value, project_number);

    let sub_issues = value["subIssues"]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| {
                    Some(SubIssue {
                        number: n["number"].as_u64()?,
                        title: n["title"].as_str().unwrap_or_default().to_string(),
                        body: markdown::parse(n["body"].as_str().unwrap_or_default()),
                        state: parse_issue_state(&n["state"]),
                        project_status: parse_project_fields(n, project_number).0,
                        assignees: names(n, "assignees"),
                        labels: names(n, "labels"),
                        branch: None,
                        pr: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let comments = value["comments"]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .map(|n| CommentInfo {
                    id: n["databaseId"].as_u64().unwrap_or_default(),
                    author: n["author"]["login"].as_str().unwrap_or_default().to_string(),
                    body: n["body"].as_str().unwrap_or_default().to_string(),
                    created_at: n["createdAt"]
                        .as_str()
                        .and_then(|s| s.parse().ok()),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(IssueInfo {
        number,
        title: value["title"].as_str().unwrap_or_default().to_string(),
        body,
        state: parse_issue_state(&value["state"]),
        project_status,
        iteration,
        failures,
        assignees: names(value, "assignees"),
        labels: names(value, "labels"),
        sub_issues,
        comments,
        branch: None,
        pr: None,
        parent_issue_number: value["parent"]["number"].as_u64(),
    })
}

fn parse_project_fields(value: &Value, project_number: u64) -> (Option<ProjectStatus>, u32, u32) {
    let mut status = None;
    let mut iteration = 0u32;
    let mut failures = 0u32;
    let items = value["projectItems"]["nodes"].as_array();
    let item = items.and_then(|nodes| {
        nodes
            .iter()
            .find(|n| n["project"]["number"].as_u64() == Some(project_number))
    });
    if let Some(fields) = item.and_then(|i| i["fieldValues"]["nodes"].as_array()) {
        for field in fields {
            match field["field"]["name"].as_str() {
                Some("Status") => {
                    status = field["name"].as_str().and_then(ProjectStatus::parse);
                }
                Some("Iteration") => {
                    iteration = field["number"].as_f64().unwrap_or(0.0) as u32;
                }
                Some("Failures") => {
                    failures = field["number"].as_f64().unwrap_or(0.0) as u32;
                }
                _ => {}
            }
        }
    }
    (status, iteration, failures)
}

fn parse_pr_node(node: &Value) -> PrInfo {
    let reviews = node["reviews"]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .map(|n| ReviewInfo {
                    author: n["author"]["login"].as_str().unwrap_or_default().to_string(),
                    state: match n["state"].as_str() {
                        Some("APPROVED") => ReviewState::Approved,
                        Some("CHANGES_REQUESTED") => ReviewState::ChangesRequested,
                        Some("DISMISSED") => ReviewState::Dismissed,
                        Some("PENDING") => ReviewState::Pending,
                        _ => ReviewState::Commented,
                    },
                    submitted_at: n["submittedAt"].as_str().and_then(|s| s.parse().ok()),
                })
                .collect()
        })
        .unwrap_or_default();

    PrInfo {
        number: node["number"].as_u64().unwrap_or_default(),
        state: match node["state"].as_str() {
            Some("MERGED") => PrState::Merged,
            Some("CLOSED") => PrState::Closed,
            _ => PrState::Open,
        },
        is_draft: node["isDraft"].as_bool().unwrap_or(false),
        title: node["title"].as_str().unwrap_or_default().to_string(),
        head_ref: node["headRefName"].as_str().unwrap_or_default().to_string(),
        base_ref: node["baseRefName"].as_str().unwrap_or_default().to_string(),
        labels: names(node, "labels"),
        reviews,
        check_state: node["commits"]["nodes"]
            .as_array()
            .and_then(|nodes| nodes.first())
            .and_then(|n| n["commit"]["statusCheckRollup"]["state"].as_str())
            .map(str::to_string),
        review_decision: node["reviewDecision"].as_str().map(str::to_string),
    }
}
