use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Repository coordinates every capability call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// The VCS capability the core consumes. One method per upstream mutation
/// the action executors need, plus a GraphQL pass-through for aggregate
/// reads. Implementations must be safe to call twice with the same inputs.
#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value>;

    // Issues
    async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64>;
    async fn update_issue_body(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()>;
    async fn close_issue(&self, repo: &RepoRef, number: u64) -> Result<()>;
    async fn add_labels(&self, repo: &RepoRef, number: u64, labels: &[String]) -> Result<()>;
    async fn remove_label(&self, repo: &RepoRef, number: u64, label: &str) -> Result<()>;
    async fn add_assignees(&self, repo: &RepoRef, number: u64, users: &[String]) -> Result<()>;
    async fn remove_assignees(&self, repo: &RepoRef, number: u64, users: &[String]) -> Result<()>;
    async fn add_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<u64>;
    async fn add_reaction(&self, repo: &RepoRef, comment_id: u64, reaction: &str) -> Result<()>;
    async fn add_sub_issue(&self, repo: &RepoRef, parent: u64, child: u64) -> Result<()>;

    // Pull requests
    async fn create_pr(
        &self,
        repo: &RepoRef,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> Result<u64>;
    async fn find_pr_by_head(&self, repo: &RepoRef, head: &str) -> Result<Option<u64>>;
    async fn mark_pr_ready(&self, repo: &RepoRef, pr: u64) -> Result<()>;
    async fn convert_pr_to_draft(&self, repo: &RepoRef, pr: u64) -> Result<()>;
    async fn request_reviewer(&self, repo: &RepoRef, pr: u64, user: &str) -> Result<()>;
    async fn remove_reviewer(&self, repo: &RepoRef, pr: u64, user: &str) -> Result<()>;
    async fn submit_review(
        &self,
        repo: &RepoRef,
        pr: u64,
        event: &str,
        body: &str,
    ) -> Result<()>;

    // Git refs
    async fn get_ref(&self, repo: &RepoRef, branch: &str) -> Result<Option<String>>;
    async fn create_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<()>;
    async fn default_branch_sha(&self, repo: &RepoRef) -> Result<String>;

    // Project board
    async fn update_project_status(
        &self,
        repo: &RepoRef,
        project_number: u64,
        issue_number: u64,
        status: &str,
    ) -> Result<()>;
    async fn update_project_number_field(
        &self,
        repo: &RepoRef,
        project_number: u64,
        issue_number: u64,
        field: &str,
        value: f64,
    ) -> Result<()>;
    async fn remove_from_project(
        &self,
        repo: &RepoRef,
        project_number: u64,
        issue_number: u64,
    ) -> Result<()>;
}

// ── GitHub implementation ────────────────────────────────────────────────

const MAX_ATTEMPTS: u32 = 3;

/// GitHub REST + GraphQL client. Transient failures (network, 5xx) are
/// retried up to three times with exponential backoff; anything else
/// surfaces as an error for the action layer.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    graphql_url: String,
    token: String,
}

impl GithubClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        let api_base = api_base.into();
        let graphql_url = format!("{}/graphql", api_base.trim_end_matches('/'));
        Self {
            http: reqwest::Client::new(),
            api_base,
            graphql_url,
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500u64 << attempt)).await;
            }
            let mut req = self
                .http
                .request(method.clone(), url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "nopo-dispatch");
            if let Some(body) = body {
                req = req.json(body);
            }
            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        warn!(%url, %status, attempt, "server error, retrying");
                        last_err = Some(anyhow!("server error {status} from {url}"));
                        continue;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if !status.is_success() {
                        return Err(anyhow!(
                            "request to {url} failed with {status}: {}",
                            text.chars().take(300).collect::<String>()
                        ));
                    }
                    if text.is_empty() {
                        return Ok(Value::Null);
                    }
                    return serde_json::from_str(&text)
                        .with_context(|| format!("invalid JSON from {url}"));
                }
                Err(e) => {
                    warn!(%url, attempt, "network error: {e}");
                    last_err = Some(e.into());
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("request to {url} failed")))
    }

    async fn rest(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        self.send(method, &self.url(path), body.as_ref()).await
    }

    /// PR node id, needed by the draft-toggle GraphQL mutations.
    async fn pr_node_id(&self, repo: &RepoRef, pr: u64) -> Result<String> {
        let value = self
            .rest(
                reqwest::Method::GET,
                &format!("repos/{}/{}/pulls/{pr}", repo.owner, repo.repo),
                None,
            )
            .await?;
        value["node_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("PR #{pr} has no node_id"))
    }

    /// Project item id + project id for an issue on the given board.
    async fn project_item(
        &self,
        repo: &RepoRef,
        project_number: u64,
        issue_number: u64,
    ) -> Result<(String, String)> {
        let query = r"
            query($owner: String!, $repo: String!, $issue: Int!) {
              repository(owner: $owner, name: $repo) {
                issue(number: $issue) {
                  projectItems(first: 10) {
                    nodes { id project { id number } }
                  }
                }
              }
            }";
        let value = self
            .graphql(
                query,
                json!({ "owner": repo.owner, "repo": repo.repo, "issue": issue_number }),
            )
            .await?;
        let nodes = value["data"]["repository"]["issue"]["projectItems"]["nodes"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for node in nodes {
            if node["project"]["number"].as_u64() == Some(project_number) {
                let item = node["id"].as_str().unwrap_or_default().to_string();
                let project = node["project"]["id"].as_str().unwrap_or_default().to_string();
                if !item.is_empty() && !project.is_empty() {
                    return Ok((item, project));
                }
            }
        }
        Err(anyhow!(
            "issue #{issue_number} is not on project {project_number}"
        ))
    }

    /// Field id (and option id for single-select values) on a project.
    async fn project_field(
        &self,
        project_id: &str,
        field: &str,
        option: Option<&str>,
    ) -> Result<(String, Option<String>)> {
        let query = r"
            query($project: ID!) {
              node(id: $project) {
                ... on ProjectV2 {
                  fields(first: 50) {
                    nodes {
                      ... on ProjectV2FieldCommon { id name }
                      ... on ProjectV2SingleSelectField { id name options { id name } }
                    }
                  }
                }
              }
            }";
        let value = self.graphql(query, json!({ "project": project_id })).await?;
        let nodes = value["data"]["node"]["fields"]["nodes"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for node in nodes {
            if node["name"].as_str() != Some(field) {
                continue;
            }
            let field_id = node["id"].as_str().unwrap_or_default().to_string();
            let option_id = option.and_then(|wanted| {
                node["options"].as_array().and_then(|opts| {
                    opts.iter()
                        .find(|o| o["name"].as_str() == Some(wanted))
                        .and_then(|o| o["id"].as_str())
                        .map(str::to_string)
                })
            });
            return Ok((field_id, option_id));
        }
        Err(anyhow!("project has no field named '{field}'"))
    }
}

#[async_trait]
impl VcsClient for GithubClient {
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let body = json!({ "query": query, "variables": variables });
        let value = self
            .send(reqwest::Method::POST, &self.graphql_url, Some(&body))
            .await?;
        if let Some(errors) = value.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(anyhow!("graphql errors: {errors:?}"));
            }
        }
        Ok(value)
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64> {
        let value = self
            .rest(
                reqwest::Method::POST,
                &format!("repos/{}/{}/issues", repo.owner, repo.repo),
                Some(json!({ "title": title, "body": body, "labels": labels })),
            )
            .await?;
        value["number"]
            .as_u64()
            .ok_or_else(|| anyhow!("issue creation returned no number"))
    }

    async fn update_issue_body(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.rest(
            reqwest::Method::PATCH,
            &format!("repos/{}/{}/issues/{number}", repo.owner, repo.repo),
            Some(json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn close_issue(&self, repo: &RepoRef, number: u64) -> Result<()> {
        self.rest(
            reqwest::Method::PATCH,
            &format!("repos/{}/{}/issues/{number}", repo.owner, repo.repo),
            Some(json!({ "state": "closed" })),
        )
        .await?;
        Ok(())
    }

    async fn add_labels(&self, repo: &RepoRef, number: u64, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.rest(
            reqwest::Method::POST,
            &format!("repos/{}/{}/issues/{number}/labels", repo.owner, repo.repo),
            Some(json!({ "labels": labels })),
        )
        .await?;
        Ok(())
    }

    async fn remove_label(&self, repo: &RepoRef, number: u64, label: &str) -> Result<()> {
        let result = self
            .rest(
                reqwest::Method::DELETE,
                &format!(
                    "repos/{}/{}/issues/{number}/labels/{label}",
                    repo.owner, repo.repo
                ),
                None,
            )
            .await;
        // Removing an absent label is a no-op, not a failure.
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("404") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn add_assignees(&self, repo: &RepoRef, number: u64, users: &[String]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        self.rest(
            reqwest::Method::POST,
            &format!(
                "repos/{}/{}/issues/{number}/assignees",
                repo.owner, repo.repo
            ),
            Some(json!({ "assignees": users })),
        )
        .await?;
        Ok(())
    }

    async fn remove_assignees(&self, repo: &RepoRef, number: u64, users: &[String]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        self.rest(
            reqwest::Method::DELETE,
            &format!(
                "repos/{}/{}/issues/{number}/assignees",
                repo.owner, repo.repo
            ),
            Some(json!({ "assignees": users })),
        )
        .await?;
        Ok(())
    }

    async fn add_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<u64> {
        let value = self
            .rest(
                reqwest::Method::POST,
                &format!(
                    "repos/{}/{}/issues/{number}/comments",
                    repo.owner, repo.repo
                ),
                Some(json!({ "body": body })),
            )
            .await?;
        value["id"]
            .as_u64()
            .ok_or_else(|| anyhow!("comment creation returned no id"))
    }

    async fn add_reaction(&self, repo: &RepoRef, comment_id: u64, reaction: &str) -> Result<()> {
        self.rest(
            reqwest::Method::POST,
            &format!(
                "repos/{}/{}/issues/comments/{comment_id}/reactions",
                repo.owner, repo.repo
            ),
            Some(json!({ "content": reaction })),
        )
        .await?;
        Ok(())
    }

    async fn add_sub_issue(&self, repo: &RepoRef, parent: u64, child: u64) -> Result<()> {
        // Sub-issue linking wants the child's id, not its number.
        let value = self
            .rest(
                reqwest::Method::GET,
                &format!("repos/{}/{}/issues/{child}", repo.owner, repo.repo),
                None,
            )
            .await?;
        let child_id = value["id"]
            .as_u64()
            .ok_or_else(|| anyhow!("issue #{child} has no id"))?;
        self.rest(
            reqwest::Method::POST,
            &format!(
                "repos/{}/{}/issues/{parent}/sub_issues",
                repo.owner, repo.repo
            ),
            Some(json!({ "sub_issue_id": child_id })),
        )
        .await?;
        Ok(())
    }

    async fn create_pr(
        &self,
        repo: &RepoRef,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> Result<u64> {
        let value = self
            .rest(
                reqwest::Method::POST,
                &format!("repos/{}/{}/pulls", repo.owner, repo.repo),
                Some(json!({
                    "head": head,
                    "base": base,
                    "title": title,
                    "body": body,
                    "draft": draft,
                })),
            )
            .await?;
        value["number"]
            .as_u64()
            .ok_or_else(|| anyhow!("PR creation returned no number"))
    }

    async fn find_pr_by_head(&self, repo: &RepoRef, head: &str) -> Result<Option<u64>> {
        let value = self
            .rest(
                reqwest::Method::GET,
                &format!(
                    "repos/{0}/{1}/pulls?head={0}:{head}&state=open",
                    repo.owner, repo.repo
                ),
                None,
            )
            .await?;
        Ok(value
            .as_array()
            .and_then(|prs| prs.first())
            .and_then(|pr| pr["number"].as_u64()))
    }

    async fn mark_pr_ready(&self, repo: &RepoRef, pr: u64) -> Result<()> {
        let node_id = self.pr_node_id(repo, pr).await?;
        self.graphql(
            r"mutation($id: ID!) {
                markPullRequestReadyForReview(input: { pullRequestId: $id }) {
                  pullRequest { id }
                }
              }",
            json!({ "id": node_id }),
        )
        .await?;
        Ok(())
    }

    async fn convert_pr_to_draft(&self, repo: &RepoRef, pr: u64) -> Result<()> {
        let node_id = self.pr_node_id(repo, pr).await?;
        self.graphql(
            r"mutation($id: ID!) {
                convertPullRequestToDraft(input: { pullRequestId: $id }) {
                  pullRequest { id }
                }
              }",
            json!({ "id": node_id }),
        )
        .await?;
        Ok(())
    }

    async fn request_reviewer(&self, repo: &RepoRef, pr: u64, user: &str) -> Result<()> {
        self.rest(
            reqwest::Method::POST,
            &format!(
                "repos/{}/{}/pulls/{pr}/requested_reviewers",
                repo.owner, repo.repo
            ),
            Some(json!({ "reviewers": [user] })),
        )
        .await?;
        Ok(())
    }

    async fn remove_reviewer(&self, repo: &RepoRef, pr: u64, user: &str) -> Result<()> {
        self.rest(
            reqwest::Method::DELETE,
            &format!(
                "repos/{}/{}/pulls/{pr}/requested_reviewers",
                repo.owner, repo.repo
            ),
            Some(json!({ "reviewers": [user] })),
        )
        .await?;
        Ok(())
    }

    async fn submit_review(
        &self,
        repo: &RepoRef,
        pr: u64,
        event: &str,
        body: &str,
    ) -> Result<()> {
        self.rest(
            reqwest::Method::POST,
            &format!("repos/{}/{}/pulls/{pr}/reviews", repo.owner, repo.repo),
            Some(json!({ "event": event, "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn get_ref(&self, repo: &RepoRef, branch: &str) -> Result<Option<String>> {
        let result = self
            .rest(
                reqwest::Method::GET,
                &format!(
                    "repos/{}/{}/git/ref/heads/{branch}",
                    repo.owner, repo.repo
                ),
                None,
            )
            .await;
        match result {
            Ok(value) => Ok(value["object"]["sha"].as_str().map(str::to_string)),
            Err(e) if e.to_string().contains("404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_ref(&self, repo: &RepoRef, branch: &str, sha: &str) -> Result<()> {
        debug!(%repo, branch, sha, "creating ref");
        self.rest(
            reqwest::Method::POST,
            &format!("repos/{}/{}/git/refs", repo.owner, repo.repo),
            Some(json!({ "ref": format!("refs/heads/{branch}"), "sha": sha })),
        )
        .await?;
        Ok(())
    }

    async fn default_branch_sha(&self, repo: &RepoRef) -> Result<String> {
        let value = self
            .rest(
                reqwest::Method::GET,
                &format!("repos/{}/{}/git/ref/heads/main", repo.owner, repo.repo),
                None,
            )
            .await?;
        value["object"]["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("main has no resolvable sha"))
    }

    async fn update_project_status(
        &self,
        repo: &RepoRef,
        project_number: u64,
        issue_number: u64,
        status: &str,
    ) -> Result<()> {
        let (item_id, project_id) = self.project_item(repo, project_number, issue_number).await?;
        let (field_id, option_id) = self.project_field(&project_id, "Status", Some(status)).await?;
        let option_id =
            option_id.ok_or_else(|| anyhow!("Status field has no option '{status}'"))?;
        self.graphql(
            r"mutation($project: ID!, $item: ID!, $field: ID!, $option: String!) {
                updateProjectV2ItemFieldValue(input: {
                  projectId: $project, itemId: $item, fieldId: $field,
                  value: { singleSelectOptionId: $option }
                }) { projectV2Item { id } }
              }",
            json!({
                "project": project_id,
                "item": item_id,
                "field": field_id,
                "option": option_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn update_project_number_field(
        &self,
        repo: &RepoRef,
        project_number: u64,
        issue_number: u64,
        field: &str,
        value: f64,
    ) -> Result<()> {
        let (item_id, project_id) = self.project_item(repo, project_number, issue_number).await?;
        let (field_id, _) = self.project_field(&project_id, field, None).await?;
        self.graphql(
            r"mutation($project: ID!, $item: ID!, $field: ID!, $value: Float!) {
                updateProjectV2ItemFieldValue(input: {
                  projectId: $project, itemId: $item, fieldId: $field,
                  value: { number: $value }
                }) { projectV2Item { id } }
              }",
            json!({
                "project": project_id,
                "item": item_id,
                "field": field_id,
                "value": value,
            }),
        )
        .await?;
        Ok(())
    }

    async fn remove_from_project(
        &self,
        repo: &RepoRef,
        project_number: u64,
        issue_number: u64,
    ) -> Result<()> {
        let (item_id, project_id) =
            match self.project_item(repo, project_number, issue_number).await {
                Ok(ids) => ids,
                // Already off the board.
                Err(_) => return Ok(()),
            };
        self.graphql(
            r"mutation($project: ID!, $item: ID!) {
                deleteProjectV2Item(input: { projectId: $project, itemId: $item }) {
                  deletedItemId
                }
              }",
            json!({ "project": project_id, "item": item_id }),
        )
        .await?;
        Ok(())
    }
}
