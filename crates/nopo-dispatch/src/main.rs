use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use nopo_agent::claude::ClaudeAgent;
use nopo_core::config::Config;
use nopo_core::event::RawEvent;
use nopo_core::github::GithubClient;
use nopo_core::orchestrator::Orchestrator;

/// Single-shot dispatch: read one raw event, run the orchestrator once,
/// emit the routing context for the environment, exit.
#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nopo_dispatch=info,nopo_core=info,nopo_agent=info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let event = read_event()?;

    let client = Arc::new(GithubClient::new(
        config.api_base.clone(),
        config.github_token.clone(),
    ));
    let reviewer_client = (!config.reviewer_token.is_empty()
        && config.reviewer_token != config.github_token)
        .then(|| {
            Arc::new(GithubClient::new(
                config.api_base.clone(),
                config.reviewer_token.clone(),
            )) as Arc<dyn nopo_core::github::VcsClient>
        });
    let agent = Arc::new(
        ClaudeAgent::new(config.claude_bin.clone(), config.model.clone())
            .with_timeout(config.agent_timeout_s),
    );

    let orchestrator = Orchestrator::new(config, client, reviewer_client, agent);
    let result = orchestrator.dispatch(&event).await;

    write_context(&result.decision.to_context_json())?;

    if result.decision.skip {
        info!(reason = %result.decision.skip_reason, "dispatch skipped");
        return Ok(());
    }
    info!(
        state = ?result.state,
        retrigger = result.retrigger,
        "dispatch finished"
    );
    if let Some(error) = result.error {
        return Err(anyhow!(error));
    }
    if let Some(execution) = &result.execution {
        if !execution.success {
            let failed: Vec<&str> = execution
                .actions
                .iter()
                .filter(|a| a.status == nopo_core::runner::ActionStatus::Failed)
                .map(|a| a.action.as_str())
                .collect();
            return Err(anyhow!("actions failed: {}", failed.join(", ")));
        }
    }
    Ok(())
}

/// Event JSON from argv[1] or `GITHUB_EVENT_PATH`, with the event name
/// injected from `GITHUB_EVENT_NAME` when the file itself lacks one.
fn read_event() -> Result<RawEvent> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GITHUB_EVENT_PATH").ok())
        .ok_or_else(|| anyhow!("no event: pass a path or set GITHUB_EVENT_PATH"))?;
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read event file {path}"))?;
    let mut value: serde_json::Value =
        serde_json::from_str(&contents).context("event file is not JSON")?;
    if value.get("event_name").is_none() {
        if let Ok(name) = std::env::var("GITHUB_EVENT_NAME") {
            if let Some(map) = value.as_object_mut() {
                map.insert("event_name".into(), name.into());
            }
        }
    }
    serde_json::from_value(value).context("event does not match any known payload shape")
}

/// Write `context_json` where the environment looks for it: appended to
/// `GITHUB_OUTPUT` when set, stdout otherwise.
fn write_context(context: &serde_json::Value) -> Result<()> {
    let line = format!("context_json={context}");
    match std::env::var("GITHUB_OUTPUT") {
        Ok(path) => {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open {path}"))?;
            writeln!(file, "{line}")?;
        }
        Err(_) => println!("{line}"),
    }
    Ok(())
}
