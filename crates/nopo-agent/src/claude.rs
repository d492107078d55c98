use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use nopo_core::agent::{AgentBackend, AgentInvocation, AgentRequest};

use crate::prompt;
use crate::stream;

/// Runs Claude Code as a subprocess, one invocation per action.
pub struct ClaudeAgent {
    /// Path to the `claude` CLI binary.
    pub claude_bin: String,
    /// Model override; empty uses the CLI default.
    pub model: String,
    /// Kill the subprocess and report failure after this many seconds
    /// (0 = no limit). Timeouts are recoverable action failures.
    pub timeout_s: u64,
}

impl ClaudeAgent {
    pub fn new(claude_bin: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            claude_bin: claude_bin.into(),
            model: model.into(),
            timeout_s: 300,
        }
    }

    pub fn with_timeout(mut self, timeout_s: u64) -> Self {
        self.timeout_s = timeout_s;
        self
    }
}

#[async_trait]
impl AgentBackend for ClaudeAgent {
    async fn invoke(&self, req: &AgentRequest) -> Result<AgentInvocation> {
        let instruction = prompt::build_instruction(req.kind, &req.prompt_vars);
        let system = prompt::system_prompt(req.kind);

        let mut args: Vec<String> = vec![
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
            "--append-system-prompt".into(),
            system.into(),
        ];
        if !self.model.is_empty() {
            args.push("--model".into());
            args.push(self.model.clone());
        }
        if let Some(session_id) = &req.session_id {
            if !req.fresh_session {
                args.push("--resume".into());
                args.push(session_id.clone());
            }
        }
        args.push("--print".into());
        args.push(instruction);

        info!(
            kind = req.kind.as_str(),
            issue = req.issue_number,
            "spawning claude subprocess"
        );

        let mut child = Command::new(&self.claude_bin)
            .args(&args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn claude: {}", self.claude_bin))?;

        let stdout = child.stdout.take().context("failed to take stdout")?;
        let stderr = child.stderr.take().context("failed to take stderr")?;

        let kind = req.kind.as_str();
        let io_future = async move {
            let mut raw_stream = String::new();
            let mut stdout_reader = BufReader::new(stdout).lines();
            let mut stderr_reader = BufReader::new(stderr).lines();

            loop {
                tokio::select! {
                    line = stdout_reader.next_line() => {
                        match line.context("error reading stdout")? {
                            Some(l) => {
                                raw_stream.push_str(&l);
                                raw_stream.push('\n');
                            }
                            None => break,
                        }
                    }
                    line = stderr_reader.next_line() => {
                        if let Ok(Some(l)) = line {
                            if !l.is_empty() {
                                warn!(kind, "claude stderr: {}", l);
                            }
                        }
                    }
                }
            }

            while let Ok(Some(l)) = stderr_reader.next_line().await {
                if !l.is_empty() {
                    warn!(kind, "claude stderr: {}", l);
                }
            }

            let exit_status = child.wait().await.context("failed to wait for claude")?;
            anyhow::Ok((raw_stream, exit_status.success()))
        };

        let (raw_stream, exited_ok) = if self.timeout_s > 0 {
            match tokio::time::timeout(
                std::time::Duration::from_secs(self.timeout_s),
                io_future,
            )
            .await
            {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    warn!(
                        kind = req.kind.as_str(),
                        timeout_s = self.timeout_s,
                        "claude subprocess timed out"
                    );
                    return Ok(AgentInvocation::failed("agent timed out"));
                }
            }
        } else {
            io_future.await?
        };

        let summary = stream::parse_stream(&raw_stream);
        let success = exited_ok && !summary.is_error;

        info!(
            kind = req.kind.as_str(),
            issue = req.issue_number,
            success,
            session_id = ?summary.session_id,
            output_len = summary.output.len(),
            "claude subprocess finished"
        );

        Ok(AgentInvocation {
            output: stream::extract_json(&summary.output).to_string(),
            session_id: summary.session_id,
            success,
            raw_stream,
        })
    }
}
