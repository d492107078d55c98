use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::action::AgentKind;

/// One Agent invocation request. `prompt_vars` is ordered so prompt
/// assembly is deterministic for a fixed machine context.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub kind: AgentKind,
    pub issue_number: u64,
    pub prompt_vars: BTreeMap<String, String>,
    /// Session to resume, when the backend supports it.
    pub session_id: Option<String>,
    pub fresh_session: bool,
}

impl AgentRequest {
    pub fn new(kind: AgentKind, issue_number: u64, prompt_vars: BTreeMap<String, String>) -> Self {
        Self {
            kind,
            issue_number,
            prompt_vars,
            session_id: None,
            fresh_session: false,
        }
    }

    /// Mock-table key, most specific first: `kind/variant` then `kind`.
    pub fn mock_keys(&self) -> Vec<String> {
        let kind = self.kind.as_str();
        let mut keys = Vec::new();
        if let Some(variant) = self.prompt_vars.get("variant") {
            keys.push(format!("{kind}/{variant}"));
        }
        keys.push(kind.to_string());
        keys
    }
}

/// What came back from the Agent process.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Raw stdout; the runner validates it against the kind's schema.
    pub output: String,
    pub session_id: Option<String>,
    pub success: bool,
    pub raw_stream: String,
}

impl AgentInvocation {
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            session_id: None,
            success: false,
            raw_stream: String::new(),
        }
    }
}

/// The Agent capability. Implementations: the Claude Code CLI subprocess
/// and the mock table used in tests.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn invoke(&self, req: &AgentRequest) -> Result<AgentInvocation>;
}
