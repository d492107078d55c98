use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use nopo_core::agent::{AgentBackend, AgentInvocation, AgentRequest};

/// Canned Agent for tests and dry runs. Outputs are keyed by
/// `kind/variant` first, then bare `kind`; an unkeyed invocation fails
/// the way a broken agent would.
#[derive(Debug, Default)]
pub struct MockAgent {
    outputs: HashMap<String, Value>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: impl Into<String>, output: Value) -> Self {
        self.outputs.insert(key.into(), output);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, output: Value) {
        self.outputs.insert(key.into(), output);
    }
}

#[async_trait]
impl AgentBackend for MockAgent {
    async fn invoke(&self, req: &AgentRequest) -> Result<AgentInvocation> {
        for key in req.mock_keys() {
            if let Some(output) = self.outputs.get(&key) {
                return Ok(AgentInvocation {
                    output: output.to_string(),
                    session_id: Some(format!("mock-session-{key}")),
                    success: true,
                    raw_stream: String::new(),
                });
            }
        }
        Ok(AgentInvocation::failed(format!(
            "no mock output for kind '{}'",
            req.kind.as_str()
        )))
    }
}
