use thiserror::Error;

/// Failure taxonomy for a dispatch. Everything crossing the orchestrator
/// boundary is one of these, carried as data in the dispatch result.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The referenced resource cannot be fetched or is inconsistent.
    /// The dispatch ends without any state mutation.
    #[error("context unavailable: {0}")]
    ContextUnavailable(String),

    /// The Agent returned non-zero, timed out, or produced output that
    /// fails schema validation. Recoverable at the action level.
    #[error("agent failure ({kind}): {message}")]
    AgentFailure { kind: String, message: String },

    /// Upstream API error after the capability layer's retries.
    #[error("vcs failure{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    VcsFailure { status: Option<u16>, message: String },

    /// A data invariant does not hold (e.g. a sub-issue missing its phase
    /// number in a phased parent). Fatal; never silently corrected.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A prior fatal action halted the queue.
    #[error("execution aborted at action {index}")]
    ExecutionAborted { index: usize },
}

impl CoreError {
    pub fn agent(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AgentFailure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn vcs(message: impl Into<String>) -> Self {
        Self::VcsFailure {
            status: None,
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
