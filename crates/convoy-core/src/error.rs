use thiserror::Error;

/// A convenience `Result` alias using [`ConvoyError`].
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// Top-level error type shared by every Convoy crate.
///
/// Workflow variants abort a run and are reported to the run's caller. Bus
/// variants are logged by the bus and never abort its loops.
#[derive(Error, Debug)]
pub enum ConvoyError {
    /// No template is registered under the requested name.
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// A template with this name is already registered.
    #[error("Duplicate template: {0}")]
    DuplicateTemplate(String),

    /// A phase declared a dependency without a successful recorded result.
    #[error("Dependency not met for phase {phase}: {dependency}")]
    DependencyNotMet {
        /// Phase that was about to start.
        phase: String,
        /// Dependency lacking a successful result.
        dependency: String,
    },

    /// No idle agent matches the requested role.
    #[error("No available agent for role: {0}")]
    AgentUnavailable(String),

    /// At least one declared success criterion failed for the phase.
    #[error("Success criteria not met for phase: {0}")]
    SuccessCriteriaNotMet(String),

    /// A phase handler did not finish within its timeout.
    #[error("Phase {phase} timed out after {timeout_ms}ms")]
    PhaseTimeout {
        /// Phase that timed out.
        phase: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The run was stopped by shutdown. Not a failure.
    #[error("Workflow interrupted: {0}")]
    Interrupted(String),

    /// No channel with this name exists.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// No agent (connection or registry entry) with this id exists.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// A call to an external collaborator failed.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An inbound payload could not be decoded.
    #[error("Message parse error: {0}")]
    MessageParse(String),

    /// A transport-level failure on an agent connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration parsing or validation failed.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvoyError {
    /// Short machine-readable tag, used in `error_report` payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvoyError::UnknownWorkflowType(_) => "unknown_workflow_type",
            ConvoyError::DuplicateTemplate(_) => "duplicate_template",
            ConvoyError::DependencyNotMet { .. } => "dependency_not_met",
            ConvoyError::AgentUnavailable(_) => "agent_unavailable",
            ConvoyError::SuccessCriteriaNotMet(_) => "success_criteria_not_met",
            ConvoyError::PhaseTimeout { .. } => "phase_timeout",
            ConvoyError::Interrupted(_) => "interrupted",
            ConvoyError::UnknownChannel(_) => "unknown_channel",
            ConvoyError::UnknownAgent(_) => "unknown_agent",
            ConvoyError::ServiceUnavailable(_) => "service_unavailable",
            ConvoyError::MessageParse(_) => "message_parse",
            ConvoyError::Connection(_) => "connection",
            ConvoyError::Config(_) => "config",
            ConvoyError::Json(_) => "json",
            ConvoyError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_message_names_phase() {
        let err = ConvoyError::SuccessCriteriaNotMet("A".to_string());
        assert_eq!(err.to_string(), "Success criteria not met for phase: A");
        assert_eq!(err.kind(), "success_criteria_not_met");
    }

    #[test]
    fn test_timeout_display() {
        let err = ConvoyError::PhaseTimeout {
            phase: "testing".into(),
            timeout_ms: 1500,
        };
        assert_eq!(err.to_string(), "Phase testing timed out after 1500ms");
    }
}
