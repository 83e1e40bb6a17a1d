use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    /// A message is already pending on this instance. Non-retryable by the
    /// core; the caller must resubmit after the in-flight message completes.
    #[error("message already set, cannot update")]
    Conflict,
    /// The agent runner could not produce a result, including exhausted tool
    /// retries inside its loop.
    #[error("agent runner failed: {0}")]
    RunnerFailure(String),
    /// The instance went away while a caller was waiting on it.
    #[error("conversation instance terminated")]
    Terminated,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("upstream failure: {message}")]
    UpstreamFailure { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "A message is already being processed for this conversation. Retry shortly."
            }
            Self::UpstreamFailure { .. } => {
                "The assistant could not complete that request. Please retry."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::UpstreamFailure { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ConversationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Conflict => {
                InterfaceError::Conflict { message: self.to_string(), correlation_id }
            }
            Self::RunnerFailure(message) => {
                InterfaceError::UpstreamFailure { message, correlation_id }
            }
            Self::Terminated => {
                InterfaceError::Internal { message: self.to_string(), correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ConversationError, InterfaceError};

    #[test]
    fn conflict_maps_to_conflict_interface_error() {
        let interface = ConversationError::Conflict.into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Conflict { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert!(interface.user_message().contains("already being processed"));
    }

    #[test]
    fn runner_failure_maps_to_upstream_failure() {
        let interface =
            ConversationError::RunnerFailure("tool endpoint unreachable".to_string())
                .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::UpstreamFailure { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn terminated_maps_to_internal() {
        let interface = ConversationError::Terminated.into_interface("req-3");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn conflict_message_matches_submit_contract() {
        assert_eq!(ConversationError::Conflict.to_string(), "message already set, cannot update");
    }
}
