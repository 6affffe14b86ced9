//! Error types for the tandem runtime.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors from tool resolution and execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool is registered under the requested name.
    #[error("NotFound: no tool registered under '{0}'")]
    NotFound(String),

    /// The arguments could not be parsed or do not match the declared schema.
    #[error("InvalidArguments: {0}")]
    InvalidArguments(String),

    /// The tool body failed.
    #[error("Execution: {0}")]
    Execution(String),
}

/// Errors from the hook suspension protocol.
#[derive(Debug, Error)]
pub enum HookError {
    /// `resolve`/`cancel` named a label with no pending hook.
    #[error("UnknownLabel: no pending hook with label '{0}'")]
    UnknownLabel(String),

    /// A hook with this label is already pending in the current run.
    #[error("DuplicateLabel: a hook labelled '{0}' is already pending")]
    DuplicateLabel(String),

    /// The resolution payload does not match the hook's declared schema.
    /// The hook remains pending.
    #[error("InvalidPayload: resolution for '{label}' rejected: {message}")]
    InvalidPayload {
        /// Label of the hook whose resolution was rejected.
        label: String,
        /// The validation failure.
        message: String,
    },

    /// The hook was cancelled while the graph was awaiting it.
    #[error("Cancelled: hook '{label}' was cancelled")]
    Cancelled {
        /// Label of the cancelled hook.
        label: String,
        /// Caller-supplied cancellation reason, if any.
        reason: Option<String>,
    },
}

/// Errors from the stream normaliser.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A delta or end event referenced a block that was never started.
    #[error("UnknownBlock: event for unseen block '{0}'")]
    UnknownBlock(String),

    /// A delta arrived for a block already in the `done` state.
    #[error("BlockFinished: delta for finished block '{0}'")]
    BlockFinished(String),

    /// A start event reused a block or tool-call id.
    #[error("DuplicateBlock: block id '{0}' was already started")]
    DuplicateBlock(String),

    /// An event arrived after `MessageDone`.
    #[error("MessageFinished: event received after MessageDone")]
    MessageFinished,
}

/// The main error type for runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Tool resolution or execution failed in a way that aborts the graph.
    #[error("ToolError: {0}")]
    Tool(#[from] ToolError),

    /// Hook protocol violation.
    #[error("HookError: {0}")]
    Hook(#[from] HookError),

    /// Stream normalisation failed.
    #[error("StreamError: {0}")]
    Stream(#[from] StreamError),

    /// JSON serialization/deserialization error.
    #[error("JsonError: {0}")]
    Json(#[from] serde_json::Error),

    /// The LLM adapter failed mid-stream.
    #[error("ModelError: {0}")]
    Model(String),

    /// Structured output failed to parse or validate.
    #[error("StructuredOutputError: {0}")]
    StructuredOutput(String),

    /// A hook was hit in stateless mode. Absorbed by `run` and surfaced
    /// through `RunResult::pending_hooks`.
    #[error("HookPending: hook '{label}' awaits external resolution")]
    HookPending {
        /// Label of the pending hook.
        label: String,
    },

    /// A runtime API was used outside an active run.
    #[error("InactiveRuntime: {0}")]
    Inactive(String),

    /// Generic internal error.
    #[error("Internal: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new model error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model(message.into())
    }

    /// Create a new inactive-runtime error.
    #[must_use]
    pub fn inactive(message: impl Into<String>) -> Self {
        Self::Inactive(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if this is the stateless-mode suspension signal.
    #[must_use]
    pub const fn is_hook_pending(&self) -> bool {
        matches!(self, Self::HookPending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_display() {
        let err = ToolError::NotFound("double".to_owned());
        assert_eq!(err.to_string(), "NotFound: no tool registered under 'double'");
    }

    #[test]
    fn hook_error_display() {
        let err = HookError::UnknownLabel("missing".to_owned());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn hook_pending_is_detected() {
        let err = Error::HookPending {
            label: "approval".to_owned(),
        };
        assert!(err.is_hook_pending());
        assert!(!Error::internal("boom").is_hook_pending());
    }

    #[test]
    fn sub_errors_convert() {
        let err: Error = ToolError::Execution("failed".to_owned()).into();
        assert!(matches!(err, Error::Tool(_)));

        let err: Error = StreamError::MessageFinished.into();
        assert!(matches!(err, Error::Stream(_)));
    }
}
