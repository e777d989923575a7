//! Error types for the invocation harness.

use thiserror::Error;

/// Errors that stop the harness before a handler is dispatched.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The input stream did not contain a parseable JSON document.
    #[error("Invalid input JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The handler reference is malformed or names nothing registered.
    #[error("Invalid handler reference `{reference}`: {reason}")]
    InvalidHandlerReference { reference: String, reason: String },

    /// Neither an input file nor piped stdin was provided.
    #[error("You must provide input via the --input flag or piped via stdin.")]
    MissingInput,

    /// The input source could not be read.
    #[error("Couldn't read input: {0}")]
    Input(#[from] std::io::Error),
}

impl HarnessError {
    pub(crate) fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHandlerReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

/// Breaches of the single-completion protocol.
///
/// These are reported as warnings and never abort the invocation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A completion signal arrived after the invocation had already completed.
    #[error("completion was signaled more than once; the later signal was ignored")]
    DuplicateCompletion,

    /// Every completion handle was dropped without signaling.
    #[error("handler finished without signaling completion")]
    NeverCompleted,
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
