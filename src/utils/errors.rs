use thiserror::Error;

/// Unified error type for the consensus core.
///
/// Routine validation outcomes (a bad vote, a stale proposal) are not errors;
/// those are reported as `false` by the engines. Everything here is
/// unexpected and propagates to the message-handling call site.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimplexError {
    /// Protocol invariant violated by the caller (non-monotonic iteration,
    /// malformed chain, invalid finalize message).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Conversion or lifecycle failure (serialization, key decoding,
    /// unavailable digest, operation in the wrong iteration state).
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Signature generation failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Signature verification could not run (malformed key or signature).
    #[error("Security error: {0}")]
    Security(String),

    /// Waiting for iteration completion was interrupted.
    #[error("{0}")]
    Interrupted(String),
}

/// Convenience alias
pub type Result<T> = std::result::Result<T, SimplexError>;

pub const AWAIT_INTERRUPTED_MESSAGE: &str = "Unexpected error while waiting for iteration completion";

impl SimplexError {
    pub fn interrupted() -> Self {
        SimplexError::Interrupted(AWAIT_INTERRUPTED_MESSAGE.to_string())
    }
}
