//! Provider-level error type.
//!
//! Every failure a single backend can produce is folded into
//! [`ProviderError`]. The router treats all variants uniformly: any error
//! before the streaming commit point advances to the next candidate, so no
//! retryability classification is needed at this level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success HTTP status.
    #[error("provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The backend answered but the payload didn't match its wire contract.
    #[error("malformed provider response: {0}")]
    Protocol(String),

    /// The stream ended before producing a single chunk.
    #[error("stream ended before producing any chunk")]
    EmptyStream,

    /// The invocation observed the caller's cancellation token.
    #[error("provider invocation cancelled")]
    Cancelled,

    /// Anything else (driver crash, session loss, programming error).
    #[error("internal provider error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Whether this error is the cancellation outcome rather than a genuine
    /// backend failure. Used by usage recording to tag the attempt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
