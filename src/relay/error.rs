//! Relay error types

use thiserror::Error;

/// Errors surfaced by the relay paths
#[derive(Error, Debug)]
pub enum RelayError {
    /// The client asked for something that is not a usable target URL
    #[error("Invalid target URL")]
    InvalidTarget,

    /// The upstream exchange failed before a complete response was read
    #[error("Upstream unreachable: {url}: {reason}")]
    UpstreamUnreachable { url: String, reason: String },

    /// No render session could be produced for the client
    #[error("Renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// The render session exists but the requested interaction failed
    #[error("Renderer action failed: {0}")]
    RendererActionFailed(String),
}

impl From<RelayError> for String {
    fn from(err: RelayError) -> Self {
        err.to_string()
    }
}
