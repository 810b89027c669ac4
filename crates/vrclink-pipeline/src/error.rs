//! Error types for the pipeline.

use thiserror::Error;

/// Errors that can occur while connecting to or consuming the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// REST or session error.
    #[error("API error: {0}")]
    Api(#[from] vrclink_api::ApiError),

    /// Frame could not be decoded, or its payload lacks required fields.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// `connect()` called while a connection is open or opening.
    #[error("already connected")]
    AlreadyConnected,

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl PipelineError {
    /// Whether this error means the session itself is unusable.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            PipelineError::Api(vrclink_api::ApiError::NotAuthenticated)
        )
    }
}
