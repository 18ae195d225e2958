//! Error types for the trigger/poll/aggregate lifecycle.

use std::time::Duration;

use thiserror::Error;

use crate::report::BuildOutcome;

/// Malformed env-matrix input. Always raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    /// A `,`-separated field did not split into exactly one `key=value` pair.
    #[error("invalid env matrix field: {field}")]
    InvalidField { field: String },
}

/// Errors produced by the remote build platform client.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Request could not be sent or the response body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with an HTTP code other than the expected one.
    #[error("HTTP response {status}: {body}")]
    UnexpectedStatus { status: String, body: String },

    /// The trigger endpoint answered 201 but did not report `"ok"`.
    #[error("build trigger response ({status}) is not 'ok': {body}")]
    TriggerRejected { status: String, body: String },

    /// The response body was not the JSON document we expected.
    #[error("failed to decode response ({detail}): {body}")]
    Decode { detail: String, body: String },
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

/// Errors surfaced by a single build's poll loop.
///
/// Transient status-fetch failures are retried inside the loop and never
/// show up here.
#[derive(Debug, Error)]
pub enum PollError {
    /// The remote build finished in a non-success terminal state.
    #[error("[{}] {}", .outcome.id, .outcome.status)]
    BuildFailed { outcome: Box<BuildOutcome> },

    /// The optional `max_wait` hook expired before a terminal state.
    #[error("[{id}] gave up waiting after {waited:?}")]
    DeadlineExceeded { id: String, waited: Duration },
}

/// Errors posting to the chat webhook. Logged by the caller, never fatal.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to send the request: {0}")]
    Transport(String),

    #[error("server error: {status}, response: {body}")]
    Rejected { status: String, body: String },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

/// Batch-level failure returned by the aggregator.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A trigger call failed; no further builds were started.
    #[error("failed to trigger {id}: {source}")]
    Trigger {
        id: String,
        #[source]
        source: ApiError,
    },

    /// At least one build finished in a non-success state.
    #[error("[{id}] {status}")]
    BuildFailed { id: String, status: String },

    /// A poll loop ended without a terminal state.
    #[error(transparent)]
    Poll(PollError),

    /// A poll task panicked or was cancelled by the runtime.
    #[error("poll task failed: {0}")]
    Join(String),
}

impl From<PollError> for BatchError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::BuildFailed { outcome } => BatchError::BuildFailed {
                id: outcome.id,
                status: outcome.status,
            },
            other => BatchError::Poll(other),
        }
    }
}

pub type MatrixResult<T> = std::result::Result<T, MatrixError>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;
pub type BatchResult<T> = std::result::Result<T, BatchError>;
