use thiserror::Error;

use crate::types::{RequestId, TreeId, WindowId};

/// Top-level error type for the AxBroker runtime.
///
/// Every failure path in the broker resolves to one of these values or to a
/// delivered failure callback; a misbehaving or crashed remote process must
/// never take the service down with it.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no connection registered for window {0}")]
    NoConnection(WindowId),

    #[error("no operator registered for window {window_id} tree {tree_id}")]
    NoOperator { window_id: WindowId, tree_id: TreeId },

    #[error("token mismatch for window {window_id} tree {tree_id}")]
    TokenMismatch { window_id: WindowId, tree_id: TreeId },

    #[error("query {request_id} timed out")]
    Timeout { request_id: RequestId },

    #[error("query {request_id} returned a malformed result")]
    MalformedResult { request_id: RequestId },

    #[error("death recipient bind on a null operator handle for window {0}")]
    NullHandle(WindowId),

    #[error("query cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BrokerError {
    /// Whether this error means "nobody answers for this window/tree".
    ///
    /// Callers treat operator absence the same as connection absence; the
    /// distinct variants exist for logging only.
    pub fn is_no_connection(&self) -> bool {
        matches!(self, Self::NoConnection(_) | Self::NoOperator { .. })
    }
}
