//! One-shot completion sink for asynchronous element queries.
//!
//! A pending request reaches exactly one terminal outcome: normal delivery,
//! timeout, or cancellation. All three paths funnel through
//! [`QueryCallback::deliver`], which consumes the underlying sender on first
//! use, so a late response racing a cancellation is observable and harmless.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::BrokerError;
use crate::types::QueryPayload;

/// Outcome delivered to a waiting query: a payload, or a broker failure.
pub type QueryResult = Result<QueryPayload, BrokerError>;

/// Completion sink registered under a request id.
///
/// Cloneable via `Arc`; the correlator keeps one handle for cancellation
/// while the dispatched operator holds another for normal delivery.
pub struct QueryCallback {
    tx: Mutex<Option<oneshot::Sender<QueryResult>>>,
}

impl QueryCallback {
    /// Create a callback and the receiver its result will arrive on.
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<QueryResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Complete the request with `result`.
    ///
    /// Returns `true` if this call won the completion race. A `false` return
    /// means the request already reached its terminal outcome elsewhere.
    pub fn deliver(&self, result: QueryResult) -> bool {
        let tx = {
            let mut guard = match self.tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        match tx {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!("[QueryCallback] Receiver dropped before delivery");
                }
                true
            }
            None => {
                debug!("[QueryCallback] Duplicate delivery ignored");
                false
            }
        }
    }

    /// Whether the request has already reached a terminal outcome.
    pub fn is_completed(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}
