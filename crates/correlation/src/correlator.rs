//! Correlation ids for outstanding asynchronous element queries.
//!
//! Every dispatched query gets a bounded-range request id and a pending
//! entry reachable two ways: directly by id for delivery, and through a
//! per-(window, tree) scope index for bulk cancellation on teardown.
//! Cancellation always delivers a failure now — a pending entry is never
//! left hanging.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use axbroker_core::{BrokerError, QueryCallback, RequestId, TreeId, WindowId};

/// Low end of the request-id range.
pub const REQUEST_ID_MIN: RequestId = 1;

/// High end of the request-id range. Ids ride in a fixed-width wire field,
/// so the range stays narrow and wraps instead of widening.
pub const REQUEST_ID_MAX: RequestId = 65535;

/// Generates and tracks correlation ids, scoped for bulk cancellation.
///
/// The id counter is a bare atomic; the two indices sit under their own
/// locks, taken in pending-before-scopes order everywhere both are held.
pub struct RequestCorrelator {
    next_id: AtomicU32,
    pending: Mutex<HashMap<RequestId, Arc<QueryCallback>>>,
    scopes: Mutex<HashMap<(WindowId, TreeId), HashSet<RequestId>>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(REQUEST_ID_MIN),
            pending: Mutex::new(HashMap::new()),
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Next id in `[REQUEST_ID_MIN, REQUEST_ID_MAX]`, wrapping at the top.
    ///
    /// Collision-free for concurrent callers; if more than the full range of
    /// requests is ever in flight at once, wraparound reuse is an accepted
    /// trade-off rather than a reason to widen the id space.
    pub fn generate_request_id(&self) -> RequestId {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                Some(if id >= REQUEST_ID_MAX { REQUEST_ID_MIN } else { id + 1 })
            })
            .unwrap_or(REQUEST_ID_MIN)
    }

    /// Record a pending request. Calling twice with the same triple leaves a
    /// single entry.
    pub async fn add_request(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
        request_id: RequestId,
        callback: Arc<QueryCallback>,
    ) {
        let mut pending = self.pending.lock().await;
        let mut scopes = self.scopes.lock().await;
        pending.entry(request_id).or_insert(callback);
        scopes.entry((window_id, tree_id)).or_default().insert(request_id);
    }

    /// Drop the pending entry for `request_id` and scrub it from every scope
    /// bucket. Always succeeds; callers must not need to distinguish
    /// "already removed" from "removed now" (the timeout path and a late
    /// callback may both get here).
    pub async fn remove_request(&self, request_id: RequestId) {
        let mut pending = self.pending.lock().await;
        let mut scopes = self.scopes.lock().await;
        pending.remove(&request_id);
        scopes.retain(|_, ids| {
            ids.remove(&request_id);
            !ids.is_empty()
        });
    }

    /// Remove and return the callback for `request_id`, for delivery.
    pub async fn take_request(&self, request_id: RequestId) -> Option<Arc<QueryCallback>> {
        let mut pending = self.pending.lock().await;
        let mut scopes = self.scopes.lock().await;
        let callback = pending.remove(&request_id);
        if callback.is_some() {
            scopes.retain(|_, ids| {
                ids.remove(&request_id);
                !ids.is_empty()
            });
        }
        callback
    }

    /// Cancel every pending request under `window_id`, across all of its
    /// sub-trees: deliver a failure to each waiter, then clear bookkeeping.
    pub async fn cancel_all_for_window(&self, window_id: WindowId) {
        self.cancel_where(|(w, _)| *w == window_id).await;
    }

    /// Same, scoped to one embedded sub-tree.
    pub async fn cancel_all_for_window_and_tree(&self, window_id: WindowId, tree_id: TreeId) {
        self.cancel_where(|key| *key == (window_id, tree_id)).await;
    }

    /// Cancel everything (process-wide teardown).
    pub async fn clear(&self) {
        self.cancel_where(|_| true).await;
    }

    async fn cancel_where(&self, scope_matches: impl Fn(&(WindowId, TreeId)) -> bool) {
        let mut pending = self.pending.lock().await;
        let mut scopes = self.scopes.lock().await;

        let mut drained = Vec::new();
        scopes.retain(|key, ids| {
            if scope_matches(key) {
                drained.extend(ids.iter().copied());
                false
            } else {
                true
            }
        });

        if drained.is_empty() {
            return;
        }
        for request_id in &drained {
            if let Some(callback) = pending.remove(request_id) {
                // Synchronous failure delivery: no waiter is left hanging,
                // and a real response racing in later is a harmless no-op.
                callback.deliver(Err(BrokerError::Cancelled));
            }
        }
        debug!("[Correlator] Cancelled {} pending requests", drained.len());
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, request_id: RequestId) -> bool {
        self.pending.lock().await.contains_key(&request_id)
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
