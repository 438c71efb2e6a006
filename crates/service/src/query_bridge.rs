//! Bounded-wait bridge over the asynchronous query protocol.
//!
//! The remote protocol is "dispatch a query, a callback fires later". For
//! internal tree walks the broker needs an answer in hand before it can take
//! the next hop, so this bridge registers a one-shot callback, dispatches,
//! and waits under a hard timeout. An unresponsive or crashed remote end
//! resolves to a Timeout failure; the caller is never left blocked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, warn};

use axbroker_config::BrokerSettings;
use axbroker_connection::{WindowConnection, WindowConnectionRegistry};
use axbroker_core::{
    composite, BrokerError, ElementId, ElementInfo, QueryCallback, QueryPayload, SearchMode,
    WindowId, INVALID_ELEMENT_ID, MAIN_TREE_ID,
};
use axbroker_correlation::RequestCorrelator;

use crate::authorization::AuthorizationValidator;

/// Converts the async callback protocol into bounded synchronous calls for
/// the recursive ancestor walk across embedded sub-trees.
pub struct BlockingQueryBridge {
    registry: WindowConnectionRegistry,
    correlator: Arc<RequestCorrelator>,
    validator: AuthorizationValidator,
    settings: BrokerSettings,
    ipc_timeouts: AtomicU64,
}

impl BlockingQueryBridge {
    pub fn new(
        registry: WindowConnectionRegistry,
        correlator: Arc<RequestCorrelator>,
        validator: AuthorizationValidator,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            registry,
            correlator,
            validator,
            settings,
            ipc_timeouts: AtomicU64::new(0),
        }
    }

    /// How many bounded waits have expired since startup. Diagnostic only.
    pub fn ipc_timeout_count(&self) -> u64 {
        self.ipc_timeouts.load(Ordering::Relaxed)
    }

    /// Walk up from `element_id` to its root ancestor, crossing sub-tree
    /// boundaries through the root-parent ids recorded at registration.
    ///
    /// Returns the accumulated predecessor batches. The hop cap guards
    /// against cyclic root-parent records registered by a misbehaving
    /// remote.
    pub async fn get_parent_element_recursively(
        &self,
        window_id: WindowId,
        element_id: ElementId,
    ) -> Result<Vec<ElementInfo>, BrokerError> {
        let connection = self
            .registry
            .get(window_id)
            .await
            .ok_or(BrokerError::NoConnection(window_id))?;

        let mut results = Vec::new();
        let mut current = element_id;
        for hop in 0..self.settings.max_tree_hops {
            let batch = self.query_predecessors(&connection, window_id, current).await?;
            results.extend(batch);

            let tree_id = composite::tree_of(current);
            if tree_id == MAIN_TREE_ID {
                break;
            }
            let Some(root_parent) = connection.root_parent_id(tree_id).await else {
                debug!(
                    "[QueryBridge] Tree {} of window {} has no recorded root parent; stopping walk",
                    tree_id, window_id
                );
                break;
            };
            if hop + 1 == self.settings.max_tree_hops {
                debug!(
                    "[QueryBridge] Ancestor walk for window {} hit the {} hop cap",
                    window_id, self.settings.max_tree_hops
                );
            }
            current = root_parent;
        }
        Ok(results)
    }

    /// One bounded predecessor query against the operator owning the
    /// element's tree.
    async fn query_predecessors(
        &self,
        connection: &Arc<WindowConnection>,
        window_id: WindowId,
        element_id: ElementId,
    ) -> Result<Vec<ElementInfo>, BrokerError> {
        let tree_id = composite::tree_of(element_id);
        let operator = connection
            .operator_for_tree(tree_id)
            .await
            .ok_or(BrokerError::NoOperator { window_id, tree_id })?;
        let dispatch_token =
            connection
                .expected_token(tree_id)
                .await
                .ok_or(BrokerError::NoOperator { window_id, tree_id })?;

        let (callback, rx) = QueryCallback::channel();
        let request_id = self.correlator.generate_request_id();
        self.correlator
            .add_request(window_id, tree_id, request_id, Arc::clone(&callback))
            .await;

        if let Err(err) = operator
            .search_element_info_by_accessibility_id(
                element_id,
                request_id,
                callback,
                SearchMode::Predecessors,
            )
            .await
        {
            self.correlator.remove_request(request_id).await;
            return Err(err);
        }

        let result = match timeout(self.settings.query_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_recv)) => {
                // Callback dropped without a delivery: the request can never
                // complete, treat it like a cancellation.
                debug!("[QueryBridge] Callback for request {} dropped undelivered", request_id);
                self.correlator.remove_request(request_id).await;
                return Err(BrokerError::Cancelled);
            }
            Err(_elapsed) => {
                self.ipc_timeouts.fetch_add(1, Ordering::Relaxed);
                self.correlator.remove_request(request_id).await;
                warn!(
                    "[QueryBridge] Search request {} for window {} tree {} timed out after {:?}",
                    request_id, window_id, tree_id, self.settings.query_timeout
                );
                return Err(BrokerError::Timeout { request_id });
            }
        };
        // Idempotent with the delivery path having already scrubbed it.
        self.correlator.remove_request(request_id).await;

        let payload = result?;
        let QueryPayload::ElementsById(elements) = payload else {
            return Err(BrokerError::MalformedResult { request_id });
        };

        // An undefined id anywhere marks the whole batch untrustworthy: the
        // remote side violated the protocol, so nothing in it is kept.
        if elements.iter().any(|e| e.element_id == INVALID_ELEMENT_ID) {
            return Err(BrokerError::MalformedResult { request_id });
        }

        // Per-element authorization against the dispatched tree's token.
        // Unauthorized elements narrow the payload; they never fail the
        // batch or suppress completion.
        let mut kept = Vec::with_capacity(elements.len());
        for element in elements {
            match self.validator.verify(dispatch_token, window_id, element.element_id).await {
                Ok(()) => kept.push(element),
                Err(_) => {
                    debug!(
                        "[QueryBridge] Dropped unauthorized element {} from request {}",
                        element.element_id, request_id
                    );
                }
            }
        }
        Ok(kept)
    }
}
