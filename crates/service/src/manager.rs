//! The element-operator connection manager.
//!
//! The only entry point other subsystems use. Composes the connection
//! registry, request correlator, liveness tracker, authorization validator,
//! and the bounded-wait query bridge, and runs the reaper task that turns
//! remote-death events into state de-registration.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};

use axbroker_config::BrokerSettings;
use axbroker_connection::{
    DeathEvent, LivenessTracker, WindowConnection, WindowConnectionRegistry,
};
use axbroker_core::{
    AccountId, AuthToken, BrokerError, ElementId, ElementInfo, IdentityResolver, QueryCallback,
    QueryResult, RequestId, TreeId, WindowId, WindowIdResolver, MAIN_TREE_ID,
};
use axbroker_correlation::RequestCorrelator;

use crate::authorization::AuthorizationValidator;
use crate::query_bridge::BlockingQueryBridge;

/// Facade over the connection, correlation, liveness, and authorization
/// machinery.
///
/// Constructed once per service instance and passed explicitly to whatever
/// needs it. Each state table keeps its own lock; no facade operation holds
/// two table locks at once, and composite teardown sequences the registry
/// step before the liveness step.
pub struct ElementOperatorManager {
    registry: WindowConnectionRegistry,
    correlator: Arc<RequestCorrelator>,
    liveness: Arc<LivenessTracker>,
    validator: AuthorizationValidator,
    bridge: BlockingQueryBridge,
    current_account: Arc<AtomicI32>,
}

impl ElementOperatorManager {
    /// Build a manager with no window aliasing.
    pub fn new(settings: BrokerSettings) -> Arc<Self> {
        Self::with_resolver(settings, Arc::new(IdentityResolver))
    }

    /// Build a manager routing window lookups through `resolver`.
    ///
    /// Spawns the death-reaper task; it holds only a weak reference and
    /// exits when the manager is dropped.
    pub fn with_resolver(
        settings: BrokerSettings,
        resolver: Arc<dyn WindowIdResolver>,
    ) -> Arc<Self> {
        let (death_tx, death_rx) = mpsc::unbounded_channel();
        let current_account = Arc::new(AtomicI32::new(0));

        let registry = WindowConnectionRegistry::new();
        let correlator = Arc::new(RequestCorrelator::new());
        let liveness = Arc::new(LivenessTracker::new(Arc::clone(&current_account), death_tx));
        let validator = AuthorizationValidator::new(registry.clone(), resolver);
        let bridge = BlockingQueryBridge::new(
            registry.clone(),
            Arc::clone(&correlator),
            validator.clone(),
            settings,
        );

        let manager = Arc::new(Self {
            registry,
            correlator,
            liveness,
            validator,
            bridge,
            current_account,
        });

        let weak = Arc::downgrade(&manager);
        tokio::spawn(Self::run_death_reaper(weak, death_rx));
        manager
    }

    async fn run_death_reaper(
        manager: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<DeathEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(manager) = manager.upgrade() else { break };
            manager.handle_remote_death(event).await;
        }
        debug!("[Manager] Death reaper stopped");
    }

    /// De-register state for a dead remote operator. Runs on the reaper
    /// task, concurrently with query and callback-delivery tasks.
    async fn handle_remote_death(&self, event: DeathEvent) {
        match event.tree_id {
            Some(tree_id) => {
                info!(
                    "[Manager] Remote operator died: window {} tree {}",
                    event.window_id, tree_id
                );
                self.correlator
                    .cancel_all_for_window_and_tree(event.window_id, tree_id)
                    .await;
                if let Some(connection) = self.registry.get(event.window_id).await {
                    connection.remove_tree_operator(tree_id).await;
                }
                self.liveness.unbind_tree(event.window_id, tree_id).await;
            }
            None => {
                info!("[Manager] Remote operator died: window {}", event.window_id);
                self.correlator.cancel_all_for_window(event.window_id).await;
                self.registry.remove(event.window_id).await;
                self.liveness.unbind_all_for_window(event.window_id).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection registry
    // -----------------------------------------------------------------------

    /// Insert or replace the connection for a window.
    pub async fn add_accessibility_window_connection(
        &self,
        window_id: WindowId,
        connection: Arc<WindowConnection>,
    ) {
        self.registry.add(window_id, connection).await;
    }

    /// Erase the connection for a window; no-op when absent.
    pub async fn remove_accessibility_window_connection(&self, window_id: WindowId) {
        self.registry.remove(window_id).await;
    }

    pub async fn get_accessibility_window_connection(
        &self,
        window_id: WindowId,
    ) -> Option<Arc<WindowConnection>> {
        self.registry.get(window_id).await
    }

    /// Detach the window's death binding and drop its connection. No-op when
    /// the connection holds no live operator reference.
    pub async fn delete_connection_and_liveness(
        &self,
        window_id: WindowId,
        connection: &Arc<WindowConnection>,
    ) {
        if connection.operator().await.is_none() {
            return;
        }
        self.registry.remove(window_id).await;
        self.liveness.unbind_all_for_window(window_id).await;
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    /// Check a caller's token against the element's sub-tree registration.
    pub async fn verifying_token_id(
        &self,
        token: AuthToken,
        window_id: WindowId,
        element_id: ElementId,
    ) -> Result<(), BrokerError> {
        self.validator.verify(token, window_id, element_id).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Root-ancestor element id recorded for a sub-tree at registration.
    pub async fn get_root_parent_id(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
    ) -> Result<ElementId, BrokerError> {
        let connection = self
            .registry
            .get(window_id)
            .await
            .ok_or(BrokerError::NoConnection(window_id))?;
        connection.root_parent_id(tree_id).await.ok_or_else(|| {
            debug!(
                "[Manager] No root parent recorded for window {} tree {}",
                window_id, tree_id
            );
            BrokerError::NoConnection(window_id)
        })
    }

    /// Walk up to the element's root ancestor across sub-tree boundaries.
    pub async fn get_parent_element_recursively(
        &self,
        window_id: WindowId,
        element_id: ElementId,
    ) -> Result<Vec<ElementInfo>, BrokerError> {
        self.bridge.get_parent_element_recursively(window_id, element_id).await
    }

    /// Forward a clear-focus call to the window's primary operator.
    pub async fn clear_focus(&self, window_id: WindowId) -> Result<(), BrokerError> {
        let connection = self
            .registry
            .get(window_id)
            .await
            .ok_or(BrokerError::NoConnection(window_id))?;
        let operator = connection.operator().await.ok_or(BrokerError::NoOperator {
            window_id,
            tree_id: MAIN_TREE_ID,
        })?;
        operator.clear_focus().await
    }

    /// Best-effort outside-touch notification; silently does nothing without
    /// a connection or operator.
    pub async fn outside_touch(&self, window_id: WindowId) {
        let Some(connection) = self.registry.get(window_id).await else {
            debug!("[Manager] OutsideTouch dropped: no connection for window {}", window_id);
            return;
        };
        let Some(operator) = connection.operator().await else {
            debug!("[Manager] OutsideTouch dropped: no operator for window {}", window_id);
            return;
        };
        operator.outside_touch().await;
    }

    // -----------------------------------------------------------------------
    // Request correlation
    // -----------------------------------------------------------------------

    pub fn generate_request_id(&self) -> RequestId {
        self.correlator.generate_request_id()
    }

    pub async fn add_request_id(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
        request_id: RequestId,
        callback: Arc<QueryCallback>,
    ) {
        self.correlator.add_request(window_id, tree_id, request_id, callback).await;
    }

    /// Always succeeds, whether or not the id is still pending.
    pub async fn remove_request_id(&self, request_id: RequestId) {
        self.correlator.remove_request(request_id).await;
    }

    /// Cancel every pending request for a window, delivering failure to each
    /// waiter.
    pub async fn stop_callback_wait(&self, window_id: WindowId) {
        self.correlator.cancel_all_for_window(window_id).await;
    }

    /// Same, scoped to one embedded sub-tree.
    pub async fn stop_callback_wait_for_tree(&self, window_id: WindowId, tree_id: TreeId) {
        self.correlator.cancel_all_for_window_and_tree(window_id, tree_id).await;
    }

    /// Complete a pending request with a result arriving from the transport
    /// layer. Unknown or already-settled ids are dropped quietly; a late
    /// response racing a cancellation is not an error.
    pub async fn deliver_query_result(&self, request_id: RequestId, result: QueryResult) {
        match self.correlator.take_request(request_id).await {
            Some(callback) => {
                callback.deliver(result);
            }
            None => {
                debug!("[Manager] Result for unknown request {} dropped", request_id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    /// Attach a death binding to the window's primary operator.
    pub async fn set_element_operator_death_recipient(
        &self,
        window_id: WindowId,
    ) -> Result<(), BrokerError> {
        let connection = self
            .registry
            .get(window_id)
            .await
            .ok_or(BrokerError::NoConnection(window_id))?;
        let operator = connection.operator().await;
        self.liveness
            .bind_window(window_id, operator.as_ref(), connection.owner_account_id())
            .await
    }

    /// Attach a death binding to one sub-tree's operator.
    pub async fn set_element_operator_death_recipient_for_tree(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
    ) -> Result<(), BrokerError> {
        let connection = self
            .registry
            .get(window_id)
            .await
            .ok_or(BrokerError::NoConnection(window_id))?;
        let operator = connection.tree_operator(tree_id).await;
        self.liveness
            .bind_tree(window_id, tree_id, operator.as_ref(), connection.owner_account_id())
            .await
    }

    pub async fn remove_element_operator_death_recipient(&self, window_id: WindowId) {
        self.liveness.unbind_window(window_id).await;
    }

    pub async fn remove_element_operator_death_recipient_for_tree(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
    ) {
        self.liveness.unbind_tree(window_id, tree_id).await;
    }

    // -----------------------------------------------------------------------
    // Session and teardown
    // -----------------------------------------------------------------------

    /// Switch the current account/session epoch. Death notifications bound
    /// under a previous epoch become stale and are ignored when they fire.
    pub fn switch_account(&self, account_id: AccountId) {
        info!("[Manager] Switched to account {}", account_id);
        self.current_account.store(account_id, Ordering::SeqCst);
    }

    pub fn current_account(&self) -> AccountId {
        self.current_account.load(Ordering::SeqCst)
    }

    /// Process-wide teardown: cancel every pending request, clear every
    /// connection, drop every death binding.
    pub async fn clear_all(&self) {
        info!("[Manager] Clearing all connections, requests, and bindings");
        self.correlator.clear().await;
        self.registry.clear().await;
        self.liveness.clear().await;
    }

    /// How many bounded waits have expired since startup.
    pub fn ipc_timeout_count(&self) -> u64 {
        self.bridge.ipc_timeout_count()
    }

    /// Number of requests currently awaiting completion.
    pub async fn pending_request_count(&self) -> usize {
        self.correlator.pending_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axbroker_core::{
        composite, ElementOperator, MockCall, MockElementOperator, QueryPayload,
        INVALID_ELEMENT_ID,
    };

    fn fast_settings() -> BrokerSettings {
        BrokerSettings {
            query_timeout: Duration::from_millis(200),
            max_tree_hops: 8,
        }
    }

    fn elements(ids: &[ElementId]) -> Vec<ElementInfo> {
        ids.iter().map(|id| ElementInfo::new(*id, 1)).collect()
    }

    async fn register_window(
        manager: &ElementOperatorManager,
        window_id: WindowId,
        token: AuthToken,
        operator: Arc<dyn ElementOperator>,
    ) -> Arc<WindowConnection> {
        let connection = Arc::new(WindowConnection::with_operator(window_id, 0, operator, token));
        manager
            .add_accessibility_window_connection(window_id, Arc::clone(&connection))
            .await;
        connection
    }

    #[tokio::test]
    async fn register_lookup_remove_round_trip() {
        // Scenario A: register window 5, fetch it, remove it, fetch again.
        let manager = ElementOperatorManager::new(fast_settings());
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        register_window(&manager, 5, 1, operator).await;

        assert!(manager.get_accessibility_window_connection(5).await.is_some());
        manager.remove_accessibility_window_connection(5).await;
        assert!(manager.get_accessibility_window_connection(5).await.is_none());
    }

    #[tokio::test]
    async fn token_verification_distinguishes_mismatch() {
        // Scenario B: window 1, tree 2, token 12345.
        let manager = ElementOperatorManager::new(fast_settings());
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        let connection = register_window(&manager, 1, 1, Arc::clone(&operator)).await;
        connection
            .add_tree_operator(2, operator, 12345, INVALID_ELEMENT_ID)
            .await;

        let element = composite::encode(2, 1000);
        assert!(manager.verifying_token_id(12345, 1, element).await.is_ok());
        assert!(matches!(
            manager.verifying_token_id(99999, 1, element).await,
            Err(BrokerError::TokenMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn operations_without_a_connection_fail_with_no_connection() {
        // Scenario C.
        let manager = ElementOperatorManager::new(fast_settings());
        assert!(matches!(
            manager.clear_focus(7).await,
            Err(BrokerError::NoConnection(7))
        ));
        assert!(matches!(
            manager.get_root_parent_id(7, 1).await,
            Err(BrokerError::NoConnection(7))
        ));
    }

    #[tokio::test]
    async fn unanswered_query_fails_within_the_bound_and_id_is_released() {
        // Scenario D.
        let manager = ElementOperatorManager::new(fast_settings());
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        register_window(&manager, 1, 1, operator).await;

        let result = manager.get_parent_element_recursively(1, 9).await;
        assert!(matches!(result, Err(BrokerError::Timeout { .. })));
        assert_eq!(manager.ipc_timeout_count(), 1);
        assert_eq!(manager.pending_request_count().await, 0);

        // A follow-up remove for an already-gone id succeeds trivially.
        manager.remove_request_id(1).await;
    }

    #[tokio::test]
    async fn clear_focus_reaches_the_primary_operator() {
        let manager = ElementOperatorManager::new(fast_settings());
        let mock = Arc::new(MockElementOperator::new());
        let operator: Arc<dyn ElementOperator> = mock.clone();
        register_window(&manager, 1, 1, operator).await;

        manager.clear_focus(1).await.expect("clear focus");
        assert_eq!(mock.calls().await, vec![MockCall::ClearFocus]);
    }

    #[tokio::test]
    async fn outside_touch_is_best_effort() {
        let manager = ElementOperatorManager::new(fast_settings());
        // Without a connection: silently does nothing.
        manager.outside_touch(3).await;

        let mock = Arc::new(MockElementOperator::new());
        let operator: Arc<dyn ElementOperator> = mock.clone();
        register_window(&manager, 3, 1, operator).await;
        manager.outside_touch(3).await;
        assert_eq!(mock.calls().await, vec![MockCall::OutsideTouch]);
    }

    #[tokio::test]
    async fn root_parent_id_comes_from_registration() {
        let manager = ElementOperatorManager::new(fast_settings());
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        let connection = register_window(&manager, 1, 1, Arc::clone(&operator)).await;
        connection.add_tree_operator(2, operator, 1, 4096).await;

        assert_eq!(manager.get_root_parent_id(1, 2).await.expect("recorded"), 4096);
        assert!(manager.get_root_parent_id(1, 3).await.is_err());
    }

    #[tokio::test]
    async fn window_death_deregisters_connection_and_cancels_requests() {
        let manager = ElementOperatorManager::new(fast_settings());
        let mock = Arc::new(MockElementOperator::new());
        let operator: Arc<dyn ElementOperator> = mock.clone();
        register_window(&manager, 1, 1, operator).await;
        manager.set_element_operator_death_recipient(1).await.expect("bind");

        let (callback, rx) = QueryCallback::channel();
        let request_id = manager.generate_request_id();
        manager.add_request_id(1, MAIN_TREE_ID, request_id, callback).await;

        mock.kill();

        // The reaper runs asynchronously; the cancelled waiter unblocking is
        // the observable completion signal.
        let result = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("cancellation delivered within bound")
            .expect("callback fired");
        assert!(matches!(result, Err(BrokerError::Cancelled)));
        assert!(manager.get_accessibility_window_connection(1).await.is_none());
        assert_eq!(manager.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn tree_death_only_removes_that_sub_tree() {
        let manager = ElementOperatorManager::new(fast_settings());
        let primary: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        let tree_mock = Arc::new(MockElementOperator::new());
        let tree_operator: Arc<dyn ElementOperator> = tree_mock.clone();

        let connection = register_window(&manager, 1, 1, primary).await;
        connection.add_tree_operator(2, tree_operator, 1, 100).await;
        manager
            .set_element_operator_death_recipient_for_tree(1, 2)
            .await
            .expect("bind tree");

        let (callback, rx) = QueryCallback::channel();
        manager.add_request_id(1, 2, 50, callback).await;

        tree_mock.kill();

        let result = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("cancellation delivered within bound")
            .expect("callback fired");
        assert!(matches!(result, Err(BrokerError::Cancelled)));

        // The window connection survives; only tree 2 is gone.
        let connection = manager
            .get_accessibility_window_connection(1)
            .await
            .expect("window still registered");
        assert!(connection.tree_operator(2).await.is_none());
        assert!(connection.operator().await.is_some());
    }

    #[tokio::test]
    async fn stale_death_after_account_switch_leaves_state_alone() {
        let manager = ElementOperatorManager::new(fast_settings());
        let mock = Arc::new(MockElementOperator::new());
        let operator: Arc<dyn ElementOperator> = mock.clone();
        register_window(&manager, 1, 1, operator).await;
        manager.set_element_operator_death_recipient(1).await.expect("bind");

        manager.switch_account(42);
        mock.kill();

        // Give a (wrong) reaper every chance to run, then confirm nothing
        // changed.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.get_accessibility_window_connection(1).await.is_some());
    }

    #[tokio::test]
    async fn deliver_query_result_completes_the_waiter() {
        let manager = ElementOperatorManager::new(fast_settings());
        let (callback, rx) = QueryCallback::channel();
        let request_id = manager.generate_request_id();
        manager.add_request_id(1, MAIN_TREE_ID, request_id, callback).await;

        manager
            .deliver_query_result(request_id, Ok(QueryPayload::ElementsById(elements(&[5]))))
            .await;

        let result = rx.await.expect("delivered");
        assert!(matches!(result, Ok(QueryPayload::ElementsById(batch)) if batch.len() == 1));
        assert_eq!(manager.pending_request_count().await, 0);

        // A result for a settled id is dropped quietly.
        manager
            .deliver_query_result(request_id, Ok(QueryPayload::ActionResult(true)))
            .await;
    }

    #[tokio::test]
    async fn stop_callback_wait_cancels_by_scope() {
        let manager = ElementOperatorManager::new(fast_settings());
        let (cb_window, rx_window) = QueryCallback::channel();
        let (cb_tree, rx_tree) = QueryCallback::channel();
        manager.add_request_id(1, MAIN_TREE_ID, 10, cb_window).await;
        manager.add_request_id(2, 3, 11, cb_tree).await;

        manager.stop_callback_wait(1).await;
        assert!(matches!(rx_window.await, Ok(Err(BrokerError::Cancelled))));

        manager.stop_callback_wait_for_tree(2, 3).await;
        assert!(matches!(rx_tree.await, Ok(Err(BrokerError::Cancelled))));
        assert_eq!(manager.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn delete_connection_and_liveness_requires_a_live_operator() {
        let manager = ElementOperatorManager::new(fast_settings());

        // Connection without an operator: composite delete is a no-op.
        let bare = Arc::new(WindowConnection::new(4, 0));
        manager.add_accessibility_window_connection(4, Arc::clone(&bare)).await;
        manager.delete_connection_and_liveness(4, &bare).await;
        assert!(manager.get_accessibility_window_connection(4).await.is_some());

        // With an operator the connection and binding both go away.
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        let connection = register_window(&manager, 5, 1, operator).await;
        manager.set_element_operator_death_recipient(5).await.expect("bind");
        manager.delete_connection_and_liveness(5, &connection).await;
        assert!(manager.get_accessibility_window_connection(5).await.is_none());
    }

    #[tokio::test]
    async fn clear_all_tears_everything_down() {
        let manager = ElementOperatorManager::new(fast_settings());
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        register_window(&manager, 1, 1, operator).await;
        manager.set_element_operator_death_recipient(1).await.expect("bind");

        let (callback, rx) = QueryCallback::channel();
        manager.add_request_id(1, MAIN_TREE_ID, 77, callback).await;

        manager.clear_all().await;

        assert!(matches!(rx.await, Ok(Err(BrokerError::Cancelled))));
        assert!(manager.get_accessibility_window_connection(1).await.is_none());
        assert_eq!(manager.pending_request_count().await, 0);
    }
}
