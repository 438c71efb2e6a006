//! Death-notification bindings for remote element operators.
//!
//! Each bound operator gets a watcher task awaiting its death token. When
//! the remote process exits, the watcher checks the binding's account
//! snapshot against the current session epoch and, if still current, emits a
//! [`DeathEvent`] for the manager's reaper to de-register state. A stale
//! notification from a previous session must not mutate current-session
//! state, so it is logged and dropped here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use axbroker_core::{AccountId, BrokerError, ElementOperator, TreeId, WindowId};

/// A remote operator died and its scope should be de-registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeathEvent {
    pub window_id: WindowId,
    /// `None` for a whole-window binding, `Some` for one sub-tree.
    pub tree_id: Option<TreeId>,
    /// Account epoch snapshotted when the binding was created.
    pub account_id: AccountId,
}

/// One active death watch. Ids are snapshotted by value at bind time; the
/// watcher never reads back through mutable shared state.
struct Binding {
    account_id: AccountId,
    #[allow(dead_code)]
    bound_at: DateTime<Utc>,
    watcher: JoinHandle<()>,
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Binds and unbinds death notification on remote operator handles.
///
/// At most one active binding exists per window and per (window, tree);
/// re-binding replaces the previous watch. Window bindings and tree bindings
/// live in separate maps under separate locks; where both are touched the
/// window map is locked first.
pub struct LivenessTracker {
    current_account: Arc<AtomicI32>,
    events: mpsc::UnboundedSender<DeathEvent>,
    window_bindings: Mutex<HashMap<WindowId, Binding>>,
    tree_bindings: Mutex<HashMap<(WindowId, TreeId), Binding>>,
}

impl LivenessTracker {
    pub fn new(current_account: Arc<AtomicI32>, events: mpsc::UnboundedSender<DeathEvent>) -> Self {
        Self {
            current_account,
            events,
            window_bindings: Mutex::new(HashMap::new()),
            tree_bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Watch a window's primary operator. Passing `None` is the null-handle
    /// error path: logged, no binding created, no crash.
    pub async fn bind_window(
        &self,
        window_id: WindowId,
        operator: Option<&Arc<dyn ElementOperator>>,
        account_id: AccountId,
    ) -> Result<(), BrokerError> {
        let Some(operator) = operator else {
            warn!("[Liveness] Bind skipped: null operator handle for window {}", window_id);
            return Err(BrokerError::NullHandle(window_id));
        };
        let binding = self.spawn_watcher(window_id, None, account_id, operator);
        let mut bindings = self.window_bindings.lock().await;
        if bindings.insert(window_id, binding).is_some() {
            debug!("[Liveness] Replaced death binding for window {}", window_id);
        }
        Ok(())
    }

    /// Watch one sub-tree's operator; same contract as [`Self::bind_window`].
    pub async fn bind_tree(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
        operator: Option<&Arc<dyn ElementOperator>>,
        account_id: AccountId,
    ) -> Result<(), BrokerError> {
        let Some(operator) = operator else {
            warn!(
                "[Liveness] Bind skipped: null operator handle for window {} tree {}",
                window_id, tree_id
            );
            return Err(BrokerError::NullHandle(window_id));
        };
        let binding = self.spawn_watcher(window_id, Some(tree_id), account_id, operator);
        let mut bindings = self.tree_bindings.lock().await;
        if bindings.insert((window_id, tree_id), binding).is_some() {
            debug!(
                "[Liveness] Replaced death binding for window {} tree {}",
                window_id, tree_id
            );
        }
        Ok(())
    }

    fn spawn_watcher(
        &self,
        window_id: WindowId,
        tree_id: Option<TreeId>,
        account_id: AccountId,
        operator: &Arc<dyn ElementOperator>,
    ) -> Binding {
        let token = operator.death_token();
        let events = self.events.clone();
        let current_account = Arc::clone(&self.current_account);
        let watcher = tokio::spawn(async move {
            token.cancelled().await;
            let current = current_account.load(Ordering::SeqCst);
            if current != account_id {
                warn!(
                    "[Liveness] Stale death notification for window {} tree {:?} (bound under account {}, current {})",
                    window_id, tree_id, account_id, current
                );
                return;
            }
            debug!("[Liveness] Remote operator died: window {} tree {:?}", window_id, tree_id);
            let _ = events.send(DeathEvent {
                window_id,
                tree_id,
                account_id,
            });
        });
        Binding {
            account_id,
            bound_at: Utc::now(),
            watcher,
        }
    }

    /// Detach the window binding; no-op when nothing is bound.
    pub async fn unbind_window(&self, window_id: WindowId) {
        self.window_bindings.lock().await.remove(&window_id);
    }

    /// Detach one sub-tree binding; no-op when nothing is bound.
    pub async fn unbind_tree(&self, window_id: WindowId, tree_id: TreeId) {
        self.tree_bindings.lock().await.remove(&(window_id, tree_id));
    }

    /// Detach the window binding and every tree binding under the window.
    pub async fn unbind_all_for_window(&self, window_id: WindowId) {
        let mut windows = self.window_bindings.lock().await;
        let mut trees = self.tree_bindings.lock().await;
        windows.remove(&window_id);
        trees.retain(|(w, _), _| *w != window_id);
    }

    /// Drop every binding (service shutdown).
    pub async fn clear(&self) {
        let mut windows = self.window_bindings.lock().await;
        let mut trees = self.tree_bindings.lock().await;
        windows.clear();
        trees.clear();
    }

    /// Account epoch recorded for a window binding, if one is active.
    pub async fn window_binding_account(&self, window_id: WindowId) -> Option<AccountId> {
        self.window_bindings.lock().await.get(&window_id).map(|b| b.account_id)
    }

    pub async fn binding_count(&self) -> usize {
        let windows = self.window_bindings.lock().await;
        let trees = self.tree_bindings.lock().await;
        windows.len() + trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axbroker_core::MockElementOperator;
    use std::time::Duration;

    fn tracker() -> (Arc<AtomicI32>, mpsc::UnboundedReceiver<DeathEvent>, LivenessTracker) {
        let account = Arc::new(AtomicI32::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = LivenessTracker::new(Arc::clone(&account), tx);
        (account, rx, tracker)
    }

    #[tokio::test]
    async fn bind_null_handle_is_an_error_not_a_crash() {
        let (_, _rx, tracker) = tracker();
        let result = tracker.bind_window(1, None, 0).await;
        assert!(matches!(result, Err(BrokerError::NullHandle(1))));
        assert_eq!(tracker.binding_count().await, 0);
    }

    #[tokio::test]
    async fn death_emits_event_for_current_account() {
        let (_, mut rx, tracker) = tracker();
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        tracker.bind_window(1, Some(&operator), 0).await.expect("bind");

        operator.death_token().cancel();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within bound")
            .expect("channel open");
        assert_eq!(event, DeathEvent { window_id: 1, tree_id: None, account_id: 0 });
    }

    #[tokio::test]
    async fn stale_death_notification_is_dropped() {
        let (account, mut rx, tracker) = tracker();
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        tracker.bind_window(1, Some(&operator), 0).await.expect("bind");

        // Session switches before the remote dies.
        account.store(7, Ordering::SeqCst);
        operator.death_token().cancel();

        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(got.is_err(), "stale notification must not produce an event");
    }

    #[tokio::test]
    async fn rebinding_replaces_the_previous_watch() {
        let (_, mut rx, tracker) = tracker();
        let first: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        let second: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        tracker.bind_window(1, Some(&first), 0).await.expect("bind first");
        tracker.bind_window(1, Some(&second), 0).await.expect("bind second");
        assert_eq!(tracker.binding_count().await, 1);

        // The replaced watch is dead; only the second operator is observed.
        first.death_token().cancel();
        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(got.is_err());

        second.death_token().cancel();
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within bound")
            .expect("channel open");
        assert_eq!(event.window_id, 1);
    }

    #[tokio::test]
    async fn unbind_all_clears_window_and_tree_bindings() {
        let (_, _rx, tracker) = tracker();
        let operator: Arc<dyn ElementOperator> = Arc::new(MockElementOperator::new());
        tracker.bind_window(1, Some(&operator), 0).await.expect("bind window");
        tracker.bind_tree(1, 2, Some(&operator), 0).await.expect("bind tree");
        tracker.bind_tree(3, 1, Some(&operator), 0).await.expect("bind other window tree");

        tracker.unbind_all_for_window(1).await;
        assert_eq!(tracker.binding_count().await, 1); // window 3's tree survives

        tracker.unbind_tree(3, 1).await;
        tracker.unbind_tree(3, 1).await; // second unbind is a no-op
        assert_eq!(tracker.binding_count().await, 0);
    }
}
