//! Per-window binding to the remote operators that answer element queries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use axbroker_core::{AccountId, AuthToken, ElementId, ElementOperator, TreeId, WindowId, MAIN_TREE_ID};

#[derive(Default)]
struct Inner {
    /// Operator for the window's primary tree.
    operator: Option<Arc<dyn ElementOperator>>,
    /// Operators for embedded sub-trees, which come and go independently
    /// of the whole-window lifetime.
    tree_operators: HashMap<TreeId, Arc<dyn ElementOperator>>,
    /// Expected caller token per tree, recorded at registration.
    tree_tokens: HashMap<TreeId, AuthToken>,
    /// Root-ancestor element id per tree, recorded at registration.
    tree_root_parents: HashMap<TreeId, ElementId>,
}

/// The binding between one window and the remote party answering element
/// queries for it.
///
/// The registry owns these exclusively (behind `Arc`); operator references
/// are lifetime-observed through the liveness tracker, not owned here.
/// Primary-tree metadata lives under [`MAIN_TREE_ID`] in the same per-tree
/// maps as embedded sub-trees.
pub struct WindowConnection {
    window_id: WindowId,
    owner_account_id: AccountId,
    inner: RwLock<Inner>,
}

impl WindowConnection {
    /// A connection with no operator attached yet.
    pub fn new(window_id: WindowId, owner_account_id: AccountId) -> Self {
        Self {
            window_id,
            owner_account_id,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// A connection whose primary operator is registered up front.
    pub fn with_operator(
        window_id: WindowId,
        owner_account_id: AccountId,
        operator: Arc<dyn ElementOperator>,
        token: AuthToken,
    ) -> Self {
        let mut inner = Inner::default();
        inner.operator = Some(operator);
        inner.tree_tokens.insert(MAIN_TREE_ID, token);
        Self {
            window_id,
            owner_account_id,
            inner: RwLock::new(inner),
        }
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    pub fn owner_account_id(&self) -> AccountId {
        self.owner_account_id
    }

    /// Register or replace the primary operator and its expected token.
    pub async fn set_operator(&self, operator: Arc<dyn ElementOperator>, token: AuthToken) {
        let mut inner = self.inner.write().await;
        inner.operator = Some(operator);
        inner.tree_tokens.insert(MAIN_TREE_ID, token);
    }

    pub async fn operator(&self) -> Option<Arc<dyn ElementOperator>> {
        self.inner.read().await.operator.clone()
    }

    /// Register or replace an embedded sub-tree's operator, recording its
    /// expected token and root-ancestor element id in the same write.
    pub async fn add_tree_operator(
        &self,
        tree_id: TreeId,
        operator: Arc<dyn ElementOperator>,
        token: AuthToken,
        root_parent_id: ElementId,
    ) {
        let mut inner = self.inner.write().await;
        inner.tree_operators.insert(tree_id, operator);
        inner.tree_tokens.insert(tree_id, token);
        inner.tree_root_parents.insert(tree_id, root_parent_id);
        debug!(
            "[Connection] Window {} registered sub-tree {} operator",
            self.window_id, tree_id
        );
    }

    /// Erase a sub-tree's operator and its recorded metadata. Once erased the
    /// tree cannot be queried again until re-added.
    pub async fn remove_tree_operator(&self, tree_id: TreeId) {
        let mut inner = self.inner.write().await;
        inner.tree_operators.remove(&tree_id);
        inner.tree_tokens.remove(&tree_id);
        inner.tree_root_parents.remove(&tree_id);
    }

    pub async fn tree_operator(&self, tree_id: TreeId) -> Option<Arc<dyn ElementOperator>> {
        self.inner.read().await.tree_operators.get(&tree_id).cloned()
    }

    /// The operator answering for `tree_id`: the primary operator for the
    /// main tree, the sub-tree operator otherwise.
    pub async fn operator_for_tree(&self, tree_id: TreeId) -> Option<Arc<dyn ElementOperator>> {
        let inner = self.inner.read().await;
        if tree_id == MAIN_TREE_ID {
            inner.operator.clone()
        } else {
            inner.tree_operators.get(&tree_id).cloned()
        }
    }

    /// The token a caller must present to see elements of `tree_id`.
    pub async fn expected_token(&self, tree_id: TreeId) -> Option<AuthToken> {
        self.inner.read().await.tree_tokens.get(&tree_id).copied()
    }

    /// The root-ancestor element id recorded for `tree_id` at registration.
    pub async fn root_parent_id(&self, tree_id: TreeId) -> Option<ElementId> {
        self.inner.read().await.tree_root_parents.get(&tree_id).copied()
    }

    /// Sub-tree ids currently registered (the main tree is not listed).
    pub async fn tree_ids(&self) -> Vec<TreeId> {
        self.inner.read().await.tree_operators.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axbroker_core::MockElementOperator;

    fn operator() -> Arc<dyn ElementOperator> {
        Arc::new(MockElementOperator::new())
    }

    #[tokio::test]
    async fn main_tree_routes_to_the_primary_operator() {
        let conn = WindowConnection::with_operator(1, 0, operator(), 77);
        assert!(conn.operator_for_tree(MAIN_TREE_ID).await.is_some());
        assert_eq!(conn.expected_token(MAIN_TREE_ID).await, Some(77));
        assert!(conn.operator_for_tree(5).await.is_none());
    }

    #[tokio::test]
    async fn erased_tree_cannot_be_queried_until_re_added() {
        let conn = WindowConnection::new(1, 0);
        conn.add_tree_operator(3, operator(), 9, 100).await;
        assert!(conn.tree_operator(3).await.is_some());
        assert_eq!(conn.root_parent_id(3).await, Some(100));

        conn.remove_tree_operator(3).await;
        assert!(conn.tree_operator(3).await.is_none());
        assert!(conn.expected_token(3).await.is_none());
        assert!(conn.root_parent_id(3).await.is_none());

        conn.add_tree_operator(3, operator(), 10, 200).await;
        assert_eq!(conn.expected_token(3).await, Some(10));
        assert_eq!(conn.tree_ids().await, vec![3]);
    }
}
