//! Window Connection Registry.
//!
//! The single source of truth for "who answers queries about this window".
//! Safe to use concurrently from query threads, callback-delivery threads,
//! and death-notification threads.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use axbroker_core::WindowId;

use crate::window_connection::WindowConnection;

/// Thread-safe window id → connection table.
#[derive(Clone, Default)]
pub struct WindowConnectionRegistry {
    connections: Arc<RwLock<HashMap<WindowId, Arc<WindowConnection>>>>,
}

impl WindowConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the connection for a window. Callers holding a
    /// reference to a replaced connection keep using it until they re-fetch.
    pub async fn add(&self, window_id: WindowId, connection: Arc<WindowConnection>) {
        let mut w = self.connections.write().await;
        if w.insert(window_id, connection).is_some() {
            debug!("[Registry] Replaced connection for window {}", window_id);
        }
    }

    /// Erase the connection for a window; no-op when absent.
    pub async fn remove(&self, window_id: WindowId) -> Option<Arc<WindowConnection>> {
        let mut w = self.connections.write().await;
        w.remove(&window_id)
    }

    pub async fn get(&self, window_id: WindowId) -> Option<Arc<WindowConnection>> {
        let r = self.connections.read().await;
        r.get(&window_id).cloned()
    }

    /// Every registered connection, for process-wide teardown sweeps.
    pub async fn all(&self) -> Vec<Arc<WindowConnection>> {
        let r = self.connections.read().await;
        r.values().cloned().collect()
    }

    pub async fn clear(&self) {
        let mut w = self.connections.write().await;
        w.clear();
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_write_wins() {
        let registry = WindowConnectionRegistry::new();
        let first = Arc::new(WindowConnection::new(5, 0));
        let second = Arc::new(WindowConnection::new(5, 0));

        registry.add(5, Arc::clone(&first)).await;
        registry.add(5, Arc::clone(&second)).await;

        let got = registry.get(5).await.expect("window 5 registered");
        assert!(Arc::ptr_eq(&got, &second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = WindowConnectionRegistry::new();
        assert!(registry.remove(9).await.is_none()); // never registered
        assert!(registry.get(9).await.is_none());
    }

    #[tokio::test]
    async fn register_lookup_remove_round_trip() {
        let registry = WindowConnectionRegistry::new();
        registry.add(5, Arc::new(WindowConnection::new(5, 0))).await;
        assert!(registry.get(5).await.is_some());

        registry.remove(5).await;
        assert!(registry.get(5).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_add_and_get() {
        let registry = WindowConnectionRegistry::new();
        let mut handles = Vec::new();
        for id in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.add(id, Arc::new(WindowConnection::new(id, 0))).await;
                registry.get(id).await.is_some()
            }));
        }
        for handle in handles {
            assert!(handle.await.expect("task should not panic"));
        }
        assert_eq!(registry.len().await, 32);
    }
}
