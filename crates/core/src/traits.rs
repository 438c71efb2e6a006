use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::callback::QueryCallback;
use crate::error::BrokerError;
use crate::types::{ElementId, RequestId, SearchMode, WindowId};

/// The remote, out-of-process object that resolves element queries for one
/// window or sub-tree.
///
/// Implemented by the transport layer's proxy glue; the broker only ever
/// holds these behind `Arc<dyn ElementOperator>`. An accepted search call
/// eventually invokes the supplied callback exactly once — that is the only
/// allowed completion signal for the request id.
#[async_trait]
pub trait ElementOperator: Send + Sync {
    /// Ask the remote side to resolve element info by composite id.
    async fn search_element_info_by_accessibility_id(
        &self,
        element_id: ElementId,
        request_id: RequestId,
        callback: Arc<QueryCallback>,
        mode: SearchMode,
    ) -> Result<(), BrokerError>;

    /// Drop accessibility focus inside the remote window.
    async fn clear_focus(&self) -> Result<(), BrokerError>;

    /// Best-effort notification that a touch landed outside the window.
    async fn outside_touch(&self);

    /// Token the transport fires when the remote process exits.
    fn death_token(&self) -> CancellationToken;
}

/// Resolves logical window aliases to real window ids.
///
/// Windows can be addressed through aliases resolved by the window-manager
/// integration; the broker calls through this seam before any connection
/// lookup so that integration stays pluggable.
pub trait WindowIdResolver: Send + Sync {
    fn resolve(&self, window_id: WindowId) -> WindowId;
}

/// Pass-through resolver for deployments without window aliasing.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl WindowIdResolver for IdentityResolver {
    fn resolve(&self, window_id: WindowId) -> WindowId {
        window_id
    }
}
