//! Caller authorization for element access.

use std::sync::Arc;

use axbroker_connection::WindowConnectionRegistry;
use axbroker_core::{
    composite, AuthToken, BrokerError, ElementId, WindowId, WindowIdResolver, INVALID_ELEMENT_ID,
    INVALID_WINDOW_ID,
};

/// Decides whether a caller may see a given element.
///
/// The expected token per (window, sub-tree) is recorded on the window
/// connection at registration; verification is a pure equality check against
/// it. Tokens are issued and attested by an external trust boundary.
#[derive(Clone)]
pub struct AuthorizationValidator {
    registry: WindowConnectionRegistry,
    resolver: Arc<dyn WindowIdResolver>,
}

impl AuthorizationValidator {
    pub fn new(registry: WindowConnectionRegistry, resolver: Arc<dyn WindowIdResolver>) -> Self {
        Self { registry, resolver }
    }

    /// Check `token` against the expected token for the element's sub-tree.
    ///
    /// Sentinel window/element ids pass unconditionally — a request that
    /// doesn't reference a real element yet has nothing to protect. A
    /// missing connection (or missing sub-tree registration) and a token
    /// mismatch fail with distinct errors so callers can handle a security
    /// miss differently from a plain absence.
    pub async fn verify(
        &self,
        token: AuthToken,
        window_id: WindowId,
        element_id: ElementId,
    ) -> Result<(), BrokerError> {
        if element_id == INVALID_ELEMENT_ID || window_id == INVALID_WINDOW_ID {
            return Ok(());
        }

        let tree_id = composite::tree_of(element_id);
        let real_window_id = self.resolver.resolve(window_id);

        let connection = self
            .registry
            .get(real_window_id)
            .await
            .ok_or(BrokerError::NoConnection(real_window_id))?;

        let expected = connection
            .expected_token(tree_id)
            .await
            .ok_or(BrokerError::NoOperator {
                window_id: real_window_id,
                tree_id,
            })?;

        if expected != token {
            return Err(BrokerError::TokenMismatch {
                window_id: real_window_id,
                tree_id,
            });
        }
        Ok(())
    }
}
