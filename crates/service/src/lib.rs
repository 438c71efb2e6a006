//! `axbroker-service` — the element-operator broker facade.
//!
//! Composes the window-connection registry, request correlator, and
//! liveness tracker behind [`ElementOperatorManager`], the only entry point
//! other subsystems call into. Also home to the caller authorization check
//! and the bounded-wait bridge over the async query protocol.

pub mod authorization;
pub mod manager;
pub mod query_bridge;

pub use authorization::AuthorizationValidator;
pub use manager::ElementOperatorManager;
pub use query_bridge::BlockingQueryBridge;
