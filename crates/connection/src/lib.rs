//! `axbroker-connection` — window connection state and remote liveness.
//!
//! Provides:
//! - [`WindowConnection`]: the binding between one window and the remote
//!   operators answering element queries for it and its embedded sub-trees
//! - [`WindowConnectionRegistry`]: the window id → connection table
//! - [`LivenessTracker`]: death-notification bindings per remote operator

pub mod liveness;
pub mod registry;
pub mod window_connection;

pub use liveness::{DeathEvent, LivenessTracker};
pub use registry::WindowConnectionRegistry;
pub use window_connection::WindowConnection;
