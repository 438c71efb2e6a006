//! `axbroker-logging` — tracing subscriber setup for the broker.

pub mod logger;

pub use logger::init_logger;
