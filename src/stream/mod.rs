//! Realtime household event stream modules.
//!
//! - `client`: endpoint composition, credentials and the byte-stream transport.
//! - `parser`: incremental event-stream frame parsing.
//! - `proto`: events and lifecycle types shared with consumers.
//! - `providers`: token and subscription capabilities injected by the host.
//! - `reconnect`: cancelable reconnect timer driven by the backoff policy.
//! - `session`: per-subscription worker with automatic reconnects.

/// Endpoint, request and transport handling.
pub mod client;
/// Frame parser for `text/event-stream` bodies.
pub mod parser;
/// Stream data model.
pub mod proto;
/// Host-provided capabilities.
pub mod providers;
/// Reconnect scheduling.
pub mod reconnect;
/// Session worker and consumer interfaces.
pub mod session;
