//! Client for the realtime household event stream.
//!
//! The crate is organized by concern:
//! - `stream`: event-stream parsing, session lifecycle and reconnects.
//! - `backoff`: jittered exponential delay policy shared by reconnects.

/// Jittered exponential backoff.
pub mod backoff;
/// Household event stream client, parser and session.
pub mod stream;

pub use stream::client::{StreamClient, StreamClientOptions, StreamError};
pub use stream::proto::{ConnectionState, Event, StreamUpdate};
pub use stream::providers::{MemorySubscriptionStore, SubscriptionStore, TokenSupplier};
pub use stream::session::{StreamListener, StreamSession, StreamUpdates};
