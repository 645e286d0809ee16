//! WebSocket session lifecycle for chart data.
//!
//! Provides:
//! - One live transport per session, torn down when parameters change
//! - Trailing-edge debounce of `open` to absorb UI churn
//! - A single delayed reconnect per abnormal close, suppressed when the
//!   desired session has moved on
//! - Generation-tagged event delivery so stale transports cannot leak
//!   messages into the current session

pub mod connection;
pub mod error;
pub mod message;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use message::{ConfigRequest, SessionEvent, WsMessage};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
