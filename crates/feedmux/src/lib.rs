//! WebSocket subscription multiplexer for market-data UIs.
//!
//! Owns a single socket to a remote feed endpoint and fans inbound
//! channel messages out to registered consumers:
//! - Channel-keyed subscription registry with token-based cancellation
//! - Signal-driven reconnection (connectivity, tab visibility, explicit)
//! - Full subscription replay after every reconnect
//! - Heartbeat monitoring (quiet-link ping, pong timeout detection)
//!
//! Delivery is best-effort / at-most-once: messages that arrive while the
//! connection is down are lost, and sends against a non-open connection are
//! dropped rather than queued.

pub mod connection;
pub mod error;
pub mod handle;
pub mod heartbeat;
pub mod message;
pub mod registry;
pub mod signal;

pub use connection::{ConnectionConfig, ConnectionState, FeedMux};
pub use error::{MuxError, MuxResult};
pub use handle::{ControlHandle, SendOutcome};
pub use heartbeat::Heartbeat;
pub use message::{ChannelMessage, PongMessage, WsMessage, WsRequest};
pub use registry::{Handler, SubscriptionRegistry, SubscriptionToken};
pub use signal::{ExternalSignal, SignalAction, SignalState};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
