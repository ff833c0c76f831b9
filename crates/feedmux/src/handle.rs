//! Outbound control-message handle.
//!
//! Clonable, channel-based, reconnect-safe. Sends are fire-and-forget:
//! anything submitted while the transport is not open is dropped, never
//! queued and never an error. Replay-on-open is the correction mechanism
//! for control messages lost this way.

use crate::connection::ConnectionState;
use crate::message::WsRequest;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Outcome of a fire-and-forget send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the connection task to write.
    Queued,
    /// Transport not open (or queue unavailable); message discarded.
    Dropped,
}

/// Handle for submitting control messages to the connection task.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<String>,
    state: watch::Receiver<ConnectionState>,
}

impl ControlHandle {
    pub(crate) fn new(tx: mpsc::Sender<String>, state: watch::Receiver<ConnectionState>) -> Self {
        Self { tx, state }
    }

    /// Whether the transport is currently open.
    pub fn is_open(&self) -> bool {
        *self.state.borrow() == ConnectionState::Open && !self.tx.is_closed()
    }

    /// Submit a raw text frame. Dropped silently unless the transport is
    /// open.
    pub fn send(&self, text: String) -> SendOutcome {
        if !self.is_open() {
            debug!("Transport not open, dropping outbound message");
            return SendOutcome::Dropped;
        }
        match self.tx.try_send(text) {
            Ok(()) => SendOutcome::Queued,
            Err(e) => {
                warn!(error = %e, "Outbound queue unavailable, dropping message");
                SendOutcome::Dropped
            }
        }
    }

    /// Serialize and submit a control request.
    pub fn send_request(&self, request: &WsRequest) -> SendOutcome {
        match serde_json::to_string(request) {
            Ok(text) => self.send(text),
            Err(e) => {
                warn!(error = %e, "Failed to encode control message");
                SendOutcome::Dropped
            }
        }
    }
}
