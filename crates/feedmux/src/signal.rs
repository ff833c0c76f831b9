//! External signals and the reconnection decision state machine.
//!
//! The connection task consumes discrete signal events (connectivity, tab
//! visibility, sleep switch, explicit reconnect requests) and applies them
//! through one transition function instead of scattering the decisions
//! across independent observers. Reconnection is driven purely by these
//! signals: there is no backoff and no retry limit, so a connection that
//! fails to open stays closed until the next qualifying signal.

/// Discrete input event observed from collaborator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSignal {
    /// Internet reachability restored.
    ConnectivityUp,
    /// Internet reachability lost.
    ConnectivityDown,
    /// Application tab/window became active.
    TabActive,
    /// Application tab/window became inactive.
    TabInactive,
    /// Debug/pause switch. While on, inbound data is discarded before
    /// dispatch and reconnect requests are ignored; the connection itself
    /// stays alive.
    SleepMode(bool),
    /// Explicit reconnect request.
    ForceReconnect,
}

/// Action the connection task must take after applying a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    None,
    /// Close the current connection and stay down.
    Close,
    /// Tear down any current connection and open a fresh one.
    Reconnect,
}

/// Pending-reconnect flags plus the sleep switch.
#[derive(Debug, Default)]
pub struct SignalState {
    sleeping: bool,
    pending_on_online: bool,
    pending_on_activation: bool,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sleep switch is on (inbound dispatch suppressed).
    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    /// Apply one signal given whether the transport is currently open.
    pub fn apply(&mut self, signal: ExternalSignal, open: bool) -> SignalAction {
        match signal {
            ExternalSignal::SleepMode(on) => {
                self.sleeping = on;
                SignalAction::None
            }
            ExternalSignal::ConnectivityDown => {
                if open {
                    self.pending_on_online = true;
                    SignalAction::Close
                } else {
                    SignalAction::None
                }
            }
            ExternalSignal::ConnectivityUp => {
                if self.pending_on_online {
                    self.pending_on_online = false;
                    SignalAction::Reconnect
                } else {
                    SignalAction::None
                }
            }
            ExternalSignal::TabInactive => {
                self.pending_on_activation = true;
                SignalAction::None
            }
            ExternalSignal::TabActive => {
                let pending = self.pending_on_activation;
                self.pending_on_activation = false;
                if !open && pending {
                    SignalAction::Reconnect
                } else {
                    SignalAction::None
                }
            }
            ExternalSignal::ForceReconnect => {
                if self.sleeping {
                    SignalAction::None
                } else {
                    SignalAction::Reconnect
                }
            }
        }
    }
}
