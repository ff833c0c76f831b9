//! Connection liveness tracking.
//!
//! Sends an application-level ping when the link has been quiet for the
//! configured interval and flags the connection dead when the pong does not
//! arrive within the timeout. A timed-out connection is closed through the
//! normal close path; it is NOT reconnected automatically (reconnection is
//! signal-driven, see `signal`).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Liveness {
    last_ping: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
    awaiting_pong: bool,
}

/// Heartbeat state for one logical connection, reset on every open.
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    state: RwLock<Liveness>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            state: RwLock::new(Liveness::default()),
        }
    }

    /// Reset on connection open.
    pub fn reset(&self) {
        *self.state.write() = Liveness {
            last_ping: None,
            last_activity: Some(Utc::now()),
            awaiting_pong: false,
        };
    }

    /// Record any inbound traffic.
    pub fn record_activity(&self) {
        self.state.write().last_activity = Some(Utc::now());
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        let mut state = self.state.write();
        state.last_ping = Some(Utc::now());
        state.awaiting_pong = true;
    }

    /// Record that a pong arrived.
    pub fn record_pong(&self) {
        let mut state = self.state.write();
        if let Some(ping_time) = state.last_ping {
            let rtt_ms = (Utc::now() - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received pong");
        }
        state.awaiting_pong = false;
    }

    /// A ping is due when we are not already waiting for a pong and the
    /// link has been quiet for at least the interval.
    pub fn should_ping(&self) -> bool {
        let state = self.state.read();
        if state.awaiting_pong {
            return false;
        }
        match state.last_activity {
            Some(at) => (Utc::now() - at).num_milliseconds() >= self.interval.as_millis() as i64,
            None => false,
        }
    }

    /// The connection is dead when a pong is overdue.
    pub fn is_timed_out(&self) -> bool {
        let state = self.state.read();
        if !state.awaiting_pong {
            return false;
        }
        match state.last_ping {
            Some(at) => (Utc::now() - at).num_milliseconds() > self.timeout.as_millis() as i64,
            None => false,
        }
    }

    /// Wait until the next liveness check.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(self.interval / 2).await;
    }
}
