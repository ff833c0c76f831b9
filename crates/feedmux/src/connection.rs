//! Connection management for the feed multiplexer.
//!
//! One service instance owns one socket to the feed endpoint, the
//! subscription registry, and the signal-driven reconnection logic.
//! Subscriptions are replayed in full on every transition to open.

use crate::error::{MuxError, MuxResult};
use crate::handle::ControlHandle;
use crate::heartbeat::Heartbeat;
use crate::message::{WsMessage, WsRequest};
use crate::registry::{SubscriptionRegistry, SubscriptionToken};
use crate::signal::{ExternalSignal, SignalAction, SignalState};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

/// Signal queue depth. Signals are low frequency (visibility/connectivity
/// edges); anything beyond this is a stuck consumer.
const SIGNAL_CAPACITY: usize = 32;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Feed endpoint URL.
    pub url: String,
    /// Connect as soon as the service task starts. When false the service
    /// stays closed until a qualifying signal (headless/server contexts).
    pub connect_on_start: bool,
    /// Quiet-link interval before an application-level ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Pong deadline after a ping.
    pub heartbeat_timeout_ms: u64,
    /// Outbound control-message queue capacity.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_on_start: true,
            heartbeat_interval_ms: 45_000,
            heartbeat_timeout_ms: 10_000,
            outbound_capacity: 100,
        }
    }
}

/// Transport lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why one served connection ended.
enum ServeExit {
    /// Service shutdown; the run loop terminates.
    Shutdown,
    /// Connection gone; stay closed until the next qualifying signal.
    Lost,
    /// A signal asked for an immediate fresh connection.
    Reconnect,
}

/// Feed subscription multiplexer service.
///
/// Constructed once at application startup and shared via `Arc`; spawn
/// [`FeedMux::run`] to drive the connection. All consumer-facing methods
/// are synchronous and fire-and-forget.
pub struct FeedMux {
    config: ConnectionConfig,
    registry: Arc<SubscriptionRegistry>,
    control: ControlHandle,
    state_tx: watch::Sender<ConnectionState>,
    /// "Reconnecting" indicator for the UI layer.
    reconnecting_tx: watch::Sender<bool>,
    /// Outbound message receiver (consumed by the run loop).
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    signal_tx: mpsc::Sender<ExternalSignal>,
    signal_rx: TokioMutex<mpsc::Receiver<ExternalSignal>>,
    heartbeat: Heartbeat,
    shutdown_token: CancellationToken,
}

impl FeedMux {
    /// Create a new service instance.
    pub fn new(config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (reconnecting_tx, _) = watch::channel(false);
        let heartbeat = Heartbeat::new(
            Duration::from_millis(config.heartbeat_interval_ms),
            Duration::from_millis(config.heartbeat_timeout_ms),
        );

        Self {
            config,
            registry: Arc::new(SubscriptionRegistry::new()),
            control: ControlHandle::new(outbound_tx, state_rx),
            state_tx,
            reconnecting_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            signal_tx,
            signal_rx: TokioMutex::new(signal_rx),
            heartbeat,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Register a consumer under a channel key.
    ///
    /// The subscribe control message is attempted immediately; if the
    /// transport is not open it is dropped and the registration is replayed
    /// on the next open.
    pub fn subscribe<F>(&self, channel: &str, payload: Value, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let token = self.registry.insert(channel, payload.clone(), Arc::new(handler));
        self.control
            .send_request(&WsRequest::subscribe(channel, &payload));
        token
    }

    /// Register the sole consumer of a channel key.
    ///
    /// Any existing consumers under the key are unsubscribed first (an
    /// unsubscribe control message is sent per displaced entry). Used when
    /// a view changes its subscription parameters, e.g. switching symbols.
    pub fn subscribe_single<F>(&self, channel: &str, payload: Value, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let (token, displaced) = self
            .registry
            .replace(channel, payload.clone(), Arc::new(handler));
        for old_payload in &displaced {
            self.control
                .send_request(&WsRequest::unsubscribe(channel, old_payload));
        }
        self.control
            .send_request(&WsRequest::subscribe(channel, &payload));
        token
    }

    /// Cancel one subscription by token and send its unsubscribe control
    /// message. A token that was already cancelled is ignored.
    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        if let Some(payload) = self.registry.remove(token) {
            self.control
                .send_request(&WsRequest::unsubscribe(token.channel(), &payload));
        }
    }

    /// Cancel every subscription under a channel key.
    pub fn unsubscribe_channel(&self, channel: &str) {
        for payload in self.registry.remove_channel(channel) {
            self.control
                .send_request(&WsRequest::unsubscribe(channel, &payload));
        }
    }

    /// Feed one external signal into the reconnection controller.
    pub fn signal(&self, signal: ExternalSignal) {
        if self.signal_tx.try_send(signal).is_err() {
            warn!(?signal, "Signal queue unavailable, dropping signal");
        }
    }

    /// Request an immediate reconnect (no-op while sleep mode is active).
    pub fn force_reconnect(&self) {
        self.signal(ExternalSignal::ForceReconnect);
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch transport state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Watch the "reconnecting" indicator.
    pub fn watch_reconnecting(&self) -> watch::Receiver<bool> {
        self.reconnecting_tx.subscribe()
    }

    /// Number of live subscription entries.
    pub fn subscription_count(&self) -> usize {
        self.registry.entry_count()
    }

    /// Clonable outbound handle (primarily for tests and diagnostics).
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Signal graceful shutdown; the run loop exits promptly.
    pub fn shutdown(&self) {
        info!("FeedMux shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Drive the connection until shutdown.
    ///
    /// Spawn this once per service instance. Reconnection is purely
    /// signal-driven: a connection that fails to open leaves the service
    /// closed until the next qualifying signal.
    pub async fn run(&self) {
        let mut signals = SignalState::new();
        let mut want_connect = self.config.connect_on_start;

        loop {
            if self.is_shutdown() {
                self.state_tx.send_replace(ConnectionState::Closed);
                return;
            }

            if want_connect {
                match self.serve_connection(&mut signals).await {
                    ServeExit::Shutdown => return,
                    ServeExit::Reconnect => {}
                    ServeExit::Lost => want_connect = false,
                }
                continue;
            }

            // Closed: nothing to do until a signal or shutdown arrives.
            let signal = {
                let mut rx = self.signal_rx.lock().await;
                tokio::select! {
                    () = self.shutdown_token.cancelled() => None,
                    sig = rx.recv() => sig,
                }
            };
            let Some(sig) = signal else {
                self.state_tx.send_replace(ConnectionState::Closed);
                return;
            };

            if signals.apply(sig, false) == SignalAction::Reconnect {
                self.reconnecting_tx.send_replace(true);
                want_connect = true;
            }
        }
    }

    /// Serve one connection attempt to completion and settle final state.
    async fn serve_connection(&self, signals: &mut SignalState) -> ServeExit {
        let exit = match self.try_serve(signals).await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "Connection ended with error");
                ServeExit::Lost
            }
        };
        self.state_tx.send_replace(ConnectionState::Closed);
        self.reconnecting_tx
            .send_replace(matches!(exit, ServeExit::Reconnect));
        exit
    }

    async fn try_serve(&self, signals: &mut SignalState) -> MuxResult<ServeExit> {
        self.state_tx.send_replace(ConnectionState::Connecting);
        info!(url = %self.config.url, "Connecting to feed endpoint");

        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        // Drop control messages queued against the previous connection;
        // the replay below is authoritative for this one.
        self.drain_outbound().await;

        self.state_tx.send_replace(ConnectionState::Open);
        self.reconnecting_tx.send_replace(false);
        self.heartbeat.reset();
        info!("Feed endpoint connected");

        self.replay_subscriptions(&mut write).await?;

        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };
            let signal_recv = async { self.signal_rx.lock().await.recv().await };

            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, closing connection");
                    self.state_tx.send_replace(ConnectionState::Closing);
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(ServeExit::Shutdown);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, signals);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Connection closed by server");
                            return Err(MuxError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Transport read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("Transport stream ended");
                            return Ok(ServeExit::Lost);
                        }
                        _ => {}
                    }
                }

                outbound = outbound_recv => {
                    if let Some(text) = outbound {
                        write.send(Message::Text(text)).await?;
                    }
                }

                sig = signal_recv => {
                    if let Some(sig) = sig {
                        match signals.apply(sig, true) {
                            SignalAction::None => {}
                            SignalAction::Close => {
                                info!("Closing connection on external signal");
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(ServeExit::Lost);
                            }
                            SignalAction::Reconnect => {
                                info!("Reconnecting on external signal");
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(ServeExit::Reconnect);
                            }
                        }
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout, closing connection");
                        return Err(MuxError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_ping() {
                        let ping = serde_json::to_string(&WsRequest::ping())?;
                        write.send(Message::Text(ping)).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    /// Decode and route one inbound text frame.
    fn handle_text(&self, text: &str, signals: &SignalState) {
        self.heartbeat.record_activity();

        let msg: WsMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Dropping malformed inbound message");
                return;
            }
        };

        match msg {
            WsMessage::Pong(pong) => {
                if pong.is_pong() {
                    self.heartbeat.record_pong();
                }
            }
            WsMessage::Channel(channel_msg) => {
                if signals.is_sleeping() {
                    debug!(channel = %channel_msg.channel, "Sleep mode active, discarding inbound message");
                    return;
                }
                self.registry.dispatch(&channel_msg.channel, &channel_msg.data);
            }
        }
    }

    /// Re-send a subscribe control message for every live registry entry.
    async fn replay_subscriptions(&self, write: &mut WsSink) -> MuxResult<()> {
        let subscriptions = self.registry.replay_messages();
        info!(count = subscriptions.len(), "Replaying subscriptions");

        for (channel, payload) in subscriptions {
            let request = WsRequest::subscribe(&channel, &payload);
            let text = serde_json::to_string(&request)?;
            write.send(Message::Text(text)).await?;
        }
        Ok(())
    }

    async fn drain_outbound(&self) {
        let mut rx = self.outbound_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }
}
