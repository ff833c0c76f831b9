//! Mock feed server for integration tests.
//!
//! A minimal WebSocket server that accepts connections, records received
//! control messages, and can push inbound frames to (or disconnect) every
//! connected client.

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Command sent to a connected client task.
enum ClientCommand {
    Send(String),
    Close,
}

pub struct MockFeedServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    clients: Arc<Mutex<Vec<mpsc::Sender<ClientCommand>>>>,
}

impl MockFeedServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let clients: Arc<Mutex<Vec<mpsc::Sender<ClientCommand>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let clients_clone = clients.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        let clients = clients_clone.clone();
                        tokio::spawn(handle_connection(stream, messages, connections, clients));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
            clients,
        }
    }

    /// WebSocket URL of the server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of connections accepted so far.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// All control messages received so far.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Forget previously received messages.
    pub async fn clear_messages(&self) {
        self.messages.lock().await.clear();
    }

    /// Push a text frame to every connected client.
    pub async fn send_to_all(&self, text: &str) {
        for client in self.clients.lock().await.iter() {
            let _ = client.send(ClientCommand::Send(text.to_string())).await;
        }
    }

    /// Close every connected client from the server side.
    pub async fn disconnect_all(&self) {
        for client in self.clients.lock().await.iter() {
            let _ = client.send(ClientCommand::Close).await;
        }
    }

    /// Poll until the server has accepted `count` connections.
    pub async fn wait_for_connections(&self, count: u32, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                if self.connection_count().await >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Poll until at least `count` control messages have arrived.
    pub async fn wait_for_message_count(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                if self.messages.lock().await.len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    clients: Arc<Mutex<Vec<mpsc::Sender<ClientCommand>>>>,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };

    let (command_tx, mut command_rx) = mpsc::channel::<ClientCommand>(32);
    clients.lock().await.push(command_tx);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        messages.lock().await.push_back(text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(text)) => {
                        if write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(ClientCommand::Close) => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
