//! Message socket abstraction.
//!
//! A [`Transport`] dials one socket at a time and hands back a [`Socket`]: a
//! pair of text channels. Dropping the outbound sender closes the socket; the
//! inbound receiver ending means the peer went away.

use crate::error::{ConnectionError, Result};

use futures::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// One live socket, as a channel pair.
#[derive(Debug)]
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a fresh socket. Each call yields an independent socket.
    async fn dial(&self) -> Result<Socket>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> &str;
}

/// WebSocket transport over tokio-tungstenite. `wss://` uses rustls.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn dial(&self) -> Result<Socket> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|error| ConnectionError::Dial {
                url: self.url.clone(),
                message: error.to_string(),
            })?;

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let url = self.url.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        let Some(text) = outgoing else {
                            // Owner dropped the socket.
                            let _ = sink.close().await;
                            break;
                        };
                        if let Err(error) = sink.send(Message::Text(text.into())).await {
                            tracing::debug!(%url, %error, "websocket send failed");
                            break;
                        }
                    }
                    incoming = source.next() => {
                        let text = match incoming {
                            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                            Some(Ok(Message::Binary(bytes))) => {
                                match String::from_utf8(bytes.to_vec()) {
                                    Ok(text) => text,
                                    Err(_) => {
                                        tracing::debug!(%url, "dropping non-utf8 binary frame");
                                        continue;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(error)) => {
                                tracing::debug!(%url, %error, "websocket read failed");
                                break;
                            }
                        };
                        if inbound_tx.send(text).is_err() {
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            }
            tracing::trace!(%url, "websocket pump exited");
        });

        Ok(Socket {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// In-process transport. Every successful dial produces a [`MemoryPeer`] that
/// plays the agent side of the socket.
#[derive(Debug)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Mutex<VecDeque<String>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let transport = Self {
            peers,
            refusals: Mutex::new(VecDeque::new()),
        };
        (transport, accepted)
    }

    /// Make the next `count` dials fail.
    pub fn refuse(&self, count: usize) {
        let mut refusals = self.refusals.lock();
        for _ in 0..count {
            refusals.push_back("connection refused".to_string());
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self) -> Result<Socket> {
        if let Some(message) = self.refusals.lock().pop_front() {
            return Err(ConnectionError::Dial {
                url: self.endpoint().to_string(),
                message,
            }
            .into());
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        self.peers
            .send(MemoryPeer {
                from_client,
                to_client,
            })
            .map_err(|_| ConnectionError::Dial {
                url: self.endpoint().to_string(),
                message: "no listener".to_string(),
            })?;

        Ok(Socket {
            outbound: client_tx,
            inbound: client_rx,
        })
    }

    fn endpoint(&self) -> &str {
        "memory://"
    }
}

/// Agent side of an in-memory socket. Dropping it closes the socket.
#[derive(Debug)]
pub struct MemoryPeer {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Next frame the client sent, parsed as JSON. `None` once the client closed.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let text = self.from_client.recv().await?;
            match serde_json::from_str(&text) {
                Ok(value) => return Some(value),
                Err(error) => tracing::debug!(%error, "peer received non-json text"),
            }
        }
    }

    /// Push a frame to the client. Returns `false` if the client end is gone.
    pub fn send_json(&self, value: Value) -> bool {
        self.to_client.send(value.to_string()).is_ok()
    }

    pub fn send_raw(&self, text: &str) -> bool {
        self.to_client.send(text.to_string()).is_ok()
    }
}
