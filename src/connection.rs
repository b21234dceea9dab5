//! Connection manager: socket lifecycle, reconnection with backoff, raw send.
//!
//! Only the most recently opened socket is current. Each `connect` bumps a
//! generation counter and every task spawned for a socket carries the
//! generation it belongs to; events from a superseded generation are dropped.
//! This layer knows nothing about the protocol riding on top of it.

pub mod backoff;
pub mod transport;

pub use backoff::reconnect_delay;
pub use transport::{MemoryPeer, MemoryTransport, Socket, Transport, WebSocketTransport};

use crate::acp::Frame;
use crate::config::ReconnectConfig;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Lifecycle and payload events of the current socket, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Message(String),
    Closed,
}

#[derive(Debug, Default)]
struct SocketSlot {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    attempts: u32,
    pump: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ReconnectConfig,
    slot: Mutex<SocketSlot>,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Owns the single live socket. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.transport.endpoint())
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ReconnectConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let inner = Arc::new(Inner {
            transport,
            config,
            slot: Mutex::new(SocketSlot::default()),
            status,
            events,
        });
        (Self { inner }, event_rx)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Whether the socket is down with no reconnect left to try.
    pub fn is_exhausted(&self) -> bool {
        let slot = self.inner.slot.lock();
        *self.inner.status.borrow() == ConnectionStatus::Disconnected
            && slot.reconnect_timer.is_none()
            && slot.pump.is_none()
            && slot.attempts >= self.inner.config.max_attempts
    }

    pub fn endpoint(&self) -> &str {
        self.inner.transport.endpoint()
    }

    /// Automatic reconnection attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.slot.lock().attempts
    }

    /// Start a fresh connection attempt, superseding any existing socket.
    pub fn connect(&self) {
        let mut slot = self.inner.slot.lock();
        self.inner.open_locked(&mut slot);
    }

    /// Close the socket and suppress automatic reconnection.
    pub fn disconnect(&self) {
        let mut slot = self.inner.slot.lock();
        slot.attempts = self.inner.config.max_attempts;
        if let Some(timer) = slot.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(pump) = slot.pump.take() {
            pump.abort();
        }
        slot.outbound = None;
        slot.generation += 1;

        let previous = self.inner.status.send_replace(ConnectionStatus::Disconnected);
        if previous == ConnectionStatus::Connected {
            let _ = self.inner.events.send(ConnectionEvent::Closed);
        }
        tracing::info!(endpoint = %self.inner.transport.endpoint(), "disconnected");
    }

    /// Send one frame on the current socket. Frames are dropped while no socket is open.
    pub fn send(&self, frame: &Frame) -> bool {
        let text = frame.to_text();
        let slot = self.inner.slot.lock();
        match &slot.outbound {
            Some(outbound) if outbound.send(text.clone()).is_ok() => {
                tracing::trace!(frame = %text, "sent frame");
                true
            }
            _ => {
                tracing::debug!(frame = %text, "socket not open, dropping frame");
                false
            }
        }
    }
}

impl Inner {
    fn open_locked(self: &Arc<Self>, slot: &mut SocketSlot) {
        if let Some(timer) = slot.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(pump) = slot.pump.take() {
            pump.abort();
        }
        slot.outbound = None;
        slot.generation += 1;

        let previous = self.status.send_replace(ConnectionStatus::Connecting);
        if previous == ConnectionStatus::Connected {
            let _ = self.events.send(ConnectionEvent::Closed);
        }

        tracing::info!(
            endpoint = %self.transport.endpoint(),
            generation = slot.generation,
            "connecting"
        );
        let inner = Arc::clone(self);
        let generation = slot.generation;
        slot.pump = Some(tokio::spawn(async move {
            inner.run_socket(generation).await;
        }));
    }

    async fn run_socket(self: Arc<Self>, generation: u64) {
        let Socket {
            outbound,
            mut inbound,
        } = match self.transport.dial().await {
            Ok(socket) => socket,
            Err(error) => {
                tracing::warn!(
                    endpoint = %self.transport.endpoint(),
                    %error,
                    "failed to open socket"
                );
                self.handle_closed(generation);
                return;
            }
        };

        {
            let mut slot = self.slot.lock();
            if slot.generation != generation {
                tracing::debug!(generation, "socket opened after being superseded, discarding");
                return;
            }
            slot.outbound = Some(outbound);
            slot.attempts = 0;
            self.status.send_replace(ConnectionStatus::Connected);
            let _ = self.events.send(ConnectionEvent::Opened);
        }
        tracing::info!(endpoint = %self.transport.endpoint(), generation, "socket open");

        while let Some(text) = inbound.recv().await {
            let slot = self.slot.lock();
            if slot.generation != generation {
                tracing::debug!(generation, "ignoring message from stale socket");
                return;
            }
            tracing::trace!(frame = %text, "received frame");
            let _ = self.events.send(ConnectionEvent::Message(text));
        }

        self.handle_closed(generation);
    }

    fn handle_closed(self: &Arc<Self>, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            tracing::debug!(generation, "ignoring close from stale socket");
            return;
        }
        slot.outbound = None;
        // Called from inside the pump itself, so release the handle without aborting.
        slot.pump = None;

        let previous = self.status.send_replace(ConnectionStatus::Disconnected);
        if previous == ConnectionStatus::Connected {
            let _ = self.events.send(ConnectionEvent::Closed);
            tracing::info!(endpoint = %self.transport.endpoint(), "socket closed");
        }

        if slot.attempts >= self.config.max_attempts {
            tracing::warn!(
                endpoint = %self.transport.endpoint(),
                attempts = slot.attempts,
                "reconnect attempts exhausted, staying disconnected"
            );
            return;
        }

        let delay = reconnect_delay(slot.attempts, &self.config);
        slot.attempts += 1;
        tracing::info!(
            attempt = slot.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let inner = Arc::clone(self);
        slot.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut slot = inner.slot.lock();
            if slot.generation != generation {
                return;
            }
            slot.reconnect_timer = None;
            inner.open_locked(&mut slot);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(
        config: ReconnectConfig,
    ) -> (
        ConnectionManager,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        Arc<MemoryTransport>,
        mpsc::UnboundedReceiver<MemoryPeer>,
    ) {
        let (transport, accepted) = MemoryTransport::new();
        let transport = Arc::new(transport);
        let (manager, events) = ConnectionManager::new(transport.clone(), config);
        (manager, events, transport, accepted)
    }

    #[tokio::test(start_paused = true)]
    async fn open_sets_connected_and_forwards_messages() {
        let (manager, mut events, _transport, mut accepted) = manager(ReconnectConfig::default());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        manager.connect();
        let mut peer = accepted.recv().await.expect("dialed");
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));
        assert_eq!(manager.status(), ConnectionStatus::Connected);

        peer.send_raw("hello");
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Message("hello".into()))
        );

        let frame = Frame::from(crate::acp::FrameBuilder::cancel("s1"));
        assert!(manager.send(&frame));
        let sent = peer.recv_json().await.expect("frame");
        assert_eq!(sent["method"], "session/cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_is_dropped() {
        let (manager, _events, _transport, _accepted) = manager(ReconnectConfig::default());
        let frame = Frame::from(crate::acp::FrameBuilder::cancel("s1"));
        assert!(!manager.send(&frame));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_close_with_backoff() {
        let (manager, mut events, _transport, mut accepted) = manager(ReconnectConfig::default());
        manager.connect();
        let peer = accepted.recv().await.expect("first dial");
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

        drop(peer);
        assert_eq!(events.recv().await, Some(ConnectionEvent::Closed));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.reconnect_attempts(), 1);
        assert!(!manager.is_exhausted());

        let started = tokio::time::Instant::now();
        let _peer = accepted.recv().await.expect("second dial");
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_suppresses_reconnection() {
        let config = ReconnectConfig::default();
        let max_attempts = config.max_attempts;
        let (manager, mut events, _transport, mut accepted) = manager(config);
        manager.connect();
        let _peer = accepted.recv().await.expect("dial");
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

        manager.disconnect();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Closed));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.reconnect_attempts(), max_attempts);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(accepted.try_recv().is_err());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_socket_is_ignored() {
        let (manager, mut events, _transport, mut accepted) = manager(ReconnectConfig::default());
        manager.connect();
        let stale = accepted.recv().await.expect("first dial");
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

        manager.connect();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Closed));
        let current = accepted.recv().await.expect("second dial");
        assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

        stale.send_raw("from the old socket");
        drop(stale);
        current.send_raw("from the new socket");

        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Message("from the new socket".into()))
        );
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let config = ReconnectConfig {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 2,
        };
        let (manager, mut events, transport, mut accepted) = manager(config);
        // Initial dial plus two retries.
        transport.refuse(3);

        manager.connect();
        assert!(!manager.is_exhausted());
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.reconnect_attempts(), 2);
        assert!(manager.is_exhausted());
        assert!(accepted.try_recv().is_err());
        assert!(events.try_recv().is_err());
    }
}
