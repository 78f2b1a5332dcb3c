//! UDP Transport Loop
//!
//! Owns the socket and nothing else. A background task alternates between
//! draining one queued outgoing datagram and a short timed receive, so a
//! silent peer never blocks sending and a busy peer never starves the
//! queue. All parsing and session logic lives in [`super::session`].
//!
//! Peers find each other either over a multicast group (LAN discovery)
//! or a directly configured address. Pausing leaves the multicast group
//! while keeping the socket bound, so resuming does not race another
//! process for the port.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Default game port.
pub const DEFAULT_PORT: u16 = 5500;
/// Default multicast group.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(225, 0, 0, 15);
/// Receive timeout per loop iteration.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);
/// Largest datagram we ever produce is a field snapshot; anything bigger
/// is foreign traffic.
const RECV_BUFFER: usize = 256;

/// How the peer is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerMode {
    /// Send to a multicast group and accept whoever answers.
    Multicast(Ipv4Addr),
    /// Send to one known address.
    Unicast(SocketAddr),
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Local bind address.
    pub bind_addr: SocketAddr,
    /// Peer discovery mode.
    pub mode: PeerMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            mode: PeerMode::Multicast(MULTICAST_GROUP),
        }
    }
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the socket.
    #[error("failed to bind UDP socket: {0}")]
    Bind(std::io::Error),

    /// Failed to join or leave the multicast group.
    #[error("multicast membership change failed: {0}")]
    Multicast(std::io::Error),

    /// Send or receive failed.
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The background task is gone.
    #[error("transport task closed")]
    Closed,
}

/// Control messages for the background task.
#[derive(Debug)]
enum Command {
    /// Leave the multicast group and discard traffic, keeping the socket.
    Pause,
    /// Rejoin and resume forwarding.
    Resume,
    /// Stop the task.
    Shutdown,
}

/// Handle to a running transport task.
pub struct TransportHandle {
    outgoing: mpsc::Sender<Vec<u8>>,
    incoming: mpsc::Receiver<(Vec<u8>, SocketAddr)>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<Result<(), TransportError>>,
}

impl TransportHandle {
    /// Queue one datagram for the peer.
    pub async fn send(&self, datagram: Vec<u8>) -> Result<(), TransportError> {
        self.outgoing
            .send(datagram)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next received datagram with its source address.
    pub async fn recv(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.incoming.recv().await
    }

    /// Next received datagram, or `None` after `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<(Vec<u8>, SocketAddr)> {
        timeout(wait, self.incoming.recv()).await.ok().flatten()
    }

    /// Stop listening without releasing the port.
    pub async fn pause(&self) -> Result<(), TransportError> {
        self.commands
            .send(Command::Pause)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Resume after [`pause`](Self::pause).
    pub async fn resume(&self) -> Result<(), TransportError> {
        self.commands
            .send(Command::Resume)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) -> Result<(), TransportError> {
        // The task may already be gone; join either way.
        let _ = self.commands.send(Command::Shutdown).await;
        match self.task.await {
            Ok(result) => result,
            Err(join) => {
                warn!("transport task panicked: {join}");
                Err(TransportError::Closed)
            }
        }
    }
}

/// A bound, not yet running, UDP transport.
pub struct UdpTransport {
    socket: UdpSocket,
    config: TransportConfig,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Bind the socket and join the multicast group if configured.
    pub async fn bind(config: TransportConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(TransportError::Bind)?;

        let destination = match config.mode {
            PeerMode::Multicast(group) => {
                socket
                    .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                    .map_err(TransportError::Multicast)?;
                SocketAddr::from((group, config.bind_addr.port()))
            }
            PeerMode::Unicast(peer) => peer,
        };

        info!(
            local = %socket.local_addr()?,
            peer = %destination,
            "transport bound"
        );

        Ok(Self {
            socket,
            config,
            destination,
        })
    }

    /// Local socket address, useful when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Point future sends at a specific peer, replacing the configured
    /// destination. Useful once a multicast-discovered peer is known.
    pub fn set_destination(&mut self, peer: SocketAddr) {
        self.destination = peer;
    }

    /// Spawn the send/receive loop and return its handle.
    pub fn spawn(self) -> TransportHandle {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Vec<u8>>(64);
        let (incoming_tx, incoming_rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(64);
        let (command_tx, command_rx) = mpsc::channel::<Command>(8);

        let task = tokio::spawn(self.run(outgoing_rx, incoming_tx, command_rx));

        TransportHandle {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
            commands: command_tx,
            task,
        }
    }

    async fn run(
        self,
        mut outgoing: mpsc::Receiver<Vec<u8>>,
        incoming: mpsc::Sender<(Vec<u8>, SocketAddr)>,
        mut commands: mpsc::Receiver<Command>,
    ) -> Result<(), TransportError> {
        // One spare byte so an oversize datagram shows up as too long
        // instead of arriving silently truncated.
        let mut buf = [0u8; RECV_BUFFER + 1];
        let mut paused = false;

        loop {
            match commands.try_recv() {
                Ok(Command::Pause) => {
                    if !paused {
                        if let PeerMode::Multicast(group) = self.config.mode {
                            self.socket
                                .leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                                .map_err(TransportError::Multicast)?;
                        }
                        paused = true;
                        debug!("transport paused");
                    }
                }
                Ok(Command::Resume) => {
                    if paused {
                        if let PeerMode::Multicast(group) = self.config.mode {
                            // Rejoining a group we are somehow still in is
                            // not worth failing over.
                            if let Err(e) =
                                self.socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                            {
                                debug!("multicast rejoin: {e}");
                            }
                        }
                        paused = false;
                        debug!("transport resumed");
                    }
                }
                Ok(Command::Shutdown) => {
                    debug!("transport shutting down");
                    return Ok(());
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => return Ok(()),
            }

            // At most one datagram out per iteration.
            if !paused {
                if let Ok(datagram) = outgoing.try_recv() {
                    #[cfg(feature = "debug-tracing")]
                    trace!(bytes = %hex::encode(&datagram), "tx");
                    self.socket.send_to(&datagram, self.destination).await?;
                }
            }

            // One timed receive; timing out is the idle path.
            match timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    if paused {
                        continue;
                    }
                    if len > RECV_BUFFER {
                        debug!(len, "oversize datagram discarded");
                        continue;
                    }
                    #[cfg(feature = "debug-tracing")]
                    trace!(bytes = %hex::encode(&buf[..len]), %from, "rx");
                    if incoming.send((buf[..len].to_vec(), from)).await.is_err() {
                        // Receiver dropped the handle.
                        return Ok(());
                    }
                }
                Ok(Err(e)) => {
                    // A refused unicast peer surfaces here on some
                    // platforms; the retransmit layer absorbs the gap.
                    trace!("recv error: {e}");
                }
                Err(_elapsed) => {}
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{Datagram, PlayerStatus};

    async fn unicast_pair() -> (TransportHandle, TransportHandle) {
        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let a = UdpTransport::bind(TransportConfig {
            bind_addr: loopback,
            mode: PeerMode::Unicast(loopback),
        })
        .await
        .unwrap();
        let b = UdpTransport::bind(TransportConfig {
            bind_addr: loopback,
            mode: PeerMode::Unicast(a.local_addr().unwrap()),
        })
        .await
        .unwrap();

        // Point a at b now that b's port exists.
        let mut a = a;
        a.set_destination(b.local_addr().unwrap());
        (a.spawn(), b.spawn())
    }

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.mode, PeerMode::Multicast(MULTICAST_GROUP));
    }

    #[tokio::test]
    async fn test_unicast_roundtrip() {
        let (a, mut b) = unicast_pair().await;

        let status = PlayerStatus {
            player_id: 1,
            protocol_version: 1,
            local_seq: 5,
            ..Default::default()
        };
        a.send(Datagram::Status(status).encode(3)).await.unwrap();

        let (bytes, _from) = b
            .recv_timeout(Duration::from_secs(2))
            .await
            .expect("datagram should arrive on loopback");
        let (game_id, decoded) = Datagram::decode(&bytes).unwrap();
        assert_eq!(game_id, 3);
        assert_eq!(decoded, Datagram::Status(status));

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_discards_traffic() {
        let (a, mut b) = unicast_pair().await;

        b.pause().await.unwrap();
        // Give the loop a beat to apply the command.
        tokio::time::sleep(Duration::from_millis(150)).await;

        a.send(Datagram::Status(PlayerStatus::default()).encode(0))
            .await
            .unwrap();
        assert!(b.recv_timeout(Duration::from_millis(400)).await.is_none());

        b.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        a.send(Datagram::Status(PlayerStatus::default()).encode(0))
            .await
            .unwrap();
        assert!(b.recv_timeout(Duration::from_secs(2)).await.is_some());

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversize_datagram_discarded() {
        let (a, mut b) = unicast_pair().await;

        a.send(vec![0u8; 300]).await.unwrap();
        assert!(b.recv_timeout(Duration::from_millis(400)).await.is_none());

        // Regular traffic still gets through afterwards.
        a.send(Datagram::Status(PlayerStatus::default()).encode(0))
            .await
            .unwrap();
        assert!(b.recv_timeout(Duration::from_secs(2)).await.is_some());

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_joins_cleanly() {
        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let transport = UdpTransport::bind(TransportConfig {
            bind_addr: loopback,
            mode: PeerMode::Unicast(SocketAddr::from((Ipv4Addr::LOCALHOST, 9))),
        })
        .await
        .unwrap();

        let handle = transport.spawn();
        handle.shutdown().await.unwrap();
    }
}
