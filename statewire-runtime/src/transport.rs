//! UDP transport.
//!
//! One socket, one fixed peer. Status messages are sent fire-and-forget;
//! inbound datagrams are parsed into [`InboundMessage`]s.
//!
//! Outbound datagrams go through a queue. [`Transport::send`] writes as much
//! of it as the socket accepts without blocking; whatever is left stays
//! queued until [`Transport::writable`] completes and the owner calls
//! [`Transport::flush`] again. Messages leave in the order they were sent
//! and none is lost to a socket that was momentarily not writable.
//!
//! The waiting methods take `&self`, so one loop can wait for writability
//! and for inbound datagrams at the same time.

use crate::error::TransportError;
use statewire_protocol::{Decoder, Encoder, InboundMessage, OutboundMessage};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// UDP channel to the observer.
#[derive(Debug)]
pub struct Transport {
    socket: Option<UdpSocket>,
    peer: SocketAddr,
    receiving: bool,
    outbound: VecDeque<Vec<u8>>,
}

impl Transport {
    /// Binds the local socket and resolves the peer.
    ///
    /// Returns once the socket is writable, so the first status message can
    /// go out immediately.
    pub async fn initialize(
        bind_host: &str,
        listen_port: u16,
        peer_host: &str,
        peer_port: u16,
    ) -> Result<Self, TransportError> {
        let bind_addr = format!("{}:{}", bind_host, listen_port);
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local = socket.local_addr().map_err(|source| TransportError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;

        let peer = resolve_peer(peer_host, peer_port, local).await?;

        socket
            .writable()
            .await
            .map_err(|source| TransportError::Send { peer, source })?;
        tracing::info!(local = %local, peer = %peer, "Transport initialized");

        Ok(Self {
            socket: Some(socket),
            peer,
            receiving: false,
            outbound: VecDeque::new(),
        })
    }

    /// Queues one status message and writes out what the socket accepts.
    /// A no-op after shutdown.
    pub fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.socket.is_none() {
            return Ok(());
        }
        tracing::debug!(peer = %self.peer, message = %message, "Sending");
        self.outbound.push_back(Encoder::encode_outbound(message));
        self.flush()
    }

    /// Writes queued datagrams until the queue is empty or the socket would
    /// block. A datagram the socket rejects outright is dropped and its
    /// error returned; the rest stay queued.
    pub fn flush(&mut self) -> Result<(), TransportError> {
        let Some(socket) = self.socket.as_ref() else {
            self.outbound.clear();
            return Ok(());
        };

        while let Some(datagram) = self.outbound.front() {
            match socket.try_send_to(datagram, self.peer) {
                Ok(_) => {
                    self.outbound.pop_front();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(source) => {
                    self.outbound.pop_front();
                    return Err(TransportError::Send {
                        peer: self.peer,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Waits until queued datagrams can be written.
    ///
    /// Pends forever while nothing is queued or after shutdown. Cancel safe.
    pub async fn writable(&self) -> Result<(), TransportError> {
        let Some(socket) = self.socket.as_ref().filter(|_| !self.outbound.is_empty()) else {
            return std::future::pending().await;
        };

        socket
            .writable()
            .await
            .map_err(|source| TransportError::Send {
                peer: self.peer,
                source,
            })
    }

    /// Number of datagrams waiting for the socket.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Enables [`recv`](Self::recv).
    pub fn start_receive(&mut self) {
        self.receiving = true;
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving && self.socket.is_some()
    }

    /// Waits for the next inbound message, using `buf` for the datagram.
    /// `buf` should hold `MAX_DATAGRAM_SIZE` bytes; longer datagrams are
    /// truncated.
    ///
    /// Pends forever before [`start_receive`](Self::start_receive) and after
    /// [`shutdown`](Self::shutdown). Cancel safe.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<InboundMessage, TransportError> {
        let Some(socket) = self.socket.as_ref().filter(|_| self.receiving) else {
            return std::future::pending().await;
        };

        let (len, from) = socket
            .recv_from(buf)
            .await
            .map_err(TransportError::Recv)?;
        tracing::debug!(from = %from, bytes = len, "Received datagram");

        Ok(Decoder::decode_inbound(&buf[..len])?)
    }

    /// Closes the socket after a last non-blocking flush. Idempotent.
    pub fn shutdown(&mut self) {
        self.receiving = false;
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Failed to flush before close");
        }
        if !self.outbound.is_empty() {
            tracing::warn!(dropped = self.outbound.len(), "Closing with unsent messages");
            self.outbound.clear();
        }
        if self.socket.take().is_some() {
            tracing::info!("Transport closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Local address, `None` after shutdown.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// Resolves the peer, preferring an address of the local socket's family.
async fn resolve_peer(
    host: &str,
    port: u16,
    local: SocketAddr,
) -> Result<SocketAddr, TransportError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4() == local.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TransportError::NoAddress {
            host: host.to_string(),
        })
}
