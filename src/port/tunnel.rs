// src/port/tunnel.rs

use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::packet::Packet;

/// The tunnel port: a bound UDP socket that receives from any peer and sends
/// to the endpoint annotated on the packet. IPv4 only.
#[derive(Debug)]
pub struct TunnelPort {
    socket: RwLock<Option<UdpSocket>>,
    closed: CancellationToken,
    local: SocketAddr,
}

impl TunnelPort {
    /// Resolve `addr` ("ip:port") and bind the datagram socket on it.
    pub async fn bind(addr: &str) -> Result<Self> {
        let requested: SocketAddrV4 =
            addr.parse().map_err(|_| Error::BindAddr(addr.to_string()))?;
        let socket = UdpSocket::bind(SocketAddr::V4(requested))
            .await
            .map_err(|e| Error::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let local = socket.local_addr().map_err(|e| Error::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        Ok(TunnelPort {
            socket: RwLock::new(Some(socket)),
            closed: CancellationToken::new(),
            local,
        })
    }

    /// The actual bound address. Useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Release the socket. A receive parked on it fails with `Error::Closed`
    /// first, so the write guard is never contested for long. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        self.socket.write().await.take();
    }

    pub async fn receive(&self, pkt: &mut Packet) -> Result<()> {
        let guard = self.socket.read().await;
        let socket = guard.as_ref().ok_or(Error::Closed)?;
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::Closed),
            res = socket.recv_from(pkt.buffer_mut()) => {
                let (n, peer) = res.map_err(Error::Receive)?;
                pkt.set_len(n);
                pkt.endpoint = Some(peer);
                Ok(())
            }
        }
    }

    /// Send to the annotated endpoint. A packet without one cannot leave
    /// through a datagram socket.
    pub async fn send(&self, pkt: &Packet) -> Result<()> {
        let guard = self.socket.read().await;
        let socket = guard.as_ref().ok_or(Error::Closed)?;
        let endpoint = pkt.endpoint.ok_or(Error::NoEndpoint)?;
        socket
            .send_to(pkt.payload(), endpoint)
            .await
            .map_err(Error::Send)?;
        Ok(())
    }
}
