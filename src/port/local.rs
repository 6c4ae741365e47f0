// src/port/local.rs

use tokio::sync::RwLock;
use tokio_tun::{Tun, TunBuilder};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::packet::Packet;

/// The local port: a layer-3 TUN device owned by the host kernel. Reads and
/// writes raw IPv4 packets, no Ethernet framing, no packet-info prefix.
pub struct LocalPort {
    device: RwLock<Option<Tun>>,
    closed: CancellationToken,
}

impl LocalPort {
    /// Open the TUN device by name and bring it up.
    pub fn open(name: &str) -> Result<Self> {
        let device = TunBuilder::new()
            .name(name)
            .tap(false)
            .packet_info(false)
            .up()
            .try_build()
            .map_err(|e| Error::TunOpen {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(LocalPort {
            device: RwLock::new(Some(device)),
            closed: CancellationToken::new(),
        })
    }

    /// Release the device. A receive parked on it fails with `Error::Closed`
    /// first, so the write guard is never contested for long. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        self.device.write().await.take();
    }

    pub async fn receive(&self, pkt: &mut Packet) -> Result<()> {
        let guard = self.device.read().await;
        let device = guard.as_ref().ok_or(Error::Closed)?;
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::Closed),
            res = device.recv(pkt.buffer_mut()) => {
                let n = res.map_err(Error::Receive)?;
                pkt.set_len(n);
                // No meaningful peer on the host side.
                pkt.endpoint = None;
                Ok(())
            }
        }
    }

    pub async fn send(&self, pkt: &Packet) -> Result<()> {
        let guard = self.device.read().await;
        let device = guard.as_ref().ok_or(Error::Closed)?;
        device.send(pkt.payload()).await.map_err(Error::Send)?;
        Ok(())
    }
}
