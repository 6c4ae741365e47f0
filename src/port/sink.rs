// src/port/sink.rs

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::packet::Packet;

/// The drop port. Sends are silently discarded; receive parks until the
/// port is closed, and the engine never starts a forwarder here.
#[derive(Default)]
pub struct SinkPort {
    closed: CancellationToken,
}

impl SinkPort {
    pub fn new() -> Self {
        SinkPort::default()
    }

    /// Nothing to release; only unparks a parked receive. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
    }

    pub async fn receive(&self, _pkt: &mut Packet) -> Result<()> {
        self.closed.cancelled().await;
        Err(Error::Closed)
    }

    pub async fn send(&self, _pkt: &Packet) -> Result<()> {
        Ok(())
    }
}
