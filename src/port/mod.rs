// src/port/mod.rs

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Result;
use crate::packet::Packet;

pub mod local;
pub mod sink;
pub mod tunnel;

pub use local::LocalPort;
pub use sink::SinkPort;
pub use tunnel::TunnelPort;

/// Number of ports the engine owns. The identifier doubles as the index
/// into the engine's port array and as the egress field of policy actions.
pub const PORT_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PortId {
    /// The OS tunnel device carrying host traffic.
    Local = 0,
    /// The bound datagram socket carrying encapsulated peer traffic.
    Tunnel = 1,
    /// The sink; sends are discarded, no forwarder runs here.
    Drop = 2,
}

impl PortId {
    pub const ALL: [PortId; PORT_COUNT] = [PortId::Local, PortId::Tunnel, PortId::Drop];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PortId::Local => "LOCAL",
            PortId::Tunnel => "TUNNEL",
            PortId::Drop => "DROP",
        }
    }

    /// Ports the engine starts a forwarder on.
    pub fn is_forwardable(self) -> bool {
        !matches!(self, PortId::Drop)
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-port counter block. Single writer (the forwarder owning the port's
/// ingress), any number of readers. Relaxed atomics are enough; readers
/// tolerate slightly stale values.
#[derive(Debug, Default)]
pub struct Counters {
    received: AtomicU32,
    sent: AtomicU32,
    dropped: AtomicU32,
    err_receive: AtomicU32,
    err_send: AtomicU32,
    unsupported: AtomicU32,
}

/// A point-in-time copy of a counter block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub received: u32,
    pub sent: u32,
    pub dropped: u32,
    pub err_receive: u32,
    pub err_send: u32,
    pub unsupported: u32,
}

impl Counters {
    pub fn add_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_err_receive(&self) {
        self.err_receive.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_err_send(&self) {
        self.err_send.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unsupported(&self) {
        self.unsupported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            err_receive: self.err_receive.load(Ordering::Relaxed),
            err_send: self.err_send.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
        }
    }
}

/// The concrete packet carrier behind a port. The set is closed, so a tagged
/// enum with explicit dispatch beats a trait object here.
pub enum Backend {
    Local(LocalPort),
    Tunnel(TunnelPort),
    Sink(SinkPort),
}

impl Backend {
    /// Block until a packet is available and fill `pkt` with it.
    pub async fn receive(&self, pkt: &mut Packet) -> Result<()> {
        match self {
            Backend::Local(p) => p.receive(pkt).await,
            Backend::Tunnel(p) => p.receive(pkt).await,
            Backend::Sink(p) => p.receive(pkt).await,
        }
    }

    /// Transmit `pkt.payload()`.
    pub async fn send(&self, pkt: &Packet) -> Result<()> {
        match self {
            Backend::Local(p) => p.send(pkt).await,
            Backend::Tunnel(p) => p.send(pkt).await,
            Backend::Sink(p) => p.send(pkt).await,
        }
    }

    /// Release the underlying resource. A receive parked on the backend
    /// fails with `Error::Closed`. Idempotent.
    pub async fn close(&self) {
        match self {
            Backend::Local(p) => p.close().await,
            Backend::Tunnel(p) => p.close().await,
            Backend::Sink(p) => p.close().await,
        }
    }
}

/// A port: one packet carrier plus its counter block.
pub struct Port {
    id: PortId,
    backend: Backend,
    pub counters: Counters,
}

impl Port {
    pub fn new(id: PortId, backend: Backend) -> Self {
        Port {
            id,
            backend,
            counters: Counters::default(),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub async fn receive(&self, pkt: &mut Packet) -> Result<()> {
        self.backend.receive(pkt).await
    }

    pub async fn send(&self, pkt: &Packet) -> Result<()> {
        self.backend.send(pkt).await
    }

    pub async fn close(&self) {
        self.backend.close().await
    }
}
