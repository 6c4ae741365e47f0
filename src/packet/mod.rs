// src/packet/mod.rs

use std::net::{Ipv4Addr, SocketAddr};

/// Capacity of a packet buffer. Comfortably above the usual 1500-byte MTU so
/// a single receive always fits a whole tunnel datagram.
pub const BUFFER_SIZE: usize = 2000;

/// Minimum length of a parseable IPv4 header.
pub const IPV4_HEADER_LEN: usize = 20;

/// A reusable packet buffer. Each forwarder owns exactly one for its whole
/// lifetime; receive rewrites `len` and `endpoint`, send reads `payload()`.
#[derive(Debug)]
pub struct Packet {
    data: Vec<u8>,
    len: usize,
    /// Remote datagram address. On receive from the tunnel port this is the
    /// sender; on send via the tunnel port it is the destination. The local
    /// TUN port ignores it.
    pub endpoint: Option<SocketAddr>,
}

impl Packet {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Packet {
            data: vec![0u8; capacity],
            len: 0,
            endpoint: None,
        }
    }

    /// The whole underlying buffer, for a backend to receive into.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record how many bytes of the buffer the last receive filled.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.len = len;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The in-flight packet bytes, no framing prefix.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy `bytes` into the buffer and set the length accordingly.
    /// Panics if `bytes` exceeds the buffer capacity.
    pub fn fill(&mut self, bytes: &[u8]) {
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
    }

    /// True when the buffer holds at least a full IPv4 header and the
    /// version nibble says 4. Anything else is unsupported.
    pub fn is_ipv4(&self) -> bool {
        self.len >= IPV4_HEADER_LEN && (self.data[0] >> 4) == 4
    }

    /// Source address of the IPv4 header. Callers check `is_ipv4` first.
    pub fn src_ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[12], self.data[13], self.data[14], self.data[15])
    }

    /// Destination address of the IPv4 header. Callers check `is_ipv4` first.
    pub fn dst_ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[16], self.data[17], self.data[18], self.data[19])
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}
