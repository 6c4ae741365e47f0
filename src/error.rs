// src/error.rs

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy of the relay. Configuration and port-init errors are fatal
/// at startup; receive/send errors are absorbed into per-port counters by the
/// forwarder and never propagate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read configuration file '{path}': {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse configuration file '{path}': {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot write configuration file '{path}': {source}")]
    ConfigWrite {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid CIDR '{0}'")]
    Cidr(String),

    #[error("cannot resolve endpoint '{0}'")]
    Endpoint(String),

    #[error("rule index {0} out of bounds")]
    RuleIndex(usize),

    #[error("cannot open TUN device '{name}': {reason}")]
    TunOpen { name: String, reason: String },

    #[error("invalid bind address '{0}', expected IPv4 ip:port")]
    BindAddr(String),

    #[error("cannot bind datagram socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The backend was closed underneath an operation. A forwarder treats
    /// this as the shutdown signal, not as a transient receive error.
    #[error("backend closed")]
    Closed,

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("datagram send without an endpoint")]
    NoEndpoint,

    #[error("cannot install signal handler: {0}")]
    Signal(#[source] io::Error),
}
