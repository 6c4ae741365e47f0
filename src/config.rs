// src/config.rs

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Startup configuration, read once from a JSON file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Name of the local TUN device, e.g. "wl0".
    #[serde(default)]
    pub name: String,
    /// Local bind address for the datagram port, e.g. "0.0.0.0:9000".
    #[serde(default)]
    pub data: String,
    /// Optional control-plane bind address. Accepted and preserved, unused
    /// by the data plane.
    #[serde(default)]
    pub control: String,
    /// Reserved.
    #[serde(default)]
    pub key: String,
    /// Reserved.
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub policy: Vec<PolicyEntry>,
}

/// One uncompiled policy rule as it appears in the configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PolicyEntry {
    /// Source CIDR, empty matches any source.
    #[serde(default)]
    pub src: String,
    /// Destination CIDR, empty matches any destination.
    #[serde(default)]
    pub dst: String,
    /// "LOCAL", "FORWARD", or anything else for drop.
    #[serde(default)]
    pub action: String,
    /// Remote ip:port for FORWARD rules, empty otherwise.
    #[serde(default)]
    pub endpoint: String,
    /// Informational lifetime in seconds. Stored, never enforced.
    #[serde(default)]
    pub ttl: u32,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| Error::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| Error::ConfigParse {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        // Serialization of a plain struct cannot fail; any error here is I/O.
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| Error::ConfigParse {
            path: path.display().to_string(),
            source: e,
        })?;
        std::fs::write(path, bytes).map_err(|e| Error::ConfigWrite {
            path: path.display().to_string(),
            source: e,
        })
    }
}
