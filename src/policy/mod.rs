// src/policy/mod.rs

use std::net::{SocketAddr, ToSocketAddrs};

use ipnet::Ipv4Net;
use tracing::warn;

use crate::config::PolicyEntry;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::port::PortId;

/// What to do with a matched packet: which port it leaves on, and for the
/// tunnel port, which peer it goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub egress: PortId,
    pub endpoint: Option<SocketAddr>,
}

/// One compiled rule: an optional source/destination CIDR pair and an
/// action. An absent side matches any address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub src: Option<Ipv4Net>,
    pub dst: Option<Ipv4Net>,
    pub action: Action,
    /// Lifetime in seconds as given in the configuration. Reserved: stored
    /// and dumped, never used to evict.
    pub ttl: u32,
}

impl Rule {
    fn matches(&self, pkt: &Packet) -> bool {
        if let Some(dst) = &self.dst {
            if !dst.contains(&pkt.dst_ipv4()) {
                return false;
            }
        }
        if let Some(src) = &self.src {
            if !src.contains(&pkt.src_ipv4()) {
                return false;
            }
        }
        true
    }
}

/// Ordered rule table, first match wins. Compiled once from configuration
/// and treated as immutable by the forwarders; reload builds a whole new
/// table and swaps it in.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    rules: Vec<Rule>,
}

impl PolicyTable {
    pub fn new() -> Self {
        PolicyTable::default()
    }

    /// Compile a batch of configuration entries, all-or-nothing: the first
    /// bad entry aborts and the error names it.
    pub fn compile(entries: &[PolicyEntry]) -> Result<Self> {
        let mut table = PolicyTable::new();
        for entry in entries {
            table.append(compile_one(entry)?);
        }
        Ok(table)
    }

    /// Compile a batch, skipping entries that fail to compile. Used at
    /// reload so one bad rule cannot take down a running node.
    pub fn compile_permissive(entries: &[PolicyEntry]) -> Self {
        let mut table = PolicyTable::new();
        for entry in entries {
            match compile_one(entry) {
                Ok(rule) => table.append(rule),
                Err(e) => warn!("skipping policy entry: {}", e),
            }
        }
        table
    }

    /// First matching action in compiled order, or `None` on a miss.
    pub fn lookup(&self, pkt: &Packet) -> Option<Action> {
        self.rules.iter().find(|r| r.matches(pkt)).map(|r| r.action)
    }

    pub fn append(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn replace(&mut self, index: usize, rule: Rule) -> Result<()> {
        if index >= self.rules.len() {
            return Err(Error::RuleIndex(index));
        }
        self.rules[index] = rule;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Rule> {
        if index >= self.rules.len() {
            return Err(Error::RuleIndex(index));
        }
        Ok(self.rules.remove(index))
    }

    pub fn flush(&mut self) {
        self.rules.clear();
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// One display line per rule:
    /// `[i] <src|*> <dst|*> ==> <egress> [<endpoint>] [ttl=<n>]`.
    pub fn dump(&self) -> Vec<String> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                let mut line = format!(
                    "[{}] {} {} ==> {}",
                    i,
                    rule.src.map_or("*".to_string(), |n| n.to_string()),
                    rule.dst.map_or("*".to_string(), |n| n.to_string()),
                    action_name(rule.action.egress),
                );
                if let Some(endpoint) = rule.action.endpoint {
                    line.push_str(&format!(" {}", endpoint));
                }
                if rule.ttl > 0 {
                    line.push_str(&format!(" ttl={}", rule.ttl));
                }
                line
            })
            .collect()
    }

    /// The table as configuration entries, suitable for recompilation or
    /// write-back. `compile(to_entries())` is lookup-equivalent to `self`.
    pub fn to_entries(&self) -> Vec<PolicyEntry> {
        self.rules
            .iter()
            .map(|rule| PolicyEntry {
                src: rule.src.map_or(String::new(), |n| n.to_string()),
                dst: rule.dst.map_or(String::new(), |n| n.to_string()),
                action: action_name(rule.action.egress).to_string(),
                endpoint: rule
                    .action
                    .endpoint
                    .map_or(String::new(), |e| e.to_string()),
                ttl: rule.ttl,
            })
            .collect()
    }
}

/// Compile a single configuration entry into a rule. This is also the entry
/// point a control plane would use to add rules incrementally.
pub fn compile_one(entry: &PolicyEntry) -> Result<Rule> {
    let dst = if entry.dst.is_empty() {
        None
    } else {
        Some(parse_cidr(&entry.dst)?)
    };
    let src = if entry.src.is_empty() {
        None
    } else {
        Some(parse_cidr(&entry.src)?)
    };
    let endpoint = if entry.endpoint.is_empty() {
        None
    } else {
        Some(resolve_endpoint(&entry.endpoint)?)
    };
    Ok(Rule {
        src,
        dst,
        action: Action {
            egress: parse_action(&entry.action),
            endpoint,
        },
        ttl: entry.ttl,
    })
}

fn parse_cidr(s: &str) -> Result<Ipv4Net> {
    s.parse::<Ipv4Net>().map_err(|_| Error::Cidr(s.to_string()))
}

/// Resolve "ip:port" (or "host:port") to an IPv4 datagram address.
fn resolve_endpoint(s: &str) -> Result<SocketAddr> {
    s.to_socket_addrs()
        .map_err(|_| Error::Endpoint(s.to_string()))?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| Error::Endpoint(s.to_string()))
}

/// Textual action to egress port. Unknown actions drop.
fn parse_action(s: &str) -> PortId {
    match s {
        "LOCAL" => PortId::Local,
        "FORWARD" => PortId::Tunnel,
        _ => PortId::Drop,
    }
}

/// Action vocabulary for dump and write-back, the inverse of `parse_action`.
fn action_name(egress: PortId) -> &'static str {
    match egress {
        PortId::Local => "LOCAL",
        PortId::Tunnel => "FORWARD",
        PortId::Drop => "DROP",
    }
}
