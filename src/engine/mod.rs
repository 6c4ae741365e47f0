// src/engine/mod.rs

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::control::{self, Command};
use crate::error::{Error, Result};
use crate::forwarder;
use crate::policy::PolicyTable;
use crate::port::{Backend, LocalPort, Port, PortId, SinkPort, TunnelPort, PORT_COUNT};

/// The top-level composition: the fixed port array and the shared policy
/// table. Ports are created once at init and closed at shutdown; the table
/// is read-mostly and only ever replaced wholesale.
pub struct Engine {
    config: Config,
    config_path: Option<PathBuf>,
    ports: [Port; PORT_COUNT],
    rules: RwLock<Arc<PolicyTable>>,
}

impl Engine {
    /// Open the three ports in order and compile the rule table, strictly:
    /// any port init failure or bad rule is fatal here.
    pub async fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let local = LocalPort::open(&config.name)?;
        let tunnel = TunnelPort::bind(&config.data).await?;
        let ports = [
            Port::new(PortId::Local, Backend::Local(local)),
            Port::new(PortId::Tunnel, Backend::Tunnel(tunnel)),
            Port::new(PortId::Drop, Backend::Sink(SinkPort::new())),
        ];
        let rules = PolicyTable::compile(&config.policy)?;
        Ok(Self::assemble(config, config_path, ports, rules))
    }

    /// Wire an engine from already-built parts. `ports` must be indexed by
    /// `PortId`. This is the seam the tests use to substitute loopback
    /// backends for the privileged TUN device.
    pub fn assemble(
        config: Config,
        config_path: Option<PathBuf>,
        ports: [Port; PORT_COUNT],
        rules: PolicyTable,
    ) -> Self {
        debug_assert!(PortId::ALL.iter().all(|id| ports[id.index()].id() == *id));
        Engine {
            config,
            config_path,
            ports,
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id.index()]
    }

    pub fn ports(&self) -> &[Port; PORT_COUNT] {
        &self.ports
    }

    /// Snapshot of the current rule table. The read guard is held only long
    /// enough to clone the `Arc`, so a forwarding decision observes one
    /// consistent table and reload never blocks behind the fast path.
    pub async fn rules(&self) -> Arc<PolicyTable> {
        self.rules.read().await.clone()
    }

    /// Replace the rule table atomically. In-flight decisions keep the
    /// snapshot they already hold.
    pub async fn install_rules(&self, table: PolicyTable) {
        *self.rules.write().await = Arc::new(table);
    }

    /// Re-read the configuration file and swap in a permissively recompiled
    /// table. Ports are untouched. A config that fails to load aborts the
    /// reload and keeps the current table.
    pub async fn reload(&self) -> Result<()> {
        let path = match &self.config_path {
            Some(path) => path,
            None => {
                warn!("no configuration file to reload from");
                return Ok(());
            }
        };
        let config = Config::load(path)?;
        let table = PolicyTable::compile_permissive(&config.policy);
        let total = config.policy.len();
        let kept = table.len();
        self.install_rules(table).await;
        info!(
            "reloaded policy from {}: {} of {} rules installed",
            path.display(),
            kept,
            total
        );
        Ok(())
    }

    pub fn dump_counters(&self) {
        info!("engine counters:");
        for port in &self.ports {
            let c = port.counters.snapshot();
            info!(
                "  {}: received={} sent={} dropped={} unsupported={} err_receive={} err_send={}",
                port.name(),
                c.received,
                c.sent,
                c.dropped,
                c.unsupported,
                c.err_receive,
                c.err_send,
            );
        }
    }

    pub async fn dump_rules(&self) {
        let rules = self.rules().await;
        info!("policy table ({} rules):", rules.len());
        for line in rules.dump() {
            info!("  {}", line);
        }
    }

    /// React to one control command. Returns true when the engine should
    /// shut down.
    pub async fn handle_command(&self, cmd: Command) -> bool {
        match cmd {
            Command::DumpCounters => self.dump_counters(),
            Command::DumpRules => self.dump_rules().await,
            Command::Reload => {
                if let Err(e) = self.reload().await {
                    warn!("reload failed, keeping current rules: {}", e);
                }
            }
            Command::Shutdown => return true,
        }
        false
    }

    /// Close every port. In-flight receives fail with a closed-backend
    /// error, which is what ends each forwarder loop. Idempotent.
    pub async fn shutdown(&self) {
        for port in &self.ports {
            port.close().await;
        }
    }

    /// Start one forwarder per forwardable port and run the control loop
    /// until a shutdown command arrives, then close the ports and join all
    /// forwarders.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut workers = Vec::new();
        for id in PortId::ALL {
            if id.is_forwardable() {
                workers.push(tokio::spawn(forwarder::run(self.clone(), id)));
            }
        }

        let mut commands = control::spawn_signal_watcher().map_err(Error::Signal)?;
        info!(
            "relay running: device '{}', datagram port {}",
            self.config.name, self.config.data
        );

        while let Some(cmd) = commands.recv().await {
            if self.handle_command(cmd).await {
                break;
            }
        }

        info!("shutting down");
        self.shutdown().await;
        for worker in workers {
            let _ = worker.await;
        }
        info!("relay stopped");
        Ok(())
    }
}
