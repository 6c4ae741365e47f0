// src/forwarder.rs

use std::sync::Arc;

use tracing::{debug, trace};

use crate::engine::Engine;
use crate::error::Error;
use crate::packet::Packet;
use crate::port::PortId;

/// Per-port packet pump: receive, classify, dispatch, count. One instance
/// runs per forwardable port and owns its ingress port's counters and one
/// packet buffer. It exits when its port is closed.
///
/// Every received packet ends in exactly one counter: sent, dropped,
/// unsupported, err_receive, or err_send.
pub async fn run(engine: Arc<Engine>, ingress: PortId) {
    let port = engine.port(ingress);
    let mut pkt = Packet::new();
    debug!("forwarder started on {}", port.name());

    loop {
        if let Err(e) = port.receive(&mut pkt).await {
            // A closed backend means shutdown; anything else is transient.
            if matches!(e, Error::Closed) {
                break;
            }
            trace!("receive error on {}: {}", port.name(), e);
            port.counters.add_err_receive();
            continue;
        }
        port.counters.add_received();

        if !pkt.is_ipv4() {
            port.counters.add_unsupported();
            continue;
        }

        // One consistent table per decision; reload swaps the whole Arc.
        let action = match engine.rules().await.lookup(&pkt) {
            Some(action) => action,
            None => {
                port.counters.add_dropped();
                continue;
            }
        };

        // An explicit drop is still a match: counted as dropped, never sent.
        if action.egress == PortId::Drop {
            port.counters.add_dropped();
            continue;
        }

        pkt.endpoint = action.endpoint;
        if let Err(e) = engine.port(action.egress).send(&pkt).await {
            trace!(
                "send error {} -> {}: {}",
                port.name(),
                action.egress,
                e
            );
            port.counters.add_err_send();
            continue;
        }
        port.counters.add_sent();
    }

    debug!("forwarder on {} stopped", port.name());
}
