use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use tunrelay::config::{Config, PolicyEntry};
use tunrelay::engine::Engine;
use tunrelay::forwarder;
use tunrelay::policy::PolicyTable;
use tunrelay::port::{Backend, CounterSnapshot, Port, PortId, SinkPort, TunnelPort};

fn ipv4_packet(src: [u8; 4], dst: [u8; 4], total_len: usize) -> Vec<u8> {
    assert!(total_len >= 20);
    let mut raw = vec![0u8; total_len];
    raw[0] = 0x45;
    raw[8] = 64; // TTL
    raw[9] = 17; // UDP
    raw[12..16].copy_from_slice(&src);
    raw[16..20].copy_from_slice(&dst);
    raw
}

fn entry(src: &str, dst: &str, action: &str, endpoint: &str) -> PolicyEntry {
    PolicyEntry {
        src: src.to_string(),
        dst: dst.to_string(),
        action: action.to_string(),
        endpoint: endpoint.to_string(),
        ttl: 0,
    }
}

/// Engine whose LOCAL and TUNNEL slots are loopback UDP backends, so packet
/// flow is observable without a privileged TUN device.
async fn test_engine(entries: Vec<PolicyEntry>) -> (Arc<Engine>, SocketAddr, SocketAddr) {
    let local = TunnelPort::bind("127.0.0.1:0").await.expect("bind local");
    let local_addr = local.local_addr();
    let tunnel = TunnelPort::bind("127.0.0.1:0").await.expect("bind tunnel");
    let tunnel_addr = tunnel.local_addr();

    let ports = [
        Port::new(PortId::Local, Backend::Tunnel(local)),
        Port::new(PortId::Tunnel, Backend::Tunnel(tunnel)),
        Port::new(PortId::Drop, Backend::Sink(SinkPort::new())),
    ];
    let rules = PolicyTable::compile(&entries).expect("compile");
    let config = Config {
        name: "test0".to_string(),
        data: "127.0.0.1:0".to_string(),
        control: String::new(),
        key: String::new(),
        pubkey: String::new(),
        policy: entries,
    };
    let engine = Arc::new(Engine::assemble(config, None, ports, rules));
    (engine, local_addr, tunnel_addr)
}

/// Poll the ingress counters until `check` passes or two seconds elapse.
async fn wait_for_counters<F>(engine: &Engine, ingress: PortId, check: F) -> CounterSnapshot
where
    F: Fn(&CounterSnapshot) -> bool,
{
    for _ in 0..100 {
        let snapshot = engine.port(ingress).counters.snapshot();
        if check(&snapshot) {
            return snapshot;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "counters never converged: {:?}",
        engine.port(ingress).counters.snapshot()
    );
}

#[tokio::test]
async fn test_forward_to_specific_peer() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.expect("peer");
    let peer_addr = peer.local_addr().expect("peer addr");

    let (engine, local_addr, _) = test_engine(vec![entry(
        "",
        "10.0.0.0/24",
        "FORWARD",
        &peer_addr.to_string(),
    )])
    .await;
    let worker = tokio::spawn(forwarder::run(
        engine.clone(),
        PortId::Local,
    ));

    let injector = UdpSocket::bind("127.0.0.1:0").await.expect("injector");
    let raw = ipv4_packet([10, 0, 0, 7], [10, 0, 0, 9], 100);
    injector.send_to(&raw, local_addr).await.expect("inject");

    // The peer gets the packet byte for byte.
    let mut buf = [0u8; 2000];
    let (n, _) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .expect("timely")
        .expect("recv");
    assert_eq!(&buf[..n], &raw[..]);

    let c = wait_for_counters(&engine, PortId::Local, |c| c.sent == 1).await;
    assert_eq!(c.received, 1);
    assert_eq!(c.dropped, 0);

    engine.shutdown().await;
    worker.await.expect("join");
}

#[tokio::test]
async fn test_deliver_to_local_egress() {
    // Stand-in for decapsulation: traffic arriving on the tunnel port is
    // matched to the LOCAL egress. The loopback backend in the local slot
    // needs an endpoint to make the write observable.
    let host = UdpSocket::bind("127.0.0.1:0").await.expect("host");
    let host_addr = host.local_addr().expect("host addr");

    let (engine, _, tunnel_addr) = test_engine(vec![entry(
        "",
        "192.168.50.0/24",
        "LOCAL",
        &host_addr.to_string(),
    )])
    .await;
    let worker = tokio::spawn(forwarder::run(
        engine.clone(),
        PortId::Tunnel,
    ));

    let remote_peer = UdpSocket::bind("127.0.0.1:0").await.expect("remote peer");
    let raw = ipv4_packet([10, 0, 0, 1], [192, 168, 50, 8], 80);
    remote_peer.send_to(&raw, tunnel_addr).await.expect("inject");

    let mut buf = [0u8; 2000];
    let (n, _) = timeout(Duration::from_secs(2), host.recv_from(&mut buf))
        .await
        .expect("timely")
        .expect("recv");
    assert_eq!(&buf[..n], &raw[..]);

    let c = wait_for_counters(&engine, PortId::Tunnel, |c| c.sent == 1).await;
    assert_eq!(c.received, 1);

    engine.shutdown().await;
    worker.await.expect("join");
}

#[tokio::test]
async fn test_explicit_drop_counts_dropped() {
    let (engine, local_addr, _) =
        test_engine(vec![entry("10.0.0.0/24", "", "DROP", "")]).await;
    let worker = tokio::spawn(forwarder::run(
        engine.clone(),
        PortId::Local,
    ));

    let injector = UdpSocket::bind("127.0.0.1:0").await.expect("injector");
    let raw = ipv4_packet([10, 0, 0, 7], [8, 8, 8, 8], 60);
    injector.send_to(&raw, local_addr).await.expect("inject");

    let c = wait_for_counters(&engine, PortId::Local, |c| c.dropped == 1).await;
    assert_eq!(c.received, 1);
    assert_eq!(c.sent, 0);
    assert_eq!(c.err_send, 0);

    engine.shutdown().await;
    worker.await.expect("join");
}

#[tokio::test]
async fn test_policy_miss_counts_dropped() {
    let (engine, local_addr, _) = test_engine(vec![entry(
        "",
        "10.0.0.0/24",
        "FORWARD",
        "203.0.113.5:9000",
    )])
    .await;
    let worker = tokio::spawn(forwarder::run(
        engine.clone(),
        PortId::Local,
    ));

    let injector = UdpSocket::bind("127.0.0.1:0").await.expect("injector");
    let raw = ipv4_packet([10, 0, 0, 7], [8, 8, 8, 8], 60);
    injector.send_to(&raw, local_addr).await.expect("inject");

    let c = wait_for_counters(&engine, PortId::Local, |c| c.dropped == 1).await;
    assert_eq!(c.received, 1);
    assert_eq!(c.sent, 0);

    engine.shutdown().await;
    worker.await.expect("join");
}

#[tokio::test]
async fn test_non_ipv4_counts_unsupported() {
    let (engine, local_addr, _) = test_engine(vec![entry("", "", "LOCAL", "")]).await;
    let worker = tokio::spawn(forwarder::run(
        engine.clone(),
        PortId::Local,
    ));

    let injector = UdpSocket::bind("127.0.0.1:0").await.expect("injector");
    // IPv6 version nibble.
    let mut v6 = ipv4_packet([1, 1, 1, 1], [2, 2, 2, 2], 60);
    v6[0] = 0x60;
    injector.send_to(&v6, local_addr).await.expect("inject v6");
    // Truncated header.
    injector.send_to(&[0x45u8; 8], local_addr).await.expect("inject short");

    let c = wait_for_counters(&engine, PortId::Local, |c| c.unsupported == 2).await;
    assert_eq!(c.received, 2);
    assert_eq!(c.dropped, 0);
    assert_eq!(c.sent, 0);

    engine.shutdown().await;
    worker.await.expect("join");
}

#[tokio::test]
async fn test_forward_without_endpoint_counts_err_send() {
    // FORWARD with no endpoint: the datagram egress cannot address the
    // packet, which is a send error, not a drop.
    let (engine, local_addr, _) =
        test_engine(vec![entry("", "10.0.0.0/24", "FORWARD", "")]).await;
    let worker = tokio::spawn(forwarder::run(
        engine.clone(),
        PortId::Local,
    ));

    let injector = UdpSocket::bind("127.0.0.1:0").await.expect("injector");
    let raw = ipv4_packet([10, 0, 0, 7], [10, 0, 0, 9], 60);
    injector.send_to(&raw, local_addr).await.expect("inject");

    let c = wait_for_counters(&engine, PortId::Local, |c| c.err_send == 1).await;
    assert_eq!(c.received, 1);
    assert_eq!(c.sent, 0);
    assert_eq!(c.dropped, 0);

    engine.shutdown().await;
    worker.await.expect("join");
}

#[tokio::test]
async fn test_counter_balance_over_mixed_traffic() {
    // received == sent + dropped + unsupported + err_send when no receive
    // error occurred.
    let peer = UdpSocket::bind("127.0.0.1:0").await.expect("peer");
    let peer_addr = peer.local_addr().expect("peer addr");

    let (engine, local_addr, _) = test_engine(vec![
        entry("", "10.0.0.8/32", "DROP", ""),
        entry("", "10.0.0.0/24", "FORWARD", &peer_addr.to_string()),
    ])
    .await;
    let worker = tokio::spawn(forwarder::run(
        engine.clone(),
        PortId::Local,
    ));

    let injector = UdpSocket::bind("127.0.0.1:0").await.expect("injector");
    let forwarded = ipv4_packet([10, 0, 0, 7], [10, 0, 0, 9], 40);
    let shadowed = ipv4_packet([10, 0, 0, 7], [10, 0, 0, 8], 40);
    let missed = ipv4_packet([10, 0, 0, 7], [8, 8, 8, 8], 40);
    let mut v6 = ipv4_packet([1, 1, 1, 1], [2, 2, 2, 2], 40);
    v6[0] = 0x60;

    for raw in [&forwarded, &shadowed, &missed, &v6] {
        injector.send_to(raw, local_addr).await.expect("inject");
    }

    let c = wait_for_counters(&engine, PortId::Local, |c| {
        c.sent + c.dropped + c.unsupported + c.err_send == 4
    })
    .await;
    assert_eq!(c.sent, 1);
    assert_eq!(c.dropped, 2);
    assert_eq!(c.unsupported, 1);
    assert_eq!(c.err_send, 0);
    assert_eq!(c.received, c.sent + c.dropped + c.unsupported + c.err_send);

    engine.shutdown().await;
    worker.await.expect("join");
}

#[tokio::test]
async fn test_both_forwarders_run_concurrently() {
    // One worker per forwardable port; traffic on both ingresses lands in
    // each port's own counters.
    let peer = UdpSocket::bind("127.0.0.1:0").await.expect("peer");
    let peer_addr = peer.local_addr().expect("peer addr");

    let (engine, local_addr, tunnel_addr) = test_engine(vec![entry(
        "",
        "",
        "FORWARD",
        &peer_addr.to_string(),
    )])
    .await;
    let mut workers = Vec::new();
    for id in PortId::ALL {
        if id.is_forwardable() {
            workers.push(tokio::spawn(forwarder::run(
                engine.clone(),
                id,
            )));
        }
    }

    let injector = UdpSocket::bind("127.0.0.1:0").await.expect("injector");
    let raw = ipv4_packet([10, 0, 0, 1], [10, 0, 0, 2], 48);
    injector.send_to(&raw, local_addr).await.expect("inject local");
    injector.send_to(&raw, tunnel_addr).await.expect("inject tunnel");

    let local = wait_for_counters(&engine, PortId::Local, |c| c.sent == 1).await;
    let tunnel = wait_for_counters(&engine, PortId::Tunnel, |c| c.sent == 1).await;
    assert_eq!(local.received, 1);
    assert_eq!(tunnel.received, 1);

    engine.shutdown().await;
    for worker in workers {
        worker.await.expect("join");
    }
}
