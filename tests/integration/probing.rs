use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};

use crema_core::address::{AddressFilter, CandidateAddress, IpFamily, TunnelTarget};
use crema_core::game::Game;
use crema_services::{ConnectStatus, Probe, Prober, SessionCache, Snapshot};

use crate::*;

fn prober() -> Arc<Prober> {
    Arc::new(Prober::new(Duration::from_secs(1), Duration::from_millis(20)))
}

async fn settled(cache: &SessionCache, id: i64, addr: &CandidateAddress) -> Snapshot {
    within("probe result", async {
        loop {
            let snapshot = cache.get().await;
            let status = snapshot.get(&id).and_then(|e| e.addrs.get(addr)).copied();
            if matches!(status, Some(ConnectStatus::Success | ConnectStatus::Failure)) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Host that answers punch pings, plus a rendezvous server pointing at it.
async fn punchable_host(id: u32) -> TunnelTarget {
    let host = udp_echo().await.unwrap();
    let server = rendezvous_server(id, host).await.unwrap();
    TunnelTarget {
        family: IpFamily::V4,
        rendezvous: server.to_string(),
        id: id.into(),
    }
}

#[tokio::test]
async fn test_prober_covers_all_address_kinds() {
    let prober = prober();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp = CandidateAddress::Tcp(listener.local_addr().unwrap());
    let udp = CandidateAddress::Udp(udp_echo().await.unwrap());
    let tunnel = CandidateAddress::Netpuncher(punchable_host(77).await);

    for addr in [&tcp, &udp, &tunnel] {
        assert_eq!(prober.check(addr).await, ConnectStatus::Success, "{addr}");
    }
}

#[tokio::test]
async fn test_unknown_tunnel_id_fails_within_timeout() {
    let target = punchable_host(1).await;
    let wrong = CandidateAddress::Netpuncher(TunnelTarget { id: 2, ..target });

    let started = std::time::Instant::now();
    assert_eq!(prober().check(&wrong).await, ConnectStatus::Failure);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_unresolvable_rendezvous_fails() {
    let target = CandidateAddress::Netpuncher(TunnelTarget {
        family: IpFamily::V4,
        rendezvous: "no-such-host.invalid:11115".into(),
        id: 1,
    });
    assert_eq!(prober().check(&target).await, ConnectStatus::Failure);
}

/// With the default filter a loopback endpoint is never probed, while a
/// tunnel target behind a loopback rendezvous server is.
#[tokio::test]
async fn test_cache_filters_direct_but_probes_tunnels() {
    let cache = SessionCache::spawn(prober(), AddressFilter::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let direct = CandidateAddress::Tcp(listener.local_addr().unwrap());
    let tunnel = CandidateAddress::Netpuncher(punchable_host(5).await);

    cache.update_game(Game::with_id(1)).await;
    cache
        .update_addrs(1, vec![direct.clone(), tunnel.clone()])
        .await;

    let snapshot = settled(&cache, 1, &tunnel).await;
    let entry = &snapshot[&1];
    assert_eq!(entry.addrs.get(&tunnel), Some(&ConnectStatus::Success));
    assert!(!entry.addrs.contains_key(&direct));
    assert_eq!(entry.overall_status(), ConnectStatus::Success);
}

#[tokio::test]
async fn test_cache_records_real_probe_outcomes() {
    let cache = SessionCache::spawn(prober(), AddressFilter::disabled());
    let mut updates = cache.register();

    let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let up = CandidateAddress::Tcp(open.local_addr().unwrap());
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let down = CandidateAddress::Udp(silent.local_addr().unwrap());

    cache.update_game(Game::with_id(9)).await;
    cache.update_addrs(9, vec![up.clone(), down.clone()]).await;

    let snapshot = settled(&cache, 9, &down).await;
    assert_eq!(snapshot[&9].addrs[&up], ConnectStatus::Success);
    assert_eq!(snapshot[&9].addrs[&down], ConnectStatus::Failure);

    // Every status an address went through, in notification order.
    let mut seen_down = Vec::new();
    while let Ok(update) = updates.try_recv() {
        if let Some(status) = update.entry.as_ref().and_then(|e| e.addrs.get(&down)) {
            if seen_down.last() != Some(status) {
                seen_down.push(*status);
            }
        }
    }
    assert_eq!(seen_down, vec![ConnectStatus::Pending, ConnectStatus::Failure]);
}
