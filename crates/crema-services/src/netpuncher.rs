//! NAT traversal through a netpuncher rendezvous server.
//!
//! The prober connects to the rendezvous server over the engine's UDP
//! transport, asks to be introduced to the host registered under the target
//! id, and then fires Ping packets at whatever address the server hands
//! back. The first datagram from that address proves the host reachable.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use zerocopy::{AsBytes, FromBytes};

use crema_core::address::{IpFamily, TunnelTarget};
use crema_core::wire::{
    data_packet, split_packet, ConnOkPacket, ConnPacket, NetpuncherMessage, PacketHdr, PacketId,
};

use crate::probe::{local_for, ProbeError};

const MAX_DATAGRAM: usize = 1500;

/// Run the full exchange for `target`. Unbounded; the caller applies the deadline.
pub(crate) async fn check(target: &TunnelTarget, punch_interval: Duration) -> Result<(), ProbeError> {
    let server = resolve(target).await?;
    let socket = UdpSocket::bind(local_for(server)).await?;

    let mut conn = RendezvousConn::connect(&socket, server, punch_interval).await?;
    // Host ids are 32 bits on the wire.
    conn.send(&NetpuncherMessage::SReq {
        cid: target.id as u32,
    })
    .await?;
    tracing::debug!(%server, id = target.id, "netpuncher request sent");

    let peer = loop {
        match conn.recv().await? {
            NetpuncherMessage::CReq { addr } => break addr,
            NetpuncherMessage::AssId { cid } => {
                tracing::debug!(%server, cid, "netpuncher assigned id");
            }
            other => {
                tracing::debug!(%server, kind = ?other.kind(), "unexpected netpuncher message");
            }
        }
    };

    tracing::debug!(%server, %peer, "punching");
    punch(&socket, peer, punch_interval).await
}

/// Resolve the rendezvous host, preferring the family the tunnel was announced for.
async fn resolve(target: &TunnelTarget) -> Result<SocketAddr, ProbeError> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(target.rendezvous.as_str())
        .await?
        .collect();
    let wanted = |a: &&SocketAddr| match target.family {
        IpFamily::V4 => a.is_ipv4(),
        IpFamily::V6 => a.is_ipv6(),
    };
    candidates
        .iter()
        .find(wanted)
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| ProbeError::Unresolved(target.rendezvous.clone()))
}

/// Send Ping to `peer` every `interval` until it answers.
async fn punch(socket: &UdpSocket, peer: SocketAddr, interval: Duration) -> Result<(), ProbeError> {
    let ping = PacketHdr::ping();
    let mut ticker = tokio::time::interval(interval);
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                socket.send_to(ping.as_bytes(), peer).await?;
            }
            received = socket.recv_from(&mut buf) => {
                let (_, from) = received?;
                if from == peer {
                    return Ok(());
                }
            }
        }
    }
}

// ── Rendezvous connection ─────────────────────────────────────────────────────

/// A transport connection to the rendezvous server over a borrowed socket.
///
/// Dropping it tells the server goodbye with a best-effort Close packet.
struct RendezvousConn<'a> {
    socket: &'a UdpSocket,
    server: SocketAddr,
    next_nr: u32,
}

impl<'a> RendezvousConn<'a> {
    /// Send Conn until the server acknowledges with ConnOk.
    async fn connect(
        socket: &'a UdpSocket,
        server: SocketAddr,
        retry: Duration,
    ) -> Result<RendezvousConn<'a>, ProbeError> {
        let request = ConnPacket::new(server);
        let mut ticker = tokio::time::interval(retry);
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    socket.send_to(request.as_bytes(), server).await?;
                }
                received = socket.recv_from(&mut buf) => {
                    let (n, from) = received?;
                    if from != server {
                        continue;
                    }
                    let (hdr, _) = split_packet(&buf[..n])?;
                    if hdr.packet_id()? == PacketId::ConnOk
                        && ConnOkPacket::read_from_prefix(&buf[..n]).is_some()
                    {
                        return Ok(RendezvousConn {
                            socket,
                            server,
                            next_nr: 0,
                        });
                    }
                }
            }
        }
    }

    async fn send(&mut self, msg: &NetpuncherMessage) -> Result<(), ProbeError> {
        let packet = data_packet(self.next_nr, &msg.encode());
        self.next_nr = self.next_nr.wrapping_add(1);
        self.socket.send_to(&packet, self.server).await?;
        Ok(())
    }

    /// Next netpuncher message from the server. Non-data traffic is skipped.
    async fn recv(&mut self) -> Result<NetpuncherMessage, ProbeError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            if from != self.server {
                continue;
            }
            let (hdr, payload) = split_packet(&buf[..n])?;
            match hdr.packet_id()? {
                PacketId::Data => return Ok(NetpuncherMessage::decode(payload)?),
                PacketId::Close => return Err(ProbeError::Closed),
                _ => continue,
            }
        }
    }
}

impl Drop for RendezvousConn<'_> {
    fn drop(&mut self) {
        let close = PacketHdr::new(PacketId::Close, 0);
        let _ = self.socket.try_send_to(close.as_bytes(), self.server);
    }
}
