//! Reachability checks for candidate addresses.
//!
//! Every check is bounded by one overall deadline. Whatever goes wrong inside
//! it (refused connection, silent peer, garbled rendezvous reply, timeout)
//! collapses to `ConnectStatus::Failure`; the cause is only logged.

use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, UdpSocket};
use zerocopy::AsBytes;

use crema_core::address::CandidateAddress;
use crema_core::config::ProbeConfig;
use crema_core::wire::{PacketHdr, WireError};

use crate::netpuncher;

/// Outcome of probing one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectStatus {
    Pending,
    Success,
    Failure,
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectStatus::Pending => "pending",
            ConnectStatus::Success => "success",
            ConnectStatus::Failure => "failure",
        })
    }
}

/// Something that can tell whether an address answers.
///
/// Implementations must terminate on their own; the cache never cancels a
/// check it started.
pub trait Probe: Send + Sync + 'static {
    fn check(&self, addr: &CandidateAddress) -> impl Future<Output = ConnectStatus> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Wire(#[from] WireError),
    #[error("could not resolve rendezvous server {0}")]
    Unresolved(String),
    #[error("rendezvous server closed the connection")]
    Closed,
}

/// The network prober.
#[derive(Debug, Clone)]
pub struct Prober {
    timeout: Duration,
    punch_interval: Duration,
}

impl Prober {
    pub fn new(timeout: Duration, punch_interval: Duration) -> Self {
        Self {
            timeout,
            punch_interval,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.timeout(), config.punch_interval())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn try_connect(&self, addr: &CandidateAddress) -> Result<(), ProbeError> {
        match addr {
            CandidateAddress::Tcp(addr) => check_tcp(*addr).await,
            CandidateAddress::Udp(addr) => check_udp(*addr).await,
            CandidateAddress::Netpuncher(target) => {
                netpuncher::check(target, self.punch_interval).await
            }
        }
    }
}

impl Probe for Prober {
    async fn check(&self, addr: &CandidateAddress) -> ConnectStatus {
        match tokio::time::timeout(self.timeout, self.try_connect(addr)).await {
            Ok(Ok(())) => {
                tracing::debug!(%addr, "address reachable");
                ConnectStatus::Success
            }
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "address unreachable");
                ConnectStatus::Failure
            }
            Err(_) => {
                tracing::debug!(%addr, timeout_ms = self.timeout.as_millis() as u64, "probe timed out");
                ConnectStatus::Failure
            }
        }
    }
}

/// Unspecified local address of the same family as `peer`.
pub(crate) fn local_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

async fn check_tcp(addr: SocketAddr) -> Result<(), ProbeError> {
    let _stream = TcpStream::connect(addr).await?;
    Ok(())
}

/// Send a bare Ping header; any datagram coming back counts.
async fn check_udp(addr: SocketAddr) -> Result<(), ProbeError> {
    let socket = UdpSocket::bind(local_for(addr)).await?;
    socket.connect(addr).await?;
    socket.send(PacketHdr::ping().as_bytes()).await?;

    let mut buf = [0u8; 1500];
    socket.recv(&mut buf).await?;
    Ok(())
}
