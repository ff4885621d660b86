//! Candidate addresses advertised for a game, and the filter that decides
//! which of them are worth probing.
//!
//! The textual form is also the cache key and the JSON representation:
//!   tcp:203.0.113.5:11112
//!   udp:[2001:db8::1]:11113
//!   netpuncher4:netpuncher.example.org:11115#1234

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Candidate addresses ───────────────────────────────────────────────────────

/// IP family a tunnel target was announced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    fn digit(self) -> char {
        match self {
            IpFamily::V4 => '4',
            IpFamily::V6 => '6',
        }
    }
}

/// A host reachable only through a netpuncher rendezvous server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelTarget {
    pub family: IpFamily,
    /// Rendezvous server, `host:port`. Resolved at probe time.
    pub rendezvous: String,
    /// Connection id the rendezvous server assigned to the host.
    pub id: u64,
}

/// One endpoint advertised for a game.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CandidateAddress {
    Tcp(SocketAddr),
    Udp(SocketAddr),
    Netpuncher(TunnelTarget),
}

impl fmt::Display for CandidateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateAddress::Tcp(addr) => write!(f, "tcp:{addr}"),
            CandidateAddress::Udp(addr) => write!(f, "udp:{addr}"),
            CandidateAddress::Netpuncher(t) => {
                write!(f, "netpuncher{}:{}#{}", t.family.digit(), t.rendezvous, t.id)
            }
        }
    }
}

impl FromStr for CandidateAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressError::InvalidAddress(s.to_string());
        let (network, rest) = s.split_once(':').ok_or_else(invalid)?;
        let family = match network {
            "tcp" => return Ok(CandidateAddress::Tcp(rest.parse().map_err(|_| invalid())?)),
            "udp" => return Ok(CandidateAddress::Udp(rest.parse().map_err(|_| invalid())?)),
            "netpuncher4" => IpFamily::V4,
            "netpuncher6" => IpFamily::V6,
            _ => return Err(invalid()),
        };
        let (rendezvous, id) = rest.rsplit_once('#').ok_or_else(invalid)?;
        if rendezvous.is_empty() {
            return Err(invalid());
        }
        Ok(CandidateAddress::Netpuncher(TunnelTarget {
            family,
            rendezvous: rendezvous.to_string(),
            id: id.parse().map_err(|_| invalid())?,
        }))
    }
}

impl Serialize for CandidateAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CandidateAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── IP blocks ─────────────────────────────────────────────────────────────────

/// A CIDR block, e.g. `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpBlock {
    network: IpAddr,
    prefix: u8,
}

impl IpBlock {
    pub const fn v4(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> Self {
        Self {
            network: IpAddr::V4(Ipv4Addr::new(a, b, c, d)),
            prefix,
        }
    }

    pub const fn v6(network: Ipv6Addr, prefix: u8) -> Self {
        Self {
            network: IpAddr::V6(network),
            prefix,
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpBlock {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressError::InvalidRange(s.to_string());
        let (network, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = network.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for IpBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Ranges that are never worth dialing from the public internet.
pub const DEFAULT_PRIVATE_RANGES: [&str; 8] = [
    "127.0.0.0/8",    // IPv4 loopback
    "10.0.0.0/8",     // RFC1918
    "172.16.0.0/12",  // RFC1918
    "192.168.0.0/16", // RFC1918
    "169.254.0.0/16", // RFC3927 link-local
    "::1/128",        // IPv6 loopback
    "fe80::/10",      // IPv6 link-local
    "fc00::/7",       // IPv6 unique local
];

fn default_blocks() -> Vec<IpBlock> {
    vec![
        IpBlock::v4(127, 0, 0, 0, 8),
        IpBlock::v4(10, 0, 0, 0, 8),
        IpBlock::v4(172, 16, 0, 0, 12),
        IpBlock::v4(192, 168, 0, 0, 16),
        IpBlock::v4(169, 254, 0, 0, 16),
        IpBlock::v6(Ipv6Addr::LOCALHOST, 128),
        IpBlock::v6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
        IpBlock::v6(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    ]
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Decides which addresses are skipped instead of probed.
///
/// Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct AddressFilter {
    blocks: Vec<IpBlock>,
    enabled: bool,
}

impl Default for AddressFilter {
    fn default() -> Self {
        Self::new(default_blocks())
    }
}

impl AddressFilter {
    pub fn new(blocks: Vec<IpBlock>) -> Self {
        Self {
            blocks,
            enabled: true,
        }
    }

    /// A filter that lets every address through.
    pub fn disabled() -> Self {
        Self {
            blocks: Vec::new(),
            enabled: false,
        }
    }

    /// Parse a list of CIDR strings.
    pub fn from_ranges<S: AsRef<str>>(ranges: &[S]) -> Result<Self, AddressError> {
        let blocks = ranges
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<IpBlock>, _>>()?;
        Ok(Self::new(blocks))
    }

    pub fn blocks(&self) -> &[IpBlock] {
        &self.blocks
    }

    /// True if `addr` must not be probed. Tunnel targets are always probed:
    /// their address names the rendezvous server, not the host.
    pub fn should_skip(&self, addr: &CandidateAddress) -> bool {
        if !self.enabled {
            return false;
        }
        let ip = match addr {
            CandidateAddress::Tcp(a) | CandidateAddress::Udp(a) => canonical(a.ip()),
            CandidateAddress::Netpuncher(_) => return false,
        };
        if !is_global_unicast(ip) {
            return true;
        }
        self.blocks.iter().any(|block| block.contains(ip))
    }
}

fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Unicast and not loopback, link-local, unspecified or broadcast.
/// Private ranges still count as global unicast here.
fn is_global_unicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_multicast()
                || v4.is_link_local()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let link_local = v6.segments()[0] & 0xffc0 == 0xfe80;
            !(v6.is_unspecified() || v6.is_loopback() || v6.is_multicast() || link_local)
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid candidate address: {0:?}")]
    InvalidAddress(String),
    #[error("invalid address range: {0:?}")]
    InvalidRange(String),
}
