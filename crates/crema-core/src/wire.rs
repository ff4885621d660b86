//! crema wire formats: the datagrams a reachability probe exchanges.
//!
//! Three layers live here:
//!   - `PacketHdr`: the 5-byte header every game-host UDP datagram starts
//!     with. A bare header with the Ping id is the UDP liveness probe and
//!     the hole-punching probe.
//!   - Rendezvous transport: the connect handshake (`ConnPacket` /
//!     `ConnOkPacket`) and single-fragment Data packets used to talk to a
//!     netpuncher server.
//!   - Netpuncher messages: the versioned payloads carried inside Data
//!     packets (AssID, SReq, CReq, IDReq).
//!
//! All fixed-size types are #[repr(C, packed)] with zerocopy derives. Multi-byte
//! integers use explicit byte order wrappers, so layout does not depend on the
//! host.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Packet header ─────────────────────────────────────────────────────────────

/// Packet id stored in the low seven bits of `PacketHdr::status_byte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketId {
    Ping = 0,
    Test = 1,
    Conn = 2,
    ConnOk = 3,
    Data = 4,
    Check = 5,
    Close = 6,
    AddAddr = 7,
}

impl TryFrom<u8> for PacketId {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketId::Ping),
            1 => Ok(PacketId::Test),
            2 => Ok(PacketId::Conn),
            3 => Ok(PacketId::ConnOk),
            4 => Ok(PacketId::Data),
            5 => Ok(PacketId::Check),
            6 => Ok(PacketId::Close),
            7 => Ok(PacketId::AddAddr),
            other => Err(WireError::UnknownPacketId(other)),
        }
    }
}

/// High bit of the status byte: packet was sent to a broadcast group.
pub const BROADCAST_FLAG: u8 = 0x80;

/// Header preceding every datagram.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHdr {
    /// Packet id (bits 0-6) and broadcast flag (bit 7).
    pub status_byte: u8,
    /// Sequence number. Zero for control packets.
    pub nr: U32<LittleEndian>,
}

assert_eq_size!(PacketHdr, [u8; 5]);

impl PacketHdr {
    pub fn new(id: PacketId, nr: u32) -> Self {
        Self {
            status_byte: id as u8,
            nr: U32::new(nr),
        }
    }

    /// The liveness probe: a bare header with the Ping id.
    pub fn ping() -> Self {
        Self::new(PacketId::Ping, 0)
    }

    pub fn packet_id(&self) -> Result<PacketId, WireError> {
        PacketId::try_from(self.status_byte & !BROADCAST_FLAG)
    }

    pub fn is_broadcast(&self) -> bool {
        self.status_byte & BROADCAST_FLAG != 0
    }

    pub fn nr(&self) -> u32 {
        let nr = self.nr;
        nr.get()
    }
}

/// Split a datagram into its header and the bytes that follow it.
pub fn split_packet(buf: &[u8]) -> Result<(PacketHdr, &[u8]), WireError> {
    let hdr = PacketHdr::read_from_prefix(buf).ok_or(WireError::Truncated {
        expected: PACKET_HDR_SIZE,
        got: buf.len(),
    })?;
    Ok((hdr, &buf[PACKET_HDR_SIZE..]))
}

pub const PACKET_HDR_SIZE: usize = std::mem::size_of::<PacketHdr>();

// ── Addresses ─────────────────────────────────────────────────────────────────

/// A socket address as it travels inside packets.
///
/// Wire size: 19 bytes. IPv4 addresses occupy the first four bytes of `ip`,
/// the rest is zero.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct WireAddr {
    /// 4 or 6.
    pub family: u8,
    /// Port in network byte order.
    pub port: U16<BigEndian>,
    pub ip: [u8; 16],
}

assert_eq_size!(WireAddr, [u8; 19]);

impl From<SocketAddr> for WireAddr {
    fn from(addr: SocketAddr) -> Self {
        let mut ip = [0u8; 16];
        let family = match addr.ip() {
            IpAddr::V4(v4) => {
                ip[..4].copy_from_slice(&v4.octets());
                4
            }
            IpAddr::V6(v6) => {
                ip.copy_from_slice(&v6.octets());
                6
            }
        };
        Self {
            family,
            port: U16::new(addr.port()),
            ip,
        }
    }
}

impl TryFrom<WireAddr> for SocketAddr {
    type Error = WireError;

    fn try_from(addr: WireAddr) -> Result<Self, Self::Error> {
        let port = addr.port;
        let raw = addr.ip;
        let ip = match addr.family {
            4 => IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
            6 => IpAddr::V6(Ipv6Addr::from(raw)),
            other => return Err(WireError::UnknownFamily(other)),
        };
        Ok(SocketAddr::new(ip, port.get()))
    }
}

// ── Rendezvous transport ──────────────────────────────────────────────────────

/// Transport protocol version sent in `ConnPacket`.
pub const TRANSPORT_VERSION: u32 = 2;

/// Connection request, client → server.
///
/// Wire size: 28 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ConnPacket {
    pub hdr: PacketHdr,
    pub protocol_version: U32<LittleEndian>,
    /// The server's address as the client addressed it.
    pub addr: WireAddr,
}

assert_eq_size!(ConnPacket, [u8; 28]);

impl ConnPacket {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            hdr: PacketHdr::new(PacketId::Conn, 0),
            protocol_version: U32::new(TRANSPORT_VERSION),
            addr: server.into(),
        }
    }
}

/// Connection acknowledgement, server → client.
///
/// Wire size: 28 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ConnOkPacket {
    pub hdr: PacketHdr,
    /// Multicast mode. Always zero for rendezvous connections.
    pub mc_mode: U32<LittleEndian>,
    /// The client's address as the server sees it.
    pub addr: WireAddr,
}

assert_eq_size!(ConnOkPacket, [u8; 28]);

impl ConnOkPacket {
    pub fn new(client: SocketAddr) -> Self {
        Self {
            hdr: PacketHdr::new(PacketId::ConnOk, 0),
            mc_mode: U32::new(0),
            addr: client.into(),
        }
    }
}

/// Frame `payload` as a single-fragment Data packet.
pub fn data_packet(nr: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PACKET_HDR_SIZE + payload.len());
    buf.extend_from_slice(PacketHdr::new(PacketId::Data, nr).as_bytes());
    buf.extend_from_slice(payload);
    buf
}

// ── Netpuncher messages ───────────────────────────────────────────────────────

/// Netpuncher protocol version spoken by this crate.
pub const NETPUNCHER_VERSION: u8 = 1;

/// Netpuncher message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetpuncherType {
    /// Server announcing the id it assigned to a host.
    AssId = 0x51,
    /// Client asking to be punched towards the host with a given id.
    SReq = 0x52,
    /// Server asking a client to punch towards an address.
    CReq = 0x53,
    /// Host asking for an id.
    IdReq = 0x54,
}

impl TryFrom<u8> for NetpuncherType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x51 => Ok(NetpuncherType::AssId),
            0x52 => Ok(NetpuncherType::SReq),
            0x53 => Ok(NetpuncherType::CReq),
            0x54 => Ok(NetpuncherType::IdReq),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// Wire size: 2 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct NetpuncherHeader {
    pub kind: u8,
    pub version: u8,
}

assert_eq_size!(NetpuncherHeader, [u8; 2]);

/// AssID and SReq body. Wire size: 6 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct NetpuncherIdPacket {
    pub header: NetpuncherHeader,
    pub cid: U32<LittleEndian>,
}

assert_eq_size!(NetpuncherIdPacket, [u8; 6]);

/// CReq body. Wire size: 21 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct NetpuncherCReqPacket {
    pub header: NetpuncherHeader,
    pub addr: WireAddr,
}

assert_eq_size!(NetpuncherCReqPacket, [u8; 21]);

/// A decoded netpuncher message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetpuncherMessage {
    AssId { cid: u32 },
    SReq { cid: u32 },
    CReq { addr: SocketAddr },
    IdReq,
}

impl NetpuncherMessage {
    pub fn kind(&self) -> NetpuncherType {
        match self {
            NetpuncherMessage::AssId { .. } => NetpuncherType::AssId,
            NetpuncherMessage::SReq { .. } => NetpuncherType::SReq,
            NetpuncherMessage::CReq { .. } => NetpuncherType::CReq,
            NetpuncherMessage::IdReq => NetpuncherType::IdReq,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let header = NetpuncherHeader {
            kind: self.kind() as u8,
            version: NETPUNCHER_VERSION,
        };
        match *self {
            NetpuncherMessage::AssId { cid } | NetpuncherMessage::SReq { cid } => {
                NetpuncherIdPacket {
                    header,
                    cid: U32::new(cid),
                }
                .as_bytes()
                .to_vec()
            }
            NetpuncherMessage::CReq { addr } => NetpuncherCReqPacket {
                header,
                addr: addr.into(),
            }
            .as_bytes()
            .to_vec(),
            NetpuncherMessage::IdReq => header.as_bytes().to_vec(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = NetpuncherHeader::read_from_prefix(buf).ok_or(WireError::Truncated {
            expected: std::mem::size_of::<NetpuncherHeader>(),
            got: buf.len(),
        })?;
        if header.version != NETPUNCHER_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        match NetpuncherType::try_from(header.kind)? {
            kind @ (NetpuncherType::AssId | NetpuncherType::SReq) => {
                let packet = read_prefix::<NetpuncherIdPacket>(buf)?;
                let cid = packet.cid;
                Ok(if kind == NetpuncherType::AssId {
                    NetpuncherMessage::AssId { cid: cid.get() }
                } else {
                    NetpuncherMessage::SReq { cid: cid.get() }
                })
            }
            NetpuncherType::CReq => {
                let packet = read_prefix::<NetpuncherCReqPacket>(buf)?;
                Ok(NetpuncherMessage::CReq {
                    addr: SocketAddr::try_from(packet.addr)?,
                })
            }
            NetpuncherType::IdReq => Ok(NetpuncherMessage::IdReq),
        }
    }
}

fn read_prefix<T: FromBytes>(buf: &[u8]) -> Result<T, WireError> {
    T::read_from_prefix(buf).ok_or(WireError::Truncated {
        expected: std::mem::size_of::<T>(),
        got: buf.len(),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet id: 0x{0:02x}")]
    UnknownPacketId(u8),

    #[error("unknown netpuncher message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("unknown netpuncher version: {0}")]
    UnknownVersion(u8),

    #[error("unknown address family: {0}")]
    UnknownFamily(u8),

    #[error("packet truncated: need {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
