//! crema-core: shared types, wire formats, and configuration.
//! All other crema crates depend on this one.

pub mod address;
pub mod config;
pub mod game;
pub mod wire;

pub use address::{AddressFilter, CandidateAddress, IpBlock, TunnelTarget};
pub use game::{Game, GameId};
