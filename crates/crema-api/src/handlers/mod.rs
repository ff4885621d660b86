//! HTTP API handlers: expose the session cache as JSON and as a live feed.

pub mod games;
pub mod status;
pub mod updates;

use std::collections::BTreeMap;

use serde::Serialize;

use crema_core::address::CandidateAddress;
use crema_core::game::{Game, GameId};
use crema_services::{CacheEntry, ConnectStatus, SessionCache};

#[derive(Clone)]
pub struct ApiState {
    pub cache: SessionCache,
    /// League address game clients should use, shown on the status page.
    pub client_address: String,
}

// ── Shared views ──────────────────────────────────────────────────────────────

/// One game as served to clients.
#[derive(Debug, Serialize)]
pub struct GameView {
    pub id: GameId,
    /// Aggregated over all addresses.
    pub status: ConnectStatus,
    pub game: Game,
    pub addrs: BTreeMap<CandidateAddress, ConnectStatus>,
}

impl GameView {
    pub fn new(id: GameId, entry: CacheEntry) -> Self {
        Self {
            id,
            status: entry.overall_status(),
            game: entry.game,
            addrs: entry.addrs,
        }
    }
}

pub use games::{handle_game, handle_games};
pub use status::handle_status;
pub use updates::handle_updates;
