//! League game records, as pushed by the game event feed.
//!
//! Only `id` is interpreted by crema; everything else is carried through to
//! API consumers unchanged.

use serde::{Deserialize, Serialize};

/// Game id assigned by the league.
pub type GameId = i64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub title: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub comment: String,
    pub max_players: i64,
    pub host: String,
    pub created: String,
    pub updated: String,
    pub engine: String,
    pub engine_build: String,
    pub flags: GameFlags,
    pub scenario: Scenario,
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameFlags {
    pub join_allowed: bool,
    pub password_needed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Scenario {
    pub file_size: i64,
    #[serde(rename = "fileCRC")]
    pub file_crc: i64,
    #[serde(rename = "contentsCRC")]
    pub contents_crc: i64,
    pub filename: String,
    pub author: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    pub name: String,
    pub team: i64,
    pub color: i64,
}

impl Game {
    /// A record carrying nothing but its id.
    pub fn with_id(id: GameId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}
