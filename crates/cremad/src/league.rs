//! Address lookup against the league server.
//!
//! The league answers a game query in its INI-like reference format. Only
//! three bits of it matter here: the `Address=` line listing direct TCP/UDP
//! endpoints, the `NetpuncherAddr=` line naming the rendezvous server, and
//! the `IPv4=`/`IPv6=` lines with the host's rendezvous ids.

use std::net::SocketAddr;
use std::sync::LazyLock;

use regex::Regex;

use crema_core::address::{CandidateAddress, IpFamily, TunnelTarget};
use crema_core::game::GameId;

static ADDRESS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Address=(.+)$").expect("static regex"));
static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(TCP|UDP):"?([0-9a-f:.\[\]]+)"?"#).expect("static regex"));
static NETPUNCHER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^NetpuncherAddr="([^"]+)"\r?$"#).expect("static regex"));
static NETPUNCHER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ +IPv([46])=([0-9]+)\r?$").expect("static regex"));

#[derive(Debug, thiserror::Error)]
pub enum LeagueError {
    #[error("league request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no Address= line in league answer")]
    NoAddressLine,
    #[error("invalid address in league answer: {0}")]
    InvalidAddress(String),
}

#[derive(Clone)]
pub struct LeagueClient {
    http: reqwest::Client,
    query_url: String,
}

impl LeagueClient {
    pub fn new(query_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            query_url: query_url.into(),
        }
    }

    /// Every address the league knows for game `id`.
    pub async fn game_addresses(&self, id: GameId) -> Result<Vec<CandidateAddress>, LeagueError> {
        let url = format!("{}?action=query&game_id={}", self.query_url, id);
        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_game_addresses(&body)
    }
}

pub fn parse_game_addresses(body: &str) -> Result<Vec<CandidateAddress>, LeagueError> {
    let line = ADDRESS_LINE
        .captures(body)
        .ok_or(LeagueError::NoAddressLine)?;

    let mut addrs = Vec::new();
    for cap in ADDRESS.captures_iter(&line[1]) {
        let text = &cap[2];
        let addr: SocketAddr = text
            .parse()
            .map_err(|_| LeagueError::InvalidAddress(text.to_string()))?;
        addrs.push(match &cap[1] {
            "TCP" => CandidateAddress::Tcp(addr),
            _ => CandidateAddress::Udp(addr),
        });
    }

    if let Some(np) = NETPUNCHER_LINE.captures(body) {
        let rendezvous = &np[1];
        for cap in NETPUNCHER_ID.captures_iter(body) {
            let Ok(id) = cap[2].parse::<u64>() else {
                continue;
            };
            let family = if &cap[1] == "4" { IpFamily::V4 } else { IpFamily::V6 };
            addrs.push(CandidateAddress::Netpuncher(TunnelTarget {
                family,
                rendezvous: rendezvous.to_string(),
                id,
            }));
        }
    }

    Ok(addrs)
}
