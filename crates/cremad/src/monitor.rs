//! Game monitor: follows the league's game event feed and keeps the session
//! cache in step with it.

use std::sync::Arc;

use tokio::sync::{broadcast, Semaphore};

use crema_core::game::{Game, GameId};
use crema_eventsource::{Event, EventSource, Message};
use crema_services::SessionCache;

use crate::league::LeagueClient;

/// League queries allowed in flight at once.
const MAX_CONCURRENT_LOOKUPS: usize = 4;

/// A decoded feed event.
#[derive(Debug, PartialEq)]
enum FeedEvent {
    /// Full list of running games, sent after every (re)connect.
    Init(Vec<Game>),
    Upsert(Game),
    Delete(GameId),
}

/// `Ok(None)` for event types the feed may send that we do not act on.
fn decode(message: &Message) -> Result<Option<FeedEvent>, serde_json::Error> {
    let event = match message.event_type.as_str() {
        "init" => FeedEvent::Init(serde_json::from_str(&message.data)?),
        "create" | "update" => FeedEvent::Upsert(serde_json::from_str(&message.data)?),
        "end" | "delete" => {
            let game: Game = serde_json::from_str(&message.data)?;
            FeedEvent::Delete(game.id)
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

pub struct Monitor {
    cache: SessionCache,
    league: LeagueClient,
    events_url: String,
    lookups: Arc<Semaphore>,
}

impl Monitor {
    pub fn new(cache: SessionCache, league: LeagueClient, events_url: String) -> Self {
        Self {
            cache,
            league,
            events_url,
            lookups: Arc::new(Semaphore::new(MAX_CONCURRENT_LOOKUPS)),
        }
    }

    /// Runs until shutdown.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut source = EventSource::new(self.events_url.clone());
        tracing::info!(url = %self.events_url, "following game events");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                event = source.recv() => match event {
                    Some(Event::Open) => tracing::info!("game event stream connected"),
                    Some(Event::Message(message)) => self.handle(message).await,
                    Some(Event::Error(e)) => {
                        tracing::warn!(error = %e, "game event stream error");
                    }
                    None => break,
                },
            }
        }

        source.close();
        tracing::info!("game monitor stopped");
    }

    async fn handle(&self, message: Message) {
        match decode(&message) {
            Ok(Some(FeedEvent::Init(games))) => {
                tracing::info!(games = games.len(), "game list received");
                let ids: Vec<GameId> = games.iter().map(|g| g.id).collect();
                self.cache.update_all_games(games).await;
                for id in ids {
                    self.lookup_addresses(id);
                }
            }
            Ok(Some(FeedEvent::Upsert(game))) => {
                let id = game.id;
                tracing::debug!(id, event = %message.event_type, "game changed");
                self.cache.update_game(game).await;
                self.lookup_addresses(id);
            }
            Ok(Some(FeedEvent::Delete(id))) => {
                tracing::debug!(id, "game ended");
                self.cache.delete_game(id).await;
            }
            Ok(None) => {
                tracing::debug!(event = %message.event_type, data = %message.data, "ignoring game event");
            }
            Err(e) => {
                tracing::warn!(event = %message.event_type, error = %e, "malformed game event");
            }
        }
    }

    /// Resolve the game's addresses off the feed loop, at most
    /// `MAX_CONCURRENT_LOOKUPS` at a time.
    fn lookup_addresses(&self, id: GameId) {
        let cache = self.cache.clone();
        let league = self.league.clone();
        let lookups = self.lookups.clone();
        tokio::spawn(async move {
            let Ok(_permit) = lookups.acquire_owned().await else {
                return;
            };
            match league.game_addresses(id).await {
                Ok(addrs) => {
                    tracing::debug!(id, count = addrs.len(), "addresses resolved");
                    cache.update_addrs(id, addrs).await;
                }
                Err(e) => tracing::warn!(id, error = %e, "address lookup failed"),
            }
        });
    }
}
