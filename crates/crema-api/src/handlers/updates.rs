//! /updates: the live game feed.
//!
//! A new listener first gets one `update` per known game and an `init`
//! carrying the full id list, so it can drop rows it still shows for games
//! that ended meanwhile. After that it follows the cache's change stream.
//! If the listener falls behind the cache drops its subscription and the
//! stream ends; clients reconnect and start over with a fresh snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

use crema_core::game::GameId;
use crema_services::{CacheEntry, CacheUpdate};

use super::{ApiState, GameView};

#[derive(Serialize)]
struct UpdatePayload {
    id: GameId,
    entry: GameView,
}

#[derive(Serialize)]
struct DeletePayload {
    id: GameId,
}

#[derive(Serialize)]
struct InitPayload {
    ids: Vec<GameId>,
}

fn update_event(id: GameId, entry: CacheEntry) -> Result<Event, axum::Error> {
    Event::default().event("update").json_data(UpdatePayload {
        id,
        entry: GameView::new(id, entry),
    })
}

fn change_event(update: Arc<CacheUpdate>) -> Result<Event, axum::Error> {
    match &update.entry {
        Some(entry) => update_event(update.id, entry.clone()),
        None => Event::default()
            .event("delete")
            .json_data(DeletePayload { id: update.id }),
    }
}

pub async fn handle_updates(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    // Subscribe before taking the snapshot so no change slips between them.
    let subscription = state.cache.register();
    let snapshot = state.cache.get().await;

    let mut entries: Vec<(GameId, CacheEntry)> = snapshot.into_iter().collect();
    entries.sort_by_key(|(id, _)| *id);
    let ids: Vec<GameId> = entries.iter().map(|(id, _)| *id).collect();
    tracing::debug!(games = ids.len(), subscriber = subscription.id(), "update listener joined");

    let mut initial: Vec<Result<Event, axum::Error>> = entries
        .into_iter()
        .map(|(id, entry)| update_event(id, entry))
        .collect();
    initial.push(Event::default().event("init").json_data(InitPayload { ids }));

    let live = stream::unfold(subscription, |mut subscription| async move {
        let update = subscription.recv().await?;
        Some((change_event(update), subscription))
    });

    Sse::new(stream::iter(initial).chain(live)).keep_alive(KeepAlive::default())
}
