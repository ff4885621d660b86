use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;

use crema_api::ApiState;
use crema_core::address::AddressFilter;
use crema_core::game::Game;
use crema_eventsource::{Event, EventSource, Message};
use crema_services::{Prober, SessionCache};

use crate::*;

async fn start_api(cache: SessionCache) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/api", listener.local_addr().unwrap());
    let state = ApiState {
        cache,
        client_address: "league.example:80".into(),
    };
    tokio::spawn(crema_api::serve_on(listener, state));
    base
}

async fn next_message(es: &mut EventSource) -> Message {
    loop {
        match within("update feed", es.recv()).await {
            Some(Event::Message(msg)) => return msg,
            Some(Event::Open) => continue,
            Some(Event::Error(e)) => panic!("update feed error: {e}"),
            None => panic!("update feed ended"),
        }
    }
}

fn data(msg: &Message) -> Value {
    serde_json::from_str(&msg.data).unwrap()
}

/// A listener sees the current games, then `init`, then live changes.
#[tokio::test]
async fn test_update_feed_replays_then_follows() {
    let prober = Arc::new(Prober::new(Duration::from_millis(200), Duration::from_millis(20)));
    let cache = SessionCache::spawn(prober, AddressFilter::disabled());
    cache
        .update_all_games(vec![Game::with_id(2), Game::with_id(1)])
        .await;
    let base = start_api(cache.clone()).await;

    let mut es = EventSource::new(format!("{base}/updates"));

    let first = next_message(&mut es).await;
    assert_eq!(first.event_type, "update");
    assert_eq!(data(&first)["id"], 1);
    let second = next_message(&mut es).await;
    assert_eq!(data(&second)["id"], 2);
    assert_eq!(data(&second)["entry"]["status"], "failure");

    let init = next_message(&mut es).await;
    assert_eq!(init.event_type, "init");
    assert_eq!(data(&init)["ids"], serde_json::json!([1, 2]));

    cache.delete_game(1).await;
    let deleted = next_message(&mut es).await;
    assert_eq!(deleted.event_type, "delete");
    assert_eq!(data(&deleted), serde_json::json!({"id": 1}));

    let mut game = Game::with_id(3);
    game.title = "new".into();
    cache.update_game(game).await;
    let created = next_message(&mut es).await;
    assert_eq!(created.event_type, "update");
    assert_eq!(data(&created)["entry"]["game"]["title"], "new");

    let status: Value = reqwest::get(format!("{base}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["games"], 2);
    assert_eq!(status["subscribers"], 1);

    es.close();
}

#[tokio::test]
async fn test_games_endpoint_reflects_cache() {
    let prober = Arc::new(Prober::new(Duration::from_millis(200), Duration::from_millis(20)));
    let cache = SessionCache::spawn(prober, AddressFilter::default());
    cache.update_game(Game::with_id(4)).await;
    let base = start_api(cache).await;

    let games: Value = reqwest::get(format!("{base}/games"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(games.as_array().map(Vec::len), Some(1));
    assert_eq!(games[0]["id"], 4);

    let missing = reqwest::get(format!("{base}/games/5")).await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}
