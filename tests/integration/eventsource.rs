use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crema_eventsource::{Event, EventSource, EventSourceError, Message, ReadyState};

use crate::*;

async fn next_event(es: &mut EventSource) -> Event {
    within("event source event", es.recv())
        .await
        .expect("event source ended unexpectedly")
}

async fn expect_open(es: &mut EventSource) {
    match next_event(es).await {
        Event::Open => {}
        other => panic!("expected Open, got {other:?}"),
    }
}

async fn expect_message(es: &mut EventSource) -> Message {
    match next_event(es).await {
        Event::Message(msg) => msg,
        other => panic!("expected Message, got {other:?}"),
    }
}

/// The server shortens the retry interval to 1 ms and closes; the client must
/// come back right away and resume from the last id it saw.
#[tokio::test]
async fn test_reconnect_resumes_from_last_event_id() {
    let mut stub = HttpStub::start("text/event-stream", |req| {
        match req.last_event_id.as_deref() {
            None => "data: abc\nid: event1\n: ignored\ndata:xyz\nevent: hello\nretry: 1\n\n",
            Some("event1") => "id:event2\ndata\nretry: 10000\n\n",
            Some(_) => "",
        }
        .to_string()
    })
    .await
    .unwrap();

    let mut es = EventSource::new(stub.url());

    expect_open(&mut es).await;
    let first = expect_message(&mut es).await;
    assert_eq!(first.data, "abc\nxyz");
    assert_eq!(first.event_type, "hello");
    assert_eq!(first.last_event_id, "event1");

    let reconnect_started = Instant::now();
    expect_open(&mut es).await;
    assert!(
        reconnect_started.elapsed() < Duration::from_secs(1),
        "reconnect waited {:?}",
        reconnect_started.elapsed()
    );
    let second = expect_message(&mut es).await;
    assert_eq!(second.data, "");
    assert_eq!(second.event_type, "");
    assert_eq!(second.last_event_id, "event2");

    let first_req = stub.requests.recv().await.unwrap();
    assert_eq!(first_req.accept.as_deref(), Some("text/event-stream"));
    assert_eq!(first_req.last_event_id, None);
    let second_req = stub.requests.recv().await.unwrap();
    assert_eq!(second_req.last_event_id.as_deref(), Some("event1"));

    // Now parked in the 10 s retry wait.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(es.ready_state(), ReadyState::Connecting);

    es.close();
    assert_eq!(es.ready_state(), ReadyState::Closed);
    assert!(es.recv().await.is_none());
}

#[tokio::test]
async fn test_wrong_content_type_is_reported() {
    let stub = HttpStub::start("text/html; charset=utf-8", |_| "<p>no</p>".to_string())
        .await
        .unwrap();

    let mut es = EventSource::new(stub.url());
    match next_event(&mut es).await {
        Event::Error(EventSourceError::InvalidContentType(ct)) => assert_eq!(ct, "text/html"),
        other => panic!("expected content type error, got {other:?}"),
    }
    assert_ne!(es.ready_state(), ReadyState::Open);
}

#[tokio::test]
async fn test_content_type_parameters_are_accepted() {
    let stub = HttpStub::start("text/event-stream; charset=utf-8", |_| {
        "event: ping\ndata: 1\n\n".to_string()
    })
    .await
    .unwrap();

    let mut es = EventSource::new(stub.url());
    expect_open(&mut es).await;
    let msg = expect_message(&mut es).await;
    assert_eq!(msg.event_type, "ping");
    assert_eq!(msg.data, "1");
}

/// Closing must not wait for the pending 3 s reconnect delay.
#[tokio::test]
async fn test_close_interrupts_retry_wait() {
    let stub = HttpStub::start("text/event-stream", |_| "data: x\n\n".to_string())
        .await
        .unwrap();

    let mut es = EventSource::new(stub.url());
    expect_open(&mut es).await;
    expect_message(&mut es).await;

    let started = Instant::now();
    es.close();
    assert!(es.recv().await.is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(es.ready_state(), ReadyState::Closed);
}

/// A request the server never answers is abandoned, and its connection
/// released, on close.
#[tokio::test]
async fn test_close_abandons_unanswered_request() {
    let mut server = HoldingServer::start(None).await.unwrap();

    let mut es = EventSource::new(server.url());
    assert_eq!(within("request", server.events.recv()).await, Some(Held::Request));
    assert_eq!(es.ready_state(), ReadyState::Connecting);

    es.close();
    assert!(es.recv().await.is_none());
    assert_eq!(within("hang-up", server.events.recv()).await, Some(Held::HungUp));
}

#[tokio::test]
async fn test_close_releases_open_stream() {
    let mut server = HoldingServer::start(Some(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\ndata: live\n\n",
    ))
    .await
    .unwrap();

    let mut es = EventSource::new(server.url());
    expect_open(&mut es).await;
    assert_eq!(expect_message(&mut es).await.data, "live");
    assert_eq!(es.ready_state(), ReadyState::Open);
    assert_eq!(server.events.recv().await, Some(Held::Request));

    es.close();
    assert_eq!(es.ready_state(), ReadyState::Closed);
    assert_eq!(within("hang-up", server.events.recv()).await, Some(Held::HungUp));
}

/// An unterminated line at the end of one connection does not leak into
/// the next one.
#[tokio::test]
async fn test_partial_line_is_dropped_on_reconnect() {
    let served = AtomicUsize::new(0);
    let stub = HttpStub::start("text/event-stream", move |_| {
        match served.fetch_add(1, Ordering::SeqCst) {
            0 => "retry: 1\ndata: par",
            _ => "data: whole\n\n",
        }
        .to_string()
    })
    .await
    .unwrap();

    let mut es = EventSource::new(stub.url());
    expect_open(&mut es).await;
    expect_open(&mut es).await;
    assert_eq!(expect_message(&mut es).await.data, "whole");
    es.close();
}
