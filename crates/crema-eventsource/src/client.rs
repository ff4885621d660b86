//! The reconnecting client.
//!
//! A background task owns the HTTP connection. It reports `Open`, `Message`
//! and `Error` events on one ordered channel, so the owner sees them exactly
//! in the order they happened.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{broadcast, mpsc};

use crate::error::EventSourceError;
use crate::parser::{EventStreamParser, LineDecoder, Message};

/// Reconnection delay until the server sends its own `retry:`.
pub const DEFAULT_RETRY: Duration = Duration::from_millis(3000);

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl From<u8> for ReadyState {
    fn from(v: u8) -> Self {
        match v {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }
}

#[derive(Debug)]
pub enum Event {
    /// A connection was established and its body is being read.
    Open,
    Message(Message),
    Error(EventSourceError),
}

/// A live server-sent events subscription.
///
/// Dropping it closes the connection.
pub struct EventSource {
    url: String,
    state: Arc<AtomicU8>,
    events: mpsc::UnboundedReceiver<Event>,
    shutdown_tx: broadcast::Sender<()>,
    closed: bool,
}

impl EventSource {
    /// Start connecting to `url` in the background. Must be called inside a
    /// tokio runtime.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        let url = url.into();
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (event_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let stream = Stream {
            url: url.clone(),
            client,
            state: state.clone(),
            event_tx,
        };
        tokio::spawn(stream.run(shutdown_rx));

        Self {
            url,
            state,
            events,
            shutdown_tx,
            closed: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Next event. `None` once closed.
    pub async fn recv(&mut self) -> Option<Event> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// Stop the background task, interrupting whatever it is waiting on.
    /// Events not yet received are discarded.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.shutdown_tx.send(());
        self.events.close();
        self.state.store(ReadyState::Closed as u8, Ordering::Release);
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Background task ───────────────────────────────────────────────────────────

struct Stream {
    url: String,
    client: reqwest::Client,
    state: Arc<AtomicU8>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl Stream {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            _ = self.connect_loop() => {}
        }
        self.set_state(ReadyState::Closed);
        tracing::debug!(url = %self.url, "event source closed");
    }

    /// Runs until the owner stops listening.
    async fn connect_loop(&self) {
        let mut parser = EventStreamParser::new(DEFAULT_RETRY);
        let mut first = true;

        loop {
            self.set_state(ReadyState::Connecting);
            if !first {
                tokio::time::sleep(parser.retry()).await;
            }
            first = false;

            match self.stream_once(&mut parser).await {
                Ok(()) => tracing::debug!(url = %self.url, "event stream ended"),
                Err(e) => {
                    tracing::debug!(url = %self.url, error = %e, "event stream failed");
                    if self.event_tx.send(Event::Error(e)).is_err() {
                        return;
                    }
                }
            }
            if self.event_tx.is_closed() {
                return;
            }
        }
    }

    /// One connection: request, validate, then read the body to its end.
    async fn stream_once(&self, parser: &mut EventStreamParser) -> Result<(), EventSourceError> {
        let mut request = self.client.get(&self.url).header(ACCEPT, EVENT_STREAM);
        if !parser.last_event_id().is_empty() {
            request = request.header("Last-Event-ID", parser.last_event_id());
        }

        let mut response = request.send().await.map_err(EventSourceError::Request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(EventSourceError::UnexpectedStatus(status.as_u16()));
        }
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if media_type != EVENT_STREAM {
            return Err(EventSourceError::InvalidContentType(media_type));
        }

        self.set_state(ReadyState::Open);
        if self.event_tx.send(Event::Open).is_err() {
            return Ok(());
        }

        parser.reset();
        let mut lines = LineDecoder::new();
        while let Some(chunk) = response.chunk().await.map_err(EventSourceError::Body)? {
            for line in lines.feed(&chunk) {
                if let Some(message) = parser.feed_line(&line) {
                    if self.event_tx.send(Event::Message(message)).is_err() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Closed is terminal; once the owner closed us nothing overwrites it.
    fn set_state(&self, state: ReadyState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ReadyState::Closed as u8).then_some(state as u8)
            });
    }
}
