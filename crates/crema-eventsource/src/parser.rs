//! Incremental parsing of the `text/event-stream` format.
//!
//! Bytes go through `LineDecoder`, which cuts them into lines regardless of
//! how the transport chunked them; lines go through `EventStreamParser`,
//! which accumulates fields and yields a `Message` on every blank line.

use std::time::Duration;

use bytes::{BufMut, BytesMut};

/// One dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Value of the last `event:` field, empty if there was none.
    pub event_type: String,
    /// `data:` fields joined with newlines.
    pub data: String,
    /// Last `id:` seen on this stream, possibly from an earlier event.
    pub last_event_id: String,
}

// ── Lines ─────────────────────────────────────────────────────────────────────

/// Splits a byte stream on LF, CRLF or a lone CR.
///
/// A partial line stays buffered until its terminator arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
    /// Last byte seen was CR; a directly following LF belongs to it.
    after_cr: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if self.after_cr {
                self.after_cr = false;
                if b == b'\n' {
                    continue;
                }
            }
            match b {
                b'\n' | b'\r' => {
                    let line = self.buf.split();
                    lines.push(String::from_utf8_lossy(&line).into_owned());
                    self.after_cr = b == b'\r';
                }
                _ => self.buf.put_u8(b),
            }
        }
        lines
    }
}

// ── Fields ────────────────────────────────────────────────────────────────────

/// Field state of one event stream.
///
/// `last_event_id` and the retry interval survive `reset`; they carry over
/// from one connection to the next.
#[derive(Debug)]
pub struct EventStreamParser {
    data: String,
    event_type: String,
    last_event_id: String,
    retry: Duration,
}

impl EventStreamParser {
    pub fn new(retry: Duration) -> Self {
        Self {
            data: String::new(),
            event_type: String::new(),
            last_event_id: String::new(),
            retry,
        }
    }

    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    pub fn retry(&self) -> Duration {
        self.retry
    }

    /// Forget the partially accumulated event.
    pub fn reset(&mut self) {
        self.data.clear();
        self.event_type.clear();
    }

    /// Process one line (without terminator).
    pub fn feed_line(&mut self, line: &str) -> Option<Message> {
        if line.is_empty() {
            return self.dispatch();
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            // Comment.
            "" => {}
            "event" => self.event_type = value.to_owned(),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" => self.last_event_id = value.to_owned(),
            "retry" => {
                if let Ok(ms) = value.parse::<u32>() {
                    self.retry = Duration::from_millis(ms.into());
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Message> {
        let event_type = std::mem::take(&mut self.event_type);
        let mut data = std::mem::take(&mut self.data);
        if data.is_empty() {
            return None;
        }
        if data.ends_with('\n') {
            data.pop();
        }
        Some(Message {
            event_type,
            data,
            last_event_id: self.last_event_id.clone(),
        })
    }
}
