//! crema-eventsource: a server-sent events client.
//!
//! `EventSource` keeps one stream open against an HTTP endpoint, reconnects
//! after the server-directed retry interval and resumes with
//! `Last-Event-ID`. The line grammar lives in `parser` and is usable on its
//! own.

pub mod client;
pub mod error;
pub mod parser;

pub use client::{Event, EventSource, ReadyState, DEFAULT_RETRY};
pub use error::EventSourceError;
pub use parser::{EventStreamParser, LineDecoder, Message};
