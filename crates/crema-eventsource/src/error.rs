/// Transport and protocol failures reported on the event channel.
///
/// None of them is terminal: the client keeps reconnecting until closed.
#[derive(Debug, thiserror::Error)]
pub enum EventSourceError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("server answered with status {0}")]
    UnexpectedStatus(u16),

    #[error("server returned an invalid content type: {0:?}")]
    InvalidContentType(String),

    #[error("reading the event stream failed: {0}")]
    Body(#[source] reqwest::Error),
}
