//! Transport abstractions and sender backends.
//!
//! The publisher never talks to a broker directly. It builds an
//! [`OutboundMessage`] and hands it to a [`Sender`], which owns connection
//! management, delivery and any retry policy of the underlying system.
//!
//! ## Backends
//!
//! - [`InMemory`]: stores messages in a shared queue, for tests and local runs
//! - [`nats::Nats`]: publishes to a NATS server (requires the `nats` feature)

mod inmemory;

#[cfg(feature = "nats")]
pub mod nats;

use bytes::Bytes;

use crate::carrier::Headers;

pub use inmemory::InMemory;

/// Transport-native message produced by the publisher.
///
/// The body is the encoded [`Envelope`](crate::Envelope). The topic is taken
/// from the envelope metadata, never re-derived from the body.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Encoded message body.
    pub body: Bytes,
    /// Wire headers. `None` until a carrier has been attached.
    pub headers: Option<Headers>,
}

impl OutboundMessage {
    /// Create a message for `topic` without headers.
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
            headers: None,
        }
    }

    /// Header value stored under `key`, if any.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(key))
            .map(String::as_str)
    }
}

/// Trait implemented by concrete sender backends.
///
/// A sender delivers an [`OutboundMessage`] to an external system. It is shared
/// by every concurrent publish call, so `send` only takes `&self`; backends must
/// be safe for concurrent use on their own terms.
#[async_trait::async_trait]
pub trait Sender {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError>;

    /// Publish the message using the underlying transport.
    async fn send(&self, message: OutboundMessage) -> Result<(), Self::Error>;

    /// Address of the connected server, reported on publish spans.
    fn server_address(&self) -> String;
}
