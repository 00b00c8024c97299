use async_trait::async_trait;
use tracing_error::SpanTrace;

use crate::{
    carrier::Headers,
    transport::{OutboundMessage, Sender},
};

/// NATS transport sender.
///
/// Publishes messages to NATS subjects through a shared `async_nats::Client`.
/// The client is a cheap handle that is safe to use from many tasks at once,
/// so `Nats` is `Clone` and needs no extra locking.
///
/// ## Mapping
///
/// - `OutboundMessage.topic` → NATS subject
/// - `OutboundMessage.headers` → NATS message headers
/// - `OutboundMessage.body` → message payload
#[derive(Clone)]
pub struct Nats {
    client: async_nats::Client,
    address: String,
}

impl Nats {
    /// Connect to the NATS server at `url`.
    ///
    /// The url is kept as the connection address reported on publish spans.
    #[tracing::instrument]
    pub async fn connect(url: &str) -> Result<Self, ConnectError> {
        let client = async_nats::connect(url)
            .await
            .map_err(ConnectError::new)?;
        tracing::info!("Connected to NATS");

        Ok(Self::from_client(client, url))
    }

    /// Wrap an already connected client.
    pub fn from_client(client: async_nats::Client, address: impl Into<String>) -> Self {
        Self {
            client,
            address: address.into(),
        }
    }

    /// Gracefully close the connection.
    ///
    /// Pending messages are drained before the client is dropped. The drain
    /// error, if any, is returned after the client has been released.
    #[tracing::instrument(skip(self), fields(address = %self.address))]
    pub async fn close(self) -> Result<(), async_nats::client::DrainError> {
        let drained = self.client.drain().await;
        drop(self.client);

        match &drained {
            Ok(()) => tracing::info!("NATS connection closed"),
            Err(error) => tracing::warn!(?error, "NATS drain failed, connection dropped"),
        }
        drained
    }
}

#[async_trait]
impl Sender for Nats {
    type Error = async_nats::PublishError;

    #[tracing::instrument(skip_all, fields(topic = %message.topic))]
    async fn send(&self, message: OutboundMessage) -> Result<(), Self::Error> {
        match message.headers.as_ref().and_then(header_map) {
            Some(headers) => {
                self.client
                    .publish_with_headers(message.topic, headers, message.body)
                    .await
            }
            None => self.client.publish(message.topic, message.body).await,
        }
    }

    fn server_address(&self) -> String {
        self.address.clone()
    }
}

/// Map wire headers onto a NATS header map. An empty map yields `None`, so
/// the message is published without a header block.
fn header_map(headers: &Headers) -> Option<async_nats::HeaderMap> {
    if headers.is_empty() {
        return None;
    }

    let mut map = async_nats::HeaderMap::new();
    for (key, value) in headers {
        map.insert(key.as_str(), value.as_str());
    }
    Some(map)
}

/// Error returned when connecting to a NATS server fails.
#[derive(Debug)]
pub struct ConnectError {
    context: SpanTrace,
    source: async_nats::ConnectError,
}

impl ConnectError {
    fn new(source: async_nats::ConnectError) -> Self {
        Self {
            context: SpanTrace::capture(),
            source,
        }
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Connect error: {}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_headers_map_to_none() {
        assert!(header_map(&Headers::new()).is_none());
    }

    #[test]
    fn headers_are_copied_verbatim() {
        let headers = Headers::from([
            ("traceparent".to_owned(), "00-abc-def-01".to_owned()),
            ("x-request-id".to_owned(), "abc".to_owned()),
        ]);

        let map = header_map(&headers).unwrap();

        assert_eq!(
            map.get("traceparent").map(|v| v.as_str()),
            Some("00-abc-def-01")
        );
        assert_eq!(map.get("x-request-id").map(|v| v.as_str()), Some("abc"));
        assert!(map.get("missing").is_none());
    }
}
