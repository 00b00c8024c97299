use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Typed message container handed to the [`Publisher`](crate::Publisher).
///
/// `Envelope` bundles an application payload together with the metadata needed
/// to route it: the destination topic and a set of caller supplied headers.
/// The whole envelope, payload and metadata alike, is what goes on the wire.
///
/// ## Design
///
/// - `P` is the payload type and only needs to be `serde::Serialize`
/// - `V` is the header value type. The default `String` form maps one to one
///   onto wire headers; `serde_json::Value` is accepted for callers that keep
///   loosely typed metadata, see [`HeaderValue`]
///
/// The envelope performs no validation of its own. An empty topic is rejected
/// by the publisher, not here.
///
/// ## Example
///
/// ```rust
/// use tracepost::Envelope;
///
/// let envelope: Envelope<u32> = Envelope::new(42)
///     .with_topic("orders.created")
///     .with_header("x-request-id", "abc");
///
/// assert_eq!(envelope.topic(), "orders.created");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P, V = String> {
    /// Message payload.
    pub payload: P,
    /// Routing and header metadata.
    pub metadata: Metadata<V>,
}

/// Routing metadata attached to an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata<V = String> {
    /// Destination topic (NATS subject).
    pub topic: String,
    /// Caller supplied headers, copied onto the outbound message.
    #[serde(default = "HashMap::new")]
    pub headers: HashMap<String, V>,
}

impl<V> Default for Metadata<V> {
    fn default() -> Self {
        Self {
            topic: String::new(),
            headers: HashMap::new(),
        }
    }
}

impl<V> Metadata<V> {
    /// Create metadata addressed to `topic` with no headers.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            headers: HashMap::new(),
        }
    }
}

impl<P, V> Envelope<P, V> {
    /// Wrap `payload` with empty metadata.
    ///
    /// The topic must be filled in with [`with_topic`](Self::with_topic) before
    /// the envelope is published.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            metadata: Metadata::default(),
        }
    }

    /// Set the destination topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.metadata.topic = topic.into();
        self
    }

    /// Add a single header, replacing any previous value under the same key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<V>) -> Self {
        self.metadata.headers.insert(key.into(), value.into());
        self
    }

    /// Add every header yielded by `headers`.
    pub fn with_headers<K, I>(mut self, headers: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.metadata
            .headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// Destination topic, empty until set.
    pub fn topic(&self) -> &str {
        &self.metadata.topic
    }

    /// Caller supplied headers.
    pub fn headers(&self) -> &HashMap<String, V> {
        &self.metadata.headers
    }
}

impl<P, V> From<(Metadata<V>, P)> for Envelope<P, V> {
    fn from(value: (Metadata<V>, P)) -> Self {
        Envelope {
            metadata: value.0,
            payload: value.1,
        }
    }
}

/// Header values that can be written verbatim onto a wire header.
///
/// Most transports only carry string header values, so every envelope header
/// is rendered through this trait before it reaches the outbound message.
pub trait HeaderValue {
    /// Render the value as a wire header string.
    fn to_header_value(&self) -> String;
}

impl HeaderValue for String {
    fn to_header_value(&self) -> String {
        self.clone()
    }
}

/// Strings are written without quotes, everything else as compact JSON.
impl HeaderValue for serde_json::Value {
    fn to_header_value(&self) -> String {
        match self {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_envelope_has_empty_metadata() {
        let envelope: Envelope<_> = Envelope::new(json!({"id": 42}));

        assert_eq!(envelope.topic(), "");
        assert!(envelope.headers().is_empty());
    }

    #[test]
    fn envelope_serializes_payload_and_metadata() {
        let envelope: Envelope<_> = Envelope::new(json!({"id": 42}))
            .with_topic("orders.created")
            .with_header("x-request-id", "abc");

        let encoded = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            encoded,
            json!({
                "payload": {"id": 42},
                "metadata": {
                    "topic": "orders.created",
                    "headers": {"x-request-id": "abc"}
                }
            })
        );
    }

    #[test]
    fn with_header_overwrites_existing_key() {
        let envelope: Envelope<_> = Envelope::new(())
            .with_header("k", "first")
            .with_header("k", "second");

        assert_eq!(envelope.headers().len(), 1);
        assert_eq!(envelope.headers()["k"], "second");
    }

    #[test]
    fn header_keys_are_case_sensitive() {
        let envelope: Envelope<_> = Envelope::new(())
            .with_header("Trace", "a")
            .with_header("trace", "b");

        assert_eq!(envelope.headers().len(), 2);
    }

    #[test]
    fn tuple_conversion_builds_envelope() {
        let envelope: Envelope<u32> = (Metadata::new("user.created"), 7).into();

        assert_eq!(envelope.topic(), "user.created");
        assert_eq!(envelope.payload, 7);
    }

    #[test]
    fn json_header_values_render_without_quotes_for_strings() {
        assert_eq!(json!("abc").to_header_value(), "abc");
        assert_eq!(json!(12).to_header_value(), "12");
        assert_eq!(json!({"a": true}).to_header_value(), r#"{"a":true}"#);
    }
}
