//! Header carrier used for trace context propagation.
//!
//! A propagator never sees an [`OutboundMessage`](crate::transport::OutboundMessage)
//! directly. It reads and writes trace headers through a [`HeaderCarrier`],
//! which presents the message's header field as a flat string map via the
//! OpenTelemetry [`Extractor`] and [`Injector`] traits.

use std::collections::HashMap;

use opentelemetry::propagation::{Extractor, Injector};

/// Wire header map of an outbound message. Keys are case-sensitive.
pub type Headers = HashMap<String, String>;

/// Mutable view over one outbound message's headers.
///
/// The carrier is created per publish call and borrows the header field of
/// the message being built. If the message has no header map yet, one is
/// allocated on construction, so `get`/`set` never have to deal with a
/// missing container.
#[derive(Debug)]
pub struct HeaderCarrier<'a> {
    headers: &'a mut Headers,
}

impl<'a> HeaderCarrier<'a> {
    /// Wrap `headers`, initializing it to an empty map if absent.
    pub fn new(headers: &'a mut Option<Headers>) -> Self {
        Self {
            headers: ensure_initialized(headers),
        }
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Insert `value` under `key`, overwriting any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// All header keys currently present, in no particular order.
    pub fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }

    /// Copy every pair of `headers` into the carrier.
    pub fn extend<K, V, I>(&mut self, headers: I)
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in headers {
            self.set(key, value);
        }
    }

    /// The underlying header map.
    pub fn headers(&self) -> &Headers {
        self.headers
    }
}

fn ensure_initialized(headers: &mut Option<Headers>) -> &mut Headers {
    headers.get_or_insert_with(Headers::new)
}

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderCarrier::get(self, key)
    }

    fn keys(&self) -> Vec<&str> {
        HeaderCarrier::keys(self)
    }
}

impl Injector for HeaderCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        HeaderCarrier::set(self, key, value);
    }
}
