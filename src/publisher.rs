//! Typed publisher with trace context propagation.
//!
//! A [`Publisher`] turns an [`Envelope`] into an [`OutboundMessage`] and hands
//! it to a [`Sender`]. When propagation is enabled, every publish call:
//!
//! - Extracts any trace context already present in the outbound headers
//! - Starts a producer span as a child of that context
//! - Injects the span's context back into the headers for the consumer
//! - Records transport failures on the span
//!
//! The span is owned by a guard and ends exactly once, whichever way the call
//! returns. Calls rejected before a message exists (empty topic, encoding
//! failure) never start a span.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{self, Poll},
};

use opentelemetry::{
    Context, KeyValue,
    global::{self, BoxedTracer},
    propagation::TextMapPropagator,
    trace::{SpanKind, SpanRef, Status, TraceContextExt as _, Tracer},
};
use serde::{Deserialize, Serialize};
use tower::Service;
use tracing_error::SpanTrace;

use crate::{
    Envelope,
    carrier::HeaderCarrier,
    envelope::HeaderValue,
    transport::{OutboundMessage, Sender},
};

/// Span attribute keys set on every publish span.
///
/// The destination is written under both the legacy and the current semantic
/// convention key.
pub mod attributes {
    pub const MESSAGING_SYSTEM: &str = "messaging.system";
    pub const MESSAGING_DESTINATION: &str = "messaging.destination";
    pub const MESSAGING_DESTINATION_NAME: &str = "messaging.destination.name";
    pub const MESSAGING_DESTINATION_KIND: &str = "messaging.destination_kind";
    pub const NETWORK_PROTOCOL_NAME: &str = "network.protocol.name";
    pub const SERVER_ADDRESS: &str = "server.address";

    /// Value of [`MESSAGING_DESTINATION_KIND`].
    pub const DESTINATION_KIND_TOPIC: &str = "topic";
}

/// Publisher settings.
///
/// Every field has a default, so a partial document deserializes cleanly:
///
/// ```rust
/// use tracepost::PublisherConfig;
///
/// let config: PublisherConfig = serde_json::from_str(r#"{"propagation": false}"#).unwrap();
/// assert!(!config.propagation);
/// assert_eq!(config.messaging_system, "nats");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Instrumentation scope name of the tracer obtained from the global provider.
    pub tracer_name: String,
    /// Name given to publish spans.
    pub span_name: String,
    /// Value of the `messaging.system` attribute.
    pub messaging_system: String,
    /// Value of the `network.protocol.name` attribute.
    pub protocol: String,
    /// Start spans and propagate trace context through message headers.
    pub propagation: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            tracer_name: env!("CARGO_PKG_NAME").to_owned(),
            span_name: "publish".to_owned(),
            messaging_system: "nats".to_owned(),
            protocol: "nats".to_owned(),
            propagation: true,
        }
    }
}

impl PublisherConfig {
    /// Set the instrumentation scope name used with the global tracer provider.
    pub fn with_tracer_name(mut self, name: impl Into<String>) -> Self {
        self.tracer_name = name.into();
        self
    }

    /// Set the name of publish spans.
    pub fn with_span_name(mut self, name: impl Into<String>) -> Self {
        self.span_name = name.into();
        self
    }

    /// Set the `messaging.system` span attribute.
    pub fn with_messaging_system(mut self, system: impl Into<String>) -> Self {
        self.messaging_system = system.into();
        self
    }

    /// Set the `network.protocol.name` span attribute.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Enable or disable span creation and header propagation.
    ///
    /// With propagation disabled, caller headers are still copied onto the
    /// outbound message.
    pub fn with_propagation(mut self, enabled: bool) -> Self {
        self.propagation = enabled;
        self
    }
}

/// Typed, trace-propagating publisher.
///
/// Generic parameters:
/// - `S`: sender backend
/// - `Tr`: OpenTelemetry tracer, the global one by default
/// - `HK`: hook implementation for lifecycle events
///
/// Cloning is cheap and clones share the sender, tracer and hook.
pub struct Publisher<S, Tr = BoxedTracer, HK = DefaultPublishHook> {
    sender: S,
    tracer: Arc<Tr>,
    propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
    hook: Arc<HK>,
    config: Arc<PublisherConfig>,
    server_address: String,
}

impl<S: Sender> Publisher<S> {
    /// Create a publisher bound to `sender`.
    ///
    /// The tracer is taken from the global tracer provider under
    /// `config.tracer_name`. Trace headers are read and written with the
    /// globally registered text map propagator, looked up on every call, unless
    /// one is set with [`with_propagator`](Self::with_propagator). The sender's
    /// connection address is read once, here.
    pub fn new(sender: S, config: PublisherConfig) -> Self {
        let tracer = global::tracer(config.tracer_name.clone());
        let server_address = sender.server_address();

        Self {
            sender,
            tracer: Arc::new(tracer),
            propagator: None,
            hook: Arc::new(DefaultPublishHook),
            config: Arc::new(config),
            server_address,
        }
    }
}

impl<S, Tr, HK> Publisher<S, Tr, HK> {
    /// Replace the tracer used to start publish spans.
    pub fn with_tracer<Tr2: Tracer>(self, tracer: Tr2) -> Publisher<S, Tr2, HK> {
        Publisher {
            sender: self.sender,
            tracer: Arc::new(tracer),
            propagator: self.propagator,
            hook: self.hook,
            config: self.config,
            server_address: self.server_address,
        }
    }

    /// Use `propagator` instead of the global one to read and write trace
    /// headers.
    pub fn with_propagator<P>(mut self, propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagator = Some(Arc::new(propagator));
        self
    }

    /// Replace the publisher hook while keeping all other generics unchanged.
    pub fn with_hook<HK2: PublishHook>(self, hook: HK2) -> Publisher<S, Tr, HK2> {
        Publisher {
            sender: self.sender,
            tracer: self.tracer,
            propagator: self.propagator,
            hook: Arc::new(hook),
            config: self.config,
            server_address: self.server_address,
        }
    }

    /// Settings the publisher was built with.
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Connection address captured when the publisher was built.
    pub fn server_address(&self) -> &str {
        &self.server_address
    }
}

impl<S, Tr, HK> Publisher<S, Tr, HK>
where
    S: Sender + Sync,
    Tr: Tracer + Send + Sync,
    Tr::Span: Send + Sync + 'static,
    HK: PublishHook,
{
    /// Publish `envelope` to its topic.
    ///
    /// `cx` is the ambient trace context. Trace headers already present on the
    /// envelope take precedence over it when choosing the span's parent.
    ///
    /// Returns an error without contacting the transport if the topic is empty
    /// or the envelope cannot be encoded. Transport failures are recorded on
    /// the publish span and returned as [`PublishErrorKind::Transport`].
    #[tracing::instrument(skip_all, fields(topic = %envelope.metadata.topic))]
    pub async fn publish<P, V>(
        &self,
        cx: &Context,
        envelope: Envelope<P, V>,
    ) -> Result<(), PublishError>
    where
        P: Serialize,
        V: Serialize + HeaderValue,
    {
        let topic = envelope.metadata.topic.clone();
        if topic.trim().is_empty() {
            let error = PublishError::invalid_topic();
            self.hook.on_rejected(&topic, &error);
            return Err(error);
        }

        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(err) => {
                let error = PublishError::encoding(err);
                self.hook.on_rejected(&topic, &error);
                return Err(error);
            }
        };

        let mut message = OutboundMessage::new(topic.clone(), body);
        let mut carrier = HeaderCarrier::new(&mut message.headers);
        carrier.extend(
            envelope
                .metadata
                .headers
                .iter()
                .map(|(key, value)| (key.as_str(), value.to_header_value())),
        );

        let span = self
            .config
            .propagation
            .then(|| self.start_span(cx, &mut carrier, &topic));

        self.hook.on_publish(&message);

        match self.sender.send(message).await {
            Ok(()) => {
                self.hook.on_published(&topic);
                Ok(())
            }
            Err(err) => {
                let cause: tower::BoxError = err.into();
                if let Some(span) = &span {
                    span.record_failure(cause.as_ref());
                }
                let error = PublishError::transport(cause);
                self.hook.on_transport_error(&topic, &error);
                Err(error)
            }
        }
    }

    fn start_span(&self, cx: &Context, carrier: &mut HeaderCarrier<'_>, topic: &str) -> SpanGuard {
        let parent = self.with_propagator_ref(|p| p.extract_with_context(cx, &*carrier));

        let span = self
            .tracer
            .span_builder(self.config.span_name.clone())
            .with_kind(SpanKind::Producer)
            .with_attributes(self.span_attributes(topic))
            .start_with_context(self.tracer.as_ref(), &parent);
        let guard = SpanGuard::new(parent.with_span(span));

        self.with_propagator_ref(|p| p.inject_context(guard.context(), &mut *carrier));
        guard
    }

    fn with_propagator_ref<T>(&self, mut f: impl FnMut(&dyn TextMapPropagator) -> T) -> T {
        match &self.propagator {
            Some(propagator) => f(propagator.as_ref()),
            None => global::get_text_map_propagator(f),
        }
    }

    fn span_attributes(&self, topic: &str) -> Vec<KeyValue> {
        vec![
            KeyValue::new(attributes::MESSAGING_DESTINATION, topic.to_owned()),
            KeyValue::new(attributes::MESSAGING_DESTINATION_NAME, topic.to_owned()),
            KeyValue::new(
                attributes::MESSAGING_SYSTEM,
                self.config.messaging_system.clone(),
            ),
            KeyValue::new(
                attributes::MESSAGING_DESTINATION_KIND,
                attributes::DESTINATION_KIND_TOPIC,
            ),
            KeyValue::new(attributes::NETWORK_PROTOCOL_NAME, self.config.protocol.clone()),
            KeyValue::new(attributes::SERVER_ADDRESS, self.server_address.clone()),
        ]
    }
}

impl<S: Clone, Tr, HK> Clone for Publisher<S, Tr, HK> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            tracer: Arc::clone(&self.tracer),
            propagator: self.propagator.clone(),
            hook: Arc::clone(&self.hook),
            config: Arc::clone(&self.config),
            server_address: self.server_address.clone(),
        }
    }
}

/// `tower::Service` implementation publishing with [`Context::current`] as the
/// ambient trace context.
impl<S, Tr, HK, P, V> Service<Envelope<P, V>> for Publisher<S, Tr, HK>
where
    S: Sender + Clone + Send + Sync + 'static,
    Tr: Tracer + Send + Sync + 'static,
    Tr::Span: Send + Sync + 'static,
    HK: PublishHook + 'static,
    P: Serialize + Send + 'static,
    V: Serialize + HeaderValue + Send + 'static,
{
    type Response = ();
    type Error = PublishError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Envelope<P, V>) -> Self::Future {
        let publisher = self.clone();
        let cx = Context::current();

        Box::pin(async move { publisher.publish(&cx, req).await })
    }
}

/// Owns the context of an active publish span and ends the span on drop.
struct SpanGuard {
    cx: Context,
}

impl SpanGuard {
    fn new(cx: Context) -> Self {
        Self { cx }
    }

    fn context(&self) -> &Context {
        &self.cx
    }

    fn span(&self) -> SpanRef<'_> {
        self.cx.span()
    }

    fn record_failure(&self, err: &(dyn std::error::Error + 'static)) {
        let span = self.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.span().end();
    }
}

/// Error returned by [`Publisher::publish`].
///
/// Each error captures:
/// - The underlying error kind
/// - A tracing span backtrace for improved diagnostics
#[derive(Debug)]
pub struct PublishError {
    context: SpanTrace,
    kind: PublishErrorKind,
}

/// Publish errors kind.
#[derive(Debug)]
pub enum PublishErrorKind {
    /// The envelope topic was empty.
    InvalidTopic,
    /// The envelope could not be serialized.
    Encoding(serde_json::Error),
    /// The sender backend failed to publish.
    Transport(tower::BoxError),
}

impl PublishError {
    fn invalid_topic() -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: PublishErrorKind::InvalidTopic,
        }
    }

    fn encoding(err: serde_json::Error) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: PublishErrorKind::Encoding(err),
        }
    }

    fn transport(err: tower::BoxError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: PublishErrorKind::Transport(err),
        }
    }

    /// Classification of the failure.
    pub fn kind(&self) -> &PublishErrorKind {
        &self.kind
    }

    /// The envelope was rejected for its topic.
    pub fn is_invalid_topic(&self) -> bool {
        matches!(self.kind, PublishErrorKind::InvalidTopic)
    }

    /// The envelope could not be serialized.
    pub fn is_encoding(&self) -> bool {
        matches!(self.kind, PublishErrorKind::Encoding(_))
    }

    /// The sender backend failed.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, PublishErrorKind::Transport(_))
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            PublishErrorKind::InvalidTopic => writeln!(f, "Invalid topic: topic is empty"),
            PublishErrorKind::Encoding(err) => writeln!(f, "Encoding error: {err}"),
            PublishErrorKind::Transport(err) => writeln!(f, "Transport error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            PublishErrorKind::InvalidTopic => None,
            PublishErrorKind::Encoding(err) => Some(err),
            PublishErrorKind::Transport(err) => Some(err.as_ref()),
        }
    }
}

/// Hook trait for observing publish calls.
///
/// Hooks are invoked synchronously on the publishing task and should avoid
/// heavy or blocking work. Typical use cases include logging and metrics.
pub trait PublishHook: Send + Sync {
    fn on_publish(&self, message: &OutboundMessage);
    fn on_published(&self, topic: &str);
    fn on_rejected(&self, topic: &str, error: &dyn std::error::Error);
    fn on_transport_error(&self, topic: &str, error: &dyn std::error::Error);
}

/// Default publish hook implementation.
///
/// Logs lifecycle events using `tracing`.
pub struct DefaultPublishHook;

impl PublishHook for DefaultPublishHook {
    fn on_publish(&self, message: &OutboundMessage) {
        tracing::debug!(bytes = message.body.len(), "Publishing message");
    }

    fn on_published(&self, topic: &str) {
        tracing::debug!(topic, "Message published");
    }

    fn on_rejected(&self, topic: &str, error: &dyn std::error::Error) {
        tracing::warn!(topic, %error, "Message rejected before publish");
    }

    fn on_transport_error(&self, topic: &str, error: &dyn std::error::Error) {
        tracing::error!(topic, %error, "Error publishing message");
    }
}
