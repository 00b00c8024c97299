#![doc = include_str!("../README.md")]

pub mod carrier;
pub mod envelope;
mod publisher;
pub mod transport;

#[doc(inline)]
pub use envelope::{Envelope, HeaderValue, Metadata};

#[doc(inline)]
pub use carrier::{HeaderCarrier, Headers};

#[doc(inline)]
pub use transport::{InMemory, OutboundMessage, Sender};

#[doc(inline)]
pub use publisher::{
    DefaultPublishHook, PublishError, PublishErrorKind, PublishHook, Publisher, PublisherConfig,
    attributes,
};
