use std::sync::Arc;

use tokio::sync::Mutex;

use crate::transport::{OutboundMessage, Sender};

const DEFAULT_ADDRESS: &str = "memory://localhost";

/// In-memory transport for testing or local pipelines.
///
/// This transport stores messages in a shared queue and implements the
/// [`Sender`] trait. It is useful for:
/// - Unit and integration testing
/// - Simulating message delivery without a real broker
/// - Exercising failure paths via [`InMemory::failing`]
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct InMemory {
    /// Shared message queue
    msg_queue: Arc<Mutex<Vec<OutboundMessage>>>,
    /// Reported connection address
    address: String,
    /// When set, every send fails with this reason
    failure: Option<String>,
}

impl InMemory {
    /// Create a transport whose every send fails with `reason`.
    ///
    /// Failed sends are not recorded in the queue.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Override the address reported by [`Sender::server_address`].
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Return all messages that have been "sent" and clear the internal queue.
    ///
    /// Primarily intended for testing purposes.
    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        let mut queue = self.msg_queue.lock().await;
        std::mem::take(&mut *queue)
    }
}

impl Default for InMemory {
    /// Create a new empty in-memory transport.
    fn default() -> Self {
        Self {
            msg_queue: Arc::new(Mutex::new(Vec::new())),
            address: DEFAULT_ADDRESS.to_owned(),
            failure: None,
        }
    }
}

#[async_trait::async_trait]
impl Sender for InMemory {
    type Error = std::io::Error;

    /// "Send" a message by appending it to the in-memory queue.
    #[tracing::instrument(skip_all, fields(topic = %message.topic))]
    async fn send(&self, message: OutboundMessage) -> Result<(), Self::Error> {
        if let Some(reason) = &self.failure {
            tracing::debug!(%reason, "In-memory send rejected");
            return Err(std::io::Error::other(reason.clone()));
        }

        tracing::info!(
            headers = ?message.headers,
            bytes = message.body.len(),
            "Message sent to in-memory queue",
        );
        self.msg_queue.lock().await.push(message);
        Ok(())
    }

    fn server_address(&self) -> String {
        self.address.clone()
    }
}
