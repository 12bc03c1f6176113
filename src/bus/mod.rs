pub mod spool;

pub use spool::{SpoolPublisher, SpoolSubscriber};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid name {0:?}")]
    InvalidName(String),
    #[error("Subscription closed")]
    Closed,
}

impl BusError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        BusError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// One delivered message. Redelivered until acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to the topic; returns the message id.
    async fn publish(&self, payload: &[u8]) -> Result<String, BusError>;
}

#[async_trait::async_trait]
pub trait Subscriber: Send {
    /// Wait for the next message on the subscription.
    async fn receive(&mut self) -> Result<Delivery, BusError>;
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError>;
}
