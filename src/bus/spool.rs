//! Directory spool transport.
//!
//! ```text
//! <root>/<topic>/subscriptions/<subscription>/<message id>.msg
//! ```
//!
//! Publishing writes one file per existing subscription; a subscriber reads
//! the oldest file in its own directory and deletes it on ack. Anything not
//! acked is delivered again, so consumers must tolerate duplicates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngCore;

use super::{BusError, Delivery, Publisher, Subscriber};
use crate::store::disk::write_atomic;

const MESSAGE_EXT: &str = "msg";

fn check_name(name: &str) -> Result<(), BusError> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok { Ok(()) } else { Err(BusError::InvalidName(name.to_owned())) }
}

fn subscriptions_dir(root: &Path, topic: &str) -> PathBuf {
    root.join(topic).join("subscriptions")
}

/// Ids sort by publish time.
fn new_message_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{nanos:020}-{}", hex::encode(suffix))
}

#[derive(Debug, Clone)]
pub struct SpoolPublisher {
    root: PathBuf,
    topic: String,
}

impl SpoolPublisher {
    pub fn new(root: impl Into<PathBuf>, topic: &str) -> Result<Self, BusError> {
        check_name(topic)?;
        Ok(Self {
            root: root.into(),
            topic: topic.to_owned(),
        })
    }
}

#[async_trait::async_trait]
impl Publisher for SpoolPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<String, BusError> {
        let dir = subscriptions_dir(&self.root, &self.topic);
        std::fs::create_dir_all(&dir).map_err(|e| BusError::io(&dir, e))?;

        let id = new_message_id();
        let mut delivered = 0usize;
        for entry in std::fs::read_dir(&dir).map_err(|e| BusError::io(&dir, e))? {
            let entry = entry.map_err(|e| BusError::io(&dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let path = entry.path().join(format!("{id}.{MESSAGE_EXT}"));
            write_atomic(&path, payload).map_err(|e| BusError::io(&path, e))?;
            delivered += 1;
        }

        if delivered == 0 {
            tracing::warn!(topic = %self.topic, id = %id, "Published with no subscriptions; message dropped");
        } else {
            tracing::info!(topic = %self.topic, id = %id, subscriptions = delivered, "Published message");
        }
        Ok(id)
    }
}

#[derive(Debug)]
pub struct SpoolSubscriber {
    dir: PathBuf,
    poll_interval: Duration,
}

impl SpoolSubscriber {
    /// Bind `subscription` to `topic`, creating it if needed. Only messages
    /// published after the subscription exists are delivered.
    pub fn open(
        root: impl AsRef<Path>,
        topic: &str,
        subscription: &str,
        poll_interval: Duration,
    ) -> Result<Self, BusError> {
        check_name(topic)?;
        check_name(subscription)?;
        let dir = subscriptions_dir(root.as_ref(), topic).join(subscription);
        std::fs::create_dir_all(&dir).map_err(|e| BusError::io(&dir, e))?;
        tracing::info!(path = %dir.display(), "Listening for messages");
        Ok(Self { dir, poll_interval })
    }

    fn oldest(&self) -> Result<Option<PathBuf>, BusError> {
        let mut oldest: Option<PathBuf> = None;
        let entries = std::fs::read_dir(&self.dir).map_err(|e| BusError::io(&self.dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| BusError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MESSAGE_EXT) {
                continue;
            }
            if oldest.as_ref().is_none_or(|o| path < *o) {
                oldest = Some(path);
            }
        }
        Ok(oldest)
    }
}

#[async_trait::async_trait]
impl Subscriber for SpoolSubscriber {
    async fn receive(&mut self) -> Result<Delivery, BusError> {
        loop {
            if !self.dir.is_dir() {
                return Err(BusError::Closed);
            }
            if let Some(path) = self.oldest()? {
                let id = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_owned();
                match std::fs::read(&path) {
                    Ok(payload) => {
                        tracing::debug!(id = %id, bytes = payload.len(), "Received message");
                        return Ok(Delivery { id, payload });
                    }
                    // acked by a concurrent consumer between listing and reading
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(BusError::io(&path, e)),
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        check_name(&delivery.id)?;
        let path = self.dir.join(format!("{}.{MESSAGE_EXT}", delivery.id));
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BusError::io(&path, e)),
        }
        tracing::debug!(id = %delivery.id, "Acknowledged message");
        Ok(())
    }
}
