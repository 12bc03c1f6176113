use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::DecoderError;

/// Frame source producing the text of every code decoded in view.
#[async_trait::async_trait]
pub trait PayloadSource: Send {
    /// Payloads decoded during one frame; empty when nothing was in view.
    async fn poll(&mut self) -> Result<Vec<String>, DecoderError>;

    /// Drop every payload already decoded but not yet polled; returns how
    /// many were dropped.
    fn discard_pending(&mut self) -> usize {
        0
    }

    /// Release the underlying device.
    async fn close(&mut self) {}
}

#[async_trait::async_trait]
impl<S: PayloadSource + ?Sized> PayloadSource for Box<S> {
    async fn poll(&mut self) -> Result<Vec<String>, DecoderError> {
        (**self).poll().await
    }

    fn discard_pending(&mut self) -> usize {
        (**self).discard_pending()
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

/// Payloads pushed in-process through a channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
    frame_timeout: Duration,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<String>, frame_timeout: Duration) -> Self {
        Self { rx, frame_timeout }
    }
}

#[async_trait::async_trait]
impl PayloadSource for ChannelSource {
    async fn poll(&mut self) -> Result<Vec<String>, DecoderError> {
        let first = match tokio::time::timeout(self.frame_timeout, self.rx.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(None) => return Err(DecoderError::Closed),
            Ok(Some(payload)) => payload,
        };
        let mut payloads = vec![first];
        while let Ok(more) = self.rx.try_recv() {
            payloads.push(more);
        }
        Ok(payloads)
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// Camera decoder running as a `zbarcam --raw` child process; each stdout
/// line is one decoded code.
pub struct ZbarSource {
    child: Child,
    reader: JoinHandle<()>,
    frames: ChannelSource,
}

impl ZbarSource {
    pub fn spawn(binary: &str, video_device: &str, frame_timeout: Duration) -> Result<Self, DecoderError> {
        let mut child = Command::new(binary)
            .args(["--raw", "--nodisplay", "--quiet", video_device])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DecoderError::Spawn(format!("{binary}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DecoderError::Spawn("decoder stdout not captured".into()))?;

        let (tx, rx) = mpsc::channel::<String>(64);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        tracing::trace!(bytes = line.len(), "Decoded code");
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Decoder read error: {e}");
                        break;
                    }
                }
            }
            tracing::debug!("Decoder reader exiting");
        });

        tracing::info!(binary, video_device, "Decoder started");
        Ok(Self {
            child,
            reader,
            frames: ChannelSource::new(rx, frame_timeout),
        })
    }
}

#[async_trait::async_trait]
impl PayloadSource for ZbarSource {
    async fn poll(&mut self) -> Result<Vec<String>, DecoderError> {
        self.frames.poll().await
    }

    fn discard_pending(&mut self) -> usize {
        self.frames.discard_pending()
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Decoder already gone: {e}");
        }
        self.reader.abort();
        self.frames.close().await;
        tracing::info!("Decoder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_frame_on_timeout() {
        let (_tx, rx) = mpsc::channel(4);
        let mut source = ChannelSource::new(rx, Duration::from_millis(10));
        assert!(source.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_frame_collects_all_pending() {
        let (tx, rx) = mpsc::channel(4);
        tx.send("a".to_string()).await.unwrap();
        tx.send("b".to_string()).await.unwrap();
        let mut source = ChannelSource::new(rx, Duration::from_millis(10));
        assert_eq!(source.poll().await.unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_discard_pending_empties_queue() {
        let (tx, rx) = mpsc::channel(4);
        tx.send("a".to_string()).await.unwrap();
        tx.send("b".to_string()).await.unwrap();
        let mut source = ChannelSource::new(rx, Duration::from_millis(10));
        assert_eq!(source.discard_pending(), 2);
        assert!(source.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_is_error() {
        let (tx, rx) = mpsc::channel::<String>(4);
        drop(tx);
        let mut source = ChannelSource::new(rx, Duration::from_millis(10));
        assert!(matches!(source.poll().await, Err(DecoderError::Closed)));
    }

    #[tokio::test]
    async fn test_missing_decoder_binary() {
        let res = ZbarSource::spawn("/nonexistent/zbarcam", "/dev/video0", Duration::from_millis(10));
        assert!(matches!(res, Err(DecoderError::Spawn(_))));
    }
}
