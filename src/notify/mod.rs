pub mod mail;
pub mod qr;

pub use mail::SendmailNotifier;
pub use qr::render_qr;

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{binary} exited with {status}")]
    Failed { binary: String, status: std::process::ExitStatus },
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid address {0:?}")]
    InvalidAddress(String),
}

/// Side channel handing a person a copy of the key image.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_key(&self, image: &Path, recipient: &str) -> Result<(), NotifyError>;
}
