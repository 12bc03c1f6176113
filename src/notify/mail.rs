use std::path::Path;
use std::process::Stdio;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Notifier, NotifyError};

pub const SUBJECT: &str = "[KEY] your room key is delivered.";
pub const BODY: &str = "Please use below key.";

/// Mails the key image through a local `sendmail`-compatible MTA.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    binary: String,
    from: String,
}

impl SendmailNotifier {
    pub fn new(binary: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            from: from.into(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for SendmailNotifier {
    async fn send_key(&self, image: &Path, recipient: &str) -> Result<(), NotifyError> {
        check_address(&self.from)?;
        check_address(recipient)?;

        let bytes = tokio::fs::read(image).await?;
        let filename = image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("key.png");
        let message = build_message(&self.from, recipient, filename, &bytes, &new_boundary());

        let mut child = Command::new(&self.binary)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| NotifyError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        let status = child.wait().await?;
        if !status.success() {
            return Err(NotifyError::Failed {
                binary: self.binary.clone(),
                status,
            });
        }
        tracing::info!(recipient, attachment = filename, "Key mailed");
        Ok(())
    }
}

fn check_address(addr: &str) -> Result<(), NotifyError> {
    let ok = addr.contains('@') && !addr.chars().any(|c| c.is_control() || c.is_whitespace());
    if ok { Ok(()) } else { Err(NotifyError::InvalidAddress(addr.to_owned())) }
}

fn new_boundary() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("doorlens-{}", hex::encode(bytes))
}

/// `multipart/mixed` message: a short text part and the image as a base64
/// attachment.
pub fn build_message(from: &str, to: &str, filename: &str, attachment: &[u8], boundary: &str) -> String {
    let encoded = STANDARD.encode(attachment);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }

    format!(
        "From: {from}\r\n\
         To: {to}\r\n\
         Subject: {SUBJECT}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\
         \r\n\
         --{boundary}\r\n\
         Content-Type: text/plain; charset=\"utf-8\"\r\n\
         Content-Transfer-Encoding: 7bit\r\n\
         \r\n\
         {BODY}\r\n\
         --{boundary}\r\n\
         Content-Type: application/octet-stream\r\n\
         Content-Transfer-Encoding: base64\r\n\
         Content-Disposition: attachment; filename=\"{filename}\"\r\n\
         \r\n\
         {wrapped}\
         --{boundary}--\r\n"
    )
}
