use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::NotifyError;

/// Render `payload` into a PNG QR code at `out` with the `qrencode` tool.
pub async fn render_qr(qrencode: &str, payload: &str, out: &Path) -> Result<(), NotifyError> {
    let status = Command::new(qrencode)
        .arg("-t")
        .arg("PNG")
        .arg("-o")
        .arg(out)
        .arg("--")
        .arg(payload)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .await
        .map_err(|source| NotifyError::Spawn {
            binary: qrencode.to_owned(),
            source,
        })?;
    if !status.success() {
        return Err(NotifyError::Failed {
            binary: qrencode.to_owned(),
            status,
        });
    }
    tracing::info!(path = %out.display(), "QR code saved");
    Ok(())
}
