use std::path::Path;

use crate::bus::{BusError, Publisher};
use crate::notify::{Notifier, NotifyError};

/// Handing a minted key to its consumers failed. The key itself is still
/// valid; retry distribution instead of minting again.
#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    #[error("Publish failed: {0}")]
    Publish(#[source] BusError),
    #[error("Notification failed (key was published as {message_id}): {source}")]
    Notify {
        message_id: String,
        #[source]
        source: NotifyError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReport {
    pub message_id: String,
    pub notified: Option<String>,
}

/// Where and to whom the QR image goes.
pub struct Recipient<'a> {
    pub notifier: &'a dyn Notifier,
    pub address: &'a str,
    pub image: &'a Path,
}

/// Publish the payload to the device, then mail the image. Without a
/// recipient only the publish happens.
pub async fn distribute(
    publisher: &dyn Publisher,
    payload: &str,
    recipient: Option<Recipient<'_>>,
) -> Result<DistributionReport, DistributionError> {
    let message_id = publisher
        .publish(payload.as_bytes())
        .await
        .map_err(DistributionError::Publish)?;

    let notified = match recipient {
        None => {
            tracing::info!("No recipient configured, skipping notification");
            None
        }
        Some(r) => {
            if let Err(source) = r.notifier.send_key(r.image, r.address).await {
                return Err(DistributionError::Notify { message_id, source });
            }
            Some(r.address.to_owned())
        }
    };
    Ok(DistributionReport { message_id, notified })
}
