//! Notification dispatch.
//!
//! Creates exactly one notification per (user, listing) and fans delivery
//! out to the user's active devices. The unique index behind
//! `create_pending` makes re-dispatch after a crash safe; everything past
//! it is best-effort delivery bookkeeping.

mod push;

pub use push::{HttpPushClient, PushError, PushPayload, PushProvider, PushReceipt};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::PushSettings;
use crate::ingest::IngestedListing;
use crate::models::{Device, Listing, Notification, NotificationStatus, SearchConfig};
use crate::repository::{DeviceRepository, DieselError, NotificationRepository};

#[derive(Clone)]
pub struct Dispatcher {
    notifications: NotificationRepository,
    devices: DeviceRepository,
    provider: Arc<dyn PushProvider>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        notifications: NotificationRepository,
        devices: DeviceRepository,
        provider: Arc<dyn PushProvider>,
        settings: &PushSettings,
    ) -> Self {
        Self {
            notifications,
            devices,
            provider,
            max_attempts: settings.max_attempts.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }

    /// Notify the config's owner about every listing they have not been
    /// notified about yet.
    ///
    /// Returns the number of notifications created. Pairs that already
    /// have a notification are skipped silently, which is what makes this
    /// safe to re-run after a crash between ingestion and dispatch.
    pub async fn dispatch(
        &self,
        config: &SearchConfig,
        listings: &[IngestedListing],
    ) -> Result<usize, DieselError> {
        let mut created = 0;

        for item in listings {
            let notification = match self
                .notifications
                .create_pending(&config.user_id, item.listing.id, &config.id)
                .await?
            {
                Some(n) => n,
                None => continue,
            };
            created += 1;

            self.deliver(&notification, &item.listing).await?;
        }

        if created > 0 {
            info!(
                user = %config.user_id,
                config = %config.id,
                created,
                "dispatched notifications"
            );
        }
        Ok(created)
    }

    /// Fan one notification out to the user's active devices.
    ///
    /// Devices fail independently; one dead token never blocks the rest.
    async fn deliver(
        &self,
        notification: &Notification,
        listing: &Listing,
    ) -> Result<(), DieselError> {
        let devices = self.devices.active_for_user(&notification.user_id).await?;
        if devices.is_empty() {
            // Left pending: the user has nowhere to be reached right now.
            debug!(user = %notification.user_id, "no active devices");
            return Ok(());
        }

        let payload = build_payload(listing);
        let mut any_accepted = false;
        let mut any_delivered = false;

        for device in devices {
            match self.send_with_retry(&device, &payload).await {
                Ok(PushReceipt::Delivered) => any_delivered = true,
                Ok(PushReceipt::Accepted) => any_accepted = true,
                Err(PushError::Permanent(reason)) => {
                    warn!(device = device.id, %reason, "deactivating device");
                    self.devices.deactivate(device.id).await?;
                }
                Err(PushError::Transient(reason)) => {
                    warn!(device = device.id, %reason, "delivery attempts exhausted");
                }
            }
        }

        let status = if any_delivered {
            NotificationStatus::Delivered
        } else if any_accepted {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        self.notifications.set_status(notification.id, status).await
    }

    /// Bounded retry on transient provider errors.
    async fn send_with_retry(
        &self,
        device: &Device,
        payload: &PushPayload,
    ) -> Result<PushReceipt, PushError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .provider
                .send(&device.push_token, device.platform, payload)
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(PushError::Transient(reason)) if attempt < self.max_attempts => {
                    debug!(device = device.id, attempt, %reason, "retrying push");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn build_payload(listing: &Listing) -> PushPayload {
    let body = match (listing.price, listing.currency.as_deref()) {
        (Some(price), Some(currency)) => {
            format!("{:.2} {}", price as f64 / 100.0, currency)
        }
        _ => "New listing matched your search".to_string(),
    };
    PushPayload {
        title: listing.title.clone(),
        body,
        data: serde_json::json!({
            "listing_id": listing.id,
            "url": listing.url,
        }),
    }
}
