mod transport;

pub use transport::{BeaconTransport, DeliveryReceipt, DeliveryTransport, HttpTransport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use crate::models::FlushPayload;
use crate::store::{BackupRecord, BackupStore};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Delivers flush payloads to the collector with three strategies: awaited
/// periodic sends, a one-shot final send preferring the beacon hand-off with
/// an awaited keep-alive fallback, and a disk backup written before every
/// network attempt and cleared only on confirmed delivery.
pub struct FlushPipeline<P, U>
where
    P: DeliveryTransport,
    U: DeliveryTransport,
{
    periodic: P,
    beacon: U,
    /// Awaited fallback for the final flush; same shape as `periodic` but
    /// built with a short timeout so it cannot hold up shutdown.
    fallback: P,
    /// `None` when the backup database could not be opened; tracking and
    /// network flushes then continue in-memory only.
    store: Option<BackupStore>,
    storage_key: String,
    backup_max_age: Duration,
    final_sent: AtomicBool,
}

impl<P, U> FlushPipeline<P, U>
where
    P: DeliveryTransport,
    U: DeliveryTransport,
{
    pub fn new(
        periodic: P,
        beacon: U,
        fallback: P,
        store: Option<BackupStore>,
        storage_key: String,
        backup_max_age: Duration,
    ) -> Self {
        Self {
            periodic,
            beacon,
            fallback,
            store,
            storage_key,
            backup_max_age,
            final_sent: AtomicBool::new(false),
        }
    }

    /// Ordinary periodic flush. On success returns any session id the
    /// collector assigned and clears the backup. Transport errors propagate
    /// to the caller for logging; the next tick retries with a fresh
    /// snapshot, so nothing is retried inline.
    pub async fn flush(&self, payload: FlushPayload) -> Result<Option<String>> {
        self.write_backup(&payload).await;

        let receipt = self.periodic.deliver(payload).await?;
        if receipt.confirmed {
            self.clear_backup().await;
        }
        Ok(receipt.session_id)
    }

    /// Final flush, sent at most once per session regardless of how many
    /// shutdown signals arrive. Prefers the beacon hand-off; if that fails,
    /// falls back to a short awaited request. All errors are swallowed so
    /// shutdown is never blocked.
    pub async fn flush_final(&self, mut payload: FlushPayload) {
        if self.final_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        payload.is_final = true;
        self.write_backup(&payload).await;

        match self.beacon.deliver(payload.clone()).await {
            Ok(receipt) => {
                if receipt.confirmed {
                    self.clear_backup().await;
                }
                log_info!("final flush handed off");
            }
            Err(err) => {
                log_warn!("beacon hand-off failed, using awaited fallback: {err:#}");
                match self.fallback.deliver(payload).await {
                    Ok(receipt) => {
                        if receipt.confirmed {
                            self.clear_backup().await;
                        }
                    }
                    Err(err) => {
                        log_warn!("final flush fallback failed: {err:#}");
                    }
                }
            }
        }
    }

    /// Re-sends a leftover backup from a previous page view, once, marked
    /// non-final, and deletes it regardless of the outcome. Backups older
    /// than the configured maximum age are discarded without a send.
    pub async fn recover_backup(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(record) = store.load_backup(&self.storage_key).await? else {
            return Ok(());
        };

        // Delete first so the resend happens at most once.
        store.clear_backup(&self.storage_key).await?;

        let age = Utc::now().signed_duration_since(record.saved_at);
        let max_age =
            chrono::Duration::from_std(self.backup_max_age).unwrap_or(chrono::Duration::hours(1));
        if age > max_age {
            log_info!("discarding stale flush backup ({}s old)", age.num_seconds());
            return Ok(());
        }

        let mut payload = record.payload;
        payload.is_final = false;
        if payload.session_id.is_none() {
            payload.session_id = record.session_id;
        }

        match self.periodic.deliver(payload).await {
            Ok(_) => log_info!("re-sent flush backup from previous session"),
            Err(err) => log_warn!("failed to re-send flush backup: {err:#}"),
        }
        Ok(())
    }

    /// Backup writes are best-effort: a full disk or locked database must
    /// never interrupt tracking.
    async fn write_backup(&self, payload: &FlushPayload) {
        let Some(store) = &self.store else {
            return;
        };
        let record = BackupRecord {
            payload: payload.clone(),
            session_id: payload.session_id.clone(),
            is_final: payload.is_final,
            saved_at: Utc::now(),
        };
        if let Err(err) = store.save_backup(&self.storage_key, &record).await {
            log_warn!("failed to persist flush backup: {err:#}");
        }
    }

    async fn clear_backup(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.clear_backup(&self.storage_key).await {
            log_warn!("failed to clear flush backup: {err:#}");
        }
    }
}
