//! Background job: event-log retention.
//!
//! Runs hourly and deletes events past the configured retention window.
//! The counter struct derived from the log is an optimization; the log
//! itself is the source of truth, so DELETE is safe here.

use std::time::Duration;

use tokio::time;

use crate::store::Store;

/// Spawn the retention task. Call this once at startup.
pub fn spawn(store: Store, retention_days: i64) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;
            match store.delete_events_older_than(retention_days).await {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::info!(deleted, retention_days, "expired events removed");
                }
                Err(e) => {
                    tracing::error!("event cleanup failed: {}", e);
                }
            }
        }
    });
}
