//! Force-releases leases that have outlived `force_release_seconds` without
//! ever being cleanly returned. Runs opportunistically before every lease
//! decision, on `/stats`, and on its own periodic timer — so no request
//! can observe a lease older than the configured ceiling.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::{errors::Result, store::Store};

pub async fn force_release(store: &Store, force_release_seconds: i64, now: i64) -> Result<()> {
    let cutoff = now - force_release_seconds;
    let released = store.force_release(cutoff, now).await?;
    for row in &released {
        warn!(username = %row.username, device = %row.in_use_by.as_deref().unwrap_or("?"), "force-released stale lease");
    }
    Ok(())
}

/// Spawns a background task that calls `force_release` every `period` until
/// the returned handle is dropped or aborted.
pub fn spawn_periodic(store: Arc<Store>, force_release_seconds: i64, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let now = crate::time::now_unix();
            if let Err(e) = force_release(&store, force_release_seconds, now).await {
                warn!(err = %e, "periodic reclaim pass failed");
            }
        }
    })
}
