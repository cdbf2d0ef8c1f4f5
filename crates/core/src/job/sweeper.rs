//! Periodic expiry sweep for the job store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::JobStore;

/// Run `sweep_expired` every `interval` until `shutdown` fires.
///
/// The sweep is synchronous; it runs on the blocking pool so a slow durable
/// tier never stalls the runtime.
pub fn spawn_sweeper(
    store: Arc<JobStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Job sweeper started (interval {:?})", interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job sweeper received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let store = Arc::clone(&store);
                    let _ = tokio::task::spawn_blocking(move || store.sweep_expired()).await;
                }
            }
        }
        info!("Job sweeper stopped");
    })
}
