use std::sync::Arc;
use std::time::Duration;

use crate::udbc::connector::Connector;

use super::PoolInner;

/// Spawn the background eviction task. The task holds only a weak handle,
/// so it ends when the last `Pool` clone is dropped; `shutdown()` stops it
/// through the notify without waiting out the current tick.
pub(crate) fn spawn<C: Connector>(inner: &Arc<PoolInner<C>>, interval: Duration) {
    let weak = Arc::downgrade(inner);
    let stop = Arc::clone(&inner.reaper_stop);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = stop.notified() => break,
            }
            let Some(inner) = weak.upgrade() else { break };
            if inner.reap_once().await {
                break;
            }
        }
    });
}
