use crate::metrics::Metrics;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::trace;

/// Drives flushing of the buffer up to the write position published by a `LogAppender`.
pub struct SyncLoop {
  delay: Duration,
  metrics: Arc<Metrics>,
}

impl SyncLoop {
  pub fn new(delay: Duration, metrics: Arc<Metrics>) -> Self {
    Self { delay, metrics }
  }

  /// Calls `sync` with each new write position until the appender is dropped, and returns the last position synced.
  ///
  /// After the first change is seen, further changes arriving within `delay` are folded into the same call.
  pub async fn start<F, Fut>(
    &self,
    mut position: watch::Receiver<Option<u64>>,
    mut sync: F,
  ) -> Option<u64>
  where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ()>,
  {
    let mut synced: Option<u64> = None;
    while position.changed().await.is_ok() {
      let deadline = Instant::now() + self.delay;
      while let Ok(Ok(())) = timeout_at(deadline, position.changed()).await {}

      let Some(target) = *position.borrow_and_update() else {
        continue;
      };
      assert!(
        synced.map_or(true, |s| s <= target),
        "write position moved backwards"
      );
      if synced == Some(target) {
        continue;
      };
      sync(target).await;
      synced = Some(target);
      self
        .metrics
        .synced_position_gauge
        .store(target, Ordering::Relaxed);
      self.metrics.sync_counter.fetch_add(1, Ordering::Relaxed);
      trace!(position = target, "synced");
    }
    synced
  }
}
