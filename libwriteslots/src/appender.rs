use crate::metrics::Metrics;
use crate::pool::WriteSlots;
use crate::result::SlotError;
use crate::result::SlotResult;
use crate::slot::SlotHandle;
use crate::slot::SlotStats;
use parking_lot::Mutex;
use std::pin::pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::sync::Notify;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

struct AppenderState {
  slots: WriteSlots,
  cursor: u64,
  shut_down: bool,
}

/// A region of the buffer handed out by `LogAppender`. Must be passed back to `complete` once the bytes have been written.
///
/// Dropping a reservation without completing it holds its slot forever, and the write position will never move past its region.
#[must_use = "the region must be passed to `LogAppender::complete` once written"]
#[derive(Debug)]
pub struct Reservation {
  handle: SlotHandle,
  begin: u64,
  end: u64,
}

impl Reservation {
  pub fn begin(&self) -> u64 {
    self.begin
  }

  pub fn end(&self) -> u64 {
    self.end
  }

  pub fn len(&self) -> u64 {
    self.end - self.begin
  }

  pub fn is_empty(&self) -> bool {
    self.begin == self.end
  }

  pub fn handle(&self) -> SlotHandle {
    self.handle
  }
}

/// Hands out contiguous regions of an append-only buffer and tracks how far the buffer is completely written.
///
/// The pool and the append cursor share one lock, so regions are always handed out in increasing, non-overlapping order; the write position computed by `WriteSlots` relies on this.
pub struct LogAppender {
  state: Mutex<AppenderState>,
  released: Notify,
  position: watch::Sender<Option<u64>>,
  metrics: Arc<Metrics>,
}

impl LogAppender {
  pub fn new(capacity: usize, base_offset: u64, metrics: Arc<Metrics>) -> Self {
    let (position, _) = watch::channel(None);
    Self {
      state: Mutex::new(AppenderState {
        slots: WriteSlots::new(capacity),
        cursor: base_offset,
        shut_down: false,
      }),
      released: Notify::new(),
      position,
      metrics,
    }
  }

  pub fn metrics(&self) -> Arc<Metrics> {
    self.metrics.clone()
  }

  pub fn position(&self) -> Option<u64> {
    self.state.lock().slots.position()
  }

  /// Offset where the next reservation will begin.
  pub fn cursor(&self) -> u64 {
    self.state.lock().cursor
  }

  pub fn stats(&self) -> SlotStats {
    self.state.lock().slots.stats()
  }

  /// Like `stats`, but gives up instead of waiting if the lock is held.
  pub fn try_stats(&self) -> Option<SlotStats> {
    self.state.try_lock().map(|state| state.slots.stats())
  }

  pub fn subscribe_position(&self) -> watch::Receiver<Option<u64>> {
    self.position.subscribe()
  }

  /// Returns `Ok(None)` if every slot is in use.
  pub fn try_reserve(&self, len: u64) -> SlotResult<Option<Reservation>> {
    let mut state = self.state.lock();
    if state.shut_down {
      return Err(SlotError::ShutDown);
    };
    let begin = state.cursor;
    let Some(end) = begin.checked_add(len) else {
      warn!(begin, len, "write region overflows offset space");
      return Err(SlotError::OffsetOverflow);
    };
    let Some(handle) = state.slots.acquire(begin, end) else {
      self
        .metrics
        .exhausted_acquire_counter
        .fetch_add(1, Ordering::Relaxed);
      return Ok(None);
    };
    state.cursor = end;
    self
      .metrics
      .successful_acquire_counter
      .fetch_add(1, Ordering::Relaxed);
    self
      .metrics
      .used_slots_gauge
      .store(state.slots.used_count() as u64, Ordering::Relaxed);
    trace!(begin, end, slot = handle.index(), "reserved write region");
    Ok(Some(Reservation { handle, begin, end }))
  }

  /// Like `try_reserve`, but waits for a completion whenever the pool is exhausted.
  pub async fn reserve(&self, len: u64) -> SlotResult<Reservation> {
    loop {
      // Register interest before trying so a completion between the attempt and the wait isn't missed.
      let mut notified = pin!(self.released.notified());
      notified.as_mut().enable();
      if let Some(r) = self.try_reserve(len)? {
        return Ok(r);
      };
      notified.await;
    }
  }

  /// Returns the write position after completing `reservation`.
  pub fn complete(&self, reservation: Reservation) -> SlotResult<Option<u64>> {
    let mut state = self.state.lock();
    let before = state.slots.position();
    let position = match state.slots.release(reservation.handle) {
      Ok(p) => p,
      Err(err) => {
        self
          .metrics
          .unknown_release_counter
          .fetch_add(1, Ordering::Relaxed);
        warn!(
          begin = reservation.begin,
          end = reservation.end,
          "completed reservation that is not in use"
        );
        return Err(err);
      }
    };
    self.metrics.release_counter.fetch_add(1, Ordering::Relaxed);
    self
      .metrics
      .used_slots_gauge
      .store(state.slots.used_count() as u64, Ordering::Relaxed);
    if let Some(p) = position {
      if position != before {
        self
          .metrics
          .position_advance_counter
          .fetch_add(1, Ordering::Relaxed);
        self.metrics.position_gauge.store(p, Ordering::Relaxed);
        // Published under the lock so subscribers never observe positions out of order.
        self.position.send_replace(position);
        debug!(position = p, "write position advanced");
      };
    };
    drop(state);
    self.released.notify_one();
    Ok(position)
  }

  /// Rejects all further reservations, including ones currently waiting for a slot.
  pub fn shutdown(&self) {
    let mut state = self.state.lock();
    state.shut_down = true;
    info!(
      used = state.slots.used_count(),
      cursor = state.cursor,
      "appender shut down"
    );
    drop(state);
    self.released.notify_waiters();
  }

  /// Destroys the underlying pool. Fails if any reservation has not been completed.
  pub fn destroy(self) -> SlotResult<()> {
    self.state.into_inner().slots.destroy()
  }
}

#[cfg(test)]
mod tests {
  use super::LogAppender;
  use crate::metrics::Metrics;
  use crate::result::SlotError;
  use itertools::Itertools;
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::spawn;
  use tokio::time::sleep;
  use tokio::time::timeout;

  fn appender(capacity: usize, base_offset: u64) -> LogAppender {
    LogAppender::new(capacity, base_offset, Arc::new(Metrics::default()))
  }

  #[test]
  fn test_reservations_are_contiguous() {
    let a = appender(8, 1000);
    let rs = [3, 0, 17, 5]
      .into_iter()
      .map(|len| a.try_reserve(len).unwrap().unwrap())
      .collect_vec();
    assert_eq!(
      rs.iter().map(|r| (r.begin(), r.end())).collect_vec(),
      vec![(1000, 1003), (1003, 1003), (1003, 1020), (1020, 1025)]
    );
    assert!(rs[1].is_empty());
    assert_eq!(a.cursor(), 1025);
    assert_eq!(a.stats().synced, Some(1000));
  }

  #[test]
  fn test_exhaustion_does_not_advance_cursor() {
    let a = appender(1, 0);
    let r = a.try_reserve(10).unwrap().unwrap();
    assert!(a.try_reserve(10).unwrap().is_none());
    assert_eq!(a.cursor(), 10);
    assert_eq!(a.metrics().exhausted_acquire_counter(), 1);
    assert_eq!(a.complete(r), Ok(Some(10)));
    let r = a.try_reserve(10).unwrap().unwrap();
    assert_eq!((r.begin(), r.end()), (10, 20));
  }

  #[test]
  fn test_out_of_order_completion() {
    let a = appender(4, 0);
    let r1 = a.try_reserve(10).unwrap().unwrap();
    let r2 = a.try_reserve(10).unwrap().unwrap();
    let r3 = a.try_reserve(10).unwrap().unwrap();
    assert_eq!(a.complete(r2), Ok(None));
    assert_eq!(a.complete(r1), Ok(Some(20)));
    assert_eq!(a.complete(r3), Ok(Some(30)));
    let m = a.metrics();
    assert_eq!(m.release_counter(), 3);
    assert_eq!(m.position_advance_counter(), 2);
    assert_eq!(m.position_gauge(), 30);
    assert_eq!(m.used_slots_gauge(), 0);
    a.destroy().unwrap();
  }

  #[test]
  fn test_foreign_reservation_is_rejected() {
    let a = appender(2, 0);
    let b = appender(2, 0);
    let mine = a.try_reserve(1).unwrap().unwrap();
    let theirs = b.try_reserve(1).unwrap().unwrap();
    // Same slot index and generation in both pools.
    assert_eq!(mine.handle().index(), theirs.handle().index());
    assert_eq!(a.complete(theirs), Err(SlotError::UnknownSlotHandle));
    assert_eq!(a.metrics().unknown_release_counter(), 1);
    assert_eq!(a.stats().used, 1);
    assert_eq!(a.position(), None);
    assert_eq!(a.complete(mine), Ok(Some(1)));
  }

  #[test]
  fn test_reserve_past_end_of_offset_space() {
    let a = appender(4, u64::MAX - 5);
    assert_eq!(a.try_reserve(10).unwrap_err(), SlotError::OffsetOverflow);
    assert_eq!(a.cursor(), u64::MAX - 5);
    assert_eq!(a.stats().used, 0);
    let r = a.try_reserve(5).unwrap().unwrap();
    assert_eq!((r.begin(), r.end()), (u64::MAX - 5, u64::MAX));
    assert_eq!(a.complete(r), Ok(Some(u64::MAX)));
  }

  #[test]
  fn test_destroy_with_pending_writes() {
    let a = appender(2, 0);
    let _r = a.try_reserve(1).unwrap().unwrap();
    assert_eq!(a.destroy(), Err(SlotError::SlotsInUse { used: 1 }));
  }

  #[tokio::test]
  async fn test_reserve_waits_for_completion() {
    let a = Arc::new(appender(1, 0));
    let first = a.reserve(4).await.unwrap();
    let waiter = spawn({
      let a = a.clone();
      async move { a.reserve(4).await }
    });
    sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    a.complete(first).unwrap();
    let second = timeout(Duration::from_secs(5), waiter)
      .await
      .unwrap()
      .unwrap()
      .unwrap();
    assert_eq!((second.begin(), second.end()), (4, 8));
  }

  #[tokio::test]
  async fn test_shutdown_wakes_waiters() {
    let a = Arc::new(appender(1, 0));
    let _held = a.reserve(4).await.unwrap();
    let waiter = spawn({
      let a = a.clone();
      async move { a.reserve(4).await }
    });
    sleep(Duration::from_millis(20)).await;
    a.shutdown();
    let res = timeout(Duration::from_secs(5), waiter)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(res.unwrap_err(), SlotError::ShutDown);
    assert_eq!(a.try_reserve(1).unwrap_err(), SlotError::ShutDown);
  }

  #[tokio::test]
  async fn test_position_is_published() {
    let a = appender(4, 0);
    let mut rx = a.subscribe_position();
    assert_eq!(*rx.borrow_and_update(), None);
    let r1 = a.try_reserve(5).unwrap().unwrap();
    let r2 = a.try_reserve(5).unwrap().unwrap();
    a.complete(r2).unwrap();
    assert!(!rx.has_changed().unwrap());
    a.complete(r1).unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), Some(5));
  }
}
