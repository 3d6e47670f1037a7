use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[derive(Default)]
pub struct Metrics {
  /// Total number of reservations that obtained a slot.
  pub(crate) successful_acquire_counter: AtomicU64,
  /// Total number of reservation attempts that found every slot in use.
  pub(crate) exhausted_acquire_counter: AtomicU64,
  /// Total number of completed writes whose slot was returned.
  pub(crate) release_counter: AtomicU64,
  /// Total number of completions rejected because the handle was not in use.
  pub(crate) unknown_release_counter: AtomicU64,
  /// Total number of completions that moved the write position.
  pub(crate) position_advance_counter: AtomicU64,
  /// Amount of slots currently held by in-flight writes.
  pub(crate) used_slots_gauge: AtomicU64,
  /// Latest write position.
  pub(crate) position_gauge: AtomicU64,
  /// Latest position handed to the sync function.
  pub(crate) synced_position_gauge: AtomicU64,
  /// Total number of sync calls made by the sync loop.
  pub(crate) sync_counter: AtomicU64,
}

impl Metrics {
  pub fn successful_acquire_counter(&self) -> u64 {
    self.successful_acquire_counter.load(Ordering::Relaxed)
  }

  pub fn exhausted_acquire_counter(&self) -> u64 {
    self.exhausted_acquire_counter.load(Ordering::Relaxed)
  }

  pub fn release_counter(&self) -> u64 {
    self.release_counter.load(Ordering::Relaxed)
  }

  pub fn unknown_release_counter(&self) -> u64 {
    self.unknown_release_counter.load(Ordering::Relaxed)
  }

  pub fn position_advance_counter(&self) -> u64 {
    self.position_advance_counter.load(Ordering::Relaxed)
  }

  pub fn used_slots_gauge(&self) -> u64 {
    self.used_slots_gauge.load(Ordering::Relaxed)
  }

  pub fn position_gauge(&self) -> u64 {
    self.position_gauge.load(Ordering::Relaxed)
  }

  pub fn synced_position_gauge(&self) -> u64 {
    self.synced_position_gauge.load(Ordering::Relaxed)
  }

  pub fn sync_counter(&self) -> u64 {
    self.sync_counter.load(Ordering::Relaxed)
  }
}
