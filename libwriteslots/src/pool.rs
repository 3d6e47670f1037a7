use crate::result::SlotError;
use crate::result::SlotResult;
use crate::slot::Slot;
use crate::slot::SlotHandle;
use crate::slot::SlotStats;
use std::iter::successors;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tracing::debug;

// Handles carry the id of the pool that issued them, so a handle can never release a slot of another pool.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// Fixed set of write slots tracking in-flight regions of an append-only buffer.
///
/// Slots live in one arena and are linked by index into two lists: a free stack, and a used list ordered by acquisition time. `position` is the offset up to which the buffer is known to be completely written, and is only recomputed when the oldest in-flight write (the head of the used list) is released.
///
/// This type does no locking of its own; wrap the whole value in one mutex when sharing it (see `LogAppender`).
pub struct WriteSlots {
  id: u64,
  slots: Vec<Slot>,
  free: Option<u32>,
  used_head: Option<u32>,
  used_tail: Option<u32>,
  free_count: usize,
  used_count: usize,
  position: Option<u64>,
  synced: Option<u64>,
}

impl WriteSlots {
  pub fn new(capacity: usize) -> Self {
    assert!(capacity <= u32::MAX as usize);
    let mut slots = Vec::with_capacity(capacity);
    let mut free = None;
    for index in 0..capacity {
      slots.push(Slot {
        forward: free,
        ..Slot::default()
      });
      free = Some(index as u32);
    }
    Self {
      id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
      slots,
      free,
      used_head: None,
      used_tail: None,
      free_count: capacity,
      used_count: 0,
      position: None,
      synced: None,
    }
  }

  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  pub fn free_count(&self) -> usize {
    self.free_count
  }

  pub fn used_count(&self) -> usize {
    self.used_count
  }

  pub fn position(&self) -> Option<u64> {
    self.position
  }

  /// Begin of the very first region ever acquired. Set once and never updated.
  pub fn synced(&self) -> Option<u64> {
    self.synced
  }

  /// Begin of the oldest write still in flight.
  pub fn oldest_pending(&self) -> Option<u64> {
    self.used_head.and_then(|i| self.slots[i as usize].begin)
  }

  /// The part of the buffer that still has writes in flight: from the oldest pending begin to the newest pending end.
  pub fn pending_region(&self) -> Option<(u64, u64)> {
    let head = self.used_head?;
    let tail = self.used_tail?;
    self.slots[head as usize]
      .begin
      .zip(self.slots[tail as usize].end)
  }

  /// In-flight regions in acquisition order.
  pub fn used(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
    successors(self.used_head, |&i| self.slots[i as usize].forward).filter_map(|i| {
      let slot = &self.slots[i as usize];
      slot.begin.zip(slot.end)
    })
  }

  pub fn stats(&self) -> SlotStats {
    SlotStats {
      capacity: self.capacity(),
      free: self.free_count,
      used: self.used_count,
      position: self.position,
      synced: self.synced,
      oldest_pending: self.oldest_pending(),
    }
  }

  /// Claims a free slot for the write `[begin, end)`, or returns `None` if every slot is in use. The pool never grows, so `None` means the caller must back off.
  pub fn acquire(&mut self, begin: u64, end: u64) -> Option<SlotHandle> {
    debug_assert!(begin <= end);
    let index = self.free?;
    let prev_tail = self.used_tail;

    let slot = &mut self.slots[index as usize];
    self.free = slot.forward;
    slot.begin = Some(begin);
    slot.end = Some(end);
    slot.forward = None;
    slot.backward = prev_tail;
    let handle = SlotHandle {
      pool: self.id,
      index,
      generation: slot.generation,
    };

    match prev_tail {
      Some(tail) => self.slots[tail as usize].forward = Some(index),
      None => self.used_head = Some(index),
    };
    self.used_tail = Some(index);
    self.free_count -= 1;
    self.used_count += 1;

    if self.synced.is_none() {
      self.synced = Some(begin);
    };
    Some(handle)
  }

  fn check_handle(&self, handle: SlotHandle) -> SlotResult<&Slot> {
    if handle.pool != self.id {
      return Err(SlotError::UnknownSlotHandle);
    };
    self
      .slots
      .get(handle.index as usize)
      .filter(|s| s.is_used() && s.generation == handle.generation)
      .ok_or(SlotError::UnknownSlotHandle)
  }

  /// Marks the write held by `handle` as complete and returns the resulting position. Only releasing the oldest in-flight write moves the position; any other release leaves it as is.
  pub fn release(&mut self, handle: SlotHandle) -> SlotResult<Option<u64>> {
    let slot = self.check_handle(handle)?;
    let (backward, forward, end) = (slot.backward, slot.forward, slot.end);

    match backward {
      Some(prev) => self.slots[prev as usize].forward = forward,
      None => self.used_head = forward,
    };
    match forward {
      Some(next) => self.slots[next as usize].backward = backward,
      None => self.used_tail = backward,
    };

    if backward.is_none() {
      self.position = match self.used_head {
        Some(head) => self.slots[head as usize].begin,
        None => end,
      };
    };

    let slot = &mut self.slots[handle.index as usize];
    slot.clear();
    slot.forward = self.free;
    self.free = Some(handle.index);
    self.free_count += 1;
    self.used_count -= 1;

    Ok(self.position)
  }

  /// Tears down the pool. Fails if any write is still in flight; the slots are freed either way.
  pub fn destroy(self) -> SlotResult<()> {
    debug!(
      capacity = self.capacity(),
      used = self.used_count,
      position = self.position,
      "destroying write slots"
    );
    if self.used_count != 0 {
      return Err(SlotError::SlotsInUse {
        used: self.used_count,
      });
    };
    Ok(())
  }

  #[cfg(any(test, debug_assertions))]
  pub fn check_invariants(&self) {
    use itertools::Itertools;

    let free = successors(self.free, |&i| self.slots[i as usize].forward)
      .take(self.slots.len() + 1)
      .collect_vec();
    let used = successors(self.used_head, |&i| self.slots[i as usize].forward)
      .take(self.slots.len() + 1)
      .collect_vec();
    assert_eq!(free.len(), self.free_count);
    assert_eq!(used.len(), self.used_count);
    assert_eq!(free.len() + used.len(), self.slots.len());
    assert!(free.iter().chain(used.iter()).all_unique());

    for &i in free.iter() {
      let slot = &self.slots[i as usize];
      assert!(slot.begin.is_none() && slot.end.is_none() && slot.backward.is_none());
    }
    let mut prev = None;
    for &i in used.iter() {
      let slot = &self.slots[i as usize];
      assert!(slot.begin.is_some() && slot.end.is_some());
      assert_eq!(slot.backward, prev);
      prev = Some(i);
    }
    assert_eq!(self.used_tail, prev);
  }
}
