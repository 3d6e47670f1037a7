use serde::Serialize;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SlotHandle {
  pub(crate) pool: u64,
  pub(crate) index: u32,
  pub(crate) generation: u64,
}

impl SlotHandle {
  pub fn index(&self) -> u32 {
    self.index
  }
}

// A slot sits on exactly one of the free stack or the used list. `backward` is only meaningful on the used list.
#[derive(Default, Debug)]
pub(crate) struct Slot {
  pub begin: Option<u64>,
  pub end: Option<u64>,
  pub forward: Option<u32>,
  pub backward: Option<u32>,
  // Never wraps in practice: a slot would need 2^64 releases.
  pub generation: u64,
}

impl Slot {
  pub fn is_used(&self) -> bool {
    self.begin.is_some()
  }

  pub fn clear(&mut self) {
    self.begin = None;
    self.end = None;
    self.forward = None;
    self.backward = None;
    self.generation += 1;
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct SlotStats {
  pub capacity: usize,
  pub free: usize,
  pub used: usize,
  pub position: Option<u64>,
  pub synced: Option<u64>,
  pub oldest_pending: Option<u64>,
}
