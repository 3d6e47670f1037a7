use std::error::Error;
use std::fmt;
use std::fmt::Display;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SlotError {
  /// The handle does not refer to a slot that is currently acquired, e.g. it was already released or its index is outside the pool.
  UnknownSlotHandle,
  /// The pool was destroyed while writes were still in flight.
  SlotsInUse { used: usize },
  ShutDown,
  /// The region would extend past the end of the offset space.
  OffsetOverflow,
}

impl Display for SlotError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SlotError::UnknownSlotHandle => write!(f, "unknown slot handle"),
      SlotError::SlotsInUse { used } => write!(f, "{used} slots still in use"),
      SlotError::ShutDown => write!(f, "appender has been shut down"),
      SlotError::OffsetOverflow => write!(f, "write region overflows the offset space"),
    }
  }
}

impl Error for SlotError {}

pub type SlotResult<T> = Result<T, SlotError>;
