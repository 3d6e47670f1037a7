pub mod appender;
pub mod metrics;
pub mod pool;
pub mod result;
pub mod slot;
pub mod sync;

pub use appender::LogAppender;
pub use appender::Reservation;
pub use metrics::Metrics;
pub use pool::WriteSlots;
pub use result::SlotError;
pub use result::SlotResult;
pub use slot::SlotHandle;
pub use slot::SlotStats;
pub use sync::SyncLoop;

// Bounds for configured pool sizes.
pub const MIN_SLOTS: usize = 1;
pub const MAX_SLOTS: usize = 1024 * 1024 * 16;
