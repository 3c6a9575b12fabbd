//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for ledger storage
//! - File outbox and in-memory recorder for NotificationSender
//! - System and manual clocks for Clock

pub mod clock;
pub mod duckdb;
pub mod memory;
pub mod outbox;

pub use clock::{ManualClock, SystemClock};
pub use memory::{MemoryNotifier, SentMessage};
pub use outbox::{OutboxMessage, OutboxNotifier};
