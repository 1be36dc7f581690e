//! Background refresh scheduling
//!
//! Cancellable task primitives plus the orchestrator that keeps the
//! registry and ledger fresh while observed.

pub mod sync;
pub mod task;

pub use sync::{ObserverGuard, RefreshMode, SchedulerError, SyncScheduler};
pub use task::{Debouncer, PollTask};
