//! Tempo Core
//!
//! Time values and cancellation contexts shared by every Tempo clock.
//! This crate knows nothing about how time advances; the clocks in
//! `tempo-clock` decide that.

pub mod context;
pub mod values;

// Re-export commonly used types at crate root
pub use context::{CancelFunc, Canceller, Context, ContextError};
pub use values::{Duration, EPOCH, Timestamp, saturating_add, to_std};
