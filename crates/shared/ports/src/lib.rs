//! Tempo Ports
//!
//! Port definitions (traits) for Tempo clocks.
//! These define the boundary between time-dependent application code and
//! the clock implementations in `tempo-clock`.

mod clock;
mod error;
mod timer;

pub use clock::{Clock, Updatable};
pub use error::{ClockError, ClockResult};
pub use timer::{Callback, Ticker, TickerControl, Timer, TimerControl, check_interval};
