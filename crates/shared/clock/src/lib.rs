//! Tempo Clock Infrastructure
//!
//! Two implementations of the [`Clock`] facade:
//!
//! ```text
//! Clock (now / after / timers / tickers / sleep / deadline contexts)
//!     │
//!     ├── SystemClock (wall-clock time, one thread per timer)
//!     │
//!     └── MockClock + Updatable (virtual time, advanced explicitly)
//!             │
//!             └── EventRegistry (timers, tickers and deadlines by due time)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use tempo_clock::{Clock, MockClock, Updatable};
//! use chrono::Duration;
//!
//! let clock = MockClock::new();
//! let timer = clock.new_timer(Duration::seconds(5));
//!
//! clock.add(Duration::seconds(5));      // fires the timer
//! assert!(timer.c().unwrap().try_recv().is_ok());
//!
//! let ticker = clock.new_ticker(Duration::seconds(1));
//! clock.move_next().unwrap();           // jump to the next tick
//! ```

mod config;
mod deadline;
mod dispatch;
mod event;
mod mock;
mod registry;
mod system;
mod system_timer;

pub use config::{ConfigError, MockClockConfig};
pub use event::{EventId, EventKind, PendingEvent};
pub use mock::MockClock;
pub use system::SystemClock;

// Re-export the facade for convenience
pub use tempo_core::{CancelFunc, Context, ContextError, Duration, Timestamp};
pub use tempo_ports::{Callback, Clock, ClockError, ClockResult, Ticker, Timer, Updatable};
