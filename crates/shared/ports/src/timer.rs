use crate::error::{ClockError, ClockResult};
use crossbeam_channel::Receiver;
use std::fmt;
use tempo_core::{Duration, Timestamp};

/// Callback run by [`crate::Clock::after_func`]
///
/// `Fn` rather than `FnOnce`: resetting a fired timer runs it again.
pub type Callback = Box<dyn Fn() + Send + Sync + 'static>;

/// Clock-specific half of a [`Timer`]
pub trait TimerControl: Send + Sync {
    /// Prevent the timer from firing; false if it already fired or was stopped
    fn stop(&self) -> bool;

    /// Re-arm the timer to fire after `d`; false if it already fired or was
    /// stopped before the reset
    fn reset(&self, d: Duration) -> bool;
}

/// Clock-specific half of a [`Ticker`]
pub trait TickerControl: Send + Sync {
    /// Stop further ticks; false if the ticker was already stopped
    fn stop(&self) -> bool;

    /// Change the period; the next tick is due `period` from now
    fn reset(&self, period: Duration);
}

/// Reject intervals a ticker cannot repeat on
pub fn check_interval(d: Duration) -> ClockResult<()> {
    if d <= Duration::zero() {
        return Err(ClockError::NonPositiveInterval(d));
    }
    Ok(())
}

/// Handle to a one-shot timer
///
/// Dropping the handle does not stop the timer.
pub struct Timer {
    c: Option<Receiver<Timestamp>>,
    control: Box<dyn TimerControl>,
}

impl Timer {
    pub fn new(c: Option<Receiver<Timestamp>>, control: Box<dyn TimerControl>) -> Self {
        Self { c, control }
    }

    /// Channel receiving the firing time; `None` for callback timers
    pub fn c(&self) -> Option<&Receiver<Timestamp>> {
        self.c.as_ref()
    }

    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    pub fn reset(&self, d: Duration) -> bool {
        self.control.reset(d)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("has_channel", &self.c.is_some())
            .finish()
    }
}

/// Handle to a repeating ticker
///
/// Dropping the handle does not stop the ticker.
pub struct Ticker {
    c: Receiver<Timestamp>,
    control: Box<dyn TickerControl>,
}

impl Ticker {
    pub fn new(c: Receiver<Timestamp>, control: Box<dyn TickerControl>) -> Self {
        Self { c, control }
    }

    /// Channel receiving tick times (capacity one; unread ticks are dropped)
    pub fn c(&self) -> &Receiver<Timestamp> {
        &self.c
    }

    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Change the period and restart the ticker
    ///
    /// # Panics
    /// If `period` is not positive.
    pub fn reset(&self, period: Duration) {
        if let Err(err) = check_interval(period) {
            panic!("{err}");
        }
        self.control.reset(period)
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker").finish_non_exhaustive()
    }
}
