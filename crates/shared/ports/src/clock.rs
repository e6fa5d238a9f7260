use crate::error::ClockResult;
use crate::timer::{Callback, Ticker, Timer};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tempo_core::{CancelFunc, Context, Duration, Timestamp, saturating_add};

/// Port for time abstraction
///
/// Application code depends on this trait only. Two implementations exist:
/// - Real system time for production
/// - A virtual clock that moves only when a test driver tells it to
///
/// The trait is object safe, so a clock can be injected as `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    /// Get the current time according to this clock
    fn now(&self) -> Timestamp;

    /// Time elapsed since `t`
    fn since(&self, t: Timestamp) -> Duration {
        self.now() - t
    }

    /// Time remaining until `t` (negative once `t` has passed)
    fn until(&self, t: Timestamp) -> Duration {
        t - self.now()
    }

    /// Channel that receives the firing time once `d` has elapsed
    fn after(&self, d: Duration) -> Receiver<Timestamp>;

    /// Run `f` once `d` has elapsed
    ///
    /// The returned timer has no channel. Resetting it arms `f` again.
    fn after_func(&self, d: Duration, f: Callback) -> Timer;

    /// One-shot timer delivering the firing time on [`Timer::c`]
    fn new_timer(&self, d: Duration) -> Timer;

    /// Repeating ticker with period `d`
    ///
    /// Ticks are delivered without blocking: a tick is dropped if the
    /// previous one has not been received yet.
    ///
    /// # Panics
    /// If `d` is not positive.
    fn new_ticker(&self, d: Duration) -> Ticker;

    /// Ticker channel without a handle to stop it
    ///
    /// The ticker runs for as long as the clock does. A non-positive `d`
    /// yields a channel that never delivers.
    fn tick(&self, d: Duration) -> Receiver<Timestamp> {
        if d <= Duration::zero() {
            return crossbeam_channel::never();
        }
        self.new_ticker(d).c().clone()
    }

    /// Block the calling thread until `d` has elapsed on this clock
    fn sleep(&self, d: Duration);

    /// Derive a context cancelled no later than `deadline` on this clock
    ///
    /// The returned cancel function releases the deadline and cancels the
    /// context with [`tempo_core::ContextError::Canceled`].
    fn deadline_context(&self, parent: &Context, deadline: Timestamp) -> (Context, CancelFunc);

    /// `deadline_context(parent, now() + timeout)`
    fn context_with_timeout(&self, parent: &Context, timeout: Duration) -> (Context, CancelFunc) {
        self.deadline_context(parent, saturating_add(self.now(), timeout))
    }

    /// Get the clock's name/identifier for debugging
    fn name(&self) -> &str {
        "Clock"
    }
}

/// Drives the passage of time on a virtual clock
///
/// `add` and `set` fire every timer, ticker and deadline due at or before the
/// new current time before committing it.
pub trait Updatable {
    /// Advance the current time by `d` and return the new current time
    ///
    /// # Panics
    /// If `d` is negative.
    fn add(&self, d: Duration) -> Timestamp;

    /// Set the current time to `t` and return the difference from the
    /// previous current time
    ///
    /// # Panics
    /// If `t` is earlier than the current time.
    fn set(&self, t: Timestamp) -> Duration;

    /// Jump to the earliest pending timer, ticker or deadline and fire it
    ///
    /// Returns the new current time and the difference from the previous
    /// one, or [`crate::ClockError::NoPendingEvents`] if nothing is pending.
    fn move_next(&self) -> ClockResult<(Timestamp, Duration)>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }

    fn since(&self, t: Timestamp) -> Duration {
        (**self).since(t)
    }

    fn until(&self, t: Timestamp) -> Duration {
        (**self).until(t)
    }

    fn after(&self, d: Duration) -> Receiver<Timestamp> {
        (**self).after(d)
    }

    fn after_func(&self, d: Duration, f: Callback) -> Timer {
        (**self).after_func(d, f)
    }

    fn new_timer(&self, d: Duration) -> Timer {
        (**self).new_timer(d)
    }

    fn new_ticker(&self, d: Duration) -> Ticker {
        (**self).new_ticker(d)
    }

    fn tick(&self, d: Duration) -> Receiver<Timestamp> {
        (**self).tick(d)
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d)
    }

    fn deadline_context(&self, parent: &Context, deadline: Timestamp) -> (Context, CancelFunc) {
        (**self).deadline_context(parent, deadline)
    }

    fn context_with_timeout(&self, parent: &Context, timeout: Duration) -> (Context, CancelFunc) {
        (**self).context_with_timeout(parent, timeout)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<U: Updatable + ?Sized> Updatable for Arc<U> {
    fn add(&self, d: Duration) -> Timestamp {
        (**self).add(d)
    }

    fn set(&self, t: Timestamp) -> Duration {
        (**self).set(t)
    }

    fn move_next(&self) -> ClockResult<(Timestamp, Duration)> {
        (**self).move_next()
    }
}
