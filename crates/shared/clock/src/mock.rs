use crate::config::MockClockConfig;
use crate::deadline;
use crate::dispatch::CallbackDispatcher;
use crate::event::{Action, EventId, PendingEvent, ScheduledEvent};
use crate::registry::EventRegistry;
use crossbeam_channel::{Receiver, TrySendError, bounded};
use log::{debug, trace};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tempo_core::{CancelFunc, Context, ContextError, Duration, Timestamp, saturating_add};
use tempo_ports::{
    Callback, Clock, ClockError, ClockResult, Ticker, TickerControl, Timer, TimerControl,
    Updatable, check_interval,
};

/// Virtual clock for deterministic tests
///
/// Time stands still until a driver calls [`Updatable::add`],
/// [`Updatable::set`] or [`Updatable::move_next`]. Advancing fires every
/// timer, ticker and deadline that falls due, in due-time order (creation
/// order on ties), before the call returns. `after_func` callbacks are handed
/// to a worker thread in that same order.
///
/// Cloning is cheap and every clone drives the same virtual time.
#[derive(Clone)]
pub struct MockClock {
    engine: Arc<Engine>,
}

pub(crate) struct Engine {
    name: String,
    state: Mutex<EngineState>,
    dispatcher: CallbackDispatcher,
}

struct EngineState {
    now: Timestamp,
    registry: EventRegistry,
    next_id: u64,
}

impl EngineState {
    fn allocate_id(&mut self) -> EventId {
        let id = EventId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

impl Engine {
    fn new(config: MockClockConfig, dispatcher: CallbackDispatcher) -> Self {
        Self {
            dispatcher,
            state: Mutex::new(EngineState {
                now: config.start,
                registry: EventRegistry::new(),
                next_id: 0,
            }),
            name: config.name,
        }
    }

    /// Register a new event due at `due(now)`
    pub(crate) fn schedule(
        &self,
        due: impl FnOnce(Timestamp) -> Timestamp,
        period: Option<Duration>,
        action: Action,
    ) -> EventId {
        let id = {
            let mut state = self.state.lock();
            let id = state.allocate_id();
            let due = due(state.now);
            self.arm(&mut state, ScheduledEvent { id, due, period, action });
            id
        };
        self.dispatcher.run_inline();
        id
    }

    /// Remove a pending event; false if it already fired or was removed
    pub(crate) fn remove(&self, id: EventId) -> bool {
        let removed = self.state.lock().registry.remove(id).is_some();
        if removed {
            trace!("{}: removed event {}", self.name, id);
        }
        removed
    }

    /// Replace event `id` with a fresh one due `delay` from now
    ///
    /// Returns whether the previous event was still pending.
    fn rearm(&self, id: EventId, delay: Duration, period: Option<Duration>, action: Action) -> bool {
        let was_pending = {
            let mut state = self.state.lock();
            let was_pending = state.registry.remove(id).is_some();
            let due = saturating_add(state.now, delay);
            self.arm(&mut state, ScheduledEvent { id, due, period, action });
            was_pending
        };
        self.dispatcher.run_inline();
        was_pending
    }

    /// Insert `event`, or fire it straight away if it is already due
    fn arm(&self, state: &mut EngineState, event: ScheduledEvent) {
        if event.due <= state.now {
            self.fire(state, event);
        } else {
            trace!(
                "{}: scheduled {:?} {} due {}",
                self.name,
                event.kind(),
                event.id,
                event.due
            );
            state.registry.insert(event);
        }
    }

    fn fire(&self, state: &mut EngineState, mut event: ScheduledEvent) {
        trace!(
            "{}: firing {:?} {} at {}",
            self.name,
            event.kind(),
            event.id,
            state.now
        );
        let mut receiver_gone = false;
        match &event.action {
            Action::Notify(tx) => {
                // Capacity one: an unread tick makes this one drop
                receiver_gone = matches!(tx.try_send(state.now), Err(TrySendError::Disconnected(_)));
            }
            Action::Callback(callback) => self.dispatcher.dispatch(Arc::clone(callback)),
            Action::Cancel(canceller) => {
                canceller.cancel(ContextError::DeadlineExceeded);
            }
        }

        let Some(period) = event.period else {
            return;
        };
        if receiver_gone {
            trace!("{}: retiring ticker {}, receiver dropped", self.name, event.id);
            return;
        }
        // Every reschedule must move strictly forward
        match event.due.checked_add_signed(period) {
            Some(next) => {
                event.due = next;
                state.registry.insert(event);
            }
            None => debug!(
                "{}: retiring ticker {}, next tick past the end of time",
                self.name, event.id
            ),
        }
    }

    /// Fire everything due up to the target chosen by `target`, then commit it
    ///
    /// The lock is held for the whole pass. No action calls back into the
    /// engine, so concurrent creators and stoppers simply wait for it.
    fn advance(
        &self,
        target: impl FnOnce(&mut EngineState) -> ClockResult<Timestamp>,
    ) -> ClockResult<(Timestamp, Duration)> {
        let (previous, target, fired) = {
            let mut state = self.state.lock();
            let previous = state.now;
            let target = target(&mut *state)?;

            let mut fired = 0usize;
            while let Some(event) = state.registry.pop_due(target) {
                state.now = state.now.max(event.due);
                self.fire(&mut state, event);
                fired += 1;
            }
            state.now = target;
            (previous, target, fired)
        };

        debug!(
            "{}: time moved {} -> {} ({} firings)",
            self.name, previous, target, fired
        );
        self.dispatcher.run_inline();
        Ok((target, target - previous))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let pending = self.state.get_mut().registry.len();
        if pending > 0 {
            debug!("{} dropped with {} pending events", self.name, pending);
        }
    }
}

impl MockClock {
    /// Create a virtual clock at the Unix epoch
    pub fn new() -> Self {
        Self::with_config(MockClockConfig::default())
    }

    /// Create a virtual clock starting at a specific time
    pub fn at(start: Timestamp) -> Self {
        Self::with_config(MockClockConfig::starting_at(start))
    }

    /// Create with custom configuration
    pub fn with_config(config: MockClockConfig) -> Self {
        debug!("Creating {} at {}", config.name, config.start);
        let dispatcher = CallbackDispatcher::start(&config.callback_thread_name);
        Self {
            engine: Arc::new(Engine::new(config, dispatcher)),
        }
    }

    /// Discard every pending event and stop the callback worker
    ///
    /// Pending timers, tickers and deadlines are dropped without firing, which
    /// also releases callbacks that hold a clone of this clock. Callbacks that
    /// already fired still run. The clock stays usable afterwards, with later
    /// callbacks run inline by the thread that advances time.
    pub fn close(&self) {
        let discarded = {
            let mut state = self.engine.state.lock();
            std::mem::replace(&mut state.registry, EventRegistry::new())
        };
        debug!(
            "Closing {} with {} pending events",
            self.engine.name,
            discarded.len()
        );
        // Dropped outside the lock: callbacks may own clones of this clock
        drop(discarded);
        self.engine.dispatcher.shutdown();
    }

    /// Like [`Updatable::set`], but reports backward moves instead of panicking
    pub fn try_set(&self, t: Timestamp) -> ClockResult<Duration> {
        self.engine
            .advance(|state| {
                if t < state.now {
                    return Err(ClockError::TimeWentBackwards {
                        now: state.now,
                        target: t,
                    });
                }
                Ok(t)
            })
            .map(|(_, delta)| delta)
    }

    /// Like [`Updatable::add`], but reports negative durations instead of panicking
    pub fn try_add(&self, d: Duration) -> ClockResult<Timestamp> {
        self.engine
            .advance(|state| {
                let target = saturating_add(state.now, d);
                if d < Duration::zero() {
                    return Err(ClockError::TimeWentBackwards {
                        now: state.now,
                        target,
                    });
                }
                Ok(target)
            })
            .map(|(now, _)| now)
    }

    /// Number of pending timers, tickers and deadlines
    pub fn pending(&self) -> usize {
        self.engine.state.lock().registry.len()
    }

    /// Pending events in the order they would fire
    pub fn pending_events(&self) -> Vec<PendingEvent> {
        self.engine.state.lock().registry.snapshot()
    }

    /// Due time of the earliest pending event
    pub fn next_due(&self) -> Option<Timestamp> {
        self.engine.state.lock().registry.next_due()
    }

    /// Block until every `after_func` callback fired so far has returned
    ///
    /// Must not be called from inside a callback.
    pub fn drain_callbacks(&self) {
        self.engine.dispatcher.drain();
    }

    fn timer_control(&self, id: EventId, action: Action) -> MockTimer {
        MockTimer {
            engine: Arc::downgrade(&self.engine),
            id,
            action,
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.engine.state.lock();
        f.debug_struct("MockClock")
            .field("name", &self.engine.name)
            .field("now", &state.now)
            .field("pending", &state.registry.len())
            .field("callback_worker", &self.engine.dispatcher.has_worker())
            .finish()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        self.engine.state.lock().now
    }

    fn after(&self, d: Duration) -> Receiver<Timestamp> {
        let (tx, rx) = bounded(1);
        self.engine
            .schedule(|now| saturating_add(now, d), None, Action::Notify(tx));
        rx
    }

    fn after_func(&self, d: Duration, f: Callback) -> Timer {
        let action = Action::Callback(Arc::from(f));
        let id = self
            .engine
            .schedule(|now| saturating_add(now, d), None, action.clone());
        Timer::new(None, Box::new(self.timer_control(id, action)))
    }

    fn new_timer(&self, d: Duration) -> Timer {
        let (tx, rx) = bounded(1);
        let action = Action::Notify(tx);
        let id = self
            .engine
            .schedule(|now| saturating_add(now, d), None, action.clone());
        Timer::new(Some(rx), Box::new(self.timer_control(id, action)))
    }

    fn new_ticker(&self, d: Duration) -> Ticker {
        if let Err(err) = check_interval(d) {
            panic!("{err}");
        }
        let (tx, rx) = bounded(1);
        let action = Action::Notify(tx);
        let id = self
            .engine
            .schedule(|now| saturating_add(now, d), Some(d), action.clone());
        Ticker::new(
            rx,
            Box::new(MockTicker {
                engine: Arc::downgrade(&self.engine),
                id,
                action,
            }),
        )
    }

    fn sleep(&self, d: Duration) {
        let _ = self.after(d).recv();
    }

    fn deadline_context(&self, parent: &Context, deadline: Timestamp) -> (Context, CancelFunc) {
        deadline::deadline_context(&self.engine, parent, deadline)
    }

    fn name(&self) -> &str {
        &self.engine.name
    }
}

impl Updatable for MockClock {
    fn add(&self, d: Duration) -> Timestamp {
        self.try_add(d).unwrap_or_else(|err| panic!("{err}"))
    }

    fn set(&self, t: Timestamp) -> Duration {
        self.try_set(t).unwrap_or_else(|err| panic!("{err}"))
    }

    fn move_next(&self) -> ClockResult<(Timestamp, Duration)> {
        self.engine.advance(|state| {
            let due = state
                .registry
                .next_due()
                .ok_or(ClockError::NoPendingEvents)?;
            Ok(due.max(state.now))
        })
    }
}

/// Timer handle: the event id plus what to re-arm on reset
struct MockTimer {
    engine: Weak<Engine>,
    id: EventId,
    action: Action,
}

impl TimerControl for MockTimer {
    fn stop(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|engine| engine.remove(self.id))
    }

    fn reset(&self, d: Duration) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|engine| engine.rearm(self.id, d, None, self.action.clone()))
    }
}

struct MockTicker {
    engine: Weak<Engine>,
    id: EventId,
    action: Action,
}

impl TickerControl for MockTicker {
    fn stop(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|engine| engine.remove(self.id))
    }

    fn reset(&self, period: Duration) {
        if let Some(engine) = self.engine.upgrade() {
            engine.rearm(self.id, period, Some(period), self.action.clone());
        }
    }
}

#[cfg(test)]
impl MockClock {
    /// Clock whose callbacks run inline on the advancing thread
    fn without_worker() -> Self {
        Self {
            engine: Arc::new(Engine::new(
                MockClockConfig::default(),
                CallbackDispatcher::inline(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use chrono::{DateTime, Utc};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use tempo_core::EPOCH;

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let make = move |label: &'static str| -> Callback {
            let l = l.clone();
            Box::new(move || l.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_add_advances_now_by_exactly_d() {
        let clock = MockClock::new();
        for d in [0, 1, 59, 3600] {
            let before = clock.now();
            let after = clock.add(secs(d));
            assert_eq!(after, before + secs(d));
            assert_eq!(clock.now(), before + secs(d));
        }
    }

    #[test]
    fn test_set_returns_delta() {
        let clock = MockClock::new();
        assert_eq!(clock.set(EPOCH + secs(90)), secs(90));
        assert_eq!(clock.set(EPOCH + secs(90)), Duration::zero());
    }

    #[test]
    fn test_since_and_until() {
        let clock = MockClock::at(EPOCH + secs(100));
        assert_eq!(clock.since(EPOCH + secs(40)), secs(60));
        assert_eq!(clock.until(EPOCH + secs(130)), secs(30));
        assert_eq!(clock.until(EPOCH + secs(70)), secs(-30));
    }

    #[test]
    fn test_timer_fires_exactly_once() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let timer = clock.new_timer(secs(5));
        let c = timer.c().unwrap();

        clock.set(t0 + secs(4));
        assert!(c.try_recv().is_err());

        clock.set(t0 + secs(5));
        assert_eq!(c.try_recv(), Ok(t0 + secs(5)));

        clock.set(t0 + secs(500));
        assert!(c.try_recv().is_err());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_after_delivers_due_time_on_overshoot() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let rx = clock.after(secs(3));

        clock.add(secs(10));
        assert_eq!(rx.try_recv(), Ok(t0 + secs(3)));
    }

    #[test]
    fn test_ticker_bookkeeping_advances_by_whole_periods() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let p = Duration::milliseconds(250);
        let ticker = clock.new_ticker(p);

        clock.set(t0 + p * 3);

        // First tick is buffered, the other two were dropped
        assert_eq!(ticker.c().try_recv(), Ok(t0 + p));
        assert!(ticker.c().try_recv().is_err());

        let pending = clock.pending_events();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, EventKind::Ticker);
        assert_eq!(pending[0].due, t0 + p * 4);
        assert_eq!(pending[0].period, Some(p));
    }

    #[test]
    fn test_ticker_at_end_of_time_fires_once_and_retires() {
        let end = DateTime::<Utc>::MAX_UTC;
        let clock = MockClock::at(end - Duration::milliseconds(500));
        let ticker = clock.new_ticker(secs(1));

        let driver = clock.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            driver.set(end);
            let _ = done_tx.send(());
        });
        assert!(
            done_rx.recv_timeout(std::time::Duration::from_secs(10)).is_ok(),
            "set to the end of time did not return"
        );

        assert_eq!(ticker.c().try_recv(), Ok(end));
        assert_eq!(clock.pending(), 0);
        assert_eq!(clock.move_next(), Err(ClockError::NoPendingEvents));
        assert_eq!(clock.add(Duration::MAX), end);
    }

    #[test]
    fn test_ticker_with_dropped_receiver_is_retired() {
        let clock = MockClock::new();
        let rx = clock.tick(secs(1));
        clock.add(secs(1));
        assert_eq!(clock.pending(), 1);

        drop(rx);
        clock.add(secs(1));
        assert_eq!(clock.pending(), 0);

        // Dropping only the handle keeps it ticking while a receiver lives
        let ticker = clock.new_ticker(secs(1));
        let c = ticker.c().clone();
        drop(ticker);
        clock.add(secs(2));
        assert_eq!(clock.pending(), 1);
        assert!(c.try_recv().is_ok());
    }

    #[test]
    fn test_ticker_delivers_every_tick_when_drained() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let ticker = clock.new_ticker(secs(1));

        for n in 1..=5 {
            clock.add(secs(1));
            assert_eq!(ticker.c().try_recv(), Ok(t0 + secs(n)));
        }
    }

    #[test]
    fn test_ticker_stop_and_reset() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let ticker = clock.new_ticker(secs(1));

        assert!(ticker.stop());
        assert!(!ticker.stop());
        clock.add(secs(5));
        assert!(ticker.c().try_recv().is_err());

        ticker.reset(secs(2));
        clock.add(secs(2));
        assert_eq!(ticker.c().try_recv(), Ok(t0 + secs(7)));
        assert_eq!(clock.next_due(), Some(t0 + secs(9)));
    }

    #[test]
    #[should_panic(expected = "non-positive interval")]
    fn test_new_ticker_rejects_zero_period() {
        MockClock::new().new_ticker(Duration::zero());
    }

    #[test]
    fn test_tick_with_non_positive_period_never_delivers() {
        let clock = MockClock::new();
        let rx = clock.tick(Duration::zero());
        clock.add(secs(100));
        assert!(rx.try_recv().is_err());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_tick_keeps_running_without_handle() {
        let clock = MockClock::new();
        let rx = clock.tick(secs(1));
        clock.add(secs(1));
        assert!(rx.try_recv().is_ok());
        clock.add(secs(1));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_move_next_jumps_to_earliest_event() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let late = clock.after(secs(9));
        let early = clock.after(secs(5));

        assert_eq!(clock.move_next(), Ok((t0 + secs(5), secs(5))));
        assert_eq!(clock.now(), t0 + secs(5));
        assert_eq!(early.try_recv(), Ok(t0 + secs(5)));
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_move_next_without_events_fails_fast() {
        let clock = MockClock::new();
        let t0 = clock.now();
        assert_eq!(clock.move_next(), Err(ClockError::NoPendingEvents));
        assert_eq!(clock.now(), t0);
    }

    #[test]
    fn test_move_next_skips_stopped_timers() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let timer = clock.new_timer(secs(1));
        let _rx = clock.after(secs(3));
        timer.stop();

        assert_eq!(clock.move_next(), Ok((t0 + secs(3), secs(3))));
    }

    #[test]
    fn test_set_backwards_is_rejected_and_now_unchanged() {
        let clock = MockClock::at(EPOCH + secs(100));
        let now = clock.now();

        for back in [1, 10, 100] {
            let target = now - secs(back);
            assert_eq!(
                clock.try_set(target),
                Err(ClockError::TimeWentBackwards { now, target })
            );
            assert_eq!(clock.now(), now);
        }

        let result = catch_unwind(AssertUnwindSafe(|| clock.set(now - Duration::nanoseconds(1))));
        assert!(result.is_err());
        assert_eq!(clock.now(), now);
    }

    #[test]
    #[should_panic(expected = "cannot move clock backwards")]
    fn test_set_backwards_panics() {
        let clock = MockClock::at(EPOCH + secs(10));
        clock.set(EPOCH);
    }

    #[test]
    #[should_panic(expected = "cannot move clock backwards")]
    fn test_add_negative_panics() {
        MockClock::new().add(secs(-1));
    }

    #[test]
    fn test_firing_order_is_due_then_creation() {
        let clock = MockClock::new();
        let (log, cb) = recorder();

        clock.after_func(secs(2), cb("b1"));
        clock.after_func(secs(1), cb("a"));
        clock.after_func(secs(2), cb("b2"));
        clock.after_func(secs(3), cb("c"));
        clock.after_func(secs(2), cb("b3"));

        clock.add(secs(3));
        clock.drain_callbacks();

        assert_eq!(*log.lock(), vec!["a", "b1", "b2", "b3", "c"]);
    }

    #[test]
    fn test_stop_before_fire_wins() {
        let clock = MockClock::new();
        let timer = clock.new_timer(secs(1));

        assert!(timer.stop());
        assert!(!timer.stop());
        clock.add(secs(2));
        assert!(timer.c().unwrap().try_recv().is_err());
    }

    #[test]
    fn test_stop_after_fire_reports_already_fired() {
        let clock = MockClock::new();
        let timer = clock.new_timer(secs(1));
        clock.add(secs(1));
        assert!(!timer.stop());
        assert!(timer.c().unwrap().try_recv().is_ok());
    }

    #[test]
    fn test_timer_reset() {
        let clock = MockClock::new();
        let t0 = clock.now();
        let timer = clock.new_timer(secs(5));
        let c = timer.c().unwrap();

        assert!(timer.reset(secs(10)));
        assert_eq!(clock.pending(), 1);
        clock.add(secs(5));
        assert!(c.try_recv().is_err());
        clock.add(secs(5));
        assert_eq!(c.try_recv(), Ok(t0 + secs(10)));

        // Resetting a fired timer arms it again
        assert!(!timer.reset(secs(1)));
        clock.add(secs(1));
        assert_eq!(c.try_recv(), Ok(t0 + secs(11)));
    }

    #[test]
    fn test_after_func_reset_runs_callback_again() {
        let clock = MockClock::new();
        let (log, cb) = recorder();
        let timer = clock.after_func(secs(1), cb("fired"));
        assert!(timer.c().is_none());

        clock.add(secs(1));
        timer.reset(secs(1));
        clock.add(secs(1));
        clock.drain_callbacks();

        assert_eq!(*log.lock(), vec!["fired", "fired"]);
    }

    #[test]
    fn test_non_positive_durations_fire_immediately() {
        let clock = MockClock::new();
        let t0 = clock.now();

        assert_eq!(clock.after(Duration::zero()).try_recv(), Ok(t0));
        assert_eq!(clock.after(secs(-3)).try_recv(), Ok(t0));

        clock.sleep(Duration::zero());
        clock.sleep(secs(-1));

        let (log, cb) = recorder();
        let timer = clock.after_func(secs(-1), cb("now"));
        clock.drain_callbacks();
        assert_eq!(*log.lock(), vec!["now"]);
        assert!(!timer.stop());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_callback_may_reenter_clock() {
        let clock = MockClock::new();
        let inner = clock.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);

        clock.after_func(
            secs(1),
            Box::new(move || {
                let seen = inner.now();
                inner.after_func(secs(1), Box::new(|| {}));
                inner.add(secs(10));
                let _ = tx.send(seen);
            }),
        );
        clock.add(secs(1));

        let seen = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(seen >= EPOCH + secs(1));
        clock.drain_callbacks();
        assert_eq!(clock.now(), EPOCH + secs(11));
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_inline_callbacks_keep_order_and_may_reenter() {
        let clock = MockClock::without_worker();
        let (log, cb) = recorder();

        clock.after_func(secs(2), cb("b"));
        clock.after_func(secs(1), cb("a"));
        let inner = clock.clone();
        let l = log.clone();
        clock.after_func(
            secs(3),
            Box::new(move || {
                l.lock().push("reenter");
                let nested = l.clone();
                inner.after_func(secs(1), Box::new(move || nested.lock().push("nested")));
                inner.add(secs(1));
            }),
        );

        clock.add(secs(3));

        // Ran on this thread before `add` returned
        assert_eq!(*log.lock(), vec!["a", "b", "reenter", "nested"]);
        assert_eq!(clock.now(), EPOCH + secs(4));
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_close_releases_engine_held_by_callback() {
        let clock = MockClock::with_config(MockClockConfig {
            callback_thread_name: "close-callbacks".to_string(),
            ..Default::default()
        });
        let inner = clock.clone();
        clock.after_func(
            secs(1),
            Box::new(move || {
                inner.after_func(secs(1), Box::new(|| {}));
            }),
        );
        let _rx = clock.after(secs(5));
        assert_eq!(clock.pending(), 2);

        let engine = Arc::downgrade(&clock.engine);
        clock.close();

        assert_eq!(clock.pending(), 0);
        assert!(!clock.engine.dispatcher.has_worker());
        drop(clock);
        assert!(engine.upgrade().is_none());
    }

    #[test]
    fn test_closed_clock_still_advances_and_runs_callbacks_inline() {
        let clock = MockClock::new();
        clock.close();

        let (log, cb) = recorder();
        clock.after_func(secs(1), cb("after-close"));
        clock.add(secs(1));

        assert_eq!(*log.lock(), vec!["after-close"]);
    }

    #[test]
    fn test_handles_outlive_clock() {
        let clock = MockClock::new();
        let timer = clock.new_timer(secs(1));
        let ticker = clock.new_ticker(secs(1));
        drop(clock);

        assert!(!timer.stop());
        assert!(!timer.reset(secs(1)));
        assert!(!ticker.stop());
        ticker.reset(secs(1));
    }

    #[test]
    fn test_clone_shares_state() {
        let clock1 = MockClock::new();
        let clock2 = clock1.clone();

        clock1.add(secs(100));
        let rx = clock2.after(secs(1));
        clock1.add(secs(1));

        assert_eq!(clock1.now(), clock2.now());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_pending_counts_live_events() {
        let clock = MockClock::new();
        let _a = clock.after(secs(1));
        let t = clock.new_timer(secs(2));
        let _k = clock.new_ticker(secs(3));
        assert_eq!(clock.pending(), 3);

        t.stop();
        assert_eq!(clock.pending(), 2);

        clock.add(secs(10));
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn test_with_config_sets_name_and_start() {
        let start = EPOCH + Duration::days(365);
        let clock = MockClock::with_config(MockClockConfig {
            start,
            name: "ledger".to_string(),
            ..Default::default()
        });
        assert_eq!(clock.now(), start);
        assert_eq!(clock.name(), "ledger");
    }
}
