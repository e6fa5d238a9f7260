use crate::system_timer::{Delivery, HostedTimer, instant_after};
use chrono::Utc;
use crossbeam_channel::{Receiver, at, bounded, select};
use log::error;
use std::sync::Arc;
use std::thread;
use tempo_core::{CancelFunc, Context, ContextError, Duration, Timestamp, to_std};
use tempo_ports::{Callback, Clock, Ticker, Timer, check_interval};

/// Real system clock for production use
///
/// Reads wall-clock time. Timers and tickers each run on their own thread
/// and deliver the wall-clock time at which they fired.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn after(&self, d: Duration) -> Receiver<Timestamp> {
        let (tx, rx) = bounded(1);
        HostedTimer::spawn(d, None, Delivery::Notify(tx));
        rx
    }

    fn after_func(&self, d: Duration, f: Callback) -> Timer {
        let timer = HostedTimer::spawn(d, None, Delivery::Callback(Arc::from(f)));
        Timer::new(None, Box::new(timer))
    }

    fn new_timer(&self, d: Duration) -> Timer {
        let (tx, rx) = bounded(1);
        let timer = HostedTimer::spawn(d, None, Delivery::Notify(tx));
        Timer::new(Some(rx), Box::new(timer))
    }

    fn new_ticker(&self, d: Duration) -> Ticker {
        if let Err(err) = check_interval(d) {
            panic!("{err}");
        }
        let (tx, rx) = bounded(1);
        let ticker = HostedTimer::spawn(d, Some(d), Delivery::Notify(tx));
        Ticker::new(rx, Box::new(ticker))
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(to_std(d));
    }

    fn deadline_context(&self, parent: &Context, deadline: Timestamp) -> (Context, CancelFunc) {
        let (ctx, canceller) = Context::with_deadline(parent, deadline);
        let effective = ctx.deadline().unwrap_or(deadline);

        if !ctx.is_done() {
            let remaining = effective - Utc::now();
            if remaining <= Duration::zero() {
                canceller.cancel(ContextError::DeadlineExceeded);
            } else {
                let done = ctx.done();
                let due = at(instant_after(remaining));
                let watcher = canceller.clone();
                let spawned = thread::Builder::new()
                    .name("tempo-deadline".to_string())
                    .spawn(move || {
                        select! {
                            recv(done) -> _ => {},
                            recv(due) -> _ => {
                                watcher.cancel(ContextError::DeadlineExceeded);
                            },
                        }
                    });
                if let Err(e) = spawned {
                    error!("Failed to spawn deadline watcher: {}", e);
                }
            }
        }

        let cancel = CancelFunc::new(move || {
            canceller.cancel(ContextError::Canceled);
        });
        (ctx, cancel)
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}
