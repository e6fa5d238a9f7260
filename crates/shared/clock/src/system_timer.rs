use crate::dispatch;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError, at, bounded, never, select, unbounded};
use log::{error, trace};
use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};
use tempo_core::{Duration, Timestamp, to_std};
use tempo_ports::{TickerControl, TimerControl};

/// Fallback horizon for durations that overflow `Instant`
const FAR_FUTURE: StdDuration = StdDuration::from_secs(60 * 60 * 24 * 365 * 30);

/// Wall-clock instant `d` from now; non-positive durations are due now
pub(crate) fn instant_after(d: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(to_std(d))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// What a real timer does when it fires
pub(crate) enum Delivery {
    Notify(Sender<Timestamp>),
    Callback(Arc<dyn Fn() + Send + Sync>),
}

enum Command {
    Stop(Sender<bool>),
    Reset {
        delay: Duration,
        period: Option<Duration>,
        reply: Sender<bool>,
    },
}

/// Control side of a timer hosted on its own thread
///
/// The host thread waits on either the next deadline or a command. It exits
/// once nothing is armed and the handle is gone, or once a ticker's receiver
/// is dropped.
pub(crate) struct HostedTimer {
    control: Sender<Command>,
}

impl HostedTimer {
    pub fn spawn(delay: Duration, period: Option<Duration>, delivery: Delivery) -> Self {
        let (control, commands) = unbounded();
        let host = Host {
            commands,
            detached: false,
            deadline: Some(instant_after(delay)),
            period,
            delivery,
        };

        if let Err(e) = thread::Builder::new()
            .name("tempo-timer".to_string())
            .spawn(move || host.run())
        {
            // The command receiver went down with the closure, so the
            // handle reports the timer as already stopped
            error!("Failed to spawn timer thread: {}", e);
        }

        Self { control }
    }

    fn request(&self, command: impl FnOnce(Sender<bool>) -> Command) -> bool {
        let (reply, answer) = bounded(1);
        if self.control.send(command(reply)).is_err() {
            return false;
        }
        answer.recv().unwrap_or(false)
    }
}

impl TimerControl for HostedTimer {
    fn stop(&self) -> bool {
        self.request(Command::Stop)
    }

    fn reset(&self, d: Duration) -> bool {
        self.request(|reply| Command::Reset {
            delay: d,
            period: None,
            reply,
        })
    }
}

impl TickerControl for HostedTimer {
    fn stop(&self) -> bool {
        self.request(Command::Stop)
    }

    fn reset(&self, period: Duration) {
        self.request(|reply| Command::Reset {
            delay: period,
            period: Some(period),
            reply,
        });
    }
}

enum Wake {
    /// `None` once the handle is dropped
    Command(Option<Command>),
    Due,
}

struct Host {
    commands: Receiver<Command>,
    detached: bool,
    deadline: Option<Instant>,
    period: Option<Duration>,
    delivery: Delivery,
}

impl Host {
    fn run(mut self) {
        loop {
            let timeout = match self.deadline {
                Some(deadline) => at(deadline),
                None => never(),
            };

            let wake = select! {
                recv(self.commands) -> command => Wake::Command(command.ok()),
                recv(timeout) -> _ => Wake::Due,
            };

            match wake {
                Wake::Command(Some(Command::Stop(reply))) => {
                    let _ = reply.send(self.deadline.take().is_some());
                }
                Wake::Command(Some(Command::Reset {
                    delay,
                    period,
                    reply,
                })) => {
                    let was_armed = self.deadline.is_some();
                    self.deadline = Some(instant_after(delay));
                    self.period = period;
                    let _ = reply.send(was_armed);
                }
                Wake::Command(None) => {
                    self.detached = true;
                    self.commands = never();
                }
                Wake::Due => {
                    if !self.fire() {
                        break;
                    }
                }
            }

            if self.detached && self.deadline.is_none() {
                break;
            }
        }
        trace!("timer thread exiting");
    }

    /// Deliver one firing; false once nobody can observe further firings
    fn fire(&mut self) -> bool {
        match &self.delivery {
            Delivery::Notify(tx) => {
                if let Err(TrySendError::Disconnected(_)) = tx.try_send(Utc::now()) {
                    return false;
                }
            }
            Delivery::Callback(callback) => dispatch::invoke(callback.as_ref()),
        }

        self.deadline = match (self.deadline, self.period) {
            (Some(previous), Some(period)) => {
                let step = to_std(period);
                let now = Instant::now();
                // Drop ticks a slow receiver missed
                let next = previous.checked_add(step).unwrap_or(now);
                Some(if next <= now { instant_after(period) } else { next })
            }
            _ => None,
        };
        true
    }
}
