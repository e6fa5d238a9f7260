use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Sequenced hand-off for timer callbacks
///
/// Callbacks are queued in firing order and run one at a time on a dedicated
/// worker thread, outside the engine lock, so a callback may call back into
/// the clock (even advance it) without deadlocking.
pub(crate) struct CallbackDispatcher {
    tx: Sender<Message>,
    /// Used to run callbacks on the caller's thread when no worker exists
    rx: Receiver<Message>,
    has_worker: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackDispatcher {
    pub fn start(thread_name: &str) -> Self {
        let (tx, rx) = unbounded::<Message>();
        let worker_rx = rx.clone();
        let spawned = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                for message in worker_rx.iter() {
                    match message {
                        Message::Run(job) => run_job(job),
                        Message::Shutdown => break,
                    }
                }
                debug!("callback worker exiting");
            });

        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(
                    "Failed to spawn callback worker '{}': {}; callbacks will run inline",
                    thread_name, e
                );
                None
            }
        };

        Self {
            tx,
            rx,
            has_worker: AtomicBool::new(worker.is_some()),
            worker: Mutex::new(worker),
        }
    }

    /// Dispatcher without a worker; callbacks run on whichever thread
    /// calls [`CallbackDispatcher::run_inline`]
    #[cfg(test)]
    pub fn inline() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            has_worker: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn has_worker(&self) -> bool {
        self.has_worker.load(Ordering::Acquire)
    }

    /// Queue `callback` behind every callback dispatched before it
    pub fn dispatch(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        let _ = self.tx.send(Message::Run(Box::new(move || callback())));
    }

    /// Run queued callbacks on the calling thread if there is no worker
    ///
    /// Must be called without holding the engine lock.
    pub fn run_inline(&self) {
        if self.has_worker() {
            return;
        }
        while let Ok(message) = self.rx.try_recv() {
            if let Message::Run(job) = message {
                run_job(job);
            }
        }
    }

    /// Block until every callback dispatched so far has returned
    pub fn drain(&self) {
        if !self.has_worker() {
            self.run_inline();
            return;
        }
        let (done_tx, done_rx) = bounded(1);
        let barrier: Job = Box::new(move || {
            let _ = done_tx.send(());
        });
        if self.tx.send(Message::Run(barrier)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Stop the worker once the callbacks queued so far have run
    ///
    /// Later callbacks run inline. Called from the worker itself, the worker
    /// exits after the current callback returns.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        if worker.thread().id() != thread::current().id() {
            let _ = worker.join();
        }
        self.has_worker.store(false, Ordering::Release);
    }
}

fn run_job(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        warn!("Timer callback panicked: {}", panic_message(panic.as_ref()));
    }
}

/// Run a callback on the current thread, logging instead of unwinding
pub(crate) fn invoke(callback: &(dyn Fn() + Send + Sync)) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        warn!("Timer callback panicked: {}", panic_message(panic.as_ref()));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
