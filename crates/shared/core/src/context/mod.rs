//! Cancellation contexts
//!
//! A [`Context`] is a node in a cancellation tree. Cancelling a node cancels
//! every descendant with the same cause; the first cause recorded wins and
//! later cancellations are no-ops.
//!
//! Contexts never arm timers themselves. [`Context::with_deadline`] only
//! records the deadline and hands back a [`Canceller`]; the clock that created
//! it decides when the deadline has passed.

mod error;

pub use error::ContextError;

use crate::values::Timestamp;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// A cancellable unit of work, optionally bounded by a deadline
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    /// Effective deadline (already the minimum with every ancestor's)
    deadline: Option<Timestamp>,
    /// Kept alive so an ancestor's cancellation reaches us through `children`
    parent: Option<Context>,
    /// Disconnects once `State::done_tx` is dropped
    done_rx: Receiver<()>,
    state: Mutex<State>,
}

struct State {
    err: Option<ContextError>,
    done_tx: Option<Sender<()>>,
    children: Vec<Weak<Inner>>,
}

impl Context {
    /// Root context: never cancelled, no deadline
    pub fn background() -> Self {
        Self::node(None, None)
    }

    /// Derive a child that is cancelled when `cancel` is called or when the
    /// parent is cancelled, whichever happens first
    pub fn with_cancel(parent: &Context) -> (Context, CancelFunc) {
        let ctx = Self::child(parent, None);
        let canceller = Canceller { ctx: ctx.clone() };
        let cancel = CancelFunc::new(move || {
            canceller.cancel(ContextError::Canceled);
        });
        (ctx, cancel)
    }

    /// Derive a child whose deadline is no later than `deadline`
    ///
    /// Nothing is armed: the caller owns the returned [`Canceller`] and must
    /// trigger [`ContextError::DeadlineExceeded`] once its clock reaches
    /// [`Context::deadline`].
    pub fn with_deadline(parent: &Context, deadline: Timestamp) -> (Context, Canceller) {
        let ctx = Self::child(parent, Some(deadline));
        let canceller = Canceller { ctx: ctx.clone() };
        (ctx, canceller)
    }

    /// Effective deadline, if this context or an ancestor has one
    pub fn deadline(&self) -> Option<Timestamp> {
        self.inner.deadline
    }

    /// Cancellation cause, or `None` while the context is live
    pub fn err(&self) -> Option<ContextError> {
        self.inner.state.lock().err
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Channel that disconnects when the context is cancelled
    ///
    /// Nothing is ever sent on it, so `recv()` returns `Err` exactly when the
    /// context is done. It can be used inside `crossbeam_channel::select!`.
    pub fn done(&self) -> Receiver<()> {
        self.inner.done_rx.clone()
    }

    /// Block until the context is cancelled
    pub fn wait(&self) {
        let _ = self.inner.done_rx.recv();
    }

    /// Block until the context is cancelled or `timeout` elapses on the host
    ///
    /// Returns true if the context is done.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        matches!(
            self.inner.done_rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    fn node(deadline: Option<Timestamp>, parent: Option<Context>) -> Self {
        let (done_tx, done_rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                deadline,
                parent,
                done_rx,
                state: Mutex::new(State {
                    err: None,
                    done_tx: Some(done_tx),
                    children: Vec::new(),
                }),
            }),
        }
    }

    fn child(parent: &Context, deadline: Option<Timestamp>) -> Self {
        let deadline = match (parent.deadline(), deadline) {
            (Some(inherited), Some(own)) => Some(inherited.min(own)),
            (inherited, own) => inherited.or(own),
        };
        let ctx = Self::node(deadline, Some(parent.clone()));

        let parent_err = {
            let mut state = parent.inner.state.lock();
            match state.err {
                Some(err) => Some(err),
                None => {
                    state.children.retain(|c| c.strong_count() > 0);
                    state.children.push(Arc::downgrade(&ctx.inner));
                    None
                }
            }
        };
        if let Some(err) = parent_err {
            ctx.cancel(err);
        }
        ctx
    }

    /// Record `cause` and cancel all descendants; false if already done
    fn cancel(&self, cause: ContextError) -> bool {
        let children = {
            let mut state = self.inner.state.lock();
            if state.err.is_some() {
                return false;
            }
            state.err = Some(cause);
            state.done_tx = None;
            std::mem::take(&mut state.children)
        };

        for child in children.iter().filter_map(Weak::upgrade) {
            Context { inner: child }.cancel(cause);
        }

        if let Some(parent) = &self.inner.parent {
            let me = Arc::as_ptr(&self.inner);
            parent
                .inner
                .state
                .lock()
                .children
                .retain(|c| !std::ptr::eq(c.as_ptr(), me));
        }
        true
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish()
    }
}

/// Clock-side trigger for a context created by [`Context::with_deadline`]
#[derive(Clone, Debug)]
pub struct Canceller {
    ctx: Context,
}

impl Canceller {
    /// Cancel with `cause`; false if the context was already done
    pub fn cancel(&self, cause: ContextError) -> bool {
        self.ctx.cancel(cause)
    }

    pub fn is_done(&self) -> bool {
        self.ctx.is_done()
    }
}

/// Idempotent cancel function returned alongside a derived context
#[derive(Clone)]
pub struct CancelFunc {
    f: Arc<dyn Fn() + Send + Sync>,
}

impl CancelFunc {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    pub fn cancel(&self) {
        (self.f)()
    }
}

impl fmt::Debug for CancelFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelFunc")
    }
}
