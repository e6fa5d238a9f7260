use crossbeam_channel::Sender;
use std::fmt;
use std::sync::Arc;
use tempo_core::{Canceller, Duration, Timestamp};

/// Identity of a scheduled event
///
/// Handles keep this id rather than a reference into the registry, and a
/// timer reset or ticker reschedule keeps it unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub(crate) u64);

impl EventId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a scheduled event does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// One-shot, delivers the firing time on a channel
    Timer,
    /// Repeating, delivers each tick on a channel
    Ticker,
    /// One-shot, runs a callback on the dispatcher thread
    Callback,
    /// One-shot, cancels a context with a deadline-exceeded cause
    Deadline,
}

/// Read-only view of a pending event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub due: Timestamp,
    /// Only set for tickers
    pub period: Option<Duration>,
}

#[derive(Clone)]
pub(crate) enum Action {
    Notify(Sender<Timestamp>),
    Callback(Arc<dyn Fn() + Send + Sync>),
    Cancel(Canceller),
}

pub(crate) struct ScheduledEvent {
    pub id: EventId,
    pub due: Timestamp,
    pub period: Option<Duration>,
    pub action: Action,
}

impl ScheduledEvent {
    pub fn kind(&self) -> EventKind {
        match (&self.action, self.period) {
            (Action::Notify(_), Some(_)) => EventKind::Ticker,
            (Action::Notify(_), None) => EventKind::Timer,
            (Action::Callback(_), _) => EventKind::Callback,
            (Action::Cancel(_), _) => EventKind::Deadline,
        }
    }

    /// A deadline whose context was already cancelled (e.g. through its
    /// parent) has nothing left to do
    pub fn is_alive(&self) -> bool {
        match &self.action {
            Action::Cancel(canceller) => !canceller.is_done(),
            Action::Notify(_) | Action::Callback(_) => true,
        }
    }

    pub fn view(&self) -> PendingEvent {
        PendingEvent {
            id: self.id,
            kind: self.kind(),
            due: self.due,
            period: self.period,
        }
    }
}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("due", &self.due)
            .field("period", &self.period)
            .finish()
    }
}
