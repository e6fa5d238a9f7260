use crate::event::{EventId, PendingEvent, ScheduledEvent};
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use tempo_core::Timestamp;

/// Ordering key: due time first, then insertion order
type DueKey = Reverse<(Timestamp, u64)>;

/// Pending scheduled events, ordered by due time
///
/// Ties on `due` are broken by insertion order, so firing order is the same
/// on every run. Re-inserting an event (ticker reschedule, timer reset)
/// counts as a new insertion.
///
/// Not synchronized; the engine keeps it behind its lock.
pub(crate) struct EventRegistry {
    queue: PriorityQueue<EventId, DueKey>,
    events: HashMap<EventId, ScheduledEvent>,
    next_seq: u64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            events: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Insert `event`, replacing any entry with the same id
    pub fn insert(&mut self, event: ScheduledEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(event.id, Reverse((event.due, seq)));
        self.events.insert(event.id, event);
    }

    pub fn remove(&mut self, id: EventId) -> Option<ScheduledEvent> {
        self.queue.remove(&id);
        self.events.remove(&id)
    }

    /// Remove and return the earliest live event due at or before `t`
    ///
    /// Dead events met on the way are evicted.
    pub fn pop_due(&mut self, t: Timestamp) -> Option<ScheduledEvent> {
        loop {
            let (_, Reverse((due, _))) = self.queue.peek()?;
            if *due > t {
                return None;
            }
            let (id, _) = self.queue.pop()?;
            match self.events.remove(&id) {
                Some(event) if event.is_alive() => return Some(event),
                _ => continue,
            }
        }
    }

    /// Due time of the earliest live event
    pub fn next_due(&mut self) -> Option<Timestamp> {
        loop {
            let (id, Reverse((due, _))) = self.queue.peek()?;
            if self.events.get(id).is_some_and(ScheduledEvent::is_alive) {
                return Some(*due);
            }
            let (id, _) = self.queue.pop()?;
            self.events.remove(&id);
        }
    }

    /// Number of live events
    pub fn len(&self) -> usize {
        self.events.values().filter(|e| e.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live events in firing order
    pub fn snapshot(&self) -> Vec<PendingEvent> {
        let mut entries: Vec<_> = self
            .queue
            .iter()
            .filter_map(|(id, Reverse(key))| {
                let event = self.events.get(id)?;
                event.is_alive().then(|| (*key, event.view()))
            })
            .collect();
        entries.sort_by_key(|(key, _)| *key);
        entries.into_iter().map(|(_, view)| view).collect()
    }
}
