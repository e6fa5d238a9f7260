use crate::event::Action;
use crate::mock::Engine;
use std::sync::Arc;
use tempo_core::{CancelFunc, Context, ContextError, Timestamp};

/// Derive a context whose deadline is driven by the virtual clock
///
/// The deadline event is registered at the effective deadline (the earlier of
/// `deadline` and the parent's). Cancelling removes the event first, so a
/// later time move cannot turn a `Canceled` context into `DeadlineExceeded`.
pub(crate) fn deadline_context(
    engine: &Arc<Engine>,
    parent: &Context,
    deadline: Timestamp,
) -> (Context, CancelFunc) {
    let (ctx, canceller) = Context::with_deadline(parent, deadline);
    if ctx.is_done() {
        // Parent was already cancelled; nothing to schedule
        let cancel = CancelFunc::new(move || {
            canceller.cancel(ContextError::Canceled);
        });
        return (ctx, cancel);
    }

    let effective = ctx.deadline().unwrap_or(deadline);
    let id = engine.schedule(|_| effective, None, Action::Cancel(canceller.clone()));

    let engine = Arc::downgrade(engine);
    let cancel = CancelFunc::new(move || {
        if let Some(engine) = engine.upgrade() {
            engine.remove(id);
        }
        canceller.cancel(ContextError::Canceled);
    });
    (ctx, cancel)
}
