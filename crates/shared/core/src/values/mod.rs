use chrono::{DateTime, Utc};

/// Timestamp in UTC
///
/// Both the real and the virtual clock report instants with this type, so
/// code written against the clock facade never sees which one it runs on.
pub type Timestamp = DateTime<Utc>;

/// Signed elapsed time between two timestamps
pub type Duration = chrono::Duration;

/// Unix epoch, the default starting instant of a virtual clock
pub const EPOCH: Timestamp = DateTime::UNIX_EPOCH;

/// Convert to a host duration for sleeping, clamping negative values to zero
pub fn to_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or(std::time::Duration::ZERO)
}

/// `t + d`, pinned to the representable range instead of overflowing
pub fn saturating_add(t: Timestamp, d: Duration) -> Timestamp {
    t.checked_add_signed(d).unwrap_or(if d > Duration::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}
