use thiserror::Error;

/// Why a context was cancelled
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// Cancelled explicitly through its cancel function (or an ancestor's)
    #[error("context canceled")]
    Canceled,

    /// The context's deadline was reached
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}
