use thiserror::Error;

/// Unified failure value for the runtime and its HTTP client.
///
/// Every failure that can cross a task boundary is one of these variants, so
/// results can be stored in a task's error slot and observed by any number of
/// awaiters. All payloads are owned strings or plain numbers, which keeps the
/// type `Clone`: a task's stored error is handed out as many times as it is
/// awaited.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The caller misused the API: circular await, a suspending primitive
    /// invoked outside a task, invalid fetch options, and the like. Never
    /// recovered; surfaced to the caller that made the misuse.
    #[error("{0}")]
    CallerBug(String),

    /// `drive` has nothing left to wait on while its condition is unmet.
    #[error("no pending I/O or timers, but condition not met")]
    Deadlock,

    /// Delivered into a task at its next suspension point after `cancel`.
    #[error("Task cancelled")]
    Cancelled,

    /// The OS rejected a write on a watched stream.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The OS rejected a read on a watched stream.
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// A read accumulated more bytes than its caller-supplied cap.
    #[error("Response too large")]
    ResponseTooLarge,

    /// Establishing a connection (TCP, or the TLS handshake) failed.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The peer sent bytes that do not parse as an HTTP response.
    #[error("Malformed response: {0}")]
    Protocol(String),

    /// The server answered with a status of 400 or above.
    #[error("HTTP {status} for {url}")]
    Status {
        /// The parsed status code.
        status: u16,
        /// The URL the request was sent to.
        url: String,
    },

    /// A timeout race was lost to the timer; carries the configured seconds.
    #[error("Timeout {0}s")]
    Timeout(f64),

    /// Scheduler-integrity violation. Seeing this is a bug in the runtime,
    /// not in the caller.
    #[error("runtime integrity error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::CallerBug`] with the given message.
    pub(crate) fn bug(msg: impl Into<String>) -> Self {
        Error::CallerBug(msg.into())
    }
}
