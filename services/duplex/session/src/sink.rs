//! Failure reporting for sessions and listeners.

use crate::error::SessionError;
use tracing::error;

/// Receives the terminal error of a session or listener
///
/// A sink is shared by every session a listener spawns and may be called
/// concurrently from several tasks. It is called at most once per failed
/// session and must not panic.
pub trait FailureSink: Send + Sync {
    /// Report a terminal failure
    fn notify(&self, error: &SessionError);
}

impl<F> FailureSink for F
where
    F: Fn(&SessionError) + Send + Sync,
{
    fn notify(&self, error: &SessionError) {
        self(error)
    }
}

/// Sink that logs failures and drops them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl FailureSink for LogSink {
    fn notify(&self, error: &SessionError) {
        error!("{}: {} ({})", error.what(), error, error.code());
    }
}
