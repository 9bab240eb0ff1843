//! First-failure latch shared by the scheduler and the sequencer.
//!
//! The first non-cancellation error raised wins: it is stored and the token
//! is cancelled so every other stage winds down. Errors raised after that,
//! including the ones caused by the cancellation itself, are dropped.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::PatchError;

#[derive(Debug, Default)]
pub(crate) struct ShutdownSignal {
    token: CancellationToken,
    first: Mutex<Option<PatchError>>,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `error` as the run's failure if nothing ended the run yet.
    ///
    /// Returns `true` if this call ended the run.
    pub(crate) fn raise(&self, error: PatchError) -> bool {
        if error.is_cancelled() {
            return false;
        }

        let mut first = self.first.lock();
        if first.is_some() || self.token.is_cancelled() {
            debug!(error = %error, "Dropping error raised after shutdown");
            return false;
        }

        *first = Some(error);
        drop(first);
        self.token.cancel();
        true
    }

    /// End the run without an error.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Child token that fires when the run ends.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// The winning error, if the run failed.
    pub(crate) fn take_error(&self) -> Option<PatchError> {
        self.first.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(name: &str) -> PatchError {
        PatchError::InstallerFailure {
            version_id: name.to_string(),
            reason: "boom".to_string(),
        }
    }

    #[test]
    fn test_first_error_wins() {
        let signal = ShutdownSignal::new();
        assert!(signal.raise(failure("a")));
        assert!(!signal.raise(failure("b")));
        assert!(signal.is_cancelled());

        match signal.take_error() {
            Some(PatchError::InstallerFailure { version_id, .. }) => assert_eq!(version_id, "a"),
            other => panic!("Expected first error, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_error_is_ignored() {
        let signal = ShutdownSignal::new();
        assert!(!signal.raise(PatchError::Cancelled));
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn test_errors_after_cancel_are_dropped() {
        let signal = ShutdownSignal::new();
        signal.cancel();
        assert!(!signal.raise(failure("late")));
        assert!(signal.take_error().is_none());
    }

    #[test]
    fn test_child_token_fires() {
        let signal = ShutdownSignal::new();
        let child = signal.child_token();
        signal.raise(failure("a"));
        assert!(child.is_cancelled());
    }
}
