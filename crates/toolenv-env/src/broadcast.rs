use std::time::Duration;

use parking_lot::Mutex;

use crate::EnvError;

/// System-wide "environment changed" announcement.
pub trait ChangeBroadcast: Send + Sync {
    /// Notifies other processes and waits at most `timeout` for them.
    fn broadcast(&self, timeout: Duration) -> Result<(), EnvError>;
}

/// For stores whose consumers re-read them on their own, such as shell
/// profiles picked up by the next login shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcast;

impl ChangeBroadcast for NoopBroadcast {
    fn broadcast(&self, _timeout: Duration) -> Result<(), EnvError> {
        tracing::debug!("environment updated; new shells pick the change up on start");
        Ok(())
    }
}

/// Counts broadcasts and can be told to fail. Used by tests.
#[derive(Debug, Default)]
pub struct RecordingBroadcast {
    sent: Mutex<Vec<Duration>>,
    fail: Mutex<bool>,
}

impl RecordingBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn fail_with_errors(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

impl ChangeBroadcast for RecordingBroadcast {
    fn broadcast(&self, timeout: Duration) -> Result<(), EnvError> {
        self.sent.lock().push(timeout);
        if *self.fail.lock() {
            return Err(EnvError::Broadcast("no listener acknowledged".into()));
        }
        Ok(())
    }
}

impl<T: ChangeBroadcast + ?Sized> ChangeBroadcast for std::sync::Arc<T> {
    fn broadcast(&self, timeout: Duration) -> Result<(), EnvError> {
        (**self).broadcast(timeout)
    }
}
