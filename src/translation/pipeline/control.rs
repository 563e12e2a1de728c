/*!
 * Pause and stop signals for one run.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Signals shared between the caller and a running pipeline.
///
/// Pause is observed between work units only. Stop is observed there too,
/// and additionally cancels backoff sleeps and in-flight provider calls.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// No new work unit may be dispatched
    pub fn is_halted(&self) -> bool {
        self.is_paused() || self.is_stopped()
    }

    /// Token observed at every suspension point
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runControl_pause_shouldHaltWithoutCancelling() {
        let control = RunControl::new();
        assert!(!control.is_halted());

        control.clone().pause();
        assert!(control.is_halted());
        assert!(!control.token().is_cancelled());
    }

    #[test]
    fn test_runControl_stop_shouldCancelToken() {
        let control = RunControl::new();
        control.stop();

        assert!(control.is_stopped());
        assert!(control.is_halted());
        assert!(control.token().is_cancelled());
    }
}
