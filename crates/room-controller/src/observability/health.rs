//! Readiness flag shared between the serve loop and the probe handlers.
//!
//! The flag starts false, flips true once the listener is bound, and flips
//! back false at the start of shutdown so the load balancer stops routing
//! here before the hub begins draining connections. Liveness needs no state:
//! `/health` answers statically (see `handlers::health`), and the store ping
//! half of readiness happens per-request in the handler.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared readiness state. One instance lives in `AppState`; the serve loop
/// keeps a second `Arc` to withdraw readiness on shutdown.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// Not ready until `set_ready` is called after bind.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start answering `/ready` with 200.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Withdraw readiness. Called once at the start of shutdown.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_unready() {
        assert!(!HealthState::new().is_ready());
    }

    #[test]
    fn test_ready_flag_round_trip() {
        let state = HealthState::new();
        state.set_ready();
        assert!(state.is_ready());
        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[test]
    fn test_flag_is_visible_across_threads() {
        let state = Arc::new(HealthState::new());
        let writer = Arc::clone(&state);

        std::thread::spawn(move || writer.set_ready())
            .join()
            .expect("writer thread panicked");

        assert!(state.is_ready());
    }
}
