//! Shared pipeline control flags
//!
//! One `SharedState` handle is created per pipeline and passed to every
//! component at construction. Components never reach for globals: abort and
//! pause travel through this handle and nothing else.
//!
//! # Ordering contract
//!
//! Writes use `Ordering::Release`, reads use `Ordering::Acquire`. A thread
//! that observes `is_aborted() == true` therefore also observes every write
//! the aborting thread performed before `request_abort()`. Abort is set once
//! at shutdown and never cleared.

use std::sync::atomic::{AtomicBool, Ordering};

/// Abort and pause flags shared by every thread of one pipeline.
pub struct SharedState {
    abort: AtomicBool,
    pause: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            abort: AtomicBool::new(false),
            pause: AtomicBool::new(false),
        }
    }

    /// Request cooperative shutdown. Idempotent; never cleared.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.store(paused, Ordering::Release);
    }

    /// Flip the pause flag and return the new value.
    pub fn toggle_paused(&self) -> bool {
        !self.pause.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_sticky() {
        let state = SharedState::new();
        assert!(!state.is_aborted());
        state.request_abort();
        assert!(state.is_aborted());
        state.request_abort();
        assert!(state.is_aborted());
    }

    #[test]
    fn test_toggle_pause() {
        let state = SharedState::new();
        assert!(!state.is_paused());
        assert!(state.toggle_paused());
        assert!(state.is_paused());
        assert!(!state.toggle_paused());
        assert!(!state.is_paused());
    }
}
