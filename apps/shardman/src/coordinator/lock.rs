//! The coordination lock
//!
//! One process-wide mutex serializes admission, allocation, re-registration
//! and eviction. It owns the admission window, so holding a
//! [`CoordinationGuard`] is the only way to touch it.

use crate::coordinator::admission::AdmissionWindow;
use tokio::sync::{Mutex, MutexGuard};

/// Process-wide coordination lock
#[derive(Debug, Default)]
pub struct CoordinationLock {
    window: Mutex<AdmissionWindow>,
}

/// Proof that the coordination lock is held
#[derive(Debug)]
pub struct CoordinationGuard<'a> {
    window: MutexGuard<'a, AdmissionWindow>,
}

impl CoordinationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access. Never held across fleet metadata I/O.
    pub async fn acquire(&self) -> CoordinationGuard<'_> {
        CoordinationGuard {
            window: self.window.lock().await,
        }
    }
}

impl CoordinationGuard<'_> {
    pub(crate) fn window_mut(&mut self) -> &mut AdmissionWindow {
        &mut self.window
    }

    /// Current admission window state
    pub fn window(&self) -> &AdmissionWindow {
        &self.window
    }
}
