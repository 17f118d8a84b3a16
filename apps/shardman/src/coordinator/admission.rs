//! Admission controller
//!
//! Mirrors the upstream connection-rate ceiling: at most `bucket_size`
//! admissions per `window`. Bursts beyond that are deferred, not rejected.
//! A deferred caller's record is pre-dated by one window so its heartbeat
//! deadline matches its real start.

use crate::coordinator::lock::CoordinationGuard;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Admission rate settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    pub bucket_size: u32,
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            bucket_size: 5,
            window: Duration::from_secs(5),
        }
    }
}

/// Fixed-size bucket refilled every window. Lives inside the coordination lock.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdmissionWindow {
    window_end: Option<DateTime<Utc>>,
    remaining_slots: u32,
}

impl AdmissionWindow {
    pub fn window_end(&self) -> Option<DateTime<Utc>> {
        self.window_end
    }

    pub fn remaining_slots(&self) -> u32 {
        self.remaining_slots
    }
}

/// Outcome of one admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// How long the caller must wait before connecting upstream
    pub wait: Duration,
    /// Timestamp the caller's record starts from
    pub effective_at: DateTime<Utc>,
}

impl Admission {
    pub fn is_throttled(&self) -> bool {
        !self.wait.is_zero()
    }
}

/// Gates new-connection bursts
#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> AdmissionConfig {
        self.config
    }

    /// Consume one slot from the current window
    pub fn admit(&self, guard: &mut CoordinationGuard<'_>, now: DateTime<Utc>) -> Admission {
        let window_len =
            chrono::Duration::from_std(self.config.window).unwrap_or(chrono::Duration::MAX);
        let window = guard.window_mut();

        if window.window_end.map_or(true, |end| now >= end) {
            window.window_end = Some(later_by(now, window_len));
            window.remaining_slots = self.config.bucket_size;
        }

        let mut admission = Admission {
            wait: Duration::ZERO,
            effective_at: now,
        };

        if window.remaining_slots == 0 {
            window.remaining_slots = self.config.bucket_size;
            admission.wait = self.config.window;
            admission.effective_at = later_by(now, window_len);
        }

        window.remaining_slots = window.remaining_slots.saturating_sub(1);
        admission
    }

    /// Return a slot after a failed persist
    pub fn refund(&self, guard: &mut CoordinationGuard<'_>) {
        let window = guard.window_mut();
        window.remaining_slots = window
            .remaining_slots
            .saturating_add(1)
            .min(self.config.bucket_size);
    }
}

fn later_by(at: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
