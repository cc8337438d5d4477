//! Idle tracking
//!
//! Activity is any control-surface call or an explicit reset. The timeout is
//! compared against a monotonic clock so wall-clock jumps do not lock or
//! unlock the session.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::{IDLE_TIMEOUT_MAX_MINUTES, IDLE_TIMEOUT_MIN_MINUTES};
use crate::models::ShieldError;

#[derive(Debug)]
struct IdleState {
    timeout_minutes: u32,
    last_activity: Instant,
}

#[derive(Debug)]
pub struct IdleTracker {
    state: Mutex<IdleState>,
}

/// Accept a timeout in the supported range
pub fn validate_timeout(minutes: i64) -> Result<u32, ShieldError> {
    if minutes < i64::from(IDLE_TIMEOUT_MIN_MINUTES) || minutes > i64::from(IDLE_TIMEOUT_MAX_MINUTES) {
        return Err(ShieldError::InvalidIdleTimeout(minutes));
    }
    Ok(minutes as u32)
}

impl IdleTracker {
    /// Out-of-range stored values are clamped rather than rejected
    pub fn new(timeout_minutes: i64) -> Self {
        let clamped = timeout_minutes.clamp(
            i64::from(IDLE_TIMEOUT_MIN_MINUTES),
            i64::from(IDLE_TIMEOUT_MAX_MINUTES),
        ) as u32;
        Self {
            state: Mutex::new(IdleState {
                timeout_minutes: clamped,
                last_activity: Instant::now(),
            }),
        }
    }

    /// Record activity now
    pub fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    pub fn timeout_minutes(&self) -> u32 {
        self.state.lock().timeout_minutes
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes()) * 60)
    }

    /// Change the timeout. Does not count as activity.
    pub fn set_timeout(&self, minutes: i64) -> Result<u32, ShieldError> {
        let minutes = validate_timeout(minutes)?;
        self.state.lock().timeout_minutes = minutes;
        Ok(minutes)
    }

    pub fn idle_for(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        let state = self.state.lock();
        state.last_activity.elapsed() >= Duration::from_secs(u64::from(state.timeout_minutes) * 60)
    }
}
