//! Shield state machine
//!
//! ```text
//!            activate (after authentication)
//!   LOCKED  ---------------------------------->  ACTIVE
//!     |  ^  <----------------------------------
//!     |  |          lock (manual or idle)
//!kill |  | dwell elapsed
//!     v  |
//!  THREAT_DETECTED
//! ```
//!
//! THREAT_DETECTED is a sub-state of LOCKED. There is no edge between it and
//! ACTIVE: activating during the dwell first ends the dwell (-> LOCKED) and then
//! unlocks (-> ACTIVE), publishing both transitions.
//!
//! Every transition is published while the state lock is held, so the order
//! of `shield-status` events always matches the order of transitions and a
//! caller never returns before its transition is visible to subscribers.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::events::{EventBus, ShieldEvent};
use crate::models::ShieldStatus;

#[derive(Debug)]
struct Inner {
    status: ShieldStatus,
    /// Incremented whenever a dwell starts or is cut short; a dwell timer only
    /// fires if the epoch it was started with is still current.
    dwell_epoch: u64,
}

#[derive(Debug)]
pub struct ShieldStateMachine {
    inner: Mutex<Inner>,
    bus: EventBus,
    dwell: Duration,
}

impl ShieldStateMachine {
    /// Starts LOCKED
    pub fn new(bus: EventBus, dwell: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                status: ShieldStatus::Locked,
                dwell_epoch: 0,
            }),
            bus,
            dwell,
        })
    }

    pub fn status(&self) -> ShieldStatus {
        self.inner.lock().status
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    fn transition(&self, inner: &mut Inner, to: ShieldStatus) {
        log::info!("Shield status {} -> {}", inner.status, to);
        inner.status = to;
        self.bus.publish(ShieldEvent::ShieldStatus(to));
    }

    /// LOCKED -> ACTIVE. Returns false if already ACTIVE.
    /// Callers are responsible for having verified a credential.
    pub fn activate(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.status {
            ShieldStatus::Active => false,
            ShieldStatus::ThreatDetected => {
                inner.dwell_epoch += 1;
                self.transition(&mut inner, ShieldStatus::Locked);
                self.transition(&mut inner, ShieldStatus::Active);
                true
            }
            ShieldStatus::Locked => {
                self.transition(&mut inner, ShieldStatus::Active);
                true
            }
        }
    }

    /// ACTIVE -> LOCKED. Returns false (no-op) if the shield already enforces.
    pub fn lock(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.status != ShieldStatus::Active {
            return false;
        }
        self.transition(&mut inner, ShieldStatus::Locked);
        true
    }

    /// A watchlisted process was terminated (or a termination was attempted).
    ///
    /// LOCKED -> THREAT_DETECTED and schedules the return to LOCKED after the
    /// dwell. During a dwell the kill is accepted but the dwell is not
    /// extended. Ignored while ACTIVE. Returns whether a transition happened.
    pub fn record_kill(self: &Arc<Self>) -> bool {
        let epoch = {
            let mut inner = self.inner.lock();
            match inner.status {
                ShieldStatus::Locked => {
                    inner.dwell_epoch += 1;
                    self.transition(&mut inner, ShieldStatus::ThreatDetected);
                    inner.dwell_epoch
                }
                ShieldStatus::ThreatDetected | ShieldStatus::Active => return false,
            }
        };

        self.schedule_dwell_end(epoch);
        true
    }

    fn schedule_dwell_end(self: &Arc<Self>, epoch: u64) {
        let machine = Arc::clone(self);
        let dwell = self.dwell;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(dwell).await;
                    machine.end_dwell(epoch);
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(dwell);
                    machine.end_dwell(epoch);
                });
            }
        }
    }

    fn end_dwell(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.status == ShieldStatus::ThreatDetected && inner.dwell_epoch == epoch {
            self.transition(&mut inner, ShieldStatus::Locked);
        }
    }
}
