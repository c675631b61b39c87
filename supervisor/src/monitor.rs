//! Health monitor: the OFFLINE/PARTIAL/ONLINE state machine
//!
//! Either heartbeat source alone is an unreliable proxy: the side channel
//! can be emitted by a thread independent from the main simulation loop,
//! and the HTTP probe can succeed while the main loop is wedged. The triage
//! therefore needs both. State is recomputed lazily on read, so there is no
//! timer to drift.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use shared::{HealthState, HeartbeatSource};

/// Most recent heartbeat per source. Two slots, never a log.
#[derive(Default)]
struct HeartbeatSlots {
    side_channel: Option<Instant>,
    http_probe: Option<Instant>,
}

pub struct HealthMonitor {
    alive: AtomicBool,
    slots: RwLock<HeartbeatSlots>,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            alive: AtomicBool::new(false),
            slots: RwLock::new(HeartbeatSlots::default()),
            timeout,
        }
    }

    /// Record a liveness signal from one source, overwriting that slot.
    pub fn record_heartbeat(&self, source: HeartbeatSource) {
        self.record_heartbeat_at(source, Instant::now());
    }

    fn record_heartbeat_at(&self, source: HeartbeatSource, now: Instant) {
        let mut slots = self.slots.write().expect("heartbeat slots poisoned");
        match source {
            HeartbeatSource::SideChannel => slots.side_channel = Some(now),
            HeartbeatSource::HttpProbe => slots.http_probe = Some(now),
        }
    }

    /// Called by the supervisor once a spawn succeeds.
    pub fn on_process_started(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Fencing reset point: clears both slots and forces OFFLINE.
    pub fn on_process_stopped(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut slots = self.slots.write().expect("heartbeat slots poisoned");
        *slots = HeartbeatSlots::default();
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Current authoritative health.
    pub fn state(&self) -> HealthState {
        self.state_at(Instant::now())
    }

    /// Health as of `now`; the explicit-time variant used by tests.
    pub fn state_at(&self, now: Instant) -> HealthState {
        if !self.is_alive() {
            return HealthState::Offline;
        }

        let slots = self.slots.read().expect("heartbeat slots poisoned");
        let fresh = |slot: Option<Instant>| {
            slot.map(|t| now.saturating_duration_since(t) <= self.timeout)
                .unwrap_or(false)
        };

        match (fresh(slots.side_channel), fresh(slots.http_probe)) {
            (true, true) => HealthState::Online,
            (false, false) => HealthState::Offline,
            _ => HealthState::Partial,
        }
    }
}
