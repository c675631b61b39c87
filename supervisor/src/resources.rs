//! Resource startup tracker
//!
//! The managed server starts its resources strictly sequentially, so at
//! most one "starting" entry is in flight. A pending start with no matching
//! "started" is the strongest early signal of a stuck dependency or crashed
//! script; it is surfaced to operators but never auto-remediated here.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use shared::{PendingStartSnapshot, ResourceEvent};

struct PendingStart {
    resource: String,
    since: Instant,
    hang_warned: bool,
}

#[derive(Default)]
struct TrackerState {
    pending: Option<PendingStart>,
    last_started_at: Option<Instant>,
}

pub struct ResourceStartupTracker {
    state: Mutex<TrackerState>,
    hang_threshold: Duration,
}

impl ResourceStartupTracker {
    pub fn new(hang_threshold: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            hang_threshold,
        }
    }

    /// Consume one routed resource event. The router has already validated
    /// the fencing token.
    pub fn handle_event(&self, event: &ResourceEvent) {
        self.handle_event_at(event, Instant::now());
    }

    fn handle_event_at(&self, event: &ResourceEvent, now: Instant) {
        let mut state = self.state.lock().expect("resource tracker poisoned");
        match event {
            ResourceEvent::Starting { resource } => {
                // Overwrites any stale entry: these events are sequential
                // per process, so a leftover pending start belongs to a
                // resource that never reported back.
                if let Some(stale) = &state.pending {
                    tracing::debug!(
                        "resource '{}' replaced pending start of '{}'",
                        resource,
                        stale.resource
                    );
                }
                state.pending = Some(PendingStart {
                    resource: resource.clone(),
                    since: now,
                    hang_warned: false,
                });
            }
            ResourceEvent::Started { resource } => {
                tracing::debug!("resource '{resource}' started");
                state.pending = None;
                state.last_started_at = Some(now);
            }
        }
    }

    /// Current pending-start view for the status surface.
    pub fn snapshot(&self) -> PendingStartSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> PendingStartSnapshot {
        let state = self.state.lock().expect("resource tracker poisoned");
        PendingStartSnapshot {
            starting_resource: state.pending.as_ref().map(|p| p.resource.clone()),
            starting_elapsed_secs: state
                .pending
                .as_ref()
                .map(|p| now.saturating_duration_since(p.since).as_secs()),
            last_start_elapsed_secs: state
                .last_started_at
                .map(|t| now.saturating_duration_since(t).as_secs()),
        }
    }

    /// Emit a WARN once per pending entry when it exceeds the operator
    /// threshold. Called from the periodic watch loop.
    pub fn check_pending(&self) {
        self.check_pending_at(Instant::now());
    }

    fn check_pending_at(&self, now: Instant) {
        let mut state = self.state.lock().expect("resource tracker poisoned");
        if let Some(pending) = &mut state.pending {
            let elapsed = now.saturating_duration_since(pending.since);
            if elapsed > self.hang_threshold && !pending.hang_warned {
                pending.hang_warned = true;
                tracing::warn!(
                    "resource '{}' has been starting for {}s with no completion; likely hung",
                    pending.resource,
                    elapsed.as_secs()
                );
            }
        }
    }

    /// Fencing reset point: forget everything from the stopped instance.
    pub fn on_process_stopped(&self) {
        let mut state = self.state.lock().expect("resource tracker poisoned");
        *state = TrackerState::default();
    }
}
