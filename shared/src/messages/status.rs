//! Outbound status snapshot
//!
//! Polled (or pushed) to the web layer; everything here is a plain
//! serializable view with no behavior.

use serde::{Deserialize, Serialize};

use crate::types::{HealthState, LifecycleState};

/// Point-in-time view of the supervised server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub lifecycle: LifecycleState,
    pub health: HealthState,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    /// Escalated restart delay after bind failures, when one is pending.
    pub restart_delay_ms: Option<u64>,
    pub pending_start: PendingStartSnapshot,
    pub schedule: Option<ScheduleOutlook>,
    /// Diagnostic units dropped as undecodable since startup.
    pub dropped_malformed: u64,
    /// Diagnostic units dropped for a superseded fencing token since startup.
    pub dropped_stale: u64,
}

/// Resource-startup progress for hang triage.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PendingStartSnapshot {
    pub starting_resource: Option<String>,
    pub starting_elapsed_secs: Option<u64>,
    pub last_start_elapsed_secs: Option<u64>,
}

/// Next applicable scheduled-restart occurrence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleOutlook {
    /// "HH:MM" of the next occurrence, if any schedule is configured.
    pub next_at: Option<String>,
    pub next_in_secs: Option<i64>,
    /// The next occurrence comes from a one-shot temporary entry.
    pub temporary: bool,
    /// The next occurrence will be consumed without restarting.
    pub skipped: bool,
}
