//! Restart scheduler: decides *when* to ask the supervisor for a restart
//!
//! Driven by a once-per-second external timer. The recurring time-of-day
//! list can be overridden for exactly one firing by a temporary entry, or
//! cancelled for one firing by a skip override. Last-fired bookkeeping
//! makes ticks idempotent per occurrence under timer jitter, and a failed
//! restart is retried at the next tick instead of looping synchronously.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Timelike};

use shared::{Actor, ScheduleEntry, ScheduleOutlook};

use crate::traits::ProcessController;

/// One occurrence is a calendar date plus a wall-clock minute.
type OccurrenceKey = (NaiveDate, u32, u32);

/// What a single tick decided.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// No entry due this minute.
    Idle,
    /// An entry was due but the server has not been up long enough.
    Suppressed { entry: ScheduleEntry },
    /// An entry was due and the operator skip consumed it.
    Skipped { entry: ScheduleEntry, by: Actor },
    /// An entry was due and a restart was issued.
    Due { entry: ScheduleEntry, temporary: bool },
}

/// Result of the most recent scheduled restart attempt, for the status
/// surface.
#[derive(Clone, Debug)]
pub struct ScheduledRestartRecord {
    pub entry: ScheduleEntry,
    pub succeeded: bool,
    pub detail: String,
}

struct SchedulerState {
    entries: Vec<ScheduleEntry>,
    temp: Option<ScheduleEntry>,
    skip: Option<Actor>,
    last_fired: Option<OccurrenceKey>,
    last_restart: Option<ScheduledRestartRecord>,
}

pub struct RestartScheduler<C: ProcessController> {
    controller: Arc<C>,
    boot_cooldown: Duration,
    state: Mutex<SchedulerState>,
}

impl<C: ProcessController> RestartScheduler<C> {
    pub fn new(controller: Arc<C>, boot_cooldown: Duration) -> Self {
        Self {
            controller,
            boot_cooldown,
            state: Mutex::new(SchedulerState {
                entries: Vec::new(),
                temp: None,
                skip: None,
                last_fired: None,
                last_restart: None,
            }),
        }
    }

    /// Replace the recurring schedule. Entries are kept sorted and deduped;
    /// immutable until the next call.
    pub fn set_schedule(&self, mut entries: Vec<ScheduleEntry>) {
        entries.sort();
        entries.dedup();
        let mut state = self.state.lock().expect("scheduler state poisoned");
        state.entries = entries;
    }

    /// Arm a one-shot entry that takes precedence over the recurring list
    /// for the next firing only.
    pub fn set_next_temp_schedule(&self, entry: ScheduleEntry) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        tracing::info!("📅 Temporary restart scheduled for {entry}");
        state.temp = Some(entry);
    }

    pub fn clear_next_temp_schedule(&self) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        state.temp = None;
    }

    /// Set or clear the skip for the next occurrence.
    pub fn set_next_skip(&self, skip: bool, by: Actor) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        if skip {
            tracing::info!("📅 Next scheduled restart will be skipped (by {by})");
            state.skip = Some(by);
        } else {
            state.skip = None;
        }
    }

    pub fn last_restart(&self) -> Option<ScheduledRestartRecord> {
        self.state
            .lock()
            .expect("scheduler state poisoned")
            .last_restart
            .clone()
    }

    /// Run the once-per-second tick loop forever.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            self.poll_once(Local::now()).await;
        }
    }

    /// One tick: evaluate the schedule at `now` and issue a restart when an
    /// occurrence is due. Never propagates controller failures.
    pub async fn poll_once(&self, now: DateTime<Local>) -> TickOutcome {
        let uptime = self.controller.uptime().await;
        let decision = self.evaluate(now, uptime);

        if let TickOutcome::Due { entry, temporary } = &decision {
            match self.controller.restart("scheduled", Actor::System).await {
                Ok(token) => {
                    tracing::info!("✅ Scheduled restart at {entry} complete (instance {token})");
                    self.complete_occurrence(now, *temporary);
                    self.record_restart(*entry, true, format!("restarted as instance {token}"));
                }
                Err(e) => {
                    // Occurrence stays unconsumed; the next tick retries.
                    tracing::error!("❌ Scheduled restart at {entry} failed: {e}");
                    self.record_restart(*entry, false, e.to_string());
                }
            }
        }

        decision
    }

    /// Pure schedule decision. Consumes the skip override and marks
    /// suppressed/skipped occurrences as fired; a `Due` occurrence is only
    /// marked once the restart succeeds.
    fn evaluate(&self, now: DateTime<Local>, uptime: Option<Duration>) -> TickOutcome {
        let key = occurrence_key(now);
        let mut state = self.state.lock().expect("scheduler state poisoned");

        if state.last_fired == Some(key) {
            return TickOutcome::Idle;
        }

        let candidate = match state.temp {
            Some(temp) => matches_minute(&temp, now).then_some((temp, true)),
            None => state
                .entries
                .iter()
                .copied()
                .find(|entry| matches_minute(entry, now))
                .map(|entry| (entry, false)),
        };

        let Some((entry, temporary)) = candidate else {
            return TickOutcome::Idle;
        };

        if let Some(uptime) = uptime {
            if uptime < self.boot_cooldown {
                state.last_fired = Some(key);
                tracing::warn!(
                    "⏳ Scheduled restart at {entry} suppressed: server up only {}s (boot cooldown)",
                    uptime.as_secs()
                );
                return TickOutcome::Suppressed { entry };
            }
        }

        if let Some(by) = state.skip.take() {
            state.last_fired = Some(key);
            if temporary {
                state.temp = None;
            }
            tracing::info!("⏭️ Scheduled restart at {entry} skipped (by {by})");
            return TickOutcome::Skipped { entry, by };
        }

        TickOutcome::Due { entry, temporary }
    }

    fn complete_occurrence(&self, now: DateTime<Local>, temporary: bool) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        state.last_fired = Some(occurrence_key(now));
        if temporary {
            state.temp = None;
        }
    }

    fn record_restart(&self, entry: ScheduleEntry, succeeded: bool, detail: String) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        state.last_restart = Some(ScheduledRestartRecord { entry, succeeded, detail });
    }

    /// Next applicable occurrence relative to `now`, for the status surface.
    pub fn outlook(&self, now: DateTime<Local>) -> ScheduleOutlook {
        let state = self.state.lock().expect("scheduler state poisoned");

        let candidates: Vec<(ScheduleEntry, bool)> = match state.temp {
            Some(temp) => vec![(temp, true)],
            None => state.entries.iter().map(|e| (*e, false)).collect(),
        };

        let now_naive = now.naive_local();
        let next = candidates
            .iter()
            .filter_map(|(entry, temporary)| {
                let today = now
                    .date_naive()
                    .and_hms_opt(u32::from(entry.hours), u32::from(entry.minutes), 0)?;
                let at = if today > now_naive {
                    today
                } else {
                    now.date_naive().succ_opt()?.and_hms_opt(
                        u32::from(entry.hours),
                        u32::from(entry.minutes),
                        0,
                    )?
                };
                Some((at, *entry, *temporary))
            })
            .min_by_key(|(at, _, _)| *at);

        match next {
            Some((at, entry, temporary)) => ScheduleOutlook {
                next_at: Some(entry.to_string()),
                next_in_secs: Some((at - now_naive).num_seconds()),
                temporary,
                skipped: state.skip.is_some(),
            },
            None => ScheduleOutlook {
                next_at: None,
                next_in_secs: None,
                temporary: false,
                skipped: state.skip.is_some(),
            },
        }
    }
}

fn matches_minute(entry: &ScheduleEntry, now: DateTime<Local>) -> bool {
    now.hour() == u32::from(entry.hours) && now.minute() == u32::from(entry.minutes)
}

fn occurrence_key(now: DateTime<Local>) -> OccurrenceKey {
    (now.date_naive(), now.hour(), now.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared::InstanceToken;

    use crate::error::{RestartError, SpawnError};
    use crate::traits::MockProcessController;

    const LONG_UPTIME: Duration = Duration::from_secs(6 * 3600);
    const COOLDOWN: Duration = Duration::from_secs(15 * 60);

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, day, hour, minute, second).unwrap()
    }

    fn entry(s: &str) -> ScheduleEntry {
        s.parse().unwrap()
    }

    fn controller_with_uptime(uptime: Duration) -> MockProcessController {
        let mut controller = MockProcessController::new();
        controller.expect_uptime().returning(move || Some(uptime));
        controller
    }

    #[tokio::test]
    async fn fires_once_per_occurrence_despite_repeated_ticks() {
        let mut controller = controller_with_uptime(LONG_UPTIME);
        controller
            .expect_restart()
            .times(1)
            .returning(|_, _| Ok(InstanceToken::new()));

        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);
        scheduler.set_schedule(vec![entry("03:00")]);

        assert!(matches!(
            scheduler.poll_once(at(1, 3, 0, 0)).await,
            TickOutcome::Due { temporary: false, .. }
        ));
        // Same minute, later ticks: idempotent
        assert_eq!(scheduler.poll_once(at(1, 3, 0, 1)).await, TickOutcome::Idle);
        assert_eq!(scheduler.poll_once(at(1, 3, 0, 59)).await, TickOutcome::Idle);
        // Off-schedule minute
        assert_eq!(scheduler.poll_once(at(1, 3, 1, 0)).await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn temp_schedule_fires_once_then_reverts_to_recurring() {
        let mut controller = controller_with_uptime(LONG_UPTIME);
        controller
            .expect_restart()
            .times(2)
            .returning(|_, _| Ok(InstanceToken::new()));

        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);
        scheduler.set_schedule(vec![entry("03:00")]);
        scheduler.set_next_temp_schedule(entry("01:00"));

        // Temp entry fires at 01:00 and clears
        assert!(matches!(
            scheduler.poll_once(at(1, 1, 0, 0)).await,
            TickOutcome::Due { temporary: true, .. }
        ));

        // Recurring entry is back in charge at 03:00
        assert!(matches!(
            scheduler.poll_once(at(1, 3, 0, 0)).await,
            TickOutcome::Due { temporary: false, .. }
        ));

        // Next day, 01:00 does nothing
        assert_eq!(scheduler.poll_once(at(2, 1, 0, 0)).await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn temp_schedule_suppresses_recurring_entries_while_armed() {
        let mut controller = controller_with_uptime(LONG_UPTIME);
        controller.expect_restart().never();

        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);
        scheduler.set_schedule(vec![entry("03:00")]);
        scheduler.set_next_temp_schedule(entry("05:00"));

        // 03:00 belongs to the recurring list, which the temp entry overrides
        assert_eq!(scheduler.poll_once(at(1, 3, 0, 0)).await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn skip_consumes_the_occurrence_without_a_restart_and_clears() {
        let mut controller = controller_with_uptime(LONG_UPTIME);
        controller
            .expect_restart()
            .times(1)
            .returning(|_, _| Ok(InstanceToken::new()));

        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);
        scheduler.set_schedule(vec![entry("03:00")]);
        scheduler.set_next_skip(true, Actor::Admin("ops".to_string()));

        match scheduler.poll_once(at(1, 3, 0, 0)).await {
            TickOutcome::Skipped { by, .. } => assert_eq!(by, Actor::Admin("ops".to_string())),
            other => panic!("expected skip, got {other:?}"),
        }

        // Flag cleared: the next day's occurrence restarts normally
        assert!(matches!(
            scheduler.poll_once(at(2, 3, 0, 0)).await,
            TickOutcome::Due { .. }
        ));
    }

    #[tokio::test]
    async fn boot_cooldown_suppresses_firing_right_after_a_cold_start() {
        let mut controller = controller_with_uptime(Duration::from_secs(90));
        controller.expect_restart().never();

        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);
        scheduler.set_schedule(vec![entry("03:00")]);

        assert!(matches!(
            scheduler.poll_once(at(1, 3, 0, 0)).await,
            TickOutcome::Suppressed { .. }
        ));
        // Suppression consumed the occurrence; no retry storm this minute
        assert_eq!(scheduler.poll_once(at(1, 3, 0, 1)).await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn failed_restart_is_retried_at_the_next_tick() {
        let mut controller = controller_with_uptime(LONG_UPTIME);
        let mut calls = 0u32;
        controller.expect_restart().times(2).returning_st(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(RestartError::Spawn(SpawnError::NotConfigured { field: "binary path" }))
            } else {
                Ok(InstanceToken::new())
            }
        });

        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);
        scheduler.set_schedule(vec![entry("03:00")]);

        // First tick fails; occurrence stays unconsumed
        scheduler.poll_once(at(1, 3, 0, 0)).await;
        assert!(!scheduler.last_restart().unwrap().succeeded);

        // Next tick retries and succeeds; further ticks are idle
        scheduler.poll_once(at(1, 3, 0, 1)).await;
        assert!(scheduler.last_restart().unwrap().succeeded);
        assert_eq!(scheduler.poll_once(at(1, 3, 0, 2)).await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn outlook_reports_the_next_applicable_occurrence() {
        let controller = controller_with_uptime(LONG_UPTIME);
        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);
        scheduler.set_schedule(vec![entry("03:00"), entry("15:00")]);

        let outlook = scheduler.outlook(at(1, 0, 0, 0));
        assert_eq!(outlook.next_at.as_deref(), Some("03:00"));
        assert_eq!(outlook.next_in_secs, Some(3 * 3600));
        assert!(!outlook.temporary);
        assert!(!outlook.skipped);

        // Past 03:00, the afternoon entry is next
        let outlook = scheduler.outlook(at(1, 4, 0, 0));
        assert_eq!(outlook.next_at.as_deref(), Some("15:00"));

        // Past both, tomorrow's 03:00 is next
        let outlook = scheduler.outlook(at(1, 16, 0, 0));
        assert_eq!(outlook.next_at.as_deref(), Some("03:00"));
        assert_eq!(outlook.next_in_secs, Some(11 * 3600));

        // A temp entry and a skip both show up
        scheduler.set_next_temp_schedule(entry("05:00"));
        scheduler.set_next_skip(true, Actor::System);
        let outlook = scheduler.outlook(at(1, 4, 0, 0));
        assert_eq!(outlook.next_at.as_deref(), Some("05:00"));
        assert!(outlook.temporary);
        assert!(outlook.skipped);
    }

    #[tokio::test]
    async fn empty_schedule_stays_idle() {
        let controller = controller_with_uptime(LONG_UPTIME);
        let scheduler = RestartScheduler::new(Arc::new(controller), COOLDOWN);

        assert_eq!(scheduler.poll_once(at(1, 3, 0, 0)).await, TickOutcome::Idle);
        let outlook = scheduler.outlook(at(1, 3, 0, 0));
        assert!(outlook.next_at.is_none());
    }
}
