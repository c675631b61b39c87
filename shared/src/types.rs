//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::SharedError;

/// Fencing token identifying one spawn of the managed server process.
///
/// Regenerated on every spawn; events tagged with a superseded token are
/// discarded at the trace-router boundary.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceToken(Uuid);

impl InstanceToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Token equality against the string tag carried by a wire message.
    pub fn matches(&self, tag: &str) -> bool {
        Uuid::parse_str(tag).map(|u| u == self.0).unwrap_or(false)
    }
}

impl Default for InstanceToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authoritative server health, computed by the health monitor from both
/// heartbeat sources plus process liveness.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Offline,
    Partial,
    Online,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Offline => write!(f, "OFFLINE"),
            HealthState::Partial => write!(f, "PARTIAL"),
            HealthState::Online => write!(f, "ONLINE"),
        }
    }
}

/// Origin of a liveness signal. The side channel is emitted by the server
/// itself; the HTTP probe is polled from outside the simulation loop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatSource {
    SideChannel,
    HttpProbe,
}

/// Process lifecycle as seen by the supervisor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Who asked for a lifecycle change. Rendered into audit log lines.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Actor {
    System,
    Admin(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => write!(f, "SYSTEM"),
            Actor::Admin(name) => write!(f, "{name}"),
        }
    }
}

/// Which console stream a raw output line came from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

impl fmt::Display for ConsoleStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleStream::Stdout => write!(f, "stdout"),
            ConsoleStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One operator-configured restart time, parsed from "HH:MM".
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduleEntry {
    pub hours: u8,
    pub minutes: u8,
}

impl ScheduleEntry {
    pub fn new(hours: u8, minutes: u8) -> Result<Self, SharedError> {
        if hours > 23 || minutes > 59 {
            return Err(SharedError::InvalidScheduleEntry {
                input: format!("{hours:02}:{minutes:02}"),
            });
        }
        Ok(Self { hours, minutes })
    }
}

impl FromStr for ScheduleEntry {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SharedError::InvalidScheduleEntry { input: s.to_string() };
        let (h, m) = s.trim().split_once(':').ok_or_else(|| invalid())?;
        let hours: u8 = h.parse().map_err(|_| invalid())?;
        let minutes: u8 = m.parse().map_err(|_| invalid())?;
        Self::new(hours, minutes).map_err(|_| invalid())
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hours, self.minutes)
    }
}
