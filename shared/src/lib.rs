//! Shared types for the game-server supervisor
//!
//! Contains only the types that cross a process or component boundary:
//! the diagnostic-channel wire contract, the fencing token, health and
//! lifecycle enums, and the status-report structures the web layer renders.
//! Supervisor-internal state lives in the supervisor crate.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

// Re-export the diagnostic-channel contract at crate level
pub use messages::{
    // Side-channel units emitted by the managed server
    ResourceEvent, TraceMessage, TracePayload,

    // Outbound status surface
    PendingStartSnapshot, ScheduleOutlook, StatusReport,
};
