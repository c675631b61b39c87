//! Message types crossing the supervisor's boundaries
//!
//! - `trace`: diagnostic side-channel units emitted by the managed server
//! - `status`: outbound status snapshot polled by the web layer

pub mod status;
pub mod trace;

pub use status::{PendingStartSnapshot, ScheduleOutlook, StatusReport};
pub use trace::{ResourceEvent, TraceMessage, TracePayload};
