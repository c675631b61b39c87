//! Trait definitions with mockall annotations for testing
//!
//! These are the seams between the supervisor core and its collaborators:
//! the external log sink and the process-control surface the scheduler
//! drives. They exist for dependency injection: components hold direct
//! references passed at construction, never a shared registry. They also enable
//! mock-based testing.

use std::time::Duration;

use shared::{Actor, ConsoleStream, InstanceToken};

use crate::error::RestartError;

/// Destination for raw console output and formatted diagnostic summaries.
///
/// The real implementation is the (out-of-scope) structured log writer; the
/// contract is UTF-8 text lines, nothing more.
#[mockall::automock]
#[async_trait::async_trait]
pub trait LogSink: Send + Sync {
    /// Forward one raw console line from the managed server, verbatim.
    async fn console_line(&self, stream: ConsoleStream, line: String);

    /// Surface a human-readable diagnostic summary (bind failures,
    /// watchdog barks, lifecycle notes).
    async fn diagnostic(&self, summary: String);
}

/// Process-control surface consumed by the restart scheduler.
///
/// # Returns
/// `restart` yields the fencing token of the freshly spawned instance so
/// callers can tag subsequent correlated actions.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessController: Send + Sync {
    /// Stop-then-start the managed server as one serialized operation.
    async fn restart(&self, reason: &str, actor: Actor) -> Result<InstanceToken, RestartError>;

    /// Uptime of the current server instance, if one is running.
    async fn uptime(&self) -> Option<Duration>;
}

/// Log sink that forwards everything through `tracing`, used until the
/// structured log writer is wired in.
pub struct TracingLogSink;

#[async_trait::async_trait]
impl LogSink for TracingLogSink {
    async fn console_line(&self, stream: ConsoleStream, line: String) {
        tracing::info!(target: "server_console", "[{stream}] {line}");
    }

    async fn diagnostic(&self, summary: String) {
        tracing::warn!(target: "server_console", "{summary}");
    }
}
