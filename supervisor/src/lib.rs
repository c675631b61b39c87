//! Supervisor for a single long-running game-server process
//!
//! Keeps the managed server alive, reconciles three partially-unreliable
//! health signals (process exit, diagnostic side channel, HTTP heartbeats)
//! into one authoritative health state, and restarts the server on an
//! operator-configured schedule without ever restarting on top of a restart.

pub mod config;
pub mod defer;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod resources;
pub mod router;
pub mod scheduler;
pub mod supervisor;
pub mod traits;

// Re-export commonly used types
pub use config::SupervisorConfig;
pub use error::{KillError, RestartError, SpawnError, SupervisorError, SupervisorResult};
pub use monitor::HealthMonitor;
pub use resources::ResourceStartupTracker;
pub use router::{FencingRegistry, TraceRouter};
pub use scheduler::RestartScheduler;
pub use supervisor::{ProcessSupervisor, RestartDelay};
pub use traits::{LogSink, ProcessController};
