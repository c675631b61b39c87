//! Supervisor configuration
//!
//! Every timeout, backoff constant, and cooldown the components consult is
//! collected here with operational defaults; `main` fills the paths and
//! schedule from CLI flags and the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Server executable. Spawn refuses to run until this is set.
    pub server_binary: Option<PathBuf>,

    /// Working directory for the server (its data/resources root).
    pub server_data_dir: Option<PathBuf>,

    /// Extra arguments appended to the server command line.
    pub launch_args: Vec<String>,

    /// Bind address for the diagnostic side-channel listener.
    pub diagnostic_addr: SocketAddr,

    /// Bounded wait between the graceful shutdown signal and forced kill.
    pub graceful_timeout: Duration,

    /// Hard heartbeat timeout; a source older than this is stale.
    pub heartbeat_timeout: Duration,

    /// Bind-failure restart delay: first occurrence.
    pub bind_delay_base: Duration,

    /// Bind-failure restart delay: added per repeat occurrence.
    pub bind_delay_increment: Duration,

    /// Bind-failure restart delay: ceiling.
    pub bind_delay_cap: Duration,

    /// Minimum server uptime before a scheduled restart is honored.
    pub boot_cooldown: Duration,

    /// Pending resource start older than this is surfaced as a likely hang.
    pub resource_hang_threshold: Duration,

    /// Delay for deferred diagnostic log lines, to keep them from
    /// interleaving with the console output that triggered them.
    pub deferred_log_delay: Duration,

    /// HTTP health endpoint of the managed server, when probing is wanted.
    pub probe_url: Option<String>,

    /// Interval between HTTP probe attempts.
    pub probe_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            server_binary: None,
            server_data_dir: None,
            launch_args: Vec::new(),
            diagnostic_addr: "127.0.0.1:0".parse().expect("static addr"),
            graceful_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(45),
            bind_delay_base: Duration::from_secs(10),
            bind_delay_increment: Duration::from_secs(5),
            bind_delay_cap: Duration::from_secs(45),
            boot_cooldown: Duration::from_secs(15 * 60),
            resource_hang_threshold: Duration::from_secs(60),
            deferred_log_delay: Duration::from_millis(250),
            probe_url: None,
            probe_interval: Duration::from_secs(5),
        }
    }
}

impl SupervisorConfig {
    /// Configure the server executable (fluent API)
    pub fn with_server_binary(mut self, binary: PathBuf) -> Self {
        self.server_binary = Some(binary);
        self
    }

    /// Configure the server data directory (fluent API)
    pub fn with_server_data_dir(mut self, dir: PathBuf) -> Self {
        self.server_data_dir = Some(dir);
        self
    }

    /// Configure extra launch arguments (fluent API)
    pub fn with_launch_args(mut self, args: Vec<String>) -> Self {
        self.launch_args = args;
        self
    }
}
