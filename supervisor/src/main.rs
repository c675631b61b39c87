//! Main entry point for the supervisor binary
//!
//! Wires the components together with explicit dependency injection and
//! keeps the managed game server alive until Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;

use shared::{logging, Actor, ScheduleEntry, SharedError};
use supervisor::SupervisorResult;
use supervisor::{
    config::SupervisorConfig,
    defer::DeferredSink,
    probe::spawn_http_probe,
    router::spawn_diagnostic_listener,
    traits::{LogSink, TracingLogSink},
    FencingRegistry, HealthMonitor, ProcessSupervisor, ResourceStartupTracker, RestartDelay,
    RestartScheduler, TraceRouter,
};

/// Supervisor for a single long-running game-server process
#[derive(Parser)]
#[command(name = "supervisor")]
#[command(about = "Keeps a game-server process alive, health-checked, and on its restart schedule")]
pub struct Args {
    /// Path to the server executable (falls back to SERVER_BINARY)
    #[arg(long)]
    pub server_binary: Option<PathBuf>,

    /// Server data directory, used as the server's working directory
    #[arg(long)]
    pub server_data: Option<PathBuf>,

    /// Extra argument appended to the server command line (repeatable)
    #[arg(long = "launch-arg")]
    pub launch_args: Vec<String>,

    /// Bind address for the diagnostic side-channel listener
    #[arg(long, default_value = "127.0.0.1:0")]
    pub diagnostic_addr: SocketAddr,

    /// Recurring restart time as HH:MM (repeatable)
    #[arg(long = "restart-at")]
    pub restart_at: Vec<String>,

    /// HTTP health endpoint of the server, enables the heartbeat probe
    #[arg(long)]
    pub probe_url: Option<String>,

    /// Heartbeat staleness timeout in seconds
    #[arg(long, default_value = "45")]
    pub heartbeat_timeout_secs: u64,

    /// Minimum server uptime before scheduled restarts are honored, in minutes
    #[arg(long, default_value = "15")]
    pub boot_cooldown_mins: u64,

    /// Grace period before a graceful stop escalates to a forced kill, in seconds
    #[arg(long, default_value = "5")]
    pub graceful_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> SupervisorResult<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    logging::init_tracing(Some(&args.log_level));
    logging::log_startup("game-server supervisor");

    let schedule: Vec<ScheduleEntry> = args
        .restart_at
        .iter()
        .map(|s| s.parse())
        .collect::<Result<_, SharedError>>()?;

    let server_binary = args
        .server_binary
        .or_else(|| std::env::var("SERVER_BINARY").ok().map(PathBuf::from));
    let server_data = args
        .server_data
        .or_else(|| std::env::var("SERVER_DATA").ok().map(PathBuf::from));

    let mut config = SupervisorConfig {
        diagnostic_addr: args.diagnostic_addr,
        graceful_timeout: Duration::from_secs(args.graceful_timeout_secs),
        heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout_secs),
        boot_cooldown: Duration::from_secs(args.boot_cooldown_mins * 60),
        probe_url: args.probe_url,
        ..SupervisorConfig::default()
    }
    .with_launch_args(args.launch_args);
    config.server_binary = server_binary;
    config.server_data_dir = server_data;

    // Build the component graph: everything holds direct references passed
    // here, never a shared registry.
    let fencing = Arc::new(FencingRegistry::new());
    let delay = Arc::new(RestartDelay::new(
        config.bind_delay_base,
        config.bind_delay_increment,
        config.bind_delay_cap,
    ));
    let monitor = Arc::new(HealthMonitor::new(config.heartbeat_timeout));
    let resources = Arc::new(ResourceStartupTracker::new(config.resource_hang_threshold));
    let sink: Arc<dyn LogSink> = Arc::new(TracingLogSink);
    let deferred = DeferredSink::spawn(sink.clone());
    let router = Arc::new(TraceRouter::new(
        fencing.clone(),
        delay.clone(),
        monitor.clone(),
        resources.clone(),
        sink,
        deferred,
        config.deferred_log_delay,
    ));

    let probe_url = config.probe_url.clone();
    let probe_interval = config.probe_interval;
    let boot_cooldown = config.boot_cooldown;

    let diagnostic_bind = config.diagnostic_addr;
    let supervisor = Arc::new(ProcessSupervisor::new(
        config,
        fencing,
        delay,
        monitor.clone(),
        resources.clone(),
        router.clone(),
    ));

    let diag_addr = spawn_diagnostic_listener(diagnostic_bind, router).await?;
    supervisor.set_diagnostic_endpoint(diag_addr);

    // Bring the server up before arming the scheduler
    supervisor.spawn().await?;

    let scheduler = Arc::new(RestartScheduler::new(supervisor.clone(), boot_cooldown));
    scheduler.set_schedule(schedule);
    tokio::spawn(scheduler.clone().run());

    if let Some(url) = probe_url {
        spawn_http_probe(monitor, url, probe_interval);
    }

    // Periodic hang check for stuck resource starts
    {
        let resources = resources.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                resources.check_pending();
            }
        });
    }

    // Periodic status line for operators
    {
        let supervisor = supervisor.clone();
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let report = supervisor.status_report(Some(scheduler.outlook(chrono::Local::now())));
                match serde_json::to_string(&report) {
                    Ok(json) => tracing::debug!("📊 status {json}"),
                    Err(e) => tracing::debug!("status serialization failed: {e}"),
                }
            }
        });
    }

    // Run until Ctrl+C, then stop the server gracefully
    signal::ctrl_c().await?;
    logging::log_shutdown("received Ctrl+C");
    if let Err(e) = supervisor.kill("supervisor shutdown", Actor::System, true).await {
        tracing::error!("❌ Failed to stop server during shutdown: {e}");
    }

    tracing::info!("✅ Supervisor stopped gracefully");
    Ok(())
}
