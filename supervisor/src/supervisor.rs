//! Process supervisor: sole owner and mutator of the managed server process
//!
//! Exactly one server instance exists at a time. Every spawn mints a fresh
//! fencing token; spawn/kill/restart serialize on one command lock so a
//! restart arriving while a manual kill is in flight can never produce two
//! processes. Late events from a superseded instance are fenced out by the
//! token, not by a synchronization barrier.

use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;

use shared::{Actor, ConsoleStream, InstanceToken, LifecycleState, ScheduleOutlook, StatusReport};

use crate::config::SupervisorConfig;
use crate::error::{KillError, RestartError, SpawnError};
use crate::monitor::HealthMonitor;
use crate::resources::ResourceStartupTracker;
use crate::router::{FencingRegistry, TraceRouter};
use crate::traits::{LogSink, ProcessController};

/// Environment variable telling the child its own fencing token, echoed
/// back in every diagnostic unit it emits.
pub const ENV_INSTANCE_TOKEN: &str = "SUPERVISOR_INSTANCE_TOKEN";

/// Environment variable telling the child where the diagnostic listener is.
pub const ENV_DIAG_ENDPOINT: &str = "SUPERVISOR_DIAG_ENDPOINT";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const GRACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Escalating restart delay after port-bind failures.
///
/// Created on the first observed bind failure, incremented (capped) on
/// repeats within the same process lifetime, and reset to absent when that
/// lifetime ends, which is the next successful spawn or a kill.
pub struct RestartDelay {
    current: std::sync::Mutex<Option<Duration>>,
    base: Duration,
    increment: Duration,
    cap: Duration,
}

impl RestartDelay {
    pub fn new(base: Duration, increment: Duration, cap: Duration) -> Self {
        Self {
            current: std::sync::Mutex::new(None),
            base,
            increment,
            cap,
        }
    }

    /// Bump the delay for one more bind failure and return the new value.
    pub fn escalate(&self) -> Duration {
        let mut current = self.current.lock().expect("restart delay poisoned");
        let next = match *current {
            None => self.base,
            Some(delay) => (delay + self.increment).min(self.cap),
        };
        *current = Some(next);
        next
    }

    pub fn current(&self) -> Option<Duration> {
        *self.current.lock().expect("restart delay poisoned")
    }

    pub fn clear(&self) {
        *self.current.lock().expect("restart delay poisoned") = None;
    }
}

/// Identity of one spawn attempt. The child handle lives separately so
/// identity reads never wait on a kill in progress.
#[derive(Clone)]
struct ProcessIdentity {
    pid: u32,
    token: InstanceToken,
    spawned_at: Instant,
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,

    /// Serializes spawn/kill/restart against each other.
    command_lock: AsyncMutex<()>,

    /// The live child handle. Taken by `kill`; polled by the exit watcher.
    child_slot: Arc<AsyncMutex<Option<Child>>>,

    identity: Arc<RwLock<Option<ProcessIdentity>>>,
    lifecycle: Arc<RwLock<LifecycleState>>,

    fencing: Arc<FencingRegistry>,
    delay: Arc<RestartDelay>,
    monitor: Arc<HealthMonitor>,
    resources: Arc<ResourceStartupTracker>,
    router: Arc<TraceRouter>,

    /// Where the diagnostic listener ended up binding, once it has.
    diagnostic_endpoint: RwLock<Option<std::net::SocketAddr>>,
}

impl ProcessSupervisor {
    /// Create a supervisor with injected collaborators.
    pub fn new(
        config: SupervisorConfig,
        fencing: Arc<FencingRegistry>,
        delay: Arc<RestartDelay>,
        monitor: Arc<HealthMonitor>,
        resources: Arc<ResourceStartupTracker>,
        router: Arc<TraceRouter>,
    ) -> Self {
        Self {
            config,
            command_lock: AsyncMutex::new(()),
            child_slot: Arc::new(AsyncMutex::new(None)),
            identity: Arc::new(RwLock::new(None)),
            lifecycle: Arc::new(RwLock::new(LifecycleState::Stopped)),
            fencing,
            delay,
            monitor,
            resources,
            router,
            diagnostic_endpoint: RwLock::new(None),
        }
    }

    /// Record where the diagnostic listener bound, for child wiring.
    pub fn set_diagnostic_endpoint(&self, addr: std::net::SocketAddr) {
        *self.diagnostic_endpoint.write().expect("endpoint lock poisoned") = Some(addr);
    }

    /// Start the managed server.
    pub async fn spawn(&self) -> Result<InstanceToken, SpawnError> {
        let _guard = self.command_lock.lock().await;
        self.spawn_locked().await
    }

    /// Stop the managed server. No-op success when already stopped.
    pub async fn kill(&self, reason: &str, actor: Actor, graceful: bool) -> Result<(), KillError> {
        let _guard = self.command_lock.lock().await;
        self.kill_locked(reason, &actor, graceful).await
    }

    /// Stop-then-start, composed under one command lock. Honors any pending
    /// bind-failure delay between the two steps so the port has time to
    /// come free.
    pub async fn restart(&self, reason: &str, actor: Actor) -> Result<InstanceToken, RestartError> {
        let _guard = self.command_lock.lock().await;
        tracing::info!("🔄 Restarting server (reason: {reason}, by: {actor})");

        // Read before kill: kill ends the lifetime the escalation belongs to.
        let pause = self.delay.current();

        self.kill_locked(reason, &actor, true).await?;

        if let Some(pause) = pause {
            tracing::info!("⏳ Delaying respawn by {}s after bind failures", pause.as_secs());
            tokio::time::sleep(pause).await;
        }

        let token = self.spawn_locked().await?;
        Ok(token)
    }

    async fn spawn_locked(&self) -> Result<InstanceToken, SpawnError> {
        if let Some(identity) = self.identity.read().expect("identity lock poisoned").clone() {
            return Err(SpawnError::AlreadyRunning { pid: identity.pid });
        }

        let binary = self
            .config
            .server_binary
            .as_ref()
            .ok_or(SpawnError::NotConfigured { field: "binary path" })?;

        self.set_lifecycle(LifecycleState::Starting);

        let token = InstanceToken::new();
        let mut cmd = Command::new(binary);
        cmd.args(&self.config.launch_args)
            .env(ENV_INSTANCE_TOKEN, token.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        if let Some(dir) = &self.config.server_data_dir {
            cmd.current_dir(dir);
        }
        if let Some(endpoint) = *self.diagnostic_endpoint.read().expect("endpoint lock poisoned") {
            cmd.env(ENV_DIAG_ENDPOINT, endpoint.to_string());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.set_lifecycle(LifecycleState::Stopped);
                return Err(SpawnError::LaunchFailed(e));
            }
        };

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                self.set_lifecycle(LifecycleState::Stopped);
                return Err(SpawnError::LaunchFailed(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "process exited before a pid was recorded",
                )));
            }
        };

        if let Some(stdout) = child.stdout.take() {
            spawn_console_reader(ConsoleStream::Stdout, stdout, self.router.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_console_reader(ConsoleStream::Stderr, stderr, self.router.clone());
        }

        *self.identity.write().expect("identity lock poisoned") = Some(ProcessIdentity {
            pid,
            token: token.clone(),
            spawned_at: Instant::now(),
        });
        self.fencing.set(token.clone());
        *self.child_slot.lock().await = Some(child);

        self.monitor.on_process_started();
        // Bind-failure escalation belongs to the previous lifetime.
        self.delay.clear();
        self.set_lifecycle(LifecycleState::Running);
        self.spawn_exit_watcher(token.clone());

        tracing::info!("🚀 Server spawned (pid {pid}, instance {token})");
        Ok(token)
    }

    async fn kill_locked(&self, reason: &str, actor: &Actor, graceful: bool) -> Result<(), KillError> {
        let maybe_child = self.child_slot.lock().await.take();
        let maybe_identity = self.identity.read().expect("identity lock poisoned").clone();

        if maybe_child.is_none() && maybe_identity.is_none() {
            return Ok(());
        }

        self.set_lifecycle(LifecycleState::Stopping);

        let mut result = Ok(());
        if let Some(mut child) = maybe_child {
            let pid = maybe_identity
                .as_ref()
                .map(|i| i.pid)
                .or_else(|| child.id())
                .unwrap_or(0);
            tracing::info!("🛑 Stopping server (reason: {reason}, by: {actor}, graceful: {graceful})");

            let mut exited = matches!(child.try_wait(), Ok(Some(_)));

            if graceful && !exited {
                exited = self.graceful_stop(&mut child, pid).await;
            }

            if !exited {
                if let Err(source) = child.kill().await {
                    // Losing a race with the exit itself is fine; anything
                    // else is surfaced after the state reset below.
                    if !matches!(child.try_wait(), Ok(Some(_))) {
                        result = Err(KillError::TerminateFailed { pid, source });
                    }
                } else {
                    tracing::debug!("server pid {pid} force-terminated after grace period");
                }
            }
        }

        // Fencing reset point: downstream state from this instance is void
        // regardless of how the terminate went.
        self.fencing.clear();
        *self.identity.write().expect("identity lock poisoned") = None;
        self.delay.clear();
        self.monitor.on_process_stopped();
        self.resources.on_process_stopped();
        self.set_lifecycle(LifecycleState::Stopped);
        result
    }

    /// Graceful shutdown signal plus a bounded wait. Returns whether the
    /// process exited within the grace period.
    #[cfg(unix)]
    async fn graceful_stop(&self, child: &mut Child, pid: u32) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!("SIGTERM to pid {pid} failed: {e}");
        }

        let deadline = Instant::now() + self.config.graceful_timeout;
        while Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                tracing::debug!("server pid {pid} exited gracefully");
                return true;
            }
            tokio::time::sleep(GRACE_POLL_INTERVAL).await;
        }
        false
    }

    /// Without unix signals there is no graceful step; fall through to the
    /// forced kill.
    #[cfg(not(unix))]
    async fn graceful_stop(&self, _child: &mut Child, _pid: u32) -> bool {
        false
    }

    /// Watch for the child exiting on its own. Guarded by the fencing token
    /// so a watcher from a superseded instance cannot clobber a newer one.
    fn spawn_exit_watcher(&self, token: InstanceToken) {
        let child_slot = self.child_slot.clone();
        let identity = self.identity.clone();
        let lifecycle = self.lifecycle.clone();
        let fencing = self.fencing.clone();
        let monitor = self.monitor.clone();
        let resources = self.resources.clone();

        tokio::spawn(async move {
            let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
            loop {
                poll.tick().await;

                if !fencing.is_current(&token) {
                    return;
                }

                let exited = {
                    let mut slot = child_slot.lock().await;
                    match slot.as_mut() {
                        // A kill in flight took the handle; stand down.
                        None => return,
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => {
                                *slot = None;
                                Some(status)
                            }
                            Ok(None) => None,
                            Err(e) => {
                                tracing::warn!("failed to poll server process: {e}");
                                None
                            }
                        },
                    }
                };

                if let Some(status) = exited {
                    if fencing.clear_if_current(&token) {
                        *identity.write().expect("identity lock poisoned") = None;
                        *lifecycle.write().expect("lifecycle lock poisoned") = LifecycleState::Stopped;
                        monitor.on_process_stopped();
                        resources.on_process_stopped();
                        tracing::warn!("🔥 Server process exited on its own ({status})");
                    }
                    return;
                }
            }
        });
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        *self.lifecycle.write().expect("lifecycle lock poisoned") = state;
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.read().expect("lifecycle lock poisoned")
    }

    pub fn current_token(&self) -> Option<InstanceToken> {
        self.fencing.current()
    }

    pub fn pid(&self) -> Option<u32> {
        self.identity.read().expect("identity lock poisoned").as_ref().map(|i| i.pid)
    }

    pub fn process_uptime(&self) -> Option<Duration> {
        self.identity
            .read()
            .expect("identity lock poisoned")
            .as_ref()
            .map(|i| i.spawned_at.elapsed())
    }

    /// Point-in-time status for the web layer; the caller supplies the
    /// scheduler outlook since the scheduler sits above the supervisor.
    pub fn status_report(&self, schedule: Option<ScheduleOutlook>) -> StatusReport {
        let (dropped_malformed, dropped_stale) = self.router.drop_counters();
        StatusReport {
            lifecycle: self.lifecycle_state(),
            health: self.monitor.state(),
            pid: self.pid(),
            uptime_secs: self.process_uptime().map(|d| d.as_secs()),
            restart_delay_ms: self.delay.current().map(|d| d.as_millis() as u64),
            pending_start: self.resources.snapshot(),
            schedule,
            dropped_malformed,
            dropped_stale,
        }
    }
}

#[async_trait::async_trait]
impl ProcessController for ProcessSupervisor {
    async fn restart(&self, reason: &str, actor: Actor) -> Result<InstanceToken, RestartError> {
        ProcessSupervisor::restart(self, reason, actor).await
    }

    async fn uptime(&self) -> Option<Duration> {
        self.process_uptime()
    }
}

fn spawn_console_reader<R>(stream: ConsoleStream, reader: R, router: Arc<TraceRouter>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        while let Ok(Some(segment)) = segments.next_segment().await {
            router.route_console(stream, &segment).await;
        }
    });
}
