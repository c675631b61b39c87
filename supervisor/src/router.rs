//! Trace router: parses and dispatches everything the managed server emits
//!
//! Two inputs: the raw stdout/stderr byte stream (forwarded verbatim to the
//! log sink after UTF-8 normalization) and the diagnostic side channel
//! (discrete JSON units, decoded one at a time). Every diagnostic unit is
//! checked against the current fencing token before dispatch, the property
//! that keeps a superseded instance's late output from corrupting the live
//! health state after a restart race.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

use shared::{ConsoleStream, HeartbeatSource, InstanceToken, TraceMessage, TracePayload};

use crate::monitor::HealthMonitor;
use crate::resources::ResourceStartupTracker;
use crate::supervisor::RestartDelay;
use crate::traits::LogSink;
use crate::defer::DeferredSink;

/// Holder of the current instance's fencing token.
///
/// Written only by the process supervisor under its command lock; read on
/// every routed diagnostic unit. The token comparison is the concurrency
/// control that makes late events from a dead instance harmless.
#[derive(Default)]
pub struct FencingRegistry {
    current: RwLock<Option<InstanceToken>>,
}

impl FencingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: InstanceToken) {
        *self.current.write().expect("fencing registry poisoned") = Some(token);
    }

    pub fn clear(&self) {
        *self.current.write().expect("fencing registry poisoned") = None;
    }

    /// Clear only if `token` is still the current one. Used by the exit
    /// watcher so a superseded instance cannot clobber a newer one.
    pub fn clear_if_current(&self, token: &InstanceToken) -> bool {
        let mut current = self.current.write().expect("fencing registry poisoned");
        if current.as_ref() == Some(token) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<InstanceToken> {
        self.current.read().expect("fencing registry poisoned").clone()
    }

    pub fn is_current(&self, token: &InstanceToken) -> bool {
        self.current.read().expect("fencing registry poisoned").as_ref() == Some(token)
    }

    /// Validate the string tag carried by a wire message.
    pub fn matches_tag(&self, tag: &str) -> bool {
        self.current
            .read()
            .expect("fencing registry poisoned")
            .as_ref()
            .map(|t| t.matches(tag))
            .unwrap_or(false)
    }
}

pub struct TraceRouter {
    fencing: Arc<FencingRegistry>,
    delay: Arc<RestartDelay>,
    monitor: Arc<HealthMonitor>,
    resources: Arc<ResourceStartupTracker>,
    sink: Arc<dyn LogSink>,
    deferred: DeferredSink,
    deferred_delay: Duration,
    dropped_malformed: AtomicU64,
    dropped_stale: AtomicU64,
}

impl TraceRouter {
    pub fn new(
        fencing: Arc<FencingRegistry>,
        delay: Arc<RestartDelay>,
        monitor: Arc<HealthMonitor>,
        resources: Arc<ResourceStartupTracker>,
        sink: Arc<dyn LogSink>,
        deferred: DeferredSink,
        deferred_delay: Duration,
    ) -> Self {
        Self {
            fencing,
            delay,
            monitor,
            resources,
            sink,
            deferred,
            deferred_delay,
            dropped_malformed: AtomicU64::new(0),
            dropped_stale: AtomicU64::new(0),
        }
    }

    /// Forward one raw console chunk verbatim, normalizing to UTF-8.
    pub async fn route_console(&self, stream: ConsoleStream, chunk: &[u8]) {
        let line = String::from_utf8_lossy(chunk);
        self.sink.console_line(stream, line.into_owned()).await;
    }

    /// Decode and dispatch one diagnostic unit.
    ///
    /// Malformed units and units tagged with a superseded token are dropped
    /// silently: counted and trace-logged, never fatal.
    pub async fn route_diagnostic(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let message = match TraceMessage::decode(line) {
            Ok(message) => message,
            Err(e) => {
                self.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("dropped malformed diagnostic unit: {e}");
                return;
            }
        };

        if !self.fencing.matches_tag(&message.mutex) {
            self.dropped_stale.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                "dropped stale diagnostic unit from channel '{}' (token {})",
                message.channel,
                message.mutex
            );
            return;
        }

        match message.payload {
            TracePayload::BindError { address } => {
                let delay = self.delay.escalate();
                tracing::warn!(
                    "server failed to bind {address}; next restart delayed {}s",
                    delay.as_secs()
                );
                self.deferred.defer(
                    self.deferred_delay,
                    format!(
                        "Server could not bind {address}: the port is likely still held. \
                         Restart delayed by {}s.",
                        delay.as_secs()
                    ),
                );
            }

            TracePayload::WatchdogBark { thread, stack } => {
                // A hung thread may still pass heartbeats; health is not
                // touched here.
                let mut summary =
                    format!("Thread '{thread}' reported itself hung (channel '{}').", message.channel);
                if let Some(stack) = stack {
                    summary.push_str(&format!("\n{stack}"));
                }
                tracing::warn!("watchdog bark from thread '{thread}'");
                self.deferred.defer(self.deferred_delay, summary);
            }

            TracePayload::ResourceEvent(event) => {
                self.resources.handle_event(&event);
            }

            TracePayload::Heartbeat => {
                self.monitor.record_heartbeat(HeartbeatSource::SideChannel);
            }

            TracePayload::Other => {
                tracing::trace!("ignored diagnostic unit from channel '{}'", message.channel);
            }
        }
    }

    /// (malformed, stale) drop counters since startup.
    pub fn drop_counters(&self) -> (u64, u64) {
        (
            self.dropped_malformed.load(Ordering::Relaxed),
            self.dropped_stale.load(Ordering::Relaxed),
        )
    }
}

/// Bind the diagnostic side-channel listener and spawn its accept loop.
///
/// The managed server connects and writes newline-delimited JSON units;
/// each line is handed to the router. Returns the bound address so the
/// supervisor can point the child at it through the environment.
pub async fn spawn_diagnostic_listener(
    addr: SocketAddr,
    router: Arc<TraceRouter>,
) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::debug!("🔊 Diagnostic channel listening on {local_addr}");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("🔗 Diagnostic channel connection from {peer}");
                    let router = router.clone();
                    tokio::spawn(async move {
                        let mut lines = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            router.route_diagnostic(&line).await;
                        }
                        tracing::debug!("🔌 Diagnostic channel connection from {peer} closed");
                    });
                }
                Err(e) => {
                    tracing::warn!("failed to accept diagnostic connection: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    Ok(local_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    struct CapturingSink {
        console: Mutex<Vec<(ConsoleStream, String)>>,
        diagnostics: Mutex<Vec<String>>,
    }

    impl CapturingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                console: Mutex::new(Vec::new()),
                diagnostics: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LogSink for CapturingSink {
        async fn console_line(&self, stream: ConsoleStream, line: String) {
            self.console.lock().unwrap().push((stream, line));
        }

        async fn diagnostic(&self, summary: String) {
            self.diagnostics.lock().unwrap().push(summary);
        }
    }

    struct Fixture {
        fencing: Arc<FencingRegistry>,
        delay: Arc<RestartDelay>,
        monitor: Arc<HealthMonitor>,
        sink: Arc<CapturingSink>,
        router: TraceRouter,
    }

    fn fixture() -> Fixture {
        let fencing = Arc::new(FencingRegistry::new());
        let delay = Arc::new(RestartDelay::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            Duration::from_secs(45),
        ));
        let monitor = Arc::new(HealthMonitor::new(Duration::from_secs(45)));
        let resources = Arc::new(ResourceStartupTracker::new(Duration::from_secs(60)));
        let sink = CapturingSink::new();
        let deferred = DeferredSink::spawn(sink.clone());
        let router = TraceRouter::new(
            fencing.clone(),
            delay.clone(),
            monitor.clone(),
            resources,
            sink.clone(),
            deferred,
            Duration::from_millis(5),
        );
        Fixture { fencing, delay, monitor, sink, router }
    }

    fn heartbeat_line(token: &str) -> String {
        format!(r#"{{"mutex":"{token}","channel":"svMain","type":"heartbeat"}}"#)
    }

    #[tokio::test]
    async fn console_chunks_pass_through_with_lossy_normalization() {
        let f = fixture();
        f.router.route_console(ConsoleStream::Stdout, b"hello world").await;
        f.router.route_console(ConsoleStream::Stderr, &[0xff, 0xfe, b'x']).await;

        let console = f.sink.console.lock().unwrap();
        assert_eq!(console[0], (ConsoleStream::Stdout, "hello world".to_string()));
        assert_eq!(console[1].0, ConsoleStream::Stderr);
        assert!(console[1].1.ends_with('x'));
    }

    #[tokio::test]
    async fn heartbeat_with_current_token_reaches_monitor() {
        let f = fixture();
        let token = InstanceToken::new();
        f.fencing.set(token.clone());
        f.monitor.on_process_started();

        f.router.route_diagnostic(&heartbeat_line(&token.to_string())).await;
        assert_eq!(f.monitor.state(), shared::HealthState::Partial);
    }

    #[tokio::test]
    async fn stale_token_units_are_discarded_before_dispatch() {
        let f = fixture();
        let old = InstanceToken::new();
        let new = InstanceToken::new();
        f.fencing.set(new);
        f.monitor.on_process_started();

        f.router.route_diagnostic(&heartbeat_line(&old.to_string())).await;

        // The stale heartbeat must not have touched the monitor
        assert_eq!(f.monitor.state(), shared::HealthState::Offline);
        assert_eq!(f.router.drop_counters(), (0, 1));
    }

    #[tokio::test]
    async fn malformed_units_are_counted_and_dropped() {
        let f = fixture();
        f.router.route_diagnostic("garbage{{{").await;
        f.router.route_diagnostic("").await; // empty lines are not an error
        assert_eq!(f.router.drop_counters(), (1, 0));
    }

    #[tokio::test]
    async fn bind_error_escalates_restart_delay_and_defers_a_summary() {
        let f = fixture();
        let token = InstanceToken::new();
        f.fencing.set(token.clone());

        let line = format!(
            r#"{{"mutex":"{token}","channel":"svNetwork","type":"bind_error","address":"0.0.0.0:30120"}}"#
        );
        f.router.route_diagnostic(&line).await;

        assert_eq!(f.delay.current(), Some(Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let diagnostics = f.sink.diagnostics.lock().unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("0.0.0.0:30120"));
    }

    #[tokio::test]
    async fn unknown_unit_types_are_ignored_not_rejected() {
        let f = fixture();
        let token = InstanceToken::new();
        f.fencing.set(token.clone());

        let line = format!(r#"{{"mutex":"{token}","channel":"svMain","type":"net_stats","tps":120}}"#);
        f.router.route_diagnostic(&line).await;

        // Ignored cleanly: not a drop of either kind
        assert_eq!(f.router.drop_counters(), (0, 0));
    }
}
