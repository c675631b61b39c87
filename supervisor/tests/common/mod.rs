//! Test helpers building a fully wired supervisor component graph
//!
//! Integration tests drive real child processes (`/bin/sh`), so the graph
//! here is the production wiring with shortened timeouts.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shared::{ConsoleStream, InstanceToken};
use supervisor::{
    config::SupervisorConfig,
    defer::DeferredSink,
    traits::LogSink,
    FencingRegistry, HealthMonitor, ProcessSupervisor, ResourceStartupTracker, RestartDelay,
    TraceRouter,
};

/// Log sink capturing everything for assertions.
pub struct CapturingSink {
    pub console: Mutex<Vec<(ConsoleStream, String)>>,
    pub diagnostics: Mutex<Vec<String>>,
}

impl CapturingSink {
    pub fn new() -> Arc<Self> {
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

pub struct Harness {
    pub fencing: Arc<FencingRegistry>,
    pub delay: Arc<RestartDelay>,
    pub monitor: Arc<HealthMonitor>,
    pub resources: Arc<ResourceStartupTracker>,
    pub router: Arc<TraceRouter>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub sink: Arc<CapturingSink>,
}

/// Wire the full component graph around the given server command line.
pub fn harness_with_command(binary: &str, args: &[&str]) -> Harness {
    let mut config = SupervisorConfig::default()
        .with_server_binary(binary.into())
        .with_launch_args(args.iter().map(|s| s.to_string()).collect());
    // Keep the tests fast: short grace period, short deferred-log delay
    config.graceful_timeout = Duration::from_millis(500);
    config.deferred_log_delay = Duration::from_millis(5);

    let fencing = Arc::new(FencingRegistry::new());
    let delay = Arc::new(RestartDelay::new(
        config.bind_delay_base,
        config.bind_delay_increment,
        config.bind_delay_cap,
    ));
    let monitor = Arc::new(HealthMonitor::new(config.heartbeat_timeout));
    let resources = Arc::new(ResourceStartupTracker::new(config.resource_hang_threshold));
    let sink = CapturingSink::new();
    let deferred = DeferredSink::spawn(sink.clone());
    let router = Arc::new(TraceRouter::new(
        fencing.clone(),
        delay.clone(),
        monitor.clone(),
        resources.clone(),
        sink.clone(),
        deferred,
        config.deferred_log_delay,
    ));
    let supervisor = Arc::new(ProcessSupervisor::new(
        config,
        fencing.clone(),
        delay.clone(),
        monitor.clone(),
        resources.clone(),
        router.clone(),
    ));

    Harness {
        fencing,
        delay,
        monitor,
        resources,
        router,
        supervisor,
        sink,
    }
}

/// A server that just stays up until told to stop.
pub fn sleeper_harness() -> Harness {
    harness_with_command("/bin/sh", &["-c", "sleep 30"])
}

pub fn heartbeat_line(token: &InstanceToken) -> String {
    format!(r#"{{"mutex":"{token}","channel":"svMain","type":"heartbeat"}}"#)
}

pub fn resource_starting_line(token: &InstanceToken, resource: &str) -> String {
    format!(
        r#"{{"mutex":"{token}","channel":"svMain","type":"resource_event","event":"starting","resource":"{resource}"}}"#
    )
}
