//! Delayed diagnostic logging
//!
//! Some diagnostic summaries (bind failures, watchdog barks) are delayed a
//! few hundred milliseconds so they land after the console output that
//! triggered them instead of interleaving with it. This is an explicit
//! scheduled-callback queue (a background task delivering lines in due
//! order) so that ordering is a declared property, not an accident of
//! ad-hoc timers.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::traits::LogSink;

struct DeferredLine {
    due: Instant,
    seq: u64,
    line: String,
}

impl PartialEq for DeferredLine {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DeferredLine {}

impl PartialOrd for DeferredLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeferredLine {
    fn cmp(&self, other: &Self) -> Ordering {
        // Same due time delivers in enqueue order
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

/// Handle for enqueueing deferred lines. Cheap to clone.
#[derive(Clone)]
pub struct DeferredSink {
    tx: mpsc::UnboundedSender<DeferredLine>,
    seq: Arc<AtomicU64>,
}

impl DeferredSink {
    /// Spawn the delivery task and return the enqueue handle.
    pub fn spawn(sink: Arc<dyn LogSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_loop(rx, sink));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue a line for delivery after `delay`.
    pub fn defer(&self, delay: Duration, line: String) {
        let entry = DeferredLine {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, atomic::Ordering::Relaxed),
            line,
        };
        // Delivery task gone means we are shutting down; drop the line.
        let _ = self.tx.send(entry);
    }
}

async fn deliver_loop(mut rx: mpsc::UnboundedReceiver<DeferredLine>, sink: Arc<dyn LogSink>) {
    let mut queue: BinaryHeap<Reverse<DeferredLine>> = BinaryHeap::new();

    loop {
        let next_due = queue.peek().map(|Reverse(entry)| entry.due);

        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(entry) => queue.push(Reverse(entry)),
                    None => {
                        // Channel closed: flush whatever is queued, in order
                        let mut remaining: Vec<_> = queue.into_sorted_vec();
                        remaining.reverse();
                        for Reverse(entry) in remaining {
                            sink.diagnostic(entry.line).await;
                        }
                        return;
                    }
                }
            }

            _ = sleep_until_due(next_due) => {
                let now = Instant::now();
                while queue.peek().map(|Reverse(e)| e.due <= now).unwrap_or(false) {
                    let Reverse(entry) = queue.pop().expect("peeked entry present");
                    sink.diagnostic(entry.line).await;
                }
            }
        }
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due.into()).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use shared::ConsoleStream;

    /// Sink capturing diagnostic lines in arrival order.
    struct CapturingSink {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LogSink for CapturingSink {
        async fn console_line(&self, _stream: ConsoleStream, _line: String) {}

        async fn diagnostic(&self, summary: String) {
            self.lines.lock().unwrap().push(summary);
        }
    }

    #[tokio::test]
    async fn delivers_lines_after_their_delay_in_order() {
        let sink = Arc::new(CapturingSink { lines: Mutex::new(Vec::new()) });
        let deferred = DeferredSink::spawn(sink.clone());

        deferred.defer(Duration::from_millis(120), "second".to_string());
        deferred.defer(Duration::from_millis(60), "first".to_string());

        // Nothing should arrive before the shortest delay has passed
        assert!(sink.lines.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let lines = sink.lines.lock().unwrap().clone();
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn equal_delays_deliver_in_enqueue_order() {
        let sink = Arc::new(CapturingSink { lines: Mutex::new(Vec::new()) });
        let deferred = DeferredSink::spawn(sink.clone());

        for i in 0..5 {
            deferred.defer(Duration::from_millis(20), format!("line-{i}"));
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let lines = sink.lines.lock().unwrap().clone();
        let expected: Vec<String> = (0..5).map(|i| format!("line-{i}")).collect();
        assert_eq!(lines, expected);
    }
}
