//! Group rollup dispatch
//!
//! After a profile view is written for an account that belongs to a group, the
//! group's aggregate needs recomputing. That work is owned elsewhere (behind
//! [`GroupRollup`]); the recorder only has to fire the trigger and move on.
//!
//! # Architecture
//!
//! ```text
//! EventRecorder ──trigger()──→ [bounded channel] ──→ rollup thread
//!      (hot path, try_send)          │                    │
//!                                  full → dropped++       ├──→ GroupRollup::recompute_group_aggregate
//!                                                         └──→ failures ──→ drain_failures()
//! ```
//!
//! Triggers never block the caller: a full queue drops the trigger and counts
//! it. Errors and panics inside the rollup are caught on the dispatcher thread,
//! logged, and pushed onto a bounded failure channel the owner may drain.

use crate::config::RollupConfig;
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Recomputes a group's aggregate from its members' aggregates
pub trait GroupRollup: Send + Sync {
    fn name(&self) -> &'static str {
        "group-rollup"
    }

    fn recompute_group_aggregate(&self, group_id: &str) -> anyhow::Result<()>;
}

/// Rollup implementation that only logs; used when no external rollup is wired in
#[derive(Debug, Default)]
pub struct LoggingRollup;

impl GroupRollup for LoggingRollup {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn recompute_group_aggregate(&self, group_id: &str) -> anyhow::Result<()> {
        tracing::info!(group_id, "Group aggregate recompute requested");
        Ok(())
    }
}

/// A rollup call that returned an error or panicked
#[derive(Debug, Clone)]
pub struct RollupFailure {
    pub group_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RollupMetrics {
    /// Triggers accepted onto the queue
    pub dispatched: AtomicU64,
    /// Triggers dropped because the queue was full or the thread was gone
    pub dropped: AtomicU64,
    pub succeeded: AtomicU64,
    /// Errors and panics
    pub failed: AtomicU64,
}

impl RollupMetrics {
    pub fn snapshot(&self) -> RollupMetricsSnapshot {
        RollupMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupMetricsSnapshot {
    pub dispatched: u64,
    pub dropped: u64,
    pub succeeded: u64,
    pub failed: u64,
}

enum RollupCommand {
    Recompute(String),
    Shutdown,
}

/// Owns the rollup thread
pub struct RollupDispatcher {
    tx: SyncSender<RollupCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
    failures: Mutex<Receiver<RollupFailure>>,
    metrics: Arc<RollupMetrics>,
    rollup_name: &'static str,
}

impl RollupDispatcher {
    /// Spawn the dispatcher thread
    pub fn new(rollup: Arc<dyn GroupRollup>, config: &RollupConfig) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<RollupCommand>(config.queue_capacity.max(1));
        let (failure_tx, failure_rx) = mpsc::sync_channel::<RollupFailure>(config.failure_buffer.max(1));

        let metrics = Arc::new(RollupMetrics::default());
        let worker_metrics = metrics.clone();
        let rollup_name = rollup.name();

        let handle = thread::Builder::new()
            .name("linkstats-rollup".into())
            .spawn(move || Self::worker(rx, rollup, failure_tx, worker_metrics))?;

        tracing::debug!(
            rollup = rollup_name,
            queue_capacity = config.queue_capacity,
            "Group rollup dispatcher started"
        );

        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
            failures: Mutex::new(failure_rx),
            metrics,
            rollup_name,
        })
    }

    /// Queue a recompute for `group_id`. Never blocks; returns whether it was queued.
    pub fn trigger(&self, group_id: &str) -> bool {
        match self.tx.try_send(RollupCommand::Recompute(group_id.to_string())) {
            Ok(()) => {
                self.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.metrics.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(group_id, dropped, "Rollup queue full, trigger dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(group_id, "Rollup thread disconnected");
                false
            }
        }
    }

    pub fn metrics(&self) -> RollupMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn rollup_name(&self) -> &'static str {
        self.rollup_name
    }

    /// Take every failure reported so far
    pub fn drain_failures(&self) -> Vec<RollupFailure> {
        let rx = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        rx.try_iter().collect()
    }

    /// Process everything already queued, then stop the thread. Idempotent.
    pub fn shutdown(&self) {
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(handle) = handle else {
            return;
        };
        // Blocking send: queued triggers ahead of it still run
        let _ = self.tx.send(RollupCommand::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Rollup thread panicked during shutdown");
        }
        tracing::debug!(metrics = ?self.metrics.snapshot(), "Group rollup dispatcher stopped");
    }

    fn worker(
        rx: Receiver<RollupCommand>,
        rollup: Arc<dyn GroupRollup>,
        failure_tx: SyncSender<RollupFailure>,
        metrics: Arc<RollupMetrics>,
    ) {
        while let Ok(command) = rx.recv() {
            let group_id = match command {
                RollupCommand::Recompute(group_id) => group_id,
                RollupCommand::Shutdown => break,
            };

            let result = catch_unwind(AssertUnwindSafe(|| rollup.recompute_group_aggregate(&group_id)));
            let error = match result {
                Ok(Ok(())) => {
                    metrics.succeeded.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(group_id = %group_id, "Group rollup complete");
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };

            metrics.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(group_id = %group_id, rollup = rollup.name(), error = %error, "Group rollup failed");
            let failure = RollupFailure {
                group_id,
                error,
                at: Utc::now(),
            };
            if let Err(TrySendError::Full(f)) = failure_tx.try_send(failure) {
                tracing::debug!(group_id = %f.group_id, "Rollup failure buffer full, failure not retained");
            }
        }
    }
}

impl Drop for RollupDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(queue_capacity: usize) -> RollupConfig {
        RollupConfig {
            enabled: true,
            queue_capacity,
            failure_buffer: 8,
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl GroupRollup for Recording {
        fn recompute_group_aggregate(&self, group_id: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(group_id.to_string());
            Ok(())
        }
    }

    struct Failing;

    impl GroupRollup for Failing {
        fn recompute_group_aggregate(&self, group_id: &str) -> anyhow::Result<()> {
            if group_id == "boom" {
                panic!("rollup exploded");
            }
            anyhow::bail!("group {group_id} has no members")
        }
    }

    /// Blocks inside the call until released
    struct Gate {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<Receiver<()>>,
    }

    impl GroupRollup for Gate {
        fn recompute_group_aggregate(&self, _group_id: &str) -> anyhow::Result<()> {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    #[test]
    fn test_shutdown_drains_queue_in_order() {
        let rollup = Arc::new(Recording::default());
        let dispatcher = RollupDispatcher::new(rollup.clone(), &config(16)).unwrap();
        for g in ["g1", "g2", "g3"] {
            assert!(dispatcher.trigger(g));
        }
        dispatcher.shutdown();

        assert_eq!(*rollup.0.lock().unwrap(), vec!["g1", "g2", "g3"]);
        let m = dispatcher.metrics();
        assert_eq!(m.dispatched, 3);
        assert_eq!(m.succeeded, 3);
        assert_eq!(m.failed, 0);
    }

    #[test]
    fn test_errors_and_panics_reach_failure_channel() {
        let dispatcher = RollupDispatcher::new(Arc::new(Failing), &config(16)).unwrap();
        dispatcher.trigger("empty");
        dispatcher.trigger("boom");
        dispatcher.shutdown();

        let failures = dispatcher.drain_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].group_id, "empty");
        assert!(failures[0].error.contains("no members"));
        assert!(failures[1].error.contains("rollup exploded"));
        assert_eq!(dispatcher.metrics().failed, 2);
        assert!(dispatcher.drain_failures().is_empty());
    }

    #[test]
    fn test_full_queue_drops_trigger() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        let dispatcher = RollupDispatcher::new(gate, &config(1)).unwrap();

        assert!(dispatcher.trigger("a"));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Worker is busy with "a": one slot left in the queue
        assert!(dispatcher.trigger("b"));
        assert!(!dispatcher.trigger("c"));

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        dispatcher.shutdown();

        let m = dispatcher.metrics();
        assert_eq!(m.dispatched, 2);
        assert_eq!(m.dropped, 1);
        assert_eq!(m.succeeded, 2);
    }

    #[test]
    fn test_trigger_after_shutdown_is_dropped() {
        let dispatcher = RollupDispatcher::new(Arc::new(LoggingRollup), &config(4)).unwrap();
        dispatcher.shutdown();
        dispatcher.shutdown();
        assert!(!dispatcher.trigger("late"));
        assert_eq!(dispatcher.metrics().dropped, 1);
    }
}
