use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate, Snapshot};
use crate::db::SnapshotSink;
use crate::error::CollectError;
use crate::notify::Notifier;
use crate::slurm::{parse_jobs, parse_nodes, Collector};

/// Read-only view of the engine's latest good snapshot
#[derive(Clone)]
pub struct CurrentSnapshot {
    pub snapshot: Arc<Snapshot>,
    /// True when the most recent cycle failed and this data outlived it
    pub stale: bool,
}

impl CurrentSnapshot {
    /// Seconds since the snapshot was taken
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.snapshot.timestamp).num_seconds().max(0)
    }
}

enum Command {
    Refresh,
    Shutdown,
}

#[derive(Default)]
struct Slot {
    current: Option<Arc<Snapshot>>,
    previous: Option<Arc<Snapshot>>,
    stale: bool,
    last_error: Option<String>,
}

struct Shared {
    slot: Mutex<Slot>,
    generation: AtomicU64,
    persist_failed: AtomicBool,
    shutdown: AtomicBool,
}

/// Owns the refresh cycle on a dedicated background thread.
///
/// The cycle runs `Collecting -> Parsing -> Aggregating -> Publishing` on
/// every tick of the poll interval or on an explicit refresh request; a
/// failed collection keeps the previous snapshot and marks it stale. The
/// snapshot slot is the only state shared with the foreground: it holds
/// `Arc`s that are replaced, never mutated, so `current()` is a clone
/// under a momentary lock and can never observe a half-built snapshot.
pub struct Engine {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl Engine {
    /// Starts the background worker; the first cycle runs immediately.
    pub fn spawn(
        collector: Box<dyn Collector>,
        sink: Option<SnapshotSink>,
        notifier: Option<Notifier>,
        poll_interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            generation: AtomicU64::new(0),
            persist_failed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let (commands, receiver) = mpsc::channel();
        let worker = Worker {
            collector,
            sink,
            notifier,
            shared: shared.clone(),
            receiver,
            poll_interval,
            last_sent: None,
        };
        thread::spawn(move || worker.run());

        Self { shared, commands }
    }

    /// Latest good snapshot, if any cycle has succeeded yet; never blocks
    /// beyond an `Arc` clone under a momentary lock.
    pub fn current(&self) -> Option<CurrentSnapshot> {
        let slot = lock(&self.shared.slot);
        slot.current.as_ref().map(|snapshot| CurrentSnapshot {
            snapshot: snapshot.clone(),
            stale: slot.stale,
        })
    }

    /// Description of the last failed collection, cleared on success
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.slot).last_error.clone()
    }

    /// Bumped on every publish or stale transition; lets the UI skip
    /// redraws without comparing snapshots.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Relaxed)
    }

    /// True while the most recent persistence attempt failed
    pub fn persist_failed(&self) -> bool {
        self.shared.persist_failed.load(Ordering::Relaxed)
    }

    /// Requests an out-of-cycle refresh. A request arriving while a cycle
    /// is in flight coalesces into one follow-up cycle, never a
    /// concurrent one.
    pub fn force_refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    /// Signals the worker to stop. An in-flight collection is abandoned:
    /// the worker rechecks the flag before publishing and its command
    /// invocations are already bounded by their own timeout, so nothing
    /// partial can escape. The thread itself is reaped at process exit.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Worker {
    collector: Box<dyn Collector>,
    sink: Option<SnapshotSink>,
    notifier: Option<Notifier>,
    shared: Arc<Shared>,
    receiver: mpsc::Receiver<Command>,
    poll_interval: Duration,
    last_sent: Option<DateTime<Utc>>,
}

impl Worker {
    fn run(mut self) {
        info!(interval = ?self.poll_interval, "refresh cycle started");

        let mut next_tick = Instant::now();
        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(timeout) {
                Ok(Command::Refresh) => {
                    if self.drain_refresh_requests() {
                        break;
                    }
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if self.shared.shutdown.load(Ordering::Relaxed) {
                break;
            }

            self.run_cycle();
            next_tick = Instant::now() + self.poll_interval;
        }

        info!("refresh cycle stopped");
    }

    /// Collapses queued refresh requests into the cycle about to run.
    /// Returns true if a shutdown was queued behind them.
    fn drain_refresh_requests(&self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(Command::Refresh) => continue,
                Ok(Command::Shutdown) => return true,
                Err(_) => return false,
            }
        }
    }

    fn run_cycle(&mut self) {
        debug!("collecting");
        let raw_nodes = match self.collector.collect_nodes() {
            Ok(raw) => raw,
            Err(err) => return self.fail(err),
        };
        let raw_jobs = match self.collector.collect_jobs() {
            Ok(raw) => raw,
            Err(err) => return self.fail(err),
        };

        debug!("parsing");
        let (nodes, mut warnings) = parse_nodes(&raw_nodes);
        let (jobs, job_warnings) = parse_jobs(&raw_jobs);
        warnings.extend(job_warnings);
        for warning in &warnings {
            warn!(%warning, "parse warning");
        }

        let mut snapshot = aggregate(&nodes, &jobs, Utc::now());
        snapshot.warnings = warnings;
        let snapshot = Arc::new(snapshot);

        // A shutdown requested while collecting discards the result;
        // nothing partial is ever published or persisted.
        if self.shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        let previous = self.publish(snapshot.clone());
        self.persist(&snapshot);
        self.notify(previous.as_deref(), &snapshot);
    }

    /// Marks the retained snapshot stale instead of discarding it; the
    /// next scheduled tick is the retry.
    fn fail(&self, err: CollectError) {
        error!(command = %err.command, detail = %err.detail, "collection failed; serving stale data");

        let mut slot = lock(&self.shared.slot);
        slot.stale = true;
        slot.last_error = Some(err.to_string());
        drop(slot);

        self.shared.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Swaps in the new snapshot and returns the displaced one
    fn publish(&self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        let mut slot = lock(&self.shared.slot);
        let previous = slot.current.replace(snapshot);
        slot.previous = previous.clone();
        slot.stale = false;
        slot.last_error = None;
        drop(slot);

        self.shared.generation.fetch_add(1, Ordering::Relaxed);
        debug!("snapshot published");
        previous
    }

    fn persist(&self, snapshot: &Snapshot) {
        let Some(sink) = &self.sink else { return };

        match sink.record(snapshot) {
            Ok(()) => self.shared.persist_failed.store(false, Ordering::Relaxed),
            Err(err) => {
                warn!(%err, "failed to persist snapshot");
                self.shared.persist_failed.store(true, Ordering::Relaxed);
            }
        }
    }

    fn notify(&mut self, previous: Option<&Snapshot>, current: &Snapshot) {
        let Some(notifier) = &self.notifier else { return };

        if let Some(message) = notifier.maybe_notify(previous, current, self.last_sent) {
            // The timestamp advances even when delivery fails; the next
            // interval is the only retry.
            self.last_sent = Some(Utc::now());
            if let Err(err) = notifier.deliver(&message) {
                warn!(%err, "webhook delivery failed");
            }
        }
    }
}

/// Locks a mutex, recovering the data from a poisoned lock
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
