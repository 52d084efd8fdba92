//! Background refresh pipeline.
//!
//! One worker owns the load, hash and build cycle for a beads file. File
//! events are debounced on a loop thread, cycles run on their own thread
//! behind a running/dirty gate, and finished snapshots are published by
//! swapping an `Arc` under a short lock. A watchdog restarts the loop when
//! the heartbeat goes quiet or a cycle runs too long.

pub mod health;

pub use health::{Health, Metrics};

use crate::config::{ConfigError, WorkerConfig};
use crate::idle_gc::{IdleGc, ReclaimFn};
use crate::snapshot::Snapshot;
use crate::tier::DatasetTier;
use crate::watcher::{FileWatcher, WatchMode};
use beads_core::{
    ContentHash, Issue, IssuePool, JsonlLoader, LoadError, LoadOptions, LoadWarning, Loader,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::{
    after, bounded, never, select, tick, Receiver, RecvTimeoutError, Sender, TrySendError,
};
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const STOP_WAIT: Duration = Duration::from_secs(5);
const RECOVERY_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
    Stopped,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Processing => "processing",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SizeHint,
    Load,
    Hash,
    Analyze,
    Watchdog,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::SizeHint => "size_hint",
            Phase::Load => "load",
            Phase::Hash => "hash",
            Phase::Analyze => "analyze",
            Phase::Watchdog => "watchdog",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkerFault {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("panicked: {0}")]
    Panic(String),
    #[error("stalled: {0}")]
    Stalled(String),
    #[error("failed to spawn cycle thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to rewatch beads file: {0}")]
    Watch(#[source] notify::Error),
}

impl WorkerFault {
    /// Whether the next refresh can be expected to succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WorkerFault::Load(err) => err.is_transient(),
            WorkerFault::Panic(_) | WorkerFault::Stalled(_) | WorkerFault::Spawn(_) => true,
            WorkerFault::Watch(_) => false,
        }
    }
}

#[derive(Debug, Error)]
#[error("{phase} failed: {cause}")]
pub struct WorkerError {
    pub phase: Phase,
    #[source]
    pub cause: WorkerFault,
    pub at: DateTime<Utc>,
    /// Recoveries performed before this failure.
    pub retries: u32,
}

impl WorkerError {
    fn new(phase: Phase, cause: WorkerFault, retries: u32) -> Self {
        Self {
            phase,
            cause,
            at: Utc::now(),
            retries,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkerMessage {
    SnapshotReady {
        snapshot: Arc<Snapshot>,
        sent_at: DateTime<Utc>,
        /// First file change folded into this snapshot, if any.
        file_change_at: Option<DateTime<Utc>>,
        version: u64,
    },
    SnapshotError {
        error: Arc<WorkerError>,
        recoverable: bool,
    },
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("worker has been stopped")]
    Stopped,
    #[error("failed to watch beads file: {0}")]
    Watch(#[source] notify::Error),
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: io::Error,
    },
}

struct LoopHandle {
    stop: Sender<()>,
    exited: Receiver<()>,
}

impl LoopHandle {
    /// Signals the loop and waits for it to exit. Returns false on timeout.
    fn shutdown(self, wait: Duration) -> bool {
        let LoopHandle { stop, exited } = self;
        drop(stop);
        !matches!(exited.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
    }
}

struct Shared {
    state: WorkerState,
    started: bool,
    recovering: bool,
    dirty: bool,
    force_next: bool,
    generation: u64,
    snapshot: Option<Arc<Snapshot>>,
    /// Replaced snapshot a reader still held when it was retired.
    retired: Option<Arc<Snapshot>>,
    version: u64,
    last_hash: Option<ContentHash>,
    last_error: Option<Arc<WorkerError>>,
    processing_since: Option<Instant>,
    last_heartbeat: Option<Instant>,
    uptime_since: Option<DateTime<Utc>>,
    recovery_count: u32,
    pending_file_change: Option<DateTime<Utc>>,
    processing_count: u64,
    coalesce_count: u64,
    last_snapshot_ready_at: Option<DateTime<Utc>>,
    snapshot_size_bytes: usize,
    last_processing_duration: Duration,
    last_file_change_at: Option<DateTime<Utc>>,
    messages: Option<Sender<WorkerMessage>>,
    done: Option<Sender<()>>,
    shutdown: Option<Sender<()>>,
    loop_handle: Option<LoopHandle>,
}

impl Shared {
    fn new(messages: Sender<WorkerMessage>, done: Sender<()>) -> Self {
        Self {
            state: WorkerState::Idle,
            started: false,
            recovering: false,
            dirty: false,
            force_next: false,
            generation: 0,
            snapshot: None,
            retired: None,
            version: 0,
            last_hash: None,
            last_error: None,
            processing_since: None,
            last_heartbeat: None,
            uptime_since: None,
            recovery_count: 0,
            pending_file_change: None,
            processing_count: 0,
            coalesce_count: 0,
            last_snapshot_ready_at: None,
            snapshot_size_bytes: 0,
            last_processing_duration: Duration::ZERO,
            last_file_change_at: None,
            messages: Some(messages),
            done: Some(done),
            shutdown: None,
            loop_handle: None,
        }
    }

    /// Queues a message, evicting the oldest one when the buffer is full.
    fn send(&self, backlog: &Receiver<WorkerMessage>, message: WorkerMessage) {
        let Some(tx) = &self.messages else {
            return;
        };
        if let Err(TrySendError::Full(message)) = tx.try_send(message) {
            let _ = backlog.try_recv();
            let _ = tx.try_send(message);
        }
    }
}

struct Inner {
    config: WorkerConfig,
    loader: Arc<dyn Loader>,
    pool: Arc<IssuePool>,
    idle_gc: IdleGc,
    watcher: Mutex<Option<FileWatcher>>,
    shared: Mutex<Shared>,
    backlog: Receiver<WorkerMessage>,
    done: Receiver<()>,
}

/// Handle to the background refresh worker. Dropping it stops the worker.
pub struct Worker {
    inner: Arc<Inner>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self, ConfigError> {
        Self::with_loader(config, Arc::new(JsonlLoader))
    }

    pub fn with_loader(config: WorkerConfig, loader: Arc<dyn Loader>) -> Result<Self, ConfigError> {
        Self::build(config, loader, None)
    }

    /// `reclaim` replaces the default idle pass, which shrinks the issue pool.
    fn build(
        config: WorkerConfig,
        loader: Arc<dyn Loader>,
        reclaim: Option<ReclaimFn>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let watcher = if config.watch && !config.path.as_os_str().is_empty() {
            let mode = WatchMode {
                force_poll: config.force_poll,
                poll_interval: config.poll_interval,
            };
            Some(FileWatcher::new(&config.path, mode)?)
        } else {
            None
        };

        let pool = Arc::new(IssuePool::default());
        let reclaim = reclaim.unwrap_or_else(|| {
            let pool = Arc::clone(&pool);
            let retain_percent = config.idle_gc.retain_percent;
            Arc::new(move || {
                pool.shrink_to_percent(retain_percent);
            })
        });
        let idle_gc = IdleGc::new(config.idle_gc.clone(), reclaim);

        let (messages_tx, messages_rx) = bounded(config.channel_buffer);
        let (done_tx, done_rx) = bounded(0);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                loader,
                pool,
                idle_gc,
                watcher: Mutex::new(watcher),
                shared: Mutex::new(Shared::new(messages_tx, done_tx)),
                backlog: messages_rx,
                done: done_rx,
            }),
        })
    }

    /// Starts file watching, the heartbeat loop and the background timers.
    ///
    /// Refreshes can be triggered without starting; starting twice is a no-op.
    pub fn start(&self) -> Result<(), StartError> {
        self.inner.start()
    }

    /// Stops the worker and closes the message and done channels. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn trigger_refresh(&self) {
        self.inner.trigger(false);
    }

    /// Like [`Worker::trigger_refresh`], but the next cycle rebuilds even if
    /// the content hash is unchanged.
    pub fn force_refresh(&self) {
        self.inner.trigger(true);
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.lock().snapshot.clone()
    }

    /// Snapshot and error notifications. All clones share one queue.
    pub fn messages(&self) -> Receiver<WorkerMessage> {
        self.inner.backlog.clone()
    }

    /// Disconnects once the worker stops. Nothing is ever sent on it.
    pub fn done(&self) -> Receiver<()> {
        self.inner.done.clone()
    }

    pub fn reset_hash(&self) {
        self.inner.lock().last_hash = None;
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    pub fn last_hash(&self) -> Option<ContentHash> {
        self.inner.lock().last_hash.clone()
    }

    pub fn last_error(&self) -> Option<Arc<WorkerError>> {
        self.inner.lock().last_error.clone()
    }

    /// Time spent in the cycle currently running.
    pub fn processing_duration(&self) -> Option<Duration> {
        let shared = self.inner.lock();
        match shared.state {
            WorkerState::Processing => shared.processing_since.map(|since| since.elapsed()),
            _ => None,
        }
    }

    pub fn health(&self) -> Health {
        self.inner.health()
    }

    pub fn metrics(&self) -> Metrics {
        self.inner.metrics()
    }

    /// Restarts the loop after a stall. Returns false for a worker that was
    /// never started. Once the recovery budget is spent, or the file watch
    /// cannot be re-registered, the worker is stopped and false is returned.
    pub fn attempt_recovery(&self, reason: &str) -> bool {
        self.inner.attempt_recovery(reason)
    }

    #[cfg(test)]
    fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watcher(&self) -> MutexGuard<'_, Option<FileWatcher>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>) -> Result<(), StartError> {
        let (shutdown, generation) = {
            let mut shared = self.lock();
            if shared.state == WorkerState::Stopped {
                return Err(StartError::Stopped);
            }
            if shared.started {
                return Ok(());
            }
            shared.started = true;
            shared.uptime_since = Some(Utc::now());
            shared.last_heartbeat = Some(Instant::now());
            let (tx, rx) = bounded(0);
            shared.shutdown = Some(tx);
            (rx, shared.generation)
        };
        self.idle_gc.touch();

        let watch_result = self.watcher().as_mut().map(FileWatcher::watch);
        let watching = match watch_result {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                let mut shared = self.lock();
                shared.started = false;
                shared.shutdown = None;
                return Err(StartError::Watch(err));
            }
            None => false,
        };

        if let Err(err) = self.launch(generation, &shutdown) {
            self.stop();
            return Err(err);
        }
        info!(
            event = "worker_start",
            path = %self.config.path.display(),
            watching
        );
        Ok(())
    }

    fn launch(
        self: &Arc<Self>,
        generation: u64,
        shutdown: &Receiver<()>,
    ) -> Result<(), StartError> {
        let handle = self
            .spawn_loop(generation)
            .map_err(|source| StartError::Spawn {
                thread: "loop",
                source,
            })?;
        {
            let mut shared = self.lock();
            if shared.generation == generation {
                shared.loop_handle = Some(handle);
            }
        }

        let inner = Arc::clone(self);
        let watchdog_shutdown = shutdown.clone();
        thread::Builder::new()
            .name("beads-dash-watchdog".to_string())
            .spawn(move || inner.run_watchdog(watchdog_shutdown))
            .map_err(|source| StartError::Spawn {
                thread: "watchdog",
                source,
            })?;

        if self.config.idle_gc.enabled {
            let inner = Arc::clone(self);
            let gc_shutdown = shutdown.clone();
            thread::Builder::new()
                .name("beads-dash-idle-gc".to_string())
                .spawn(move || inner.run_idle_gc(gc_shutdown))
                .map_err(|source| StartError::Spawn {
                    thread: "idle gc",
                    source,
                })?;
        }
        Ok(())
    }

    fn stop(&self) {
        let (loop_handle, channels, recoveries) = {
            let mut shared = self.lock();
            if shared.state == WorkerState::Stopped {
                return;
            }
            shared.state = WorkerState::Stopped;
            shared.generation += 1;
            shared.dirty = false;
            shared.force_next = false;
            shared.processing_since = None;
            let channels = (
                shared.messages.take(),
                shared.done.take(),
                shared.shutdown.take(),
            );
            (shared.loop_handle.take(), channels, shared.recovery_count)
        };
        drop(channels);

        if let Some(handle) = loop_handle {
            if !handle.shutdown(STOP_WAIT) {
                warn!(event = "shutdown_timeout", wait_ms = STOP_WAIT.as_millis() as u64);
            }
        }
        if let Some(watcher) = self.watcher().as_mut() {
            watcher.unwatch();
        }
        info!(event = "worker_stop", recoveries);
    }

    fn trigger(self: &Arc<Self>, force: bool) {
        self.idle_gc.touch();
        let generation = {
            let mut shared = self.lock();
            if shared.state == WorkerState::Stopped {
                return;
            }
            if force {
                shared.force_next = true;
            }
            if shared.state == WorkerState::Processing {
                shared.dirty = true;
                shared.coalesce_count += 1;
                debug!(event = "coalesce", force, coalesced = shared.coalesce_count);
                return;
            }
            shared.state = WorkerState::Processing;
            shared.processing_since = Some(Instant::now());
            shared.generation
        };

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("beads-dash-cycle".to_string())
            .spawn(move || inner.run_cycles(generation));
        if let Err(err) = spawned {
            self.fail(generation, Phase::Load, WorkerFault::Spawn(err), Instant::now());
            let mut shared = self.lock();
            if shared.generation == generation && shared.state == WorkerState::Processing {
                shared.state = WorkerState::Idle;
                shared.processing_since = None;
                shared.dirty = false;
            }
        }
    }

    /// Runs cycles until no trigger arrived during the last one.
    fn run_cycles(self: Arc<Self>, generation: u64) {
        loop {
            self.run_cycle(generation);

            let mut shared = self.lock();
            if shared.generation != generation || shared.state != WorkerState::Processing {
                return;
            }
            if shared.dirty {
                shared.dirty = false;
                shared.processing_since = Some(Instant::now());
                continue;
            }
            shared.state = WorkerState::Idle;
            shared.processing_since = None;
            drop(shared);
            self.idle_gc.touch();
            return;
        }
    }

    fn run_cycle(&self, generation: u64) {
        let started = Instant::now();
        let cycle = {
            let mut shared = self.lock();
            shared.processing_count += 1;
            shared.processing_count
        };
        info!(event = "process_start", cycle, generation);

        let path = self.config.path.as_path();
        let hint = match guarded(|| self.loader.size_hint(path)) {
            Ok(Ok(hint)) => hint,
            Ok(Err(err)) => {
                debug!(event = "load_warning", phase = %Phase::SizeHint, error = %err);
                0
            }
            Err(fault) => {
                warn!(event = "load_warning", phase = %Phase::SizeHint, error = %fault);
                0
            }
        };

        let tiers = &self.config.tiers;
        let tier = tiers.classify(hint);
        let retain_open: &dyn Fn(&Issue) -> bool = &|issue: &Issue| tiers.retains(issue);
        let log_warning: &dyn Fn(&LoadWarning) = &|warning: &LoadWarning| {
            warn!(event = "load_warning", line = warning.line, detail = %warning.message);
        };
        let options = LoadOptions {
            max_record_bytes: self.config.max_record_bytes,
            retain: (tier == DatasetTier::Huge).then_some(retain_open),
            on_warning: Some(log_warning),
            buffer: self.pool.take(),
        };

        let loaded = match guarded(|| self.loader.load(path, options)) {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(err)) => return self.fail(generation, Phase::Load, err.into(), started),
            Err(fault) => return self.fail(generation, Phase::Load, fault, started),
        };
        let issues = loaded.issues;
        let warning_count = loaded.warnings.len();

        let hash = match guarded(|| ContentHash::of(&issues)) {
            Ok(hash) => hash,
            Err(fault) => {
                self.pool.recycle(issues);
                return self.fail(generation, Phase::Hash, fault, started);
            }
        };

        {
            let mut shared = self.lock();
            if shared.generation != generation {
                drop(shared);
                debug!(event = "stale_cycle", generation);
                self.pool.recycle(issues);
                return;
            }
            let forced = std::mem::take(&mut shared.force_next);
            if !forced && shared.last_hash.as_ref() == Some(&hash) {
                shared.last_error = None;
                shared.pending_file_change = None;
                shared.last_processing_duration = started.elapsed();
                let held = shared.retired.take();
                drop(shared);
                info!(
                    event = "snapshot_deduped",
                    hash = %hash.prefix(),
                    issues = issues.len()
                );
                self.pool.recycle(issues);
                self.retire([held, None]);
                return;
            }
        }

        let outcome = tiers.outcome(tier, hint, issues.len());
        let mut snapshot =
            match guarded(move || Snapshot::build(issues, hash, outcome, warning_count)) {
                Ok(snapshot) => snapshot,
                Err(fault) => return self.fail(generation, Phase::Analyze, fault, started),
            };

        let (retired, held, version, hash, issue_count, size_bytes) = {
            let mut shared = self.lock();
            if shared.generation != generation || shared.state == WorkerState::Stopped {
                drop(shared);
                debug!(event = "stale_cycle", generation);
                self.pool.recycle(snapshot.into_issues());
                return;
            }
            shared.version += 1;
            snapshot.version = shared.version;
            let hash = snapshot.hash.clone();
            let issue_count = snapshot.len();
            let size_bytes = snapshot.size_bytes;
            let snapshot = Arc::new(snapshot);
            let retired = shared.snapshot.replace(Arc::clone(&snapshot));
            let held = shared.retired.take();

            let now = Utc::now();
            shared.last_hash = Some(hash.clone());
            shared.last_error = None;
            shared.last_snapshot_ready_at = Some(now);
            shared.snapshot_size_bytes = size_bytes;
            shared.last_processing_duration = started.elapsed();
            let file_change_at = shared.pending_file_change.take();
            let version = shared.version;
            shared.send(
                &self.backlog,
                WorkerMessage::SnapshotReady {
                    snapshot,
                    sent_at: now,
                    file_change_at,
                    version,
                },
            );
            (retired, held, version, hash, issue_count, size_bytes)
        };

        info!(
            event = "snapshot_ready",
            version,
            issues = issue_count,
            tier = %tier,
            hash = %hash.prefix(),
            size_bytes,
            duration_ms = started.elapsed().as_millis() as u64
        );
        self.retire([held, retired]);
    }

    /// Returns replaced snapshots to the pool once no reader holds them.
    /// A snapshot still in use is kept and retried on the next cycle.
    fn retire(&self, snapshots: [Option<Arc<Snapshot>>; 2]) {
        let mut in_use = None;
        for snapshot in snapshots.into_iter().flatten() {
            match Arc::try_unwrap(snapshot) {
                Ok(snapshot) => self.pool.recycle(snapshot.into_issues()),
                Err(snapshot) => in_use = Some(snapshot),
            }
        }
        if let Some(snapshot) = in_use {
            let mut shared = self.lock();
            if shared.state != WorkerState::Stopped {
                shared.retired.get_or_insert(snapshot);
            }
        }
    }

    fn fail(&self, generation: u64, phase: Phase, cause: WorkerFault, started: Instant) {
        let recoverable = cause.is_recoverable();
        let error = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return;
            }
            let error = Arc::new(WorkerError::new(phase, cause, shared.recovery_count));
            shared.last_error = Some(Arc::clone(&error));
            shared.last_processing_duration = started.elapsed();
            shared.send(
                &self.backlog,
                WorkerMessage::SnapshotError {
                    error: Arc::clone(&error),
                    recoverable,
                },
            );
            error
        };
        let event = match phase {
            Phase::Analyze | Phase::Hash => "snapshot_analyze_failed",
            _ => "snapshot_load_failed",
        };
        warn!(event = event, phase = %phase, recoverable, error = %error.cause);
    }

    fn spawn_loop(self: &Arc<Self>, generation: u64) -> io::Result<LoopHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let events = self.watcher().as_ref().map(FileWatcher::events);
        let inner = Arc::clone(self);
        thread::Builder::new()
            .name("beads-dash-loop".to_string())
            .spawn(move || {
                inner.run_loop(generation, stop_rx, events);
                drop(exit_tx);
            })?;
        Ok(LoopHandle {
            stop: stop_tx,
            exited: exit_rx,
        })
    }

    fn run_loop(
        self: &Arc<Self>,
        generation: u64,
        stop: Receiver<()>,
        events: Option<Receiver<()>>,
    ) {
        let heartbeat = tick(self.config.heartbeat_interval);
        let mut events = events.unwrap_or_else(never);
        let mut debounce: Option<Receiver<Instant>> = None;

        while self.beat(generation) {
            let deadline = debounce.clone().unwrap_or_else(never);
            let mut events_closed = false;
            select! {
                recv(stop) -> _ => break,
                recv(heartbeat) -> _ => {}
                recv(events) -> event => match event {
                    Ok(()) => {
                        self.note_file_change();
                        if debounce.is_none() {
                            debounce = Some(after(self.config.debounce_delay));
                        }
                    }
                    Err(_) => events_closed = true,
                },
                recv(deadline) -> _ => {
                    debounce = None;
                    self.trigger(false);
                }
            }
            if events_closed {
                events = never();
            }
        }
    }

    /// Stamps the heartbeat. False once this loop's generation is retired.
    fn beat(&self, generation: u64) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation || shared.state == WorkerState::Stopped {
            return false;
        }
        shared.last_heartbeat = Some(Instant::now());
        true
    }

    fn note_file_change(&self) {
        let now = Utc::now();
        let mut shared = self.lock();
        shared.last_file_change_at = Some(now);
        let first = shared.pending_file_change.is_none();
        shared.pending_file_change.get_or_insert(now);
        drop(shared);
        debug!(event = "file_change", first);
    }

    fn run_watchdog(self: Arc<Self>, shutdown: Receiver<()>) {
        let ticker = tick(self.config.watchdog_interval);
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => self.check_health(),
            }
        }
    }

    fn run_idle_gc(self: Arc<Self>, shutdown: Receiver<()>) {
        let ticker = tick(self.config.idle_gc.check_every);
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => {
                    // Held across the pass so no trigger can start a cycle meanwhile.
                    let shared = self.lock();
                    self.idle_gc.maybe_run(shared.state == WorkerState::Idle);
                    drop(shared);
                }
            }
        }
    }

    fn check_health(self: &Arc<Self>) {
        let reason = {
            let shared = self.lock();
            if !shared.started || shared.state == WorkerState::Stopped || shared.recovering {
                return;
            }
            health::stall_reason(
                shared.state,
                shared.processing_since,
                shared.last_heartbeat,
                self.config.processing_timeout,
                self.config.heartbeat_timeout,
                Instant::now(),
            )
        };
        if let Some(reason) = reason {
            self.attempt_recovery(&reason);
        }
    }

    fn attempt_recovery(self: &Arc<Self>, reason: &str) -> bool {
        let (previous_loop, attempt, generation) = {
            let mut shared = self.lock();
            if !shared.started || shared.state == WorkerState::Stopped || shared.recovering {
                return false;
            }
            shared.recovering = true;
            shared.recovery_count += 1;
            shared.generation += 1;
            shared.state = WorkerState::Idle;
            shared.dirty = false;
            shared.processing_since = None;
            (shared.loop_handle.take(), shared.recovery_count, shared.generation)
        };
        let max = self.config.max_recoveries;

        if attempt > max {
            error!(event = "recovery_exhausted", reason, attempts = attempt, max);
            self.abandon(WorkerFault::Stalled(reason.to_string()), attempt, previous_loop);
            return false;
        }

        warn!(event = "recovery_attempt", reason, attempt, max);
        if let Some(handle) = previous_loop {
            if !handle.shutdown(RECOVERY_WAIT) {
                warn!(
                    event = "shutdown_timeout",
                    wait_ms = RECOVERY_WAIT.as_millis() as u64,
                    during = "recovery"
                );
            }
        }
        let rewatched = self.watcher().as_mut().map(FileWatcher::rewatch);
        if let Some(Err(err)) = rewatched {
            error!(event = "recovery_failed", reason, attempt, error = %err, "rewatch failed");
            self.abandon(WorkerFault::Watch(err), attempt, None);
            return false;
        }
        let new_loop = match self.spawn_loop(generation) {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(event = "recovery_attempt", error = %err, "loop restart failed");
                None
            }
        };

        {
            let mut shared = self.lock();
            shared.recovering = false;
            if shared.state == WorkerState::Stopped || shared.generation != generation {
                return false;
            }
            shared.loop_handle = new_loop;
            shared.last_heartbeat = Some(Instant::now());
            let error = Arc::new(WorkerError::new(
                Phase::Watchdog,
                WorkerFault::Stalled(reason.to_string()),
                attempt,
            ));
            shared.last_error = Some(Arc::clone(&error));
            shared.send(
                &self.backlog,
                WorkerMessage::SnapshotError {
                    error,
                    recoverable: true,
                },
            );
        }
        self.trigger(true);
        true
    }

    /// Reports an unrecoverable watchdog failure and stops the worker.
    fn abandon(&self, cause: WorkerFault, attempt: u32, previous_loop: Option<LoopHandle>) {
        {
            let mut shared = self.lock();
            let error = Arc::new(WorkerError::new(Phase::Watchdog, cause, attempt));
            shared.last_error = Some(Arc::clone(&error));
            shared.send(
                &self.backlog,
                WorkerMessage::SnapshotError {
                    error,
                    recoverable: false,
                },
            );
            if previous_loop.is_some() {
                shared.loop_handle = previous_loop;
            }
            shared.recovering = false;
        }
        self.stop();
    }

    fn health(&self) -> Health {
        let gc = self.idle_gc.stats();
        let shared = self.lock();
        Health {
            started: shared.started,
            alive: health::is_alive(
                shared.started,
                shared.state,
                shared.last_heartbeat,
                self.config.heartbeat_timeout,
                Instant::now(),
            ),
            last_heartbeat: shared.last_heartbeat,
            recovery_count: shared.recovery_count,
            uptime_since: shared.uptime_since,
            idle_gc_enabled: gc.enabled,
            idle_gc_count: gc.count,
            idle_gc_total: gc.total,
            idle_gc_last_duration: gc.last_duration,
            idle_gc_last_at: gc.last_at,
        }
    }

    fn metrics(&self) -> Metrics {
        let pool = self.pool.stats();
        let shared = self.lock();
        Metrics {
            processing_count: shared.processing_count,
            snapshot_version: shared.version,
            last_snapshot_ready_at: shared.last_snapshot_ready_at,
            snapshot_size_bytes: shared.snapshot_size_bytes,
            last_processing_duration: shared.last_processing_duration,
            coalesce_count: shared.coalesce_count,
            queue_depth: self.backlog.len(),
            pool_hits: pool.hits,
            pool_misses: pool.misses,
            last_file_change_at: shared.last_file_change_at,
        }
    }
}

/// Runs one pipeline phase, turning a panic into a fault.
fn guarded<T>(phase: impl FnOnce() -> T) -> Result<T, WorkerFault> {
    panic::catch_unwind(AssertUnwindSafe(phase))
        .map_err(|payload| WorkerFault::Panic(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
