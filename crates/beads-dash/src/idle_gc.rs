use crate::config::IdleGcConfig;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

pub type ReclaimFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdleGcStats {
    pub enabled: bool,
    pub count: u64,
    pub total: Duration,
    pub last_duration: Duration,
    pub last_at: Option<DateTime<Utc>>,
}

struct IdleGcState {
    last_activity: Instant,
    last_run: Option<Instant>,
    count: u64,
    total: Duration,
    last_duration: Duration,
    last_at: Option<DateTime<Utc>>,
}

/// Runs a reclamation action once the worker has been quiet for a while.
pub struct IdleGc {
    config: IdleGcConfig,
    reclaim: ReclaimFn,
    state: Mutex<IdleGcState>,
}

impl IdleGc {
    pub fn new(config: IdleGcConfig, reclaim: ReclaimFn) -> Self {
        Self {
            config,
            reclaim,
            state: Mutex::new(IdleGcState {
                last_activity: Instant::now(),
                last_run: None,
                count: 0,
                total: Duration::ZERO,
                last_duration: Duration::ZERO,
                last_at: None,
            }),
        }
    }

    /// Records worker activity, restarting the idle clock.
    pub fn touch(&self) {
        self.lock().last_activity = Instant::now();
    }

    /// Runs the reclamation action when every gate passes. Returns whether it ran.
    pub fn maybe_run(&self, worker_idle: bool) -> bool {
        if !self.config.enabled || !worker_idle {
            return false;
        }
        let idle_for = {
            let mut state = self.lock();
            let idle_for = state.last_activity.elapsed();
            if idle_for < self.config.idle_threshold {
                return false;
            }
            if let Some(last_run) = state.last_run {
                if last_run.elapsed() < self.config.min_interval {
                    return false;
                }
            }
            state.last_run = Some(Instant::now());
            idle_for
        };

        let started = Instant::now();
        (self.reclaim)();
        let elapsed = started.elapsed();

        let mut state = self.lock();
        state.count += 1;
        state.total += elapsed;
        state.last_duration = elapsed;
        state.last_at = Some(Utc::now());
        debug!(
            event = "idle_gc",
            count = state.count,
            idle_ms = idle_for.as_millis() as u64,
            duration_us = elapsed.as_micros() as u64
        );
        true
    }

    pub fn stats(&self) -> IdleGcStats {
        let state = self.lock();
        IdleGcStats {
            enabled: self.config.enabled,
            count: state.count,
            total: state.total,
            last_duration: state.last_duration,
            last_at: state.last_at,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdleGcState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting(config: IdleGcConfig) -> (IdleGc, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let gc = IdleGc::new(
            config,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (gc, runs)
    }

    fn quick() -> IdleGcConfig {
        IdleGcConfig {
            enabled: true,
            idle_threshold: Duration::from_millis(20),
            check_every: Duration::from_millis(5),
            min_interval: Duration::from_secs(60),
            retain_percent: 50,
        }
    }

    #[test]
    fn runs_once_after_idle_then_respects_min_interval() {
        let (gc, runs) = counting(quick());
        assert!(!gc.maybe_run(true), "not idle long enough yet");

        thread::sleep(Duration::from_millis(30));
        assert!(gc.maybe_run(true));
        assert!(!gc.maybe_run(true), "second run inside min interval");

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let stats = gc.stats();
        assert_eq!(stats.count, 1);
        assert!(stats.last_at.is_some());
        assert!(stats.total >= stats.last_duration);
    }

    #[test]
    fn never_runs_while_processing() {
        let (gc, runs) = counting(quick());
        thread::sleep(Duration::from_millis(30));
        assert!(!gc.maybe_run(false));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn activity_resets_the_idle_clock() {
        let (gc, _) = counting(quick());
        thread::sleep(Duration::from_millis(30));
        gc.touch();
        assert!(!gc.maybe_run(true));
    }

    #[test]
    fn disabled_short_circuits() {
        let (gc, runs) = counting(IdleGcConfig {
            enabled: false,
            ..quick()
        });
        thread::sleep(Duration::from_millis(30));
        assert!(!gc.maybe_run(true));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!gc.stats().enabled);
    }
}
