use super::WorkerState;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Liveness view of the worker. Reading it never waits on a refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Health {
    pub started: bool,
    pub alive: bool,
    pub last_heartbeat: Option<Instant>,
    pub recovery_count: u32,
    pub uptime_since: Option<DateTime<Utc>>,
    pub idle_gc_enabled: bool,
    pub idle_gc_count: u64,
    pub idle_gc_total: Duration,
    pub idle_gc_last_duration: Duration,
    pub idle_gc_last_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metrics {
    pub processing_count: u64,
    pub snapshot_version: u64,
    pub last_snapshot_ready_at: Option<DateTime<Utc>>,
    pub snapshot_size_bytes: usize,
    pub last_processing_duration: Duration,
    pub coalesce_count: u64,
    pub queue_depth: usize,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub last_file_change_at: Option<DateTime<Utc>>,
}

pub(crate) fn is_alive(
    started: bool,
    state: WorkerState,
    last_heartbeat: Option<Instant>,
    timeout: Duration,
    now: Instant,
) -> bool {
    if !started || state == WorkerState::Stopped {
        return false;
    }
    last_heartbeat.is_some_and(|beat| now.saturating_duration_since(beat) <= timeout)
}

/// Watchdog verdict: why the worker looks stuck, if it does.
pub(crate) fn stall_reason(
    state: WorkerState,
    processing_since: Option<Instant>,
    last_heartbeat: Option<Instant>,
    processing_timeout: Duration,
    heartbeat_timeout: Duration,
    now: Instant,
) -> Option<String> {
    if state == WorkerState::Processing {
        if let Some(since) = processing_since {
            let busy = now.saturating_duration_since(since);
            if busy > processing_timeout {
                return Some(format!(
                    "processing exceeded {}ms (running {}ms)",
                    processing_timeout.as_millis(),
                    busy.as_millis()
                ));
            }
        }
    }
    let beat = last_heartbeat?;
    let silent = now.saturating_duration_since(beat);
    (silent > heartbeat_timeout).then(|| {
        format!(
            "missed heartbeat for {}ms (timeout {}ms)",
            silent.as_millis(),
            heartbeat_timeout.as_millis()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn alive_requires_recent_heartbeat() {
        let now = Instant::now();
        let later = now + 10 * SEC;
        assert!(is_alive(true, WorkerState::Idle, Some(now), 30 * SEC, later));
        assert!(!is_alive(true, WorkerState::Idle, Some(now), 5 * SEC, later));
        assert!(!is_alive(false, WorkerState::Idle, Some(now), 30 * SEC, later));
        assert!(!is_alive(true, WorkerState::Stopped, Some(now), 30 * SEC, later));
        assert!(!is_alive(true, WorkerState::Idle, None, 30 * SEC, later));
    }

    #[test]
    fn long_cycle_is_reported_before_heartbeat() {
        let start = Instant::now();
        let now = start + 40 * SEC;
        let reason = stall_reason(
            WorkerState::Processing,
            Some(start),
            Some(start),
            30 * SEC,
            30 * SEC,
            now,
        )
        .expect("stalled");
        assert!(reason.starts_with("processing exceeded"));
    }

    #[test]
    fn missed_heartbeat_is_reported_when_idle() {
        let start = Instant::now();
        let stall = |beat, now| stall_reason(WorkerState::Idle, None, beat, 30 * SEC, 5 * SEC, now);
        let reason = stall(Some(start), start + 6 * SEC).expect("stalled");
        assert!(reason.starts_with("missed heartbeat"));
        assert!(stall(Some(start), start + SEC).is_none());
        assert!(stall(None, start).is_none());
    }
}
