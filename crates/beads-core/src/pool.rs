use crate::Issue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

const DEFAULT_MAX_POOLED: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub pooled: usize,
}

/// Reusable issue buffers.
///
/// A buffer handed back through [`IssuePool::recycle`] must no longer be
/// reachable from any published snapshot.
#[derive(Debug)]
pub struct IssuePool {
    buffers: Mutex<Vec<Vec<Issue>>>,
    max_pooled: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for IssuePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED)
    }
}

impl IssuePool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_pooled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn take(&self) -> Vec<Issue> {
        let pooled = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(buffer) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Vec::new()
            }
        }
    }

    pub fn recycle(&self, mut buffer: Vec<Issue>) {
        if buffer.capacity() == 0 {
            return;
        }
        buffer.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }

    /// Drops pooled buffers until at most `percent` of them remain.
    /// Returns how many buffers were released.
    pub fn shrink_to_percent(&self, percent: u8) -> usize {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = buffers.len() * usize::from(percent.min(100)) / 100;
        let released = buffers.len() - keep;
        buffers.truncate(keep);
        buffers.shrink_to_fit();
        released
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pooled: self
                .buffers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IssueStatus;

    #[test]
    fn recycled_buffer_is_reused_empty() {
        let pool = IssuePool::default();
        let mut buffer = pool.take();
        buffer.push(Issue::new("bd-1", "one", IssueStatus::Open));
        let capacity = buffer.capacity();
        pool.recycle(buffer);

        let reused = pool.take();
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), capacity);
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn pool_is_bounded() {
        let pool = IssuePool::new(2);
        for _ in 0..5 {
            pool.recycle(Vec::with_capacity(8));
        }
        assert_eq!(pool.stats().pooled, 2);
    }

    #[test]
    fn shrink_keeps_requested_share() {
        let pool = IssuePool::new(8);
        for _ in 0..4 {
            pool.recycle(Vec::with_capacity(8));
        }
        assert_eq!(pool.shrink_to_percent(50), 2);
        assert_eq!(pool.stats().pooled, 2);
        assert_eq!(pool.shrink_to_percent(0), 2);
        assert_eq!(pool.stats().pooled, 0);
    }
}
