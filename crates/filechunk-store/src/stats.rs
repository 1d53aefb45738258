//! Per-store operation statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of one chunk store
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Successful puts
    puts: AtomicU64,
    /// Successful gets
    gets: AtomicU64,
    /// Chunk bytes written
    bytes_written: AtomicU64,
    /// Chunk bytes returned to readers
    bytes_read: AtomicU64,
    /// Failed puts
    put_errors: AtomicU64,
    /// Failed gets
    get_errors: AtomicU64,
    /// Total put latency (microseconds)
    put_latency_sum: AtomicU64,
    /// Total get latency (microseconds)
    get_latency_sum: AtomicU64,
}

impl StoreStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed put
    pub fn record_put(&self, bytes: u64, latency_us: u64) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.put_latency_sum.fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record a completed get
    pub fn record_get(&self, bytes: u64, latency_us: u64) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.get_latency_sum.fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn record_put_error(&self) {
        self.put_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_error(&self) {
        self.get_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        let puts = self.puts.load(Ordering::Relaxed);
        let gets = self.gets.load(Ordering::Relaxed);
        StoreStatsSnapshot {
            puts,
            gets,
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            put_errors: self.put_errors.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            avg_put_latency_us: average(self.put_latency_sum.load(Ordering::Relaxed), puts),
            avg_get_latency_us: average(self.get_latency_sum.load(Ordering::Relaxed), gets),
        }
    }
}

fn average(sum: u64, count: u64) -> u64 {
    if count == 0 { 0 } else { sum / count }
}

/// Point-in-time copy of [`StoreStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    pub puts: u64,
    pub gets: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub put_errors: u64,
    pub get_errors: u64,
    pub avg_put_latency_us: u64,
    pub avg_get_latency_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = StoreStats::new();
        stats.record_put(10, 100);
        stats.record_put(5, 300);
        stats.record_get(3, 50);
        stats.record_get_error();

        let snap = stats.snapshot();
        assert_eq!(snap.puts, 2);
        assert_eq!(snap.bytes_written, 15);
        assert_eq!(snap.avg_put_latency_us, 200);
        assert_eq!(snap.gets, 1);
        assert_eq!(snap.bytes_read, 3);
        assert_eq!(snap.get_errors, 1);
        assert_eq!(snap.put_errors, 0);
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(StoreStats::new().snapshot(), StoreStatsSnapshot::default());
    }
}
