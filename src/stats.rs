//! Write-amplification and reclaim statistics.

use core::sync::atomic::{AtomicU64, Ordering};
use lazy_static::lazy_static;

/// Write-amplification statistics: sectors written by foreground requests
/// versus sectors written by the copy engine during reclaim.
pub struct Stats {
    user_written_sectors: AtomicU64,
    gc_written_sectors: AtomicU64,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            user_written_sectors: AtomicU64::new(0),
            gc_written_sectors: AtomicU64::new(0),
        }
    }

    pub fn add_user_written(&self, sectors: u64) {
        self.user_written_sectors.fetch_add(sectors, Ordering::Relaxed);
    }

    pub fn add_gc_written(&self, sectors: u64) {
        self.gc_written_sectors.fetch_add(sectors, Ordering::Relaxed);
    }

    pub fn user_written_sectors(&self) -> u64 {
        self.user_written_sectors.load(Ordering::Relaxed)
    }

    pub fn gc_written_sectors(&self) -> u64 {
        self.gc_written_sectors.load(Ordering::Relaxed)
    }

    /// Write amplification factor: total sectors written to media divided by
    /// sectors requested by the user. 0.0 if nothing has been written yet.
    pub fn write_amplification(&self) -> f64 {
        let user = self.user_written_sectors() as f64;
        if user == 0.0 {
            return 0.0;
        }
        let gc = self.gc_written_sectors() as f64;
        (user + gc) / user
    }

    pub fn reset(&self) {
        self.user_written_sectors.store(0, Ordering::Relaxed);
        self.gc_written_sectors.store(0, Ordering::Relaxed);
    }

    pub fn trace(&self) {
        log::debug!(
            "reclaim trace: user_written={} gc_written={} waf={:.3}",
            self.user_written_sectors(),
            self.gc_written_sectors(),
            self.write_amplification()
        );
    }
}

lazy_static! {
    pub static ref STATS: Stats = Stats::new();
}

/// How often the reclaim loop emits a write-amplification trace, in ticks.
pub const WA_TRACE_PERIOD: u64 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waf_is_zero_before_any_write() {
        let stats = Stats::new();
        assert_eq!(stats.write_amplification(), 0.0);
    }

    #[test]
    fn waf_reflects_gc_overhead() {
        let stats = Stats::new();
        stats.add_user_written(100);
        stats.add_gc_written(50);
        assert!((stats.write_amplification() - 1.5).abs() < 1e-9);
    }
}
