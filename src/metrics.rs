//! Lightweight global metrics for HeapLens.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Capture (writer)
//! - Restore (reader)
//! - Post-restore stack scan

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Capture -----
static CAPTURES_TOTAL: AtomicU64 = AtomicU64::new(0);
static CAPTURE_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Restore -----
static RESTORES_TOTAL: AtomicU64 = AtomicU64::new(0);
static RESTORE_BYTES_READ: AtomicU64 = AtomicU64::new(0);
static THREADS_RESTORED: AtomicU64 = AtomicU64::new(0);

// ----- Stack scan -----
static STACK_WORDS_SCANNED: AtomicU64 = AtomicU64::new(0);
static STACK_WORDS_DANGLING: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub captures_total: u64,
    pub capture_bytes_written: u64,

    pub restores_total: u64,
    pub restore_bytes_read: u64,
    pub threads_restored: u64,

    pub stack_words_scanned: u64,
    pub stack_words_dangling: u64,
}

impl MetricsSnapshot {
    pub fn dangling_ratio(&self) -> f64 {
        if self.stack_words_scanned == 0 {
            0.0
        } else {
            self.stack_words_dangling as f64 / self.stack_words_scanned as f64
        }
    }
}

// ----- Recorders (Capture) -----
pub fn record_capture(bytes: u64) {
    CAPTURES_TOTAL.fetch_add(1, Ordering::Relaxed);
    CAPTURE_BYTES_WRITTEN.fetch_add(bytes, Ordering::Relaxed);
}

// ----- Recorders (Restore) -----
pub fn record_restore(bytes: u64, nthreads: u64) {
    RESTORES_TOTAL.fetch_add(1, Ordering::Relaxed);
    RESTORE_BYTES_READ.fetch_add(bytes, Ordering::Relaxed);
    THREADS_RESTORED.fetch_add(nthreads, Ordering::Relaxed);
}

// ----- Recorders (Stack scan) -----
pub fn record_stack_scan(words: u64, dangling: u64) {
    STACK_WORDS_SCANNED.fetch_add(words, Ordering::Relaxed);
    STACK_WORDS_DANGLING.fetch_add(dangling, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        captures_total: CAPTURES_TOTAL.load(Ordering::Relaxed),
        capture_bytes_written: CAPTURE_BYTES_WRITTEN.load(Ordering::Relaxed),

        restores_total: RESTORES_TOTAL.load(Ordering::Relaxed),
        restore_bytes_read: RESTORE_BYTES_READ.load(Ordering::Relaxed),
        threads_restored: THREADS_RESTORED.load(Ordering::Relaxed),

        stack_words_scanned: STACK_WORDS_SCANNED.load(Ordering::Relaxed),
        stack_words_dangling: STACK_WORDS_DANGLING.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    CAPTURES_TOTAL.store(0, Ordering::Relaxed);
    CAPTURE_BYTES_WRITTEN.store(0, Ordering::Relaxed);

    RESTORES_TOTAL.store(0, Ordering::Relaxed);
    RESTORE_BYTES_READ.store(0, Ordering::Relaxed);
    THREADS_RESTORED.store(0, Ordering::Relaxed);

    STACK_WORDS_SCANNED.store(0, Ordering::Relaxed);
    STACK_WORDS_DANGLING.store(0, Ordering::Relaxed);
}
