use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

// UI state is touched on every event, anything above these is a stuck holder
const READ_WARNING: Duration = Duration::from_millis(500);
const WRITE_WARNING: Duration = Duration::from_secs(1);

/// Tokio RwLock that reports slow or contended acquisitions
#[derive(Debug, Default)]
pub struct CustomRwLock<T> {
    name: String,
    lock: RwLock<T>,
    write_locked: AtomicBool,
    read_waiting_count: AtomicUsize,
}

impl<T> CustomRwLock<T> {
    pub fn new(name: &str, data: T) -> Self {
        Self {
            name: name.to_string(),
            lock: RwLock::new(data),
            write_locked: AtomicBool::new(false),
            read_waiting_count: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        let start = Instant::now();
        let contended = self.write_locked.load(Ordering::SeqCst);
        if contended {
            self.read_waiting_count.fetch_add(1, Ordering::SeqCst);
            debug!(
                "Read lock '{}' is waiting for a write lock to be released",
                self.name
            );
        }
        let guard = self.lock.read().await;
        if contended {
            self.read_waiting_count.fetch_sub(1, Ordering::SeqCst);
        }
        let duration = start.elapsed();
        if duration > READ_WARNING {
            warn!(
                "Read lock '{}' took too long to acquire: {:?}",
                self.name, duration
            );
        }
        guard
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, T> {
        let start = Instant::now();
        if self.write_locked.load(Ordering::SeqCst) {
            debug!(
                "Attempted to acquire write lock for '{}' while another write lock is pending",
                self.name
            );
        }
        self.write_locked.store(true, Ordering::SeqCst);
        let guard = self.lock.write().await;
        self.write_locked.store(false, Ordering::SeqCst);
        let duration = start.elapsed();
        if duration > WRITE_WARNING {
            error!(
                "Write lock '{}' took too long to acquire: {:?} - backtrace:\n{}",
                self.name,
                duration,
                Backtrace::force_capture()
            );
        }
        guard
    }

    pub fn read_waiting(&self) -> usize {
        self.read_waiting_count.load(Ordering::SeqCst)
    }
}
