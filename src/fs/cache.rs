//! Write-back block cache.
//!
//! The cache keeps a bounded set of recently used file-system sectors in
//! memory and defers writes to the device. Interface:
//!
//! - [`BlockCache::read`] / [`BlockCache::read_at`] copy a sector (or part
//!   of one) into the caller's buffer, loading it from the device on miss.
//! - [`BlockCache::write`] / [`BlockCache::write_at`] copy the caller's
//!   bytes into the cache and mark the entry dirty, loading on miss.
//! - [`BlockCache::flush`] writes every dirty entry back to the device.
//!
//! Replacement is first-in-first-out: on a miss with a full cache the
//! oldest entry is discarded, after being written back if dirty. Two
//! background workers run while the file system is mounted: a write-behind
//! flusher that wakes every [`FLUSH_INTERVAL_TICKS`] timer ticks and cleans
//! all dirty entries, and a read-ahead worker that loads the successor of
//! every sector that missed on a read. Both stop at shutdown.
//!
//! Callers never hold references into the cache; bytes are copied in and
//! out under the cache lock and the lock is released before returning.

use crate::{
    dev::{Disk, Sector, SECTOR_SIZE},
    sync::SpinLock,
    KernelError,
};
use crossbeam_queue::SegQueue;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Maximum number of cached sectors.
pub const CACHE_SIZE: usize = 64;

/// Period of the write-behind worker, in timer ticks.
pub const FLUSH_INTERVAL_TICKS: u32 = 50;

/// Duration of one timer tick on the host.
pub const TICK: Duration = Duration::from_millis(10);

struct CacheEntry {
    sector: Sector,
    dirty: bool,
    data: [u8; SECTOR_SIZE],
}

/// The write-back sector cache of the file system.
pub struct BlockCache {
    disk: Disk,
    /// Entries ordered newest-first; eviction takes the back.
    entries: SpinLock<VecDeque<CacheEntry>>,
    readahead: SegQueue<Sector>,
    shutdown: AtomicBool,
    workers: SpinLock<Vec<std::thread::JoinHandle<()>>>,
}

impl BlockCache {
    /// Creates a cache over `disk` and starts the background workers.
    pub fn new(disk: Disk) -> Arc<Self> {
        let cache = Arc::new(Self {
            disk,
            entries: SpinLock::new(VecDeque::with_capacity(CACHE_SIZE)),
            readahead: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            workers: SpinLock::new(Vec::new()),
        });
        cache.start_workers();
        cache
    }

    fn start_workers(self: &Arc<Self>) {
        let flusher = {
            let cache = Arc::clone(self);
            std::thread::Builder::new()
                .name("cache_write_behind".into())
                .spawn(move || cache.write_behind_loop())
                .expect("failed to spawn write-behind worker")
        };
        let reader = {
            let cache = Arc::clone(self);
            std::thread::Builder::new()
                .name("cache_read_ahead".into())
                .spawn(move || cache.read_ahead_loop())
                .expect("failed to spawn read-ahead worker")
        };
        let mut guard = self.workers.lock();
        guard.push(flusher);
        guard.push(reader);
        guard.unlock();
    }

    /// Runs `f` on the cache entry for `sector`, loading it on miss.
    ///
    /// Returns whether the access missed along with `f`'s result. When the
    /// cache is full the oldest entry is evicted first, written back if
    /// dirty.
    fn with_entry<R>(
        &self,
        sector: Sector,
        f: impl FnOnce(&mut CacheEntry) -> R,
    ) -> Result<(bool, R), KernelError> {
        let mut guard = self.entries.lock();
        if let Some(entry) = guard.iter_mut().find(|e| e.sector == sector) {
            let r = f(entry);
            guard.unlock();
            return Ok((false, r));
        }

        if guard.len() >= CACHE_SIZE {
            // FIFO victim.
            let victim = guard.pop_back().unwrap();
            if victim.dirty {
                if let Err(e) = self.disk.write(victim.sector, &victim.data) {
                    guard.unlock();
                    return Err(e);
                }
            }
        }

        let mut entry = CacheEntry {
            sector,
            dirty: false,
            data: [0; SECTOR_SIZE],
        };
        if let Err(e) = self.disk.read(sector, &mut entry.data) {
            guard.unlock();
            return Err(e);
        }
        let r = f(&mut entry);
        guard.push_front(entry);
        guard.unlock();
        Ok((true, r))
    }

    /// Copies `buf.len()` bytes out of `sector` starting at `offset`.
    pub fn read_at(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        let (missed, ()) = self.with_entry(sector, |entry| {
            buf.copy_from_slice(&entry.data[offset..offset + buf.len()]);
        })?;
        if missed && (sector.0 + 1) < self.disk.size() {
            self.readahead.push(sector + 1);
        }
        Ok(())
    }

    /// Copies the whole of `sector` into `buf`.
    pub fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        self.read_at(sector, 0, buf)
    }

    /// Copies `buf.len()` bytes into `sector` starting at `offset` and
    /// marks the entry dirty.
    pub fn write_at(&self, sector: Sector, offset: usize, buf: &[u8]) -> Result<(), KernelError> {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        self.with_entry(sector, |entry| {
            entry.data[offset..offset + buf.len()].copy_from_slice(buf);
            entry.dirty = true;
        })?;
        Ok(())
    }

    /// Replaces the whole of `sector` with `buf`.
    pub fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        self.write_at(sector, 0, buf)
    }

    /// Writes every dirty entry back to the device and cleans it.
    pub fn flush(&self) -> Result<(), KernelError> {
        let mut guard = self.entries.lock();
        let mut result = Ok(());
        for entry in guard.iter_mut() {
            if entry.dirty {
                match self.disk.write(entry.sector, &entry.data) {
                    Ok(()) => entry.dirty = false,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        guard.unlock();
        result
    }

    /// Discards the entry for `sector`, writing it back first if dirty.
    ///
    /// Used when an inode leaves the open table so that a freed sector
    /// cannot be resurrected from a stale entry.
    pub fn drop_entry(&self, sector: Sector) -> Result<(), KernelError> {
        let mut guard = self.entries.lock();
        let mut result = Ok(());
        if let Some(pos) = guard.iter().position(|e| e.sector == sector) {
            let entry = guard.remove(pos).unwrap();
            if entry.dirty {
                result = self.disk.write(entry.sector, &entry.data);
            }
        }
        guard.unlock();
        result
    }

    /// Discards the entry for `sector` without writing it back.
    ///
    /// Used for sectors that have just been returned to the free map, whose
    /// cached contents are no longer meaningful.
    pub fn discard(&self, sector: Sector) {
        let mut guard = self.entries.lock();
        if let Some(pos) = guard.iter().position(|e| e.sector == sector) {
            guard.remove(pos);
        }
        guard.unlock();
    }

    /// Number of resident entries.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether `sector` currently has a cache entry.
    pub fn is_cached(&self, sector: Sector) -> bool {
        self.entries.lock().iter().any(|e| e.sector == sector)
    }

    /// Stops and joins the background workers. Does not flush.
    pub fn stop_workers(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut guard = self.workers.lock();
        let handles = std::mem::take(&mut *guard);
        guard.unlock();
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn write_behind_loop(&self) {
        loop {
            let mut slept = 0;
            while slept < FLUSH_INTERVAL_TICKS {
                if self.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(TICK);
                slept += 1;
            }
            if self.flush().is_err() {
                log::warn!("write-behind: device write failed");
            }
        }
    }

    fn read_ahead_loop(&self) {
        loop {
            match self.readahead.pop() {
                Some(sector) => {
                    // No-op when the sector is already resident.
                    let _ = self.with_entry(sector, |_| ());
                }
                None => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    std::thread::sleep(TICK);
                }
            }
        }
    }
}
