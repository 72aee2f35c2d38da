//! The persistent free-sector map.
//!
//! One bit per sector of the file-system device, `1` meaning in use. The
//! map lives in memory while the file system is mounted and is persisted in
//! a regular file whose inode occupies the reserved sector 0; the file is
//! created at format time and written back at shutdown.

use crate::{
    dev::Sector,
    fs::{inode::Inode, FileSys, FREE_MAP_SECTOR},
    sync::SpinLock,
    util::Bitmap,
    KernelError,
};

/// The free-sector map of the file-system device.
pub struct FreeMap {
    inner: SpinLock<Bitmap>,
}

impl FreeMap {
    /// A map for a device of `sector_count` sectors, everything free.
    pub fn new(sector_count: u32) -> Self {
        Self {
            inner: SpinLock::new(Bitmap::new(sector_count as usize)),
        }
    }

    /// Marks a sector as permanently in use (the reserved metadata
    /// sectors claimed at format time).
    pub fn mark_used(&self, sector: Sector) {
        let mut guard = self.inner.lock();
        guard.set(sector.into_usize(), true);
        guard.unlock();
    }

    /// Claims `cnt` contiguous free sectors and returns the first.
    ///
    /// The current callers only ever pass `cnt == 1`.
    pub fn allocate(&self, cnt: usize) -> Result<Sector, KernelError> {
        let mut guard = self.inner.lock();
        let result = guard
            .scan_and_flip(0, cnt)
            .map(|pos| Sector(pos as u32))
            .ok_or(KernelError::NoSpace);
        guard.unlock();
        result
    }

    /// Returns `cnt` sectors starting at `start` to the free pool.
    pub fn release(&self, start: Sector, cnt: usize) {
        let mut guard = self.inner.lock();
        for i in 0..cnt {
            debug_assert!(guard.test(start.into_usize() + i));
            guard.set(start.into_usize() + i, false);
        }
        guard.unlock();
    }

    /// Number of free sectors remaining.
    pub fn free_count(&self) -> usize {
        let guard = self.inner.lock();
        let free = guard.len() - guard.count_set();
        guard.unlock();
        free
    }

    /// Creates the on-disk free-map file and saves the current map into it.
    ///
    /// Called at format time, after the root directory exists, so that the
    /// sectors backing the map itself are claimed before the image is
    /// persisted.
    pub fn create_file(&self, fs: &FileSys) -> Result<(), KernelError> {
        let guard = self.inner.lock();
        let len = guard.len().div_ceil(8);
        guard.unlock();
        Inode::create(fs, FREE_MAP_SECTOR, len as u32, false, FREE_MAP_SECTOR)?;
        self.save(fs)
    }

    /// Writes the map into its backing file.
    pub fn save(&self, fs: &FileSys) -> Result<(), KernelError> {
        let guard = self.inner.lock();
        let bytes = guard.to_bytes();
        guard.unlock();

        let inode = fs.inodes.open(fs, FREE_MAP_SECTOR)?;
        let written = inode.write_at(fs, &bytes, 0);
        inode.close(fs)?;
        if written? == bytes.len() {
            Ok(())
        } else {
            Err(KernelError::NoSpace)
        }
    }

    /// Loads the map from its backing file on a freshly mounted device.
    pub fn load(&self, fs: &FileSys, sector_count: u32) -> Result<(), KernelError> {
        let inode = fs.inodes.open(fs, FREE_MAP_SECTOR)?;
        let mut bytes = vec![0u8; inode.length()];
        let read = inode.read_at(fs, &mut bytes, 0);
        inode.close(fs)?;
        if read? != bytes.len() {
            return Err(KernelError::FilesystemCorrupted("short free map"));
        }

        let mut guard = self.inner.lock();
        *guard = Bitmap::from_bytes(sector_count as usize, &bytes);
        guard.unlock();
        Ok(())
    }
}
