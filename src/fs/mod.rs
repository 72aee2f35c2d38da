//! The buffered on-disk file system.
//!
//! [`FileSys`] owns the pieces of the storage stack — the device handle,
//! the write-back [`cache::BlockCache`], the persistent
//! [`free_map::FreeMap`], and the open-[`inode::InodeTable`] — and exposes
//! the path-level operations the system-call surface needs: create, open,
//! remove, mkdir. A coarse file-system lock serializes the operations that
//! walk the directory tree; the caller-facing file and directory handles
//! then run under the finer per-inode and per-cache locks.
//!
//! On-disk format: sector 0 holds the free-map inode, sector 1 the root
//! directory inode. Mounting with `format = true` re-initializes both.

pub mod cache;
pub mod directory;
pub mod disk_layout;
pub mod file;
pub mod free_map;
pub mod inode;

use crate::{
    dev::{Disk, Role, Sector},
    sync::{SpinLock, SpinLockGuard},
    KernelError,
};
use cache::BlockCache;
use directory::Directory;
use file::File;
use free_map::FreeMap;
use inode::{Inode, InodeTable};
use std::sync::Arc;

/// Sector of the free-map inode.
pub const FREE_MAP_SECTOR: Sector = Sector(0);
/// Sector of the root directory inode.
pub const ROOT_DIR_SECTOR: Sector = Sector(1);
/// Number of entry slots a fresh directory is created with.
pub const DIR_INIT_ENTRIES: usize = 16;

/// An open file-system object: a regular file or a directory.
pub enum FsObject {
    /// A regular file.
    File(File),
    /// A directory.
    Dir(Directory),
}

impl FsObject {
    /// Extracts the regular file, if this is one.
    pub fn into_file(self) -> Option<File> {
        match self {
            FsObject::File(f) => Some(f),
            FsObject::Dir(_) => None,
        }
    }

    /// Extracts the directory, if this is one.
    pub fn into_dir(self) -> Option<Directory> {
        match self {
            FsObject::Dir(d) => Some(d),
            FsObject::File(_) => None,
        }
    }

    /// Whether the object is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FsObject::Dir(_))
    }

    /// Inode sector of the object.
    pub fn inumber(&self) -> u32 {
        match self {
            FsObject::File(f) => f.inumber(),
            FsObject::Dir(d) => d.sector().0,
        }
    }

    /// Closes the handle either way.
    pub fn close(self, fs: &FileSys) -> Result<(), KernelError> {
        match self {
            FsObject::File(f) => f.close(fs),
            FsObject::Dir(d) => d.close(fs),
        }
    }
}

/// The mounted file system.
pub struct FileSys {
    disk: Disk,
    /// The write-back sector cache.
    pub cache: Arc<BlockCache>,
    /// The persistent free-sector map.
    pub free_map: FreeMap,
    /// The open-inode table.
    pub inodes: InodeTable,
    /// Coarse lock serializing tree-walking operations.
    lock: SpinLock<()>,
}

impl FileSys {
    /// Mounts the file system on `disk`, formatting it first when asked.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] when handed a disk whose role is
    /// not [`Role::FileSys`].
    pub fn mount(disk: Disk, format: bool) -> Result<Self, KernelError> {
        if disk.role() != Role::FileSys {
            return Err(KernelError::InvalidArgument);
        }
        let sector_count = disk.size();
        let fs = Self {
            cache: BlockCache::new(disk.clone()),
            free_map: FreeMap::new(sector_count),
            inodes: InodeTable::new(),
            lock: SpinLock::new(()),
            disk,
        };
        if format {
            fs.do_format()?;
        } else {
            fs.free_map.load(&fs, sector_count)?;
        }
        log::info!(
            "fs: mounted, {} of {} sectors free",
            fs.free_map.free_count(),
            sector_count
        );
        Ok(fs)
    }

    fn do_format(&self) -> Result<(), KernelError> {
        log::info!("fs: formatting");
        self.free_map.mark_used(FREE_MAP_SECTOR);
        self.free_map.mark_used(ROOT_DIR_SECTOR);
        Directory::create(self, ROOT_DIR_SECTOR, DIR_INIT_ENTRIES, ROOT_DIR_SECTOR)?;
        self.free_map.create_file(self)?;
        self.cache.flush()
    }

    /// Writes unwritten state to the device and stops the cache workers.
    pub fn shutdown(self) {
        if self.free_map.save(&self).is_err() {
            log::warn!("fs: failed to persist the free map");
        }
        if self.cache.flush().is_err() {
            log::warn!("fs: flush at shutdown failed");
        }
        self.cache.stop_workers();
    }

    /// The device this file system is mounted on.
    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    /// Acquires the coarse file-system lock.
    ///
    /// System-call entries that operate on open handles take this guard
    /// around the handle operation; the path-level operations below take
    /// it themselves.
    pub fn fs_lock(&self) -> SpinLockGuard<'_, ()> {
        self.lock.lock()
    }

    /// Opens a fresh handle onto the root directory.
    pub fn open_root(&self) -> Result<Directory, KernelError> {
        Directory::open_root(self)
    }

    /// Creates a file named by `path` with `initial_size` bytes,
    /// zero-filled.
    pub fn create(
        &self,
        cwd: &Directory,
        path: &str,
        initial_size: u32,
    ) -> Result<(), KernelError> {
        let guard = self.lock.lock();
        let result = self.create_node(cwd, path, |fs, sector, parent| {
            Inode::create(fs, sector, initial_size, false, parent)
        });
        guard.unlock();
        result
    }

    /// Creates a directory named by `path`.
    pub fn mkdir(&self, cwd: &Directory, path: &str) -> Result<(), KernelError> {
        let guard = self.lock.lock();
        let result = self.create_node(cwd, path, |fs, sector, parent| {
            Directory::create(fs, sector, DIR_INIT_ENTRIES, parent)
        });
        guard.unlock();
        result
    }

    fn create_node(
        &self,
        cwd: &Directory,
        path: &str,
        init: impl FnOnce(&FileSys, Sector, Sector) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        let (dir, name) = directory::resolve_parent(self, cwd, path)?;
        let result = (|| {
            let name = name.ok_or(KernelError::FileExist)?;
            if name == "." || name == ".." {
                return Err(KernelError::InvalidArgument);
            }
            let sector = self.free_map.allocate(1)?;
            match init(self, sector, dir.sector()).and_then(|()| dir.add(self, name, sector)) {
                Ok(()) => Ok(()),
                Err(e) => {
                    // The inode record sector is reclaimed; data sectors a
                    // half-built inode claimed stay leaked, as documented.
                    self.free_map.release(sector, 1);
                    self.cache.discard(sector);
                    Err(e)
                }
            }
        })();
        dir.close(self)?;
        result
    }

    /// Opens the object named by `path`.
    pub fn open(&self, cwd: &Directory, path: &str) -> Result<FsObject, KernelError> {
        let guard = self.lock.lock();
        let result = self.open_inner(cwd, path);
        guard.unlock();
        result
    }

    fn open_inner(&self, cwd: &Directory, path: &str) -> Result<FsObject, KernelError> {
        let (dir, name) = directory::resolve_parent(self, cwd, path)?;
        let sector = match name {
            // The path names the resolution base itself.
            None | Some(".") => {
                let sector = dir.sector();
                dir.close(self)?;
                sector
            }
            Some("..") => {
                let sector = dir.inode().parent();
                dir.close(self)?;
                sector
            }
            Some(name) => {
                let found = dir.lookup(self, name);
                dir.close(self)?;
                found?.ok_or(KernelError::NoSuchEntry)?
            }
        };
        let inode = self.inodes.open(self, sector)?;
        if inode.is_dir() {
            Ok(FsObject::Dir(Directory::open(inode)?))
        } else {
            Ok(FsObject::File(File::open(inode)?))
        }
    }

    /// Removes the object named by `path`.
    ///
    /// Fails for the root directory and for non-empty directories. A file
    /// that is still open elsewhere keeps its data until the last close.
    pub fn remove(&self, cwd: &Directory, path: &str) -> Result<(), KernelError> {
        let guard = self.lock.lock();
        let result = (|| {
            let (dir, name) = directory::resolve_parent(self, cwd, path)?;
            let result = match name {
                None | Some(".") | Some("..") => Err(KernelError::Busy),
                Some(name) => dir.remove(self, name),
            };
            dir.close(self)?;
            result
        })();
        guard.unlock();
        result
    }

    /// Opens the directory named by `path`, for `chdir`.
    pub fn open_dir(&self, cwd: &Directory, path: &str) -> Result<Directory, KernelError> {
        let guard = self.lock.lock();
        let result = directory::resolve_dir(self, cwd, path);
        guard.unlock();
        result
    }
}

impl Drop for FileSys {
    /// Stops the background workers. [`FileSys::shutdown`] already did
    /// the flushing when it ran; a drop without it keeps whatever the
    /// write-behind worker managed to clean.
    fn drop(&mut self) {
        self.cache.stop_workers();
    }
}
