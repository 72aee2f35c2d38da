//! Directories and path resolution.
//!
//! A directory is a regular file whose data is a packed sequence of
//! fixed-width [`DirEntry`] slots; lookup is a linear scan. A
//! [`Directory`] handle pairs the directory's inode with a read position
//! used by enumeration, and several handles may reference the same inode.
//!
//! Paths are `/`-separated. A leading `/` starts resolution at the root,
//! anything else at the caller's working directory. `.` names the current
//! directory and `..` the parent (the root is its own parent). Resolution
//! is a left-to-right fold over the components whose accumulator is the
//! current directory handle; every component but the last is consumed, and
//! the last is handed back for the per-operation action.

use crate::{
    dev::Sector,
    fs::{
        disk_layout::{DirEntry, DIR_ENTRY_SIZE},
        inode::Inode,
        FileSys, ROOT_DIR_SECTOR,
    },
    KernelError,
};
use std::sync::Arc;

/// An open directory: an inode plus an enumeration cursor.
pub struct Directory {
    inode: Arc<Inode>,
    pos: usize,
}

impl Directory {
    /// Writes a fresh directory inode at `sector` with room for
    /// `entry_cnt` entries, recording `parent` as its parent directory.
    pub fn create(
        fs: &FileSys,
        sector: Sector,
        entry_cnt: usize,
        parent: Sector,
    ) -> Result<(), KernelError> {
        Inode::create(
            fs,
            sector,
            (entry_cnt * DIR_ENTRY_SIZE) as u32,
            true,
            parent,
        )
    }

    /// Wraps an inode in a directory handle.
    ///
    /// # Errors
    /// [`KernelError::NotDirectory`] if the inode is a regular file.
    pub fn open(inode: Arc<Inode>) -> Result<Self, KernelError> {
        if inode.is_dir() {
            Ok(Self { inode, pos: 0 })
        } else {
            Err(KernelError::NotDirectory)
        }
    }

    /// Opens the root directory.
    pub fn open_root(fs: &FileSys) -> Result<Self, KernelError> {
        Self::open(fs.inodes.open(fs, ROOT_DIR_SECTOR)?)
    }

    /// A second handle onto the same directory, with a fresh cursor.
    pub fn reopen(&self) -> Self {
        self.inode.reopen();
        Self {
            inode: Arc::clone(&self.inode),
            pos: 0,
        }
    }

    /// Closes the handle, dropping its reference to the inode.
    pub fn close(self, fs: &FileSys) -> Result<(), KernelError> {
        self.inode.close(fs)
    }

    /// The underlying inode.
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// Sector of this directory's inode.
    pub fn sector(&self) -> Sector {
        self.inode.sector()
    }

    fn entry_at(&self, fs: &FileSys, index: usize) -> Result<Option<DirEntry>, KernelError> {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        let read = self
            .inode
            .read_at(fs, &mut buf, index * DIR_ENTRY_SIZE)?;
        if read == DIR_ENTRY_SIZE {
            Ok(Some(DirEntry::from_bytes(&buf)))
        } else {
            Ok(None)
        }
    }

    /// Finds the child inode sector recorded under `name`.
    pub fn lookup(&self, fs: &FileSys, name: &str) -> Result<Option<Sector>, KernelError> {
        let mut index = 0;
        while let Some(entry) = self.entry_at(fs, index)? {
            if entry.name() == Some(name) {
                return Ok(Some(Sector(entry.child)));
            }
            index += 1;
        }
        Ok(None)
    }

    /// Records `child` under `name`, reusing a cleared slot when one
    /// exists and extending the directory file otherwise.
    pub fn add(&self, fs: &FileSys, name: &str, child: Sector) -> Result<(), KernelError> {
        let entry = DirEntry::new(name, child).ok_or(KernelError::NameTooLong)?;
        if self.lookup(fs, name)?.is_some() {
            return Err(KernelError::FileExist);
        }

        let mut index = 0;
        let slot = loop {
            match self.entry_at(fs, index)? {
                Some(e) if !e.is_used() => break index,
                Some(_) => index += 1,
                // Past the last slot: append, growing the file.
                None => break index,
            }
        };
        let written = self
            .inode
            .write_at(fs, entry.as_bytes(), slot * DIR_ENTRY_SIZE)?;
        if written == DIR_ENTRY_SIZE {
            Ok(())
        } else {
            Err(KernelError::NoSpace)
        }
    }

    /// Removes the entry named `name` and marks the child inode for
    /// deletion.
    ///
    /// Removing the root or a non-empty directory fails.
    pub fn remove(&self, fs: &FileSys, name: &str) -> Result<(), KernelError> {
        let mut index = 0;
        let (slot, child) = loop {
            match self.entry_at(fs, index)? {
                Some(e) if e.name() == Some(name) => break (index, Sector(e.child)),
                Some(_) => index += 1,
                None => return Err(KernelError::NoSuchEntry),
            }
        };
        if child == ROOT_DIR_SECTOR {
            return Err(KernelError::Busy);
        }

        let inode = fs.inodes.open(fs, child)?;
        if inode.is_dir() {
            // The handle owns its own reference to the inode.
            inode.reopen();
            let dir = Directory::open(Arc::clone(&inode))?;
            let empty = dir.is_empty(fs);
            dir.close(fs)?;
            if !empty? {
                inode.close(fs)?;
                return Err(KernelError::DirectoryNotEmpty);
            }
        }

        let cleared = DirEntry::unused();
        let written = self
            .inode
            .write_at(fs, cleared.as_bytes(), slot * DIR_ENTRY_SIZE)?;
        if written != DIR_ENTRY_SIZE {
            inode.close(fs)?;
            return Err(KernelError::NoSpace);
        }
        inode.remove();
        inode.close(fs)
    }

    /// Whether the directory holds no live entries.
    pub fn is_empty(&self, fs: &FileSys) -> Result<bool, KernelError> {
        let mut index = 0;
        while let Some(entry) = self.entry_at(fs, index)? {
            if entry.is_used() {
                return Ok(false);
            }
            index += 1;
        }
        Ok(true)
    }

    /// Returns the next live entry name after the handle's cursor, or
    /// `None` when the enumeration is finished.
    pub fn readdir(&mut self, fs: &FileSys) -> Result<Option<String>, KernelError> {
        while let Some(entry) = self.entry_at(fs, self.pos)? {
            self.pos += 1;
            if let Some(name) = entry.name() {
                return Ok(Some(name.to_string()));
            }
        }
        Ok(None)
    }
}

/// Splits a path into its non-empty components.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Steps from `dir` into component `comp`, consuming the handle.
fn step(fs: &FileSys, dir: Directory, comp: &str) -> Result<Directory, KernelError> {
    match comp {
        "." => Ok(dir),
        ".." => {
            let parent = dir.inode().parent();
            dir.close(fs)?;
            Directory::open(fs.inodes.open(fs, parent)?)
        }
        name => {
            let child = dir
                .lookup(fs, name)?
                .ok_or(KernelError::NoSuchEntry);
            dir.close(fs)?;
            Directory::open(fs.inodes.open(fs, child?)?)
        }
    }
}

/// Resolves everything but the last component of `path`.
///
/// Returns the parent directory handle and the final component. A path
/// that names the start directory itself (`"/"` or the empty string)
/// yields `None` for the component.
pub fn resolve_parent<'p>(
    fs: &FileSys,
    cwd: &Directory,
    path: &'p str,
) -> Result<(Directory, Option<&'p str>), KernelError> {
    let mut dir = if path.starts_with('/') {
        Directory::open_root(fs)?
    } else {
        cwd.reopen()
    };
    let mut comps = components(path).peekable();
    while let Some(comp) = comps.next() {
        if comps.peek().is_none() {
            return Ok((dir, Some(comp)));
        }
        dir = step(fs, dir, comp)?;
    }
    Ok((dir, None))
}

/// Resolves the whole of `path` to a directory handle, failing with
/// [`KernelError::NotDirectory`] when it names a regular file.
pub fn resolve_dir(fs: &FileSys, cwd: &Directory, path: &str) -> Result<Directory, KernelError> {
    let mut dir = if path.starts_with('/') {
        Directory::open_root(fs)?
    } else {
        cwd.reopen()
    };
    for comp in components(path) {
        dir = step(fs, dir, comp)?;
    }
    Ok(dir)
}
