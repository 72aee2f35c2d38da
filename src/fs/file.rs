//! File handles.
//!
//! A [`File`] wraps an inode with a byte cursor and a deny-write bit.
//! Multiple handles may reference the same inode; each one owns an inode
//! reopen and drops it on close. Writes past the end of the file extend
//! the inode through the growth path of the inode layer.

use crate::{
    fs::{inode::Inode, FileSys},
    KernelError,
};
use std::sync::Arc;

/// An open regular file.
pub struct File {
    inode: Arc<Inode>,
    pos: usize,
    deny_write: bool,
}

impl File {
    /// Wraps an inode in a file handle.
    ///
    /// # Errors
    /// [`KernelError::IsDirectory`] if the inode is a directory.
    pub fn open(inode: Arc<Inode>) -> Result<Self, KernelError> {
        if inode.is_dir() {
            Err(KernelError::IsDirectory)
        } else {
            Ok(Self {
                inode,
                pos: 0,
                deny_write: false,
            })
        }
    }

    /// Opens an independent handle onto the same inode, with the cursor
    /// rewound and writes allowed.
    pub fn reopen(&self) -> Self {
        self.inode.reopen();
        Self {
            inode: Arc::clone(&self.inode),
            pos: 0,
            deny_write: false,
        }
    }

    /// Closes the handle. A handle that denied writes re-allows them.
    pub fn close(mut self, fs: &FileSys) -> Result<(), KernelError> {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
        self.inode.close(fs)
    }

    /// The underlying inode.
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// The inode sector, which doubles as the file's inumber.
    pub fn inumber(&self) -> u32 {
        self.inode.sector().0
    }

    /// File size in bytes.
    pub fn size(&self) -> usize {
        self.inode.length()
    }

    /// Reads from the cursor, advancing it by the bytes read.
    pub fn read(&mut self, fs: &FileSys, buf: &mut [u8]) -> Result<usize, KernelError> {
        let read = self.inode.read_at(fs, buf, self.pos)?;
        self.pos += read;
        Ok(read)
    }

    /// Reads at an explicit offset without touching the cursor.
    pub fn read_at(&self, fs: &FileSys, buf: &mut [u8], offset: usize) -> Result<usize, KernelError> {
        self.inode.read_at(fs, buf, offset)
    }

    /// Writes at the cursor, advancing it by the bytes written.
    pub fn write(&mut self, fs: &FileSys, buf: &[u8]) -> Result<usize, KernelError> {
        let written = self.inode.write_at(fs, buf, self.pos)?;
        self.pos += written;
        Ok(written)
    }

    /// Writes at an explicit offset without touching the cursor.
    pub fn write_at(&self, fs: &FileSys, buf: &[u8], offset: usize) -> Result<usize, KernelError> {
        self.inode.write_at(fs, buf, offset)
    }

    /// Moves the cursor to `pos`. Seeking past the end is recorded; the
    /// file grows on the next write.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// The current cursor position.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Prevents writes to the underlying inode until this handle closes
    /// or re-allows them. At most once per handle.
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    /// Re-allows writes denied through this handle.
    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }
}
