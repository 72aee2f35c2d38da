//! # minos
//!
//! The storage and memory subsystems of a miniature instructional kernel,
//! hosted as an ordinary library so that every layer can be exercised by
//! tests on a development machine.
//!
//! The crate models the parts of the kernel that sit between the system-call
//! surface and the hardware:
//!
//! - a **block device** abstraction serving fixed 512-byte sectors under a
//!   named role (file system or swap),
//! - a **buffered on-disk file system**: a bounded write-back block cache
//!   with background flushing and read-ahead, a persistent free-sector map,
//!   multi-level indexed inodes with growth, fixed-slot hierarchical
//!   directories, and file handles,
//! - a **demand-paged virtual memory layer**: a supplemental page table per
//!   address space, a process-wide frame table with FIFO eviction, a
//!   fixed-slot swap area, lazy loading of executable segments, stack
//!   growth, and memory-mapped files.
//!
//! Physical memory is a bounded pool of page frames and the hardware page
//! table is a per-address-space software map; user loads and stores go
//! through accessors on [`process::Process`], which walk the page table,
//! maintain the accessed/dirty bits, and fault missing pages in. Dropping a
//! [`fs::FileSys`] and mounting a new one over the same [`dev::Disk`] models
//! a reboot.
//!
//! The external collaborators of the real kernel (trap-frame decoding,
//! device drivers, the scheduler, the boot loader) are out of scope; where
//! they touch the core their contracts are kept, most visibly in
//! [`syscall`], which demultiplexes decoded system calls onto the services.

pub mod dev;
pub mod fs;
pub mod mm;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod util;
pub mod vm;

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific failure a kernel operation can
/// report back to a user program. Errors never cross process boundaries;
/// the system-call layer converts them into the return codes of the ABI.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// IO Error. (EIO)
    IOError,
    /// Bad file descriptor. (EBADF)
    BadFileDescriptor,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// File exists. (EEXIST)
    FileExist,
    /// Not a directory. (ENOTDIR)
    NotDirectory,
    /// Is a directory. (EISDIR)
    IsDirectory,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// Too many open files. (EMFILE)
    TooManyOpenFile,
    /// No space left on device. (ENOSPC)
    NoSpace,
    /// File name too long. (ENAMETOOLONG)
    NameTooLong,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall,
    /// Directory not empty. (ENOTEMPTY)
    DirectoryNotEmpty,
    /// File system is corrupted. (EFSCORRUPTED)
    FilesystemCorrupted(&'static str),
    /// Operation is not supported. (ENOTSUPP)
    NotSupportedOperation,
}

impl KernelError {
    /// Converts the [`KernelError`] into the corresponding `isize` error
    /// code used as a system-call return value.
    pub fn into_isize(self) -> isize {
        match self {
            KernelError::OperationNotPermitted => -1,
            KernelError::NoSuchEntry => -2,
            KernelError::IOError => -5,
            KernelError::BadFileDescriptor => -9,
            KernelError::NoMemory => -12,
            KernelError::InvalidAccess => -13,
            KernelError::BadAddress => -14,
            KernelError::Busy => -16,
            KernelError::FileExist => -17,
            KernelError::NotDirectory => -20,
            KernelError::IsDirectory => -21,
            KernelError::InvalidArgument => -22,
            KernelError::TooManyOpenFile => -24,
            KernelError::NoSpace => -28,
            KernelError::NameTooLong => -36,
            KernelError::NoSuchSyscall => -38,
            KernelError::DirectoryNotEmpty => -39,
            KernelError::FilesystemCorrupted(_) => -117,
            KernelError::NotSupportedOperation => -524,
        }
    }
}

/// The given `isize` does not indicate a [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    _e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::OperationNotPermitted),
            -2 => Ok(Self::NoSuchEntry),
            -5 => Ok(Self::IOError),
            -9 => Ok(Self::BadFileDescriptor),
            -12 => Ok(Self::NoMemory),
            -13 => Ok(Self::InvalidAccess),
            -14 => Ok(Self::BadAddress),
            -16 => Ok(Self::Busy),
            -17 => Ok(Self::FileExist),
            -20 => Ok(Self::NotDirectory),
            -21 => Ok(Self::IsDirectory),
            -22 => Ok(Self::InvalidArgument),
            -24 => Ok(Self::TooManyOpenFile),
            -28 => Ok(Self::NoSpace),
            -36 => Ok(Self::NameTooLong),
            -38 => Ok(Self::NoSuchSyscall),
            -39 => Ok(Self::DirectoryNotEmpty),
            -117 => Ok(Self::FilesystemCorrupted("")),
            -524 => Ok(Self::NotSupportedOperation),
            e => Err(TryFromError { _e: e }),
        }
    }
}

/// A kernel service bundle: the file system and the virtual-memory layer.
///
/// The original kernel initializes these as process-wide singletons at boot;
/// here they are owned by whoever drives the core (the test harness playing
/// the role of `main`). Shutdown order is defined: virtual memory first,
/// then the file system, then the devices go away with the last reference.
pub struct Kernel {
    /// The mounted file system.
    pub fs: fs::FileSys,
    /// The virtual-memory services (user pool, frame table, swap area).
    pub vm: vm::Vm,
}

impl Kernel {
    /// Tears the services down in order and stops the background workers.
    ///
    /// After this returns, the durable state of the file-system device
    /// reflects every write issued through the cache.
    pub fn shutdown(self) {
        let Kernel { fs, vm } = self;
        drop(vm);
        fs.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::KernelError;

    #[test]
    fn error_code_round_trip() {
        for e in [
            KernelError::NoSuchEntry,
            KernelError::BadAddress,
            KernelError::NoSpace,
            KernelError::DirectoryNotEmpty,
        ] {
            assert_eq!(KernelError::try_from(e.into_isize()), Ok(e));
        }
        assert!(KernelError::try_from(0).is_err());
        assert!(KernelError::try_from(1234).is_err());
    }
}
