//! Block devices.
//!
//! A [`Disk`] serves fixed 512-byte sectors and carries a [`Role`] naming
//! which subsystem owns it: the file system or the swap area. Reads and
//! writes are synchronous, blocking, and atomic at sector granularity.
//!
//! The backing store is an in-memory sector array shared behind an `Arc`,
//! so cloning a [`Disk`] yields another handle onto the same durable state.
//! Dropping every service that uses the disk and mounting fresh ones over a
//! clone models a reboot.

use crate::{sync::SpinLock, KernelError};

/// Size of a device sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Sector, the access granularity of a disk.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Sector(pub u32);

impl Sector {
    /// Byte offset of the start of this sector on the device.
    #[inline]
    pub fn into_offset(self) -> usize {
        self.0 as usize * SECTOR_SIZE
    }

    /// Cast into `usize`.
    #[inline]
    pub fn into_usize(self) -> usize {
        self.0 as usize
    }
}

impl core::ops::Add<u32> for Sector {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

/// The role a block device plays.
///
/// Both devices are located at boot by their role; the core never addresses
/// a device it does not own.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    /// Holds the on-disk file system.
    FileSys,
    /// Backs the swap area.
    Swap,
}

struct DiskInner {
    role: Role,
    sectors: SpinLock<Vec<[u8; SECTOR_SIZE]>>,
}

/// A block device with a fixed number of 512-byte sectors.
#[derive(Clone)]
pub struct Disk {
    inner: std::sync::Arc<DiskInner>,
}

impl Disk {
    /// Creates a zero-filled disk with `sector_count` sectors.
    pub fn new(role: Role, sector_count: u32) -> Self {
        Self {
            inner: std::sync::Arc::new(DiskInner {
                role,
                sectors: SpinLock::new(vec![[0; SECTOR_SIZE]; sector_count as usize]),
            }),
        }
    }

    /// The role this device was created with.
    #[inline]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Number of sectors on the device.
    pub fn size(&self) -> u32 {
        self.inner.sectors.lock().len() as u32
    }

    /// Reads 512 bytes from the disk at `sector`.
    pub fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        let guard = self.inner.sectors.lock();
        let result = match guard.get(sector.into_usize()) {
            Some(data) => {
                buf.copy_from_slice(data);
                Ok(())
            }
            None => Err(KernelError::IOError),
        };
        guard.unlock();
        result
    }

    /// Writes 512 bytes to the disk at `sector`.
    pub fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        let mut guard = self.inner.sectors.lock();
        let result = match guard.get_mut(sector.into_usize()) {
            Some(data) => {
                data.copy_from_slice(buf);
                Ok(())
            }
            None => Err(KernelError::IOError),
        };
        guard.unlock();
        result
    }
}
