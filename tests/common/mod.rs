//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use minos::{
    dev::{Disk, Role},
    fs::FileSys,
    vm::Vm,
    Kernel,
};

/// Sectors on the file-system device (2 MiB).
pub const DISK_SECTORS: u32 = 4096;

/// Sectors on the swap device (512 page slots).
pub const SWAP_SECTORS: u32 = 4096;

/// A freshly formatted file system on a new device.
pub fn fresh_fs() -> FileSys {
    FileSys::mount(Disk::new(Role::FileSys, DISK_SECTORS), true).unwrap()
}

/// A kernel with a freshly formatted file system and `pool_pages` user
/// frames.
pub fn kernel(pool_pages: usize) -> Kernel {
    Kernel {
        fs: fresh_fs(),
        vm: Vm::new(pool_pages, Disk::new(Role::Swap, SWAP_SECTORS)).unwrap(),
    }
}
