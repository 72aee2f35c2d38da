//! The swap area.
//!
//! The swap device is sliced into page-sized slots of eight consecutive
//! sectors. A bitmap guarded by its own lock records occupancy;
//! [`SwapArea::swap_out`] claims the first free slot and writes a frame
//! into it, [`SwapArea::swap_in`] reads a slot back and releases it.

use crate::{
    dev::{Disk, Role, Sector, SECTOR_SIZE},
    mm::{Pa, UserPool, PAGE_SIZE},
    sync::SpinLock,
    util::Bitmap,
    KernelError,
};

/// Sectors per swap slot.
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

/// Index of a page-sized slot on the swap device.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SwapSlot(pub u32);

impl SwapSlot {
    fn first_sector(self) -> Sector {
        Sector(self.0 * SECTORS_PER_SLOT as u32)
    }
}

/// The paging backing store.
pub struct SwapArea {
    disk: Disk,
    used: SpinLock<Bitmap>,
}

impl SwapArea {
    /// Creates the swap area over `disk`.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] when the disk's role is not
    /// [`Role::Swap`].
    pub fn new(disk: Disk) -> Result<Self, KernelError> {
        if disk.role() != Role::Swap {
            return Err(KernelError::InvalidArgument);
        }
        let slots = disk.size() as usize / SECTORS_PER_SLOT;
        Ok(Self {
            disk,
            used: SpinLock::new(Bitmap::new(slots)),
        })
    }

    /// Writes the frame at `paddr` into the first free slot and returns
    /// its index.
    pub fn swap_out(&self, pool: &UserPool, paddr: Pa) -> Result<SwapSlot, KernelError> {
        let mut page = [0u8; PAGE_SIZE];
        pool.copy_out(paddr, 0, &mut page);

        let mut guard = self.used.lock();
        let slot = guard.scan_and_flip(0, 1);
        guard.unlock();
        let slot = SwapSlot(slot.ok_or(KernelError::NoSpace)? as u32);

        for i in 0..SECTORS_PER_SLOT {
            let chunk: &[u8; SECTOR_SIZE] = page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]
                .try_into()
                .unwrap();
            self.disk.write(slot.first_sector() + i as u32, chunk)?;
        }
        log::trace!("swap: out -> slot {}", slot.0);
        Ok(slot)
    }

    /// Reads `slot` into the frame at `paddr` and frees the slot.
    pub fn swap_in(&self, pool: &UserPool, slot: SwapSlot, paddr: Pa) -> Result<(), KernelError> {
        let mut page = [0u8; PAGE_SIZE];
        self.read_slot(slot, &mut page)?;
        pool.copy_in(paddr, 0, &page);
        self.free_slot(slot);
        log::trace!("swap: in <- slot {}", slot.0);
        Ok(())
    }

    /// Reads the contents of `slot` without releasing it.
    pub fn read_slot(&self, slot: SwapSlot, page: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError> {
        {
            let guard = self.used.lock();
            let occupied = guard.test(slot.0 as usize);
            guard.unlock();
            if !occupied {
                return Err(KernelError::InvalidArgument);
            }
        }
        for i in 0..SECTORS_PER_SLOT {
            let chunk: &mut [u8; SECTOR_SIZE] = (&mut page
                [i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE])
                .try_into()
                .unwrap();
            self.disk.read(slot.first_sector() + i as u32, chunk)?;
        }
        Ok(())
    }

    /// Marks `slot` free.
    pub fn free_slot(&self, slot: SwapSlot) {
        let mut guard = self.used.lock();
        debug_assert!(guard.test(slot.0 as usize));
        guard.set(slot.0 as usize, false);
        guard.unlock();
    }

    /// Number of occupied slots.
    pub fn used_slots(&self) -> usize {
        self.used.lock().count_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_in_round_trip() {
        let pool = UserPool::new(2);
        let swap = SwapArea::new(Disk::new(Role::Swap, 64)).unwrap();

        let src = pool.alloc().unwrap();
        let pattern: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        pool.copy_in(src, 0, &pattern);

        let slot = swap.swap_out(&pool, src).unwrap();
        assert_eq!(swap.used_slots(), 1);

        let dst = pool.alloc().unwrap();
        swap.swap_in(&pool, slot, dst).unwrap();
        assert_eq!(swap.used_slots(), 0);

        let mut out = vec![0u8; PAGE_SIZE];
        pool.copy_out(dst, 0, &mut out);
        assert_eq!(out, pattern);
    }

    #[test]
    fn full_swap_reports_no_space() {
        let pool = UserPool::new(1);
        // One slot only.
        let swap = SwapArea::new(Disk::new(Role::Swap, 8)).unwrap();
        let pa = pool.alloc().unwrap();
        let slot = swap.swap_out(&pool, pa).unwrap();
        assert_eq!(
            swap.swap_out(&pool, pa).unwrap_err(),
            KernelError::NoSpace
        );
        swap.free_slot(slot);
        assert!(swap.swap_out(&pool, pa).is_ok());
    }
}
