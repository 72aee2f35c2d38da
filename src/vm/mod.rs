//! The demand-paged virtual-memory layer.
//!
//! [`Vm`] bundles the process-wide services: the user frame pool, the
//! [`frame::FrameTable`] of resident pages, and the [`swap::SwapArea`].
//! Each address space owns a [`VmSpace`] — its software page table plus
//! its supplemental page table — behind one lock, so that eviction can
//! reach into any space from any thread.
//!
//! [`Vm::frame_alloc`] is the single entry point for getting a user
//! frame: it tries the pool and, on exhaustion, evicts the oldest
//! resident frame to swap and retries.

pub mod frame;
pub mod page;
pub mod swap;

use crate::{
    mm::{page_table::PageTable, Pa, UserPool},
    sync::SpinLock,
    KernelError,
};
use frame::FrameTable;
use page::SupplementalPageTable;
use swap::SwapArea;

/// The mutable memory state of one address space.
#[derive(Default)]
pub struct SpaceInner {
    /// The software page table (what the MMU would consult).
    pub page_table: PageTable,
    /// The supplemental page table (where page contents come from).
    pub spt: SupplementalPageTable,
}

/// An address space's memory maps, shareable with the eviction path.
#[derive(Default)]
pub struct VmSpace {
    /// Both tables, under the space lock.
    pub inner: SpinLock<SpaceInner>,
}

impl VmSpace {
    /// A fresh, empty address space.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The virtual-memory services: user pool, frame table, swap area.
pub struct Vm {
    /// The bounded pool of physical frames for user pages.
    pub pool: UserPool,
    /// The table of resident frames.
    pub frames: FrameTable,
    /// The paging backing store.
    pub swap: SwapArea,
}

impl Vm {
    /// Creates the services with `pool_pages` user frames and the given
    /// swap device.
    pub fn new(pool_pages: usize, swap_disk: crate::dev::Disk) -> Result<Self, KernelError> {
        Ok(Self {
            pool: UserPool::new(pool_pages),
            frames: FrameTable::new(),
            swap: SwapArea::new(swap_disk)?,
        })
    }

    /// Allocates a user frame, evicting a victim to swap when the pool is
    /// exhausted.
    pub fn frame_alloc(&self) -> Result<Pa, KernelError> {
        loop {
            if let Some(pa) = self.pool.alloc() {
                return Ok(pa);
            }
            self.evict_one()?;
        }
    }

    /// Evicts the oldest resident frame: writes it to swap, marks its
    /// page record swapped, clears the owner's hardware mapping, and
    /// frees the frame.
    fn evict_one(&self) -> Result<(), KernelError> {
        let victim = self.frames.pop_victim().ok_or(KernelError::NoMemory)?;
        log::debug!("vm: evicting {:?} (upage {:?})", victim.pa, victim.upage);

        if let Some(space) = victim.space.upgrade() {
            // The space lock is held across the capture and the teardown,
            // so no user access can slip a write in between them.
            let mut inner = space.inner.lock();
            if inner.spt.lookup(victim.upage).is_some() {
                let slot = match self.swap.swap_out(&self.pool, victim.pa) {
                    Ok(slot) => slot,
                    Err(e) => {
                        inner.unlock();
                        // Swap is full: the victim stays resident.
                        self.frames.insert(victim.pa, victim.upage, &space);
                        return Err(e);
                    }
                };
                inner.page_table.clear(victim.upage);
                let record = inner.spt.lookup_mut(victim.upage).unwrap();
                record.present = false;
                record.frame = None;
                record.swap_slot = Some(slot);
            } else {
                // The record went away under us (racing unmap); just drop
                // the stale mapping.
                inner.page_table.clear(victim.upage);
            }
            inner.unlock();
        }
        self.pool.free(victim.pa);
        Ok(())
    }
}
