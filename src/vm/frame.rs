//! The frame table.
//!
//! One entry per physical frame currently mapped into some user address
//! space. The back-pointers — the owning address space and the user page
//! — are what make eviction legal across address spaces: the evictor can
//! reach the victim's page table and supplemental page table without any
//! help from the victim. Victims are chosen first-in-first-out.

use crate::{
    mm::{Pa, Va},
    sync::SpinLock,
    vm::VmSpace,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

/// A resident frame and its owner.
pub struct Frame {
    /// The frame in the user pool.
    pub pa: Pa,
    /// The user page it backs.
    pub upage: Va,
    /// The address space the page belongs to.
    pub space: Weak<VmSpace>,
}

/// The process-wide table of resident frames.
#[derive(Default)]
pub struct FrameTable {
    frames: SpinLock<VecDeque<Frame>>,
}

impl FrameTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a frame that just became user-visible.
    pub fn insert(&self, pa: Pa, upage: Va, space: &Arc<VmSpace>) {
        let mut guard = self.frames.lock();
        debug_assert!(guard.iter().all(|f| f.pa.into_usize() != pa.into_usize()));
        guard.push_back(Frame {
            pa,
            upage,
            space: Arc::downgrade(space),
        });
        guard.unlock();
    }

    /// Unregisters the frame at `pa`, returning its entry.
    pub fn remove(&self, pa: Pa) -> Option<Frame> {
        let mut guard = self.frames.lock();
        let taken = guard
            .iter()
            .position(|f| f.pa.into_usize() == pa.into_usize())
            .and_then(|pos| guard.remove(pos));
        guard.unlock();
        taken
    }

    /// Pops the eviction victim: the oldest entry.
    pub fn pop_victim(&self) -> Option<Frame> {
        self.frames.lock().pop_front()
    }

    /// Number of registered frames.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether no frames are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
