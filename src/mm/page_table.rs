//! Entries of the page table and their permissions.
//!
//! The hardware page table of a real machine is modeled per address space
//! as a map from user virtual page to a [`Pte`]. The entry carries the
//! same flag bits the memory-management unit would maintain: present,
//! writable, user, accessed, and dirty. The user-memory accessors set the
//! accessed and dirty bits on every load and store, which is what the
//! `mmap` write-back path and eviction bookkeeping consult.

use crate::mm::{Pa, Va};
use std::collections::BTreeMap;

bitflags::bitflags! {
    /// Flags of a page-table entry.
    pub struct PteFlags: usize {
        /// Present; must be 1 to map a page.
        const P = 1 << 0;
        /// Read/write; if 0, writes are not allowed to the page.
        const RW = 1 << 1;
        /// User; user-mode accesses are allowed to the page.
        const US = 1 << 2;
        /// Accessed; set whenever the page has been read or written.
        const A = 1 << 5;
        /// Dirty; set whenever the page has been written.
        const D = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Possible memory permissions for a mapped page.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page can be referred to by a user application.
        const USER = 1 << 3;
    }
}

/// Page-table mapping error.
#[derive(Debug, PartialEq, Eq)]
pub enum PageTableMappingError {
    /// The address is not page-aligned.
    Unaligned,
    /// No mapping exists for the address.
    NotExist,
    /// A mapping already exists for the address.
    Duplicated,
}

/// A page-table entry.
#[derive(Clone, Copy)]
pub struct Pte {
    pa: Pa,
    flags: PteFlags,
}

impl Pte {
    /// The frame this entry maps.
    #[inline]
    pub fn pa(&self) -> Pa {
        self.pa
    }

    /// The flags of this entry.
    #[inline]
    pub fn flags(&self) -> PteFlags {
        self.flags
    }

    /// Whether the mapped page may be written.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::RW)
    }
}

/// The page table of one address space.
#[derive(Default)]
pub struct PageTable {
    entries: BTreeMap<Va, Pte>,
}

impl PageTable {
    /// An empty page table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a mapping from the page at `va` to the frame at `pa`.
    pub fn map(&mut self, va: Va, pa: Pa, perm: Permission) -> Result<(), PageTableMappingError> {
        if va.offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        if self.entries.contains_key(&va) {
            return Err(PageTableMappingError::Duplicated);
        }
        let mut flags = PteFlags::P | PteFlags::US;
        if perm.contains(Permission::WRITE) {
            flags |= PteFlags::RW;
        }
        self.entries.insert(va, Pte { pa, flags });
        Ok(())
    }

    /// Removes the mapping for the page at `va`, returning its frame.
    pub fn clear(&mut self, va: Va) -> Option<Pa> {
        self.entries.remove(&va.page_down()).map(|pte| pte.pa)
    }

    /// The entry mapping the page at `va`, if present.
    pub fn lookup(&self, va: Va) -> Option<&Pte> {
        self.entries.get(&va.page_down())
    }

    /// Marks the page at `va` accessed, and dirty when `write` is set.
    ///
    /// This is the bookkeeping the hardware would do on every access.
    pub fn set_accessed(&mut self, va: Va, write: bool) {
        if let Some(pte) = self.entries.get_mut(&va.page_down()) {
            pte.flags |= PteFlags::A;
            if write {
                pte.flags |= PteFlags::D;
            }
        }
    }

    /// Whether the page at `va` has been written since it was mapped.
    pub fn is_dirty(&self, va: Va) -> bool {
        self.lookup(va)
            .is_some_and(|pte| pte.flags.contains(PteFlags::D))
    }

    /// Whether the page at `va` has been accessed since it was mapped.
    pub fn is_accessed(&self, va: Va) -> bool {
        self.lookup(va)
            .is_some_and(|pte| pte.flags.contains(PteFlags::A))
    }

    /// Number of present mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no mappings are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
