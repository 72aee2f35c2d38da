//! The supplemental page table.
//!
//! The hardware page table only knows which pages are resident. The
//! supplemental page table is the per-address-space map that remembers,
//! for every user page the process may touch, where its contents come
//! from: a region of a file, anonymous zero-fill, or — after an eviction
//! — a swap slot. The page-fault handler consults it to materialize
//! pages on demand, and teardown walks it to give every resource back.

use crate::{
    fs::file::File,
    mm::{Pa, Va},
    vm::swap::SwapSlot,
};
use std::{collections::BTreeMap, sync::Arc};

/// Where the contents of a not-yet-resident page come from.
pub enum Backing {
    /// A region of a file: `read_bytes` from `offset`, then `zero_bytes`
    /// of zeros.
    File {
        /// The backing file handle (shared by all pages of one mapping).
        file: Arc<File>,
        /// Byte offset of the region inside the file.
        offset: usize,
        /// Bytes to read from the file.
        read_bytes: usize,
        /// Bytes to zero after the read portion.
        zero_bytes: usize,
    },
    /// Zero-filled memory with no backing object.
    Anonymous,
}

/// A supplemental page-table entry: one user page and its backing.
pub struct PageRecord {
    /// The user virtual page this record describes.
    pub upage: Va,
    /// Where the page's contents come from when not resident.
    pub backing: Backing,
    /// Whether user mappings of this page are writable.
    pub writable: bool,
    /// Whether the page is currently resident.
    pub present: bool,
    /// The swap slot holding the page, when it was evicted.
    pub swap_slot: Option<SwapSlot>,
    /// Whether the page belongs to a memory-mapped file region.
    pub is_mmap: bool,
    /// The frame backing the page while resident.
    pub frame: Option<Pa>,
}

/// The per-address-space map from user page to page record.
#[derive(Default)]
pub struct SupplementalPageTable {
    records: BTreeMap<Va, PageRecord>,
}

impl SupplementalPageTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a file-backed record for the page at `upage`, not yet
    /// resident.
    ///
    /// Fails when a record for the page already exists.
    #[allow(clippy::too_many_arguments)]
    pub fn add_file_region(
        &mut self,
        file: Arc<File>,
        offset: usize,
        upage: Va,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
        is_mmap: bool,
    ) -> bool {
        let upage = upage.page_down();
        if self.records.contains_key(&upage) {
            return false;
        }
        self.records.insert(
            upage,
            PageRecord {
                upage,
                backing: Backing::File {
                    file,
                    offset,
                    read_bytes,
                    zero_bytes,
                },
                writable,
                present: false,
                swap_slot: None,
                is_mmap,
                frame: None,
            },
        );
        true
    }

    /// Inserts an anonymous record for the page at `upage`, not yet
    /// resident.
    pub fn add_anonymous(&mut self, upage: Va, writable: bool) -> bool {
        let upage = upage.page_down();
        if self.records.contains_key(&upage) {
            return false;
        }
        self.records.insert(
            upage,
            PageRecord {
                upage,
                backing: Backing::Anonymous,
                writable,
                present: false,
                swap_slot: None,
                is_mmap: false,
                frame: None,
            },
        );
        true
    }

    /// The record for the page containing `va`, if any.
    pub fn lookup(&self, va: Va) -> Option<&PageRecord> {
        self.records.get(&va.page_down())
    }

    /// Mutable access to the record for the page containing `va`.
    pub fn lookup_mut(&mut self, va: Va) -> Option<&mut PageRecord> {
        self.records.get_mut(&va.page_down())
    }

    /// Removes and returns the record for the page containing `va`.
    pub fn remove(&mut self, va: Va) -> Option<PageRecord> {
        self.records.remove(&va.page_down())
    }

    /// Removes and returns every record, for address-space teardown.
    pub fn drain(&mut self) -> Vec<PageRecord> {
        let records = std::mem::take(&mut self.records);
        records.into_values().collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
