//! In-memory inodes and the open-inode table.
//!
//! An [`Inode`] is the authoritative metadata object for a file or
//! directory: it caches the on-disk record, tracks the number of openers
//! and the deny-write count, and maps byte offsets to device sectors
//! through the three index levels (twelve direct pointers, one indirect
//! block, one doubly-indirect block).
//!
//! The [`InodeTable`] maintains the **single, global view** invariant: at
//! most one in-memory inode exists per on-disk sector. Opening a sector
//! that is already open returns the existing object with its open count
//! bumped; the object is destroyed when the count reaches zero, at which
//! point a removed inode gives all of its sectors back to the free map and
//! a live one has its record written through the cache and flushed.
//!
//! All sector traffic of this layer goes through the block cache; the
//! inode layer never talks to the device directly.

use crate::{
    dev::{Sector, SECTOR_SIZE},
    fs::{
        disk_layout::{
            bytes_to_sectors, BlockPtr, DiskInode, IndirectBlock, DIRECT_BLOCKS, INODE_MAGIC,
            MAX_FILE_SECTORS, PTRS_PER_BLOCK,
        },
        FileSys,
    },
    sync::SpinLock,
    KernelError,
};
use std::{collections::BTreeMap, sync::Arc};

const ZEROS: [u8; SECTOR_SIZE] = [0; SECTOR_SIZE];

struct InodeState {
    open_cnt: usize,
    removed: bool,
    deny_write_cnt: usize,
    /// Cached copy of the on-disk record.
    data: DiskInode,
    /// Allocated data sectors reachable through the direct pointers.
    direct_cnt: usize,
    /// Allocated data sectors reachable through the indirect block.
    indirect_cnt: usize,
    /// Allocated data sectors reachable through the doubly-indirect block.
    dindirect_cnt: usize,
}

impl InodeState {
    fn from_record(data: DiskInode) -> Self {
        let sectors = bytes_to_sectors(data.length as usize);
        let (direct_cnt, indirect_cnt, dindirect_cnt) = if sectors <= DIRECT_BLOCKS {
            (sectors, 0, 0)
        } else if sectors <= DIRECT_BLOCKS + PTRS_PER_BLOCK {
            (DIRECT_BLOCKS, sectors - DIRECT_BLOCKS, 0)
        } else {
            (
                DIRECT_BLOCKS,
                PTRS_PER_BLOCK,
                sectors - DIRECT_BLOCKS - PTRS_PER_BLOCK,
            )
        };
        Self {
            open_cnt: 1,
            removed: false,
            deny_write_cnt: 0,
            data,
            direct_cnt,
            indirect_cnt,
            dindirect_cnt,
        }
    }

    fn allocated_sectors(&self) -> usize {
        self.direct_cnt + self.indirect_cnt + self.dindirect_cnt
    }
}

/// An in-memory inode.
pub struct Inode {
    sector: Sector,
    /// The per-inode mutex; held across growth and the length persist.
    state: SpinLock<InodeState>,
}

/// The global list of open in-memory inodes, keyed by inode sector.
#[derive(Default)]
pub struct InodeTable {
    inner: SpinLock<BTreeMap<u32, Arc<Inode>>>,
}

impl InodeTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the inode whose record lives at `sector`.
    ///
    /// Returns the existing in-memory inode (open count bumped) if one is
    /// installed, otherwise reads the record through the cache, recomputes
    /// the per-level sector counts from the length, and installs a fresh
    /// entry.
    pub fn open(&self, fs: &FileSys, sector: Sector) -> Result<Arc<Inode>, KernelError> {
        let mut guard = self.inner.lock();
        if let Some(inode) = guard.get(&sector.0) {
            let inode = Arc::clone(inode);
            inode.state.lock().open_cnt += 1;
            guard.unlock();
            return Ok(inode);
        }

        let mut buf = [0u8; SECTOR_SIZE];
        if let Err(e) = fs.cache.read(sector, &mut buf) {
            guard.unlock();
            return Err(e);
        }
        let record = DiskInode::from_bytes(&buf);
        if record.magic != INODE_MAGIC {
            guard.unlock();
            return Err(KernelError::FilesystemCorrupted("inode magic mismatch"));
        }
        let inode = Arc::new(Inode {
            sector,
            state: SpinLock::new(InodeState::from_record(record)),
        });
        guard.insert(sector.0, Arc::clone(&inode));
        guard.unlock();
        Ok(inode)
    }

    fn take_if_closed(&self, sector: Sector) -> Option<Arc<Inode>> {
        let mut guard = self.inner.lock();
        let closed = guard
            .get(&sector.0)
            .is_some_and(|inode| inode.state.lock().open_cnt == 0);
        let taken = if closed { guard.remove(&sector.0) } else { None };
        guard.unlock();
        taken
    }

    /// Number of installed inodes.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inode {
    /// Writes a fresh on-disk inode at `sector` and allocates zero-filled
    /// data sectors covering `length` bytes.
    ///
    /// On allocation failure the record is not written and the error is
    /// returned; sectors already claimed by the failing attempt are leaked
    /// until the next format (a documented limitation of this generation).
    pub fn create(
        fs: &FileSys,
        sector: Sector,
        length: u32,
        is_dir: bool,
        parent: Sector,
    ) -> Result<(), KernelError> {
        let mut state = InodeState {
            open_cnt: 0,
            removed: false,
            deny_write_cnt: 0,
            data: DiskInode::new(0, is_dir, parent),
            direct_cnt: 0,
            indirect_cnt: 0,
            dindirect_cnt: 0,
        };
        grow(&mut state, fs, length as usize)?;
        state.data.length = length;
        fs.cache.write(sector, state.data.as_bytes())
    }

    /// The sector of the on-disk record; doubles as the inumber.
    #[inline]
    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// File size in bytes.
    pub fn length(&self) -> usize {
        self.state.lock().data.length as usize
    }

    /// Whether this inode is a directory.
    pub fn is_dir(&self) -> bool {
        self.state.lock().data.is_dir != 0
    }

    /// Sector of the parent directory's inode.
    pub fn parent(&self) -> Sector {
        Sector(self.state.lock().data.parent)
    }

    /// Current number of openers.
    pub fn open_cnt(&self) -> usize {
        self.state.lock().open_cnt
    }

    /// Whether the inode is marked for deletion.
    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// Bumps the open count of an already-open inode.
    pub fn reopen(self: &Arc<Self>) {
        let mut guard = self.state.lock();
        debug_assert!(guard.open_cnt > 0);
        guard.open_cnt += 1;
        guard.unlock();
    }

    /// Marks the inode to be deleted when the last opener closes it.
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }

    /// Disables writes to this inode. May be called at most once per
    /// opener.
    pub fn deny_write(&self) {
        let mut guard = self.state.lock();
        guard.deny_write_cnt += 1;
        assert!(guard.deny_write_cnt <= guard.open_cnt);
        guard.unlock();
    }

    /// Re-enables writes. Must pair with an earlier [`Inode::deny_write`]
    /// by the same opener, before that opener closes the inode.
    pub fn allow_write(&self) {
        let mut guard = self.state.lock();
        assert!(guard.deny_write_cnt > 0);
        assert!(guard.deny_write_cnt <= guard.open_cnt);
        guard.deny_write_cnt -= 1;
        guard.unlock();
    }

    /// Drops one reference to the inode.
    ///
    /// When the open count reaches zero the inode leaves the table. A
    /// removed inode returns every data sector, its index blocks, and the
    /// record sector to the free map; a live one has its record written
    /// through the cache, after which the cache is flushed so that durable
    /// state reflects all writes issued through this inode.
    pub fn close(self: &Arc<Self>, fs: &FileSys) -> Result<(), KernelError> {
        let mut guard = self.state.lock();
        debug_assert!(guard.open_cnt > 0);
        guard.open_cnt -= 1;
        if guard.open_cnt > 0 {
            guard.unlock();
            return Ok(());
        }
        let removed = guard.removed;
        guard.unlock();

        // Last opener: detach from the table before touching the disk so a
        // re-open cannot observe a half-torn-down inode. A concurrent open
        // that won the race keeps the inode alive.
        if fs.inodes.take_if_closed(self.sector).is_none() {
            return Ok(());
        }
        if removed {
            let guard = self.state.lock();
            let result = free_blocks(&guard, fs);
            guard.unlock();
            fs.free_map.release(self.sector, 1);
            fs.cache.discard(self.sector);
            result
        } else {
            let guard = self.state.lock();
            let record = guard.data;
            guard.unlock();
            fs.cache.write(self.sector, record.as_bytes())?;
            fs.cache.flush()?;
            fs.cache.drop_entry(self.sector)
        }
    }

    /// Returns the device sector holding byte `pos`, or `None` when `pos`
    /// lies beyond the end of the file.
    pub fn byte_to_sector(&self, fs: &FileSys, pos: usize) -> Result<Option<Sector>, KernelError> {
        let guard = self.state.lock();
        let result = locate(&guard, fs, pos);
        guard.unlock();
        result
    }

    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes actually read, which is short when the
    /// end of the file intervenes.
    pub fn read_at(&self, fs: &FileSys, buf: &mut [u8], offset: usize) -> Result<usize, KernelError> {
        let mut bytes_read = 0;
        while bytes_read < buf.len() {
            let pos = offset + bytes_read;
            let guard = self.state.lock();
            let length = guard.data.length as usize;
            let sector = locate(&guard, fs, pos);
            guard.unlock();
            let sector = sector?;

            let sector_ofs = pos % SECTOR_SIZE;
            let inode_left = length.saturating_sub(pos);
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = (buf.len() - bytes_read).min(inode_left).min(sector_left);
            if chunk == 0 {
                break;
            }

            let dst = &mut buf[bytes_read..bytes_read + chunk];
            match sector {
                Some(s) => fs.cache.read_at(s, sector_ofs, dst)?,
                None => dst.fill(0),
            }
            bytes_read += chunk;
        }
        Ok(bytes_read)
    }

    /// Writes `buf` at `offset`, extending the inode first when the write
    /// reaches past the current end.
    ///
    /// Returns the number of bytes written: `0` when writes are denied or
    /// when the extension cannot be satisfied.
    pub fn write_at(&self, fs: &FileSys, buf: &[u8], offset: usize) -> Result<usize, KernelError> {
        let mut guard = self.state.lock();
        if guard.deny_write_cnt > 0 {
            guard.unlock();
            return Ok(0);
        }
        if offset + buf.len() > guard.data.length as usize {
            // Extend under the inode lock and persist the new length before
            // any data is written.
            match grow(&mut guard, fs, offset + buf.len()) {
                Ok(()) => {
                    guard.data.length = (offset + buf.len()) as u32;
                    let record = guard.data;
                    if let Err(e) = fs.cache.write(self.sector, record.as_bytes()) {
                        guard.unlock();
                        return Err(e);
                    }
                }
                Err(KernelError::NoSpace) => {
                    guard.unlock();
                    log::debug!("inode {}: extension failed, no space", self.sector.0);
                    return Ok(0);
                }
                Err(e) => {
                    guard.unlock();
                    return Err(e);
                }
            }
        }
        guard.unlock();

        let mut bytes_written = 0;
        while bytes_written < buf.len() {
            let pos = offset + bytes_written;
            let guard = self.state.lock();
            let length = guard.data.length as usize;
            let sector = locate(&guard, fs, pos);
            guard.unlock();
            let sector = sector?;

            let sector_ofs = pos % SECTOR_SIZE;
            let inode_left = length.saturating_sub(pos);
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = (buf.len() - bytes_written).min(inode_left).min(sector_left);
            if chunk == 0 {
                break;
            }

            let Some(s) = sector else {
                return Err(KernelError::FilesystemCorrupted("hole inside file"));
            };
            fs.cache
                .write_at(s, sector_ofs, &buf[bytes_written..bytes_written + chunk])?;
            bytes_written += chunk;
        }
        Ok(bytes_written)
    }
}

/// Maps byte offset `pos` to its data sector under the held state lock.
fn locate(state: &InodeState, fs: &FileSys, pos: usize) -> Result<Option<Sector>, KernelError> {
    if pos >= state.data.length as usize {
        return Ok(None);
    }
    let s = pos / SECTOR_SIZE;
    if s < DIRECT_BLOCKS {
        return Ok(state.data.direct[s].map(BlockPtr::sector));
    }
    if s < DIRECT_BLOCKS + PTRS_PER_BLOCK {
        let Some(indirect) = state.data.indirect else {
            return Ok(None);
        };
        let block = read_index_block(fs, indirect.sector())?;
        return Ok(block.ptrs[s - DIRECT_BLOCKS].map(BlockPtr::sector));
    }
    let Some(dindirect) = state.data.dindirect else {
        return Ok(None);
    };
    let diff = s - DIRECT_BLOCKS - PTRS_PER_BLOCK;
    let outer = read_index_block(fs, dindirect.sector())?;
    let Some(inner_ptr) = outer.ptrs[diff / PTRS_PER_BLOCK] else {
        return Ok(None);
    };
    let inner = read_index_block(fs, inner_ptr.sector())?;
    Ok(inner.ptrs[diff % PTRS_PER_BLOCK].map(BlockPtr::sector))
}

fn read_index_block(fs: &FileSys, sector: Sector) -> Result<IndirectBlock, KernelError> {
    let mut buf = [0u8; SECTOR_SIZE];
    fs.cache.read(sector, &mut buf)?;
    Ok(IndirectBlock::from_bytes(&buf))
}

fn write_index_block(fs: &FileSys, sector: Sector, block: &IndirectBlock) -> Result<(), KernelError> {
    fs.cache.write(sector, block.as_bytes())
}

/// Allocates a zero-filled data sector and registers it in the free map.
fn alloc_zeroed(fs: &FileSys) -> Result<BlockPtr, KernelError> {
    let sector = fs.free_map.allocate(1)?;
    fs.cache.write(sector, &ZEROS)?;
    Ok(BlockPtr::new(sector).expect("free map never hands out the reserved sector"))
}

/// Extends `state` with zero-filled sectors until it covers `new_length`
/// bytes, filling the direct pointers first, then the indirect block, then
/// the doubly-indirect tree.
fn grow(state: &mut InodeState, fs: &FileSys, new_length: usize) -> Result<(), KernelError> {
    let target = bytes_to_sectors(new_length);
    if target > MAX_FILE_SECTORS {
        return Err(KernelError::NoSpace);
    }
    while state.allocated_sectors() < target {
        if state.direct_cnt < DIRECT_BLOCKS {
            state.data.direct[state.direct_cnt] = Some(alloc_zeroed(fs)?);
            state.direct_cnt += 1;
        } else if state.indirect_cnt < PTRS_PER_BLOCK {
            if state.indirect_cnt == 0 {
                state.data.indirect = Some(alloc_zeroed(fs)?);
            }
            let indirect = state.data.indirect.unwrap().sector();
            let mut block = read_index_block(fs, indirect)?;
            block.ptrs[state.indirect_cnt] = Some(alloc_zeroed(fs)?);
            write_index_block(fs, indirect, &block)?;
            state.indirect_cnt += 1;
        } else {
            let outer_idx = state.dindirect_cnt / PTRS_PER_BLOCK;
            let inner_idx = state.dindirect_cnt % PTRS_PER_BLOCK;
            if state.dindirect_cnt == 0 {
                state.data.dindirect = Some(alloc_zeroed(fs)?);
            }
            let dindirect = state.data.dindirect.unwrap().sector();
            let mut outer = read_index_block(fs, dindirect)?;
            if inner_idx == 0 {
                outer.ptrs[outer_idx] = Some(alloc_zeroed(fs)?);
                write_index_block(fs, dindirect, &outer)?;
            }
            let inner_sector = outer.ptrs[outer_idx].unwrap().sector();
            let mut inner = read_index_block(fs, inner_sector)?;
            inner.ptrs[inner_idx] = Some(alloc_zeroed(fs)?);
            write_index_block(fs, inner_sector, &inner)?;
            state.dindirect_cnt += 1;
        }
    }
    Ok(())
}

/// Returns every data sector and index block of a removed inode to the
/// free map. The record sector itself is released by the caller.
fn free_blocks(state: &InodeState, fs: &FileSys) -> Result<(), KernelError> {
    for i in 0..state.direct_cnt {
        let ptr = state.data.direct[i].expect("direct count exceeds pointers");
        fs.free_map.release(ptr.sector(), 1);
        fs.cache.discard(ptr.sector());
    }

    if state.indirect_cnt > 0 {
        let indirect = state.data.indirect.expect("indirect count without block");
        let block = read_index_block(fs, indirect.sector())?;
        for i in 0..state.indirect_cnt {
            let ptr = block.ptrs[i].expect("indirect count exceeds slots");
            fs.free_map.release(ptr.sector(), 1);
            fs.cache.discard(ptr.sector());
        }
        fs.free_map.release(indirect.sector(), 1);
        fs.cache.discard(indirect.sector());
    }

    if state.dindirect_cnt > 0 {
        let dindirect = state.data.dindirect.expect("doubly-indirect count without block");
        let outer = read_index_block(fs, dindirect.sector())?;
        let mut remaining = state.dindirect_cnt;
        let mut outer_idx = 0;
        while remaining > 0 {
            let inner_ptr = outer.ptrs[outer_idx].expect("doubly-indirect count exceeds slots");
            let inner = read_index_block(fs, inner_ptr.sector())?;
            let in_this_block = remaining.min(PTRS_PER_BLOCK);
            for j in 0..in_this_block {
                let ptr = inner.ptrs[j].expect("inner count exceeds slots");
                fs.free_map.release(ptr.sector(), 1);
                fs.cache.discard(ptr.sector());
            }
            fs.free_map.release(inner_ptr.sector(), 1);
            fs.cache.discard(inner_ptr.sector());
            remaining -= in_this_block;
            outer_idx += 1;
        }
        fs.free_map.release(dindirect.sector(), 1);
        fs.cache.discard(dindirect.sector());
    }
    Ok(())
}
