//! Per-process state: the address space and its resources.
//!
//! A [`Process`] owns everything the system-call surface can see of a
//! process: a dense file-descriptor table (0 and 1 reserved for the
//! console), a table of active memory mappings, a current working
//! directory, and a [`VmSpace`] holding the page table and supplemental
//! page table.
//!
//! User memory is reached exclusively through [`Process::read_user`] and
//! [`Process::write_user`], which walk the page table, maintain the
//! accessed/dirty bits, and invoke the page-fault handler on a miss —
//! the hosted analog of the MMU. The fault handler implements demand
//! paging: lazy loading of file-backed pages, zero-fill of anonymous
//! pages, swap-in of evicted pages, and stack growth.

use crate::{
    fs::{directory::Directory, file::File, FileSys, FsObject},
    mm::{Va, PAGE_MASK, PAGE_SIZE, USER_TOP},
    mm::page_table::Permission,
    vm::{
        page::{Backing, PageRecord},
        swap::SwapSlot,
        Vm, VmSpace,
    },
    KernelError,
};
use std::{collections::BTreeMap, sync::Arc};

/// Most file descriptors a process may hold open.
pub const MAX_OPEN_FILES: usize = 128;

/// Bytes the user stack may grow to.
pub const STACK_MAX: usize = 8 * 1024 * 1024;

/// First user file descriptor; 0 and 1 are the console.
pub const FIRST_USER_FD: usize = 2;

/// First mmap id handed out.
pub const FIRST_MAP_ID: usize = 2;

/// The page backing the top of the user stack.
fn stack_top_page() -> Va {
    Va::new(USER_TOP - PAGE_SIZE).unwrap()
}

/// What a file descriptor refers to.
pub enum FdEntry {
    /// The console streams reserved at descriptors 0 and 1.
    Stdio,
    /// An open regular file.
    File(File),
    /// An open directory.
    Directory(Directory),
}

/// One active memory mapping: the reopened file and the pages it covers.
struct MmapRecord {
    file: Arc<File>,
    pages: Vec<Va>,
}

enum FaultAction {
    Spurious,
    GrowStack,
    LoadSwap {
        slot: SwapSlot,
        writable: bool,
    },
    LoadFile {
        file: Arc<File>,
        offset: usize,
        read_bytes: usize,
        writable: bool,
    },
    LoadZero {
        writable: bool,
    },
}

/// A process's kernel-visible state.
pub struct Process {
    /// The address space (page table + supplemental page table).
    pub space: Arc<VmSpace>,
    files: BTreeMap<usize, FdEntry>,
    fd_next: usize,
    mmaps: BTreeMap<usize, MmapRecord>,
    mmap_next: usize,
    cwd: Option<Directory>,
    exit_code: Option<i32>,
    /// Bytes written to descriptor 1, kept for inspection.
    pub console: Vec<u8>,
}

impl Process {
    /// A fresh process whose working directory is the root.
    pub fn new(fs: &FileSys) -> Result<Self, KernelError> {
        let cwd = fs.open_root()?;
        Ok(Self::with_cwd(cwd))
    }

    /// A fresh process inheriting `parent`'s working directory, as on
    /// fork/exec.
    pub fn new_inheriting(parent: &Process) -> Result<Self, KernelError> {
        let cwd = parent
            .cwd
            .as_ref()
            .ok_or(KernelError::OperationNotPermitted)?
            .reopen();
        Ok(Self::with_cwd(cwd))
    }

    fn with_cwd(cwd: Directory) -> Self {
        let mut files = BTreeMap::new();
        files.insert(0, FdEntry::Stdio);
        files.insert(1, FdEntry::Stdio);
        Self {
            space: Arc::new(VmSpace::new()),
            files,
            fd_next: FIRST_USER_FD,
            mmaps: BTreeMap::new(),
            mmap_next: FIRST_MAP_ID,
            cwd: Some(cwd),
            exit_code: None,
            console: Vec::new(),
        }
    }

    /// The exit code, once the process has exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn cwd(&self) -> Result<&Directory, KernelError> {
        self.cwd.as_ref().ok_or(KernelError::OperationNotPermitted)
    }

    // ---- file descriptors ------------------------------------------------

    fn install_fd(&mut self, entry: FdEntry) -> Result<usize, KernelError> {
        if self.files.len() >= MAX_OPEN_FILES {
            return Err(KernelError::TooManyOpenFile);
        }
        let fd = self.fd_next;
        self.fd_next += 1;
        self.files.insert(fd, entry);
        Ok(fd)
    }

    /// Creates a file at `path` with `initial_size` zero-filled bytes.
    pub fn create(&self, fs: &FileSys, path: &str, initial_size: u32) -> Result<(), KernelError> {
        fs.create(self.cwd()?, path, initial_size)
    }

    /// Removes the object at `path`.
    pub fn remove(&self, fs: &FileSys, path: &str) -> Result<(), KernelError> {
        fs.remove(self.cwd()?, path)
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&self, fs: &FileSys, path: &str) -> Result<(), KernelError> {
        fs.mkdir(self.cwd()?, path)
    }

    /// Opens `path` and installs a descriptor for it.
    pub fn open(&mut self, fs: &FileSys, path: &str) -> Result<usize, KernelError> {
        if self.files.len() >= MAX_OPEN_FILES {
            return Err(KernelError::TooManyOpenFile);
        }
        let object = fs.open(self.cwd()?, path)?;
        let entry = match object {
            FsObject::File(f) => FdEntry::File(f),
            FsObject::Dir(d) => FdEntry::Directory(d),
        };
        self.install_fd(entry)
    }

    /// Closes descriptor `fd`.
    pub fn close(&mut self, fs: &FileSys, fd: usize) -> Result<(), KernelError> {
        let entry = self
            .files
            .remove(&fd)
            .ok_or(KernelError::BadFileDescriptor)?;
        let guard = fs.fs_lock();
        let result = match entry {
            FdEntry::Stdio => Ok(()),
            FdEntry::File(f) => f.close(fs),
            FdEntry::Directory(d) => d.close(fs),
        };
        guard.unlock();
        result
    }

    fn file_mut(&mut self, fd: usize) -> Result<&mut File, KernelError> {
        match self.files.get_mut(&fd) {
            Some(FdEntry::File(f)) => Ok(f),
            Some(FdEntry::Directory(_)) => Err(KernelError::IsDirectory),
            Some(FdEntry::Stdio) | None => Err(KernelError::BadFileDescriptor),
        }
    }

    fn file(&self, fd: usize) -> Result<&File, KernelError> {
        match self.files.get(&fd) {
            Some(FdEntry::File(f)) => Ok(f),
            Some(FdEntry::Directory(_)) => Err(KernelError::IsDirectory),
            Some(FdEntry::Stdio) | None => Err(KernelError::BadFileDescriptor),
        }
    }

    /// Size in bytes of the object behind `fd`.
    pub fn filesize(&self, fd: usize) -> Result<usize, KernelError> {
        match self.files.get(&fd) {
            Some(FdEntry::File(f)) => Ok(f.size()),
            Some(FdEntry::Directory(d)) => Ok(d.inode().length()),
            Some(FdEntry::Stdio) | None => Err(KernelError::BadFileDescriptor),
        }
    }

    /// Reads from `fd` at its cursor. Descriptor 0 models an exhausted
    /// console and yields 0 bytes.
    pub fn read(&mut self, fs: &FileSys, fd: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        if fd == 0 && matches!(self.files.get(&fd), Some(FdEntry::Stdio)) {
            return Ok(0);
        }
        let file = self.file_mut(fd)?;
        let guard = fs.fs_lock();
        let result = file.read(fs, buf);
        guard.unlock();
        result
    }

    /// Writes to `fd` at its cursor. Descriptor 1 appends to the console
    /// buffer.
    pub fn write(&mut self, fs: &FileSys, fd: usize, buf: &[u8]) -> Result<usize, KernelError> {
        if fd == 1 && matches!(self.files.get(&fd), Some(FdEntry::Stdio)) {
            self.console.extend_from_slice(buf);
            return Ok(buf.len());
        }
        let file = self.file_mut(fd)?;
        let guard = fs.fs_lock();
        let result = file.write(fs, buf);
        guard.unlock();
        result
    }

    /// Moves the cursor of `fd`.
    pub fn seek(&mut self, fd: usize, pos: usize) -> Result<(), KernelError> {
        self.file_mut(fd)?.seek(pos);
        Ok(())
    }

    /// The cursor of `fd`.
    pub fn tell(&self, fd: usize) -> Result<usize, KernelError> {
        Ok(self.file(fd)?.tell())
    }

    /// Whether `fd` names a directory.
    pub fn isdir(&self, fd: usize) -> Result<bool, KernelError> {
        match self.files.get(&fd) {
            Some(FdEntry::Directory(_)) => Ok(true),
            Some(FdEntry::File(_)) => Ok(false),
            Some(FdEntry::Stdio) | None => Err(KernelError::BadFileDescriptor),
        }
    }

    /// The inumber of the object behind `fd`.
    pub fn inumber(&self, fd: usize) -> Result<u32, KernelError> {
        match self.files.get(&fd) {
            Some(FdEntry::File(f)) => Ok(f.inumber()),
            Some(FdEntry::Directory(d)) => Ok(d.sector().0),
            Some(FdEntry::Stdio) | None => Err(KernelError::BadFileDescriptor),
        }
    }

    /// Yields the next entry name of the directory behind `fd`.
    pub fn readdir(&mut self, fs: &FileSys, fd: usize) -> Result<Option<String>, KernelError> {
        match self.files.get_mut(&fd) {
            Some(FdEntry::Directory(d)) => {
                let guard = fs.fs_lock();
                let result = d.readdir(fs);
                guard.unlock();
                result
            }
            Some(_) => Err(KernelError::NotDirectory),
            None => Err(KernelError::BadFileDescriptor),
        }
    }

    /// Replaces the working directory with the directory at `path`.
    pub fn chdir(&mut self, fs: &FileSys, path: &str) -> Result<(), KernelError> {
        let new_cwd = fs.open_dir(self.cwd()?, path)?;
        if let Some(old) = self.cwd.replace(new_cwd) {
            let guard = fs.fs_lock();
            let result = old.close(fs);
            guard.unlock();
            result?;
        }
        Ok(())
    }

    // ---- user memory -----------------------------------------------------

    /// Whether an access to `addr` qualifies for stack growth.
    pub fn is_stack_access(&self, addr: usize) -> bool {
        addr < USER_TOP && addr >= USER_TOP - STACK_MAX
    }

    /// Copies `buf` into user memory at `addr`, faulting pages in as
    /// needed.
    pub fn write_user(
        &self,
        fs: &FileSys,
        vm: &Vm,
        addr: usize,
        buf: &[u8],
    ) -> Result<(), KernelError> {
        self.access_user(fs, vm, addr, buf.len(), true, |pool, pa, off, i, len, _| {
            pool.copy_in(pa, off, &buf[i..i + len]);
        })
    }

    /// Copies user memory at `addr` into `buf`, faulting pages in as
    /// needed.
    pub fn read_user(
        &self,
        fs: &FileSys,
        vm: &Vm,
        addr: usize,
        buf: &mut [u8],
    ) -> Result<(), KernelError> {
        let len = buf.len();
        let out = std::cell::RefCell::new(buf);
        self.access_user(fs, vm, addr, len, false, |pool, pa, off, i, n, _| {
            pool.copy_out(pa, off, &mut out.borrow_mut()[i..i + n]);
        })
    }

    /// Reads a NUL-terminated string out of user memory.
    pub fn read_user_cstring(
        &self,
        fs: &FileSys,
        vm: &Vm,
        addr: usize,
        max: usize,
    ) -> Result<String, KernelError> {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        for i in 0..max {
            self.read_user(fs, vm, addr + i, &mut byte)?;
            if byte[0] == 0 {
                return String::from_utf8(out).map_err(|_| KernelError::InvalidArgument);
            }
            out.push(byte[0]);
        }
        Err(KernelError::NameTooLong)
    }

    fn access_user(
        &self,
        fs: &FileSys,
        vm: &Vm,
        addr: usize,
        len: usize,
        write: bool,
        mut copy: impl FnMut(&crate::mm::UserPool, crate::mm::Pa, usize, usize, usize, bool),
    ) -> Result<(), KernelError> {
        if addr.checked_add(len).map_or(true, |end| end > USER_TOP) {
            return Err(KernelError::BadAddress);
        }
        let mut done = 0;
        while done < len {
            let cur = addr + done;
            let va = Va::new(cur).ok_or(KernelError::BadAddress)?;
            let chunk = (PAGE_SIZE - va.offset()).min(len - done);

            let mut attempts = 0;
            loop {
                let mut inner = self.space.inner.lock();
                match inner.page_table.lookup(va) {
                    Some(pte) => {
                        if write && !pte.is_writable() {
                            inner.unlock();
                            return Err(KernelError::BadAddress);
                        }
                        let pa = pte.pa();
                        inner.page_table.set_accessed(va, write);
                        copy(&vm.pool, pa, va.offset(), done, chunk, write);
                        inner.unlock();
                        break;
                    }
                    None => {
                        inner.unlock();
                        // A freshly installed page can be evicted again
                        // before this thread re-checks; a handful of
                        // retries covers that window.
                        if attempts >= 4 {
                            return Err(KernelError::BadAddress);
                        }
                        attempts += 1;
                        self.page_fault(fs, vm, cur, self.is_stack_access(cur))?;
                    }
                }
            }
            done += chunk;
        }
        Ok(())
    }

    // ---- demand paging ---------------------------------------------------

    /// Handles a fault on `addr`.
    ///
    /// `stack_access` tells whether the faulting access pattern qualifies
    /// as a stack access; the bridge derives it from the trapped stack
    /// pointer. An unmapped non-stack address is a user error and comes
    /// back as [`KernelError::BadAddress`], which the system-call layer
    /// turns into `exit(-1)`.
    pub fn page_fault(
        &self,
        fs: &FileSys,
        vm: &Vm,
        addr: usize,
        stack_access: bool,
    ) -> Result<(), KernelError> {
        let va = Va::new(addr).ok_or(KernelError::BadAddress)?;
        let upage = va.page_down();

        let inner = self.space.inner.lock();
        let action = match inner.spt.lookup(upage) {
            None if stack_access => FaultAction::GrowStack,
            None => {
                inner.unlock();
                log::debug!("fault: no record for {upage:?}");
                return Err(KernelError::BadAddress);
            }
            Some(record) if record.present => FaultAction::Spurious,
            Some(record) => match (&record.swap_slot, &record.backing) {
                (Some(slot), _) => FaultAction::LoadSwap {
                    slot: *slot,
                    writable: record.writable,
                },
                (None, Backing::File {
                    file,
                    offset,
                    read_bytes,
                    ..
                }) => FaultAction::LoadFile {
                    file: Arc::clone(file),
                    offset: *offset,
                    read_bytes: *read_bytes,
                    writable: record.writable,
                },
                (None, Backing::Anonymous) => FaultAction::LoadZero {
                    writable: record.writable,
                },
            },
        };
        inner.unlock();

        match action {
            FaultAction::Spurious => Ok(()),
            FaultAction::GrowStack => self.grow_stack(vm, upage),
            FaultAction::LoadSwap { slot, writable } => {
                let pa = vm.frame_alloc()?;
                if let Err(e) = vm.swap.swap_in(&vm.pool, slot, pa) {
                    vm.pool.free(pa);
                    return Err(e);
                }
                self.install_page(vm, upage, pa, writable)
            }
            FaultAction::LoadFile {
                file,
                offset,
                read_bytes,
                writable,
            } => {
                let pa = vm.frame_alloc()?;
                let mut page = vec![0u8; PAGE_SIZE];
                match file.read_at(fs, &mut page[..read_bytes], offset) {
                    Ok(n) if n == read_bytes => {}
                    Ok(_) => {
                        vm.pool.free(pa);
                        return Err(KernelError::IOError);
                    }
                    Err(e) => {
                        vm.pool.free(pa);
                        return Err(e);
                    }
                }
                vm.pool.copy_in(pa, 0, &page);
                self.install_page(vm, upage, pa, writable)
            }
            FaultAction::LoadZero { writable } => {
                let pa = vm.frame_alloc()?;
                self.install_page(vm, upage, pa, writable)
            }
        }
    }

    /// Allocates and installs zero-filled writable pages for every page
    /// from `upage` through the top-of-stack page not yet present.
    fn grow_stack(&self, vm: &Vm, upage: Va) -> Result<(), KernelError> {
        let mut cur = upage;
        while cur <= stack_top_page() {
            let mut inner = self.space.inner.lock();
            let missing = inner.spt.lookup(cur).is_none();
            if missing {
                inner.spt.add_anonymous(cur, true);
            }
            inner.unlock();
            if missing {
                let pa = vm.frame_alloc()?;
                self.install_page(vm, cur, pa, true)?;
            }
            cur = cur + PAGE_SIZE;
        }
        Ok(())
    }

    /// Maps `pa` at `upage` and records the residency.
    ///
    /// The space lock is held across the page-table install, the record
    /// update, and the frame-table insert, so the new frame cannot be
    /// selected for eviction before it is fully recorded.
    fn install_page(&self, vm: &Vm, upage: Va, pa: crate::mm::Pa, writable: bool) -> Result<(), KernelError> {
        let mut inner = self.space.inner.lock();
        if inner
            .spt
            .lookup(upage)
            .is_some_and(|record| record.present)
        {
            // Lost a race with another access to the same page.
            inner.unlock();
            vm.pool.free(pa);
            return Ok(());
        }
        let mut perm = Permission::READ | Permission::USER;
        if writable {
            perm |= Permission::WRITE;
        }
        if inner.page_table.map(upage, pa, perm).is_err() {
            inner.unlock();
            vm.pool.free(pa);
            return Err(KernelError::InvalidArgument);
        }
        let record = inner
            .spt
            .lookup_mut(upage)
            .expect("installed page must have a record");
        record.present = true;
        record.frame = Some(pa);
        record.swap_slot = None;
        vm.frames.insert(pa, upage, &self.space);
        inner.unlock();
        Ok(())
    }

    // ---- executable segments and the stack -------------------------------

    /// Records lazily loaded file-backed pages for an executable segment:
    /// `read_bytes` from `offset`, then `zero_bytes` of zeros, mapped at
    /// `upage` with the given writability. Nothing is loaded until the
    /// first fault.
    pub fn map_segment(
        &self,
        file: &Arc<File>,
        mut offset: usize,
        upage: Va,
        mut read_bytes: usize,
        mut zero_bytes: usize,
        writable: bool,
    ) -> Result<(), KernelError> {
        assert_eq!(upage.offset(), 0);
        assert_eq!((read_bytes + zero_bytes) % PAGE_SIZE, 0);
        let mut cur = upage;
        while read_bytes > 0 || zero_bytes > 0 {
            let page_read = read_bytes.min(PAGE_SIZE);
            let page_zero = PAGE_SIZE - page_read;
            let mut inner = self.space.inner.lock();
            let inserted = inner.spt.add_file_region(
                Arc::clone(file),
                offset,
                cur,
                page_read,
                page_zero,
                writable,
                false,
            );
            inner.unlock();
            if !inserted {
                return Err(KernelError::InvalidArgument);
            }
            read_bytes -= page_read;
            zero_bytes -= page_zero;
            offset += page_read;
            cur = cur + PAGE_SIZE;
        }
        Ok(())
    }

    /// Installs the initial zero-filled stack page just below the top of
    /// user memory.
    pub fn setup_stack(&self, vm: &Vm) -> Result<(), KernelError> {
        let upage = stack_top_page();
        let mut inner = self.space.inner.lock();
        let inserted = inner.spt.add_anonymous(upage, true);
        inner.unlock();
        if !inserted {
            return Err(KernelError::InvalidArgument);
        }
        let pa = vm.frame_alloc()?;
        self.install_page(vm, upage, pa, true)
    }

    // ---- memory-mapped files ---------------------------------------------

    /// Maps the whole of the file behind `fd` at `addr`.
    ///
    /// `addr` must be non-null and page-aligned, and the region must not
    /// overlap any existing mapping. The file handle is duplicated, so
    /// closing `fd` does not tear the mapping down. Every page is loaded
    /// eagerly. Returns the mapping id.
    pub fn mmap(&mut self, fs: &FileSys, vm: &Vm, fd: usize, addr: usize) -> Result<usize, KernelError> {
        if addr == 0 || addr & PAGE_MASK != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let length = self.file(fd)?.size();
        if length == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let page_cnt = length.div_ceil(PAGE_SIZE);
        addr.checked_add(page_cnt * PAGE_SIZE)
            .filter(|end| *end <= USER_TOP)
            .ok_or(KernelError::InvalidArgument)?;

        let mut pages = Vec::with_capacity(page_cnt);
        {
            let inner = self.space.inner.lock();
            for i in 0..page_cnt {
                let upage = Va::new(addr + i * PAGE_SIZE).ok_or(KernelError::InvalidArgument)?;
                if inner.spt.lookup(upage).is_some() {
                    inner.unlock();
                    return Err(KernelError::InvalidArgument);
                }
                pages.push(upage);
            }
            inner.unlock();
        }

        let file = Arc::new(self.file(fd)?.reopen());
        {
            let mut inner = self.space.inner.lock();
            let mut remaining = length;
            for (i, upage) in pages.iter().enumerate() {
                let read_bytes = remaining.min(PAGE_SIZE);
                inner.spt.add_file_region(
                    Arc::clone(&file),
                    i * PAGE_SIZE,
                    *upage,
                    read_bytes,
                    PAGE_SIZE - read_bytes,
                    true,
                    true,
                );
                remaining -= read_bytes;
            }
            inner.unlock();
        }
        // Mapped regions are populated up front.
        for upage in &pages {
            self.page_fault(fs, vm, upage.into_usize(), false)?;
        }

        let id = self.mmap_next;
        self.mmap_next += 1;
        self.mmaps.insert(id, MmapRecord { file, pages });
        log::debug!("mmap: id {id} covers {page_cnt} pages at 0x{addr:x}");
        Ok(id)
    }

    /// Unmaps mapping `id`, writing modified pages back to the file.
    pub fn munmap(&mut self, fs: &FileSys, vm: &Vm, id: usize) -> Result<(), KernelError> {
        let record = self.mmaps.remove(&id).ok_or(KernelError::InvalidArgument)?;
        for upage in &record.pages {
            self.unmap_page(fs, vm, *upage, true)?;
        }
        if let Ok(file) = Arc::try_unwrap(record.file) {
            let guard = fs.fs_lock();
            let result = file.close(fs);
            guard.unlock();
            result?;
        }
        Ok(())
    }

    /// Tears down the page at `upage`: releases its frame or swap slot,
    /// clears the mappings, and (for mmap pages, when `write_back`) writes
    /// modified contents to the backing file.
    fn unmap_page(
        &self,
        fs: &FileSys,
        vm: &Vm,
        upage: Va,
        write_back: bool,
    ) -> Result<(), KernelError> {
        let mut inner = self.space.inner.lock();
        let Some(record) = inner.spt.remove(upage) else {
            inner.unlock();
            return Ok(());
        };
        let dirty = inner.page_table.is_dirty(upage);
        inner.page_table.clear(upage);

        let mut captured: Option<Vec<u8>> = None;
        if let Some(pa) = record.frame {
            vm.frames.remove(pa);
            if write_back && record.is_mmap && dirty {
                let mut page = vec![0u8; PAGE_SIZE];
                vm.pool.copy_out(pa, 0, &mut page);
                captured = Some(page);
            }
        }
        inner.unlock();

        if write_back && record.is_mmap {
            if let Backing::File {
                file,
                offset,
                read_bytes,
                ..
            } = &record.backing
            {
                let page = match (captured.take(), record.swap_slot) {
                    (Some(page), _) => Some(page),
                    (None, Some(slot)) => {
                        // The page was evicted; the dirty bit went with the
                        // mapping, so the swapped image is written back
                        // unconditionally.
                        let mut page = [0u8; PAGE_SIZE];
                        vm.swap.read_slot(slot, &mut page)?;
                        Some(page.to_vec())
                    }
                    (None, None) => None,
                };
                if let Some(page) = page {
                    let guard = fs.fs_lock();
                    let result = file.write_at(fs, &page[..*read_bytes], *offset);
                    guard.unlock();
                    result?;
                }
            }
        }

        if let Some(pa) = record.frame {
            vm.pool.free(pa);
        }
        if let Some(slot) = record.swap_slot {
            vm.swap.free_slot(slot);
        }
        Ok(())
    }

    // ---- teardown --------------------------------------------------------

    /// Terminates the process: unmaps every mapping, closes every
    /// descriptor and the working directory, and destroys the address
    /// space. Idempotent.
    pub fn exit(&mut self, fs: &FileSys, vm: &Vm, status: i32) {
        if self.exit_code.is_some() {
            return;
        }
        let ids: Vec<usize> = self.mmaps.keys().copied().collect();
        for id in ids {
            if self.munmap(fs, vm, id).is_err() {
                log::warn!("exit: write-back of mapping {id} failed");
            }
        }

        let files = std::mem::take(&mut self.files);
        let guard = fs.fs_lock();
        for (_, entry) in files {
            let result = match entry {
                FdEntry::Stdio => Ok(()),
                FdEntry::File(f) => f.close(fs),
                FdEntry::Directory(d) => d.close(fs),
            };
            if result.is_err() {
                log::warn!("exit: closing a descriptor failed");
            }
        }
        if let Some(cwd) = self.cwd.take() {
            if cwd.close(fs).is_err() {
                log::warn!("exit: closing the working directory failed");
            }
        }
        guard.unlock();

        self.destroy_space(vm);
        self.exit_code = Some(status);
        log::info!("process: exit({status})");
    }

    /// Releases every page of the address space: resident frames go back
    /// to the pool (and leave the frame table), swapped pages release
    /// their slots.
    fn destroy_space(&self, vm: &Vm) {
        let mut inner = self.space.inner.lock();
        let records: Vec<PageRecord> = inner.spt.drain();
        for record in &records {
            inner.page_table.clear(record.upage);
            if let Some(pa) = record.frame {
                vm.frames.remove(pa);
            }
        }
        inner.unlock();
        for record in records {
            if let Some(pa) = record.frame {
                vm.pool.free(pa);
            }
            if let Some(slot) = record.swap_slot {
                vm.swap.free_slot(slot);
            }
        }
    }
}
