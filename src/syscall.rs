//! The system-call surface.
//!
//! The external bridge decodes the trap frame, assigns the numeric codes
//! of [`SyscallNo`], and validates that argument pointers lie inside the
//! user range before delivering them here. [`handle`] demultiplexes one
//! decoded call onto the kernel services, pulling strings and buffers out
//! of user memory through the faulting accessors of
//! [`Process`].
//!
//! Error surfacing follows the kernel's contract: operations report `-1`
//! or `false` to their caller, and an invalid user pointer terminates the
//! offending process with exit code `-1`. Errors never cross process
//! boundaries.

use crate::{
    fs::disk_layout::NAME_MAX,
    process::Process,
    Kernel, KernelError,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Longest path accepted from user memory.
pub const PATH_MAX: usize = 1024;

/// Transfer granularity for user-buffer reads and writes.
const IO_CHUNK: usize = 8192;

/// Numeric system-call codes, in ABI order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(usize)]
pub enum SyscallNo {
    /// Shut the system down.
    Halt = 0,
    /// Terminate the calling process.
    Exit,
    /// Start another program (handled outside the core).
    Exec,
    /// Wait for a child (handled outside the core).
    Wait,
    /// Create a file.
    Create,
    /// Remove a file or empty directory.
    Remove,
    /// Open a file or directory.
    Open,
    /// Size of an open file.
    Filesize,
    /// Read from a descriptor.
    Read,
    /// Write to a descriptor.
    Write,
    /// Move a descriptor's cursor.
    Seek,
    /// Report a descriptor's cursor.
    Tell,
    /// Close a descriptor.
    Close,
    /// Map a file into memory.
    Mmap,
    /// Remove a memory mapping.
    Munmap,
    /// Change the working directory.
    Chdir,
    /// Create a directory.
    Mkdir,
    /// Read one directory entry.
    Readdir,
    /// Whether a descriptor names a directory.
    IsDir,
    /// Inumber behind a descriptor.
    Inumber,
}

/// Swallows every failure except an invalid user pointer, which must
/// terminate the caller.
fn kill_on_fault<T>(r: Result<T, KernelError>) -> Result<Option<T>, KernelError> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(KernelError::BadAddress) => Err(KernelError::BadAddress),
        Err(_) => Ok(None),
    }
}

/// Demultiplexes one system call onto the services.
///
/// Returns the value the bridge places in the return register. A bad
/// syscall number or an invalid user pointer terminates `process` with
/// exit code `-1` before returning `-1`.
pub fn handle(process: &mut Process, kernel: &Kernel, no: usize, args: [usize; 3]) -> isize {
    let Ok(no) = SyscallNo::try_from(no) else {
        process.exit(&kernel.fs, &kernel.vm, -1);
        return -1;
    };
    match dispatch(process, kernel, no, args) {
        Ok(value) => value,
        Err(_) => {
            process.exit(&kernel.fs, &kernel.vm, -1);
            -1
        }
    }
}

fn dispatch(
    process: &mut Process,
    kernel: &Kernel,
    no: SyscallNo,
    args: [usize; 3],
) -> Result<isize, KernelError> {
    let fs = &kernel.fs;
    let vm = &kernel.vm;
    match no {
        // The harness owns the machine; it performs the actual shutdown.
        SyscallNo::Halt => Ok(0),
        SyscallNo::Exit => {
            let status = args[0] as i32;
            process.exit(fs, vm, status);
            Ok(status as isize)
        }
        // Process creation and reaping live outside the core.
        SyscallNo::Exec | SyscallNo::Wait => Ok(-1),
        SyscallNo::Create => {
            let Some(path) = kill_on_fault(process.read_user_cstring(fs, vm, args[0], PATH_MAX))?
            else {
                return Ok(0);
            };
            Ok(process.create(fs, &path, args[1] as u32).is_ok() as isize)
        }
        SyscallNo::Remove => {
            let Some(path) = kill_on_fault(process.read_user_cstring(fs, vm, args[0], PATH_MAX))?
            else {
                return Ok(0);
            };
            Ok(process.remove(fs, &path).is_ok() as isize)
        }
        SyscallNo::Open => {
            let Some(path) = kill_on_fault(process.read_user_cstring(fs, vm, args[0], PATH_MAX))?
            else {
                return Ok(-1);
            };
            Ok(process
                .open(fs, &path)
                .map(|fd| fd as isize)
                .unwrap_or(-1))
        }
        SyscallNo::Filesize => Ok(process
            .filesize(args[0])
            .map(|n| n as isize)
            .unwrap_or(-1)),
        SyscallNo::Read => {
            let (fd, addr, len) = (args[0], args[1], args[2]);
            let mut total = 0usize;
            let mut chunk = [0u8; IO_CHUNK];
            while total < len {
                let want = (len - total).min(IO_CHUNK);
                let n = match process.read(fs, fd, &mut chunk[..want]) {
                    Ok(n) => n,
                    Err(_) => return Ok(-1),
                };
                if n == 0 {
                    break;
                }
                process.write_user(fs, vm, addr + total, &chunk[..n])?;
                total += n;
                if n < want {
                    break;
                }
            }
            Ok(total as isize)
        }
        SyscallNo::Write => {
            let (fd, addr, len) = (args[0], args[1], args[2]);
            let mut total = 0usize;
            let mut chunk = [0u8; IO_CHUNK];
            while total < len {
                let want = (len - total).min(IO_CHUNK);
                process.read_user(fs, vm, addr + total, &mut chunk[..want])?;
                let n = match process.write(fs, fd, &chunk[..want]) {
                    Ok(n) => n,
                    Err(_) => return Ok(-1),
                };
                total += n;
                if n < want {
                    break;
                }
            }
            Ok(total as isize)
        }
        SyscallNo::Seek => {
            let _ = process.seek(args[0], args[1]);
            Ok(0)
        }
        SyscallNo::Tell => Ok(process.tell(args[0]).map(|n| n as isize).unwrap_or(-1)),
        SyscallNo::Close => Ok(match process.close(fs, args[0]) {
            Ok(()) => 0,
            Err(_) => -1,
        }),
        SyscallNo::Mmap => Ok(process
            .mmap(fs, vm, args[0], args[1])
            .map(|id| id as isize)
            .unwrap_or(-1)),
        SyscallNo::Munmap => {
            let _ = process.munmap(fs, vm, args[0]);
            Ok(0)
        }
        SyscallNo::Chdir => {
            let Some(path) = kill_on_fault(process.read_user_cstring(fs, vm, args[0], PATH_MAX))?
            else {
                return Ok(0);
            };
            Ok(process.chdir(fs, &path).is_ok() as isize)
        }
        SyscallNo::Mkdir => {
            let Some(path) = kill_on_fault(process.read_user_cstring(fs, vm, args[0], PATH_MAX))?
            else {
                return Ok(0);
            };
            Ok(process.mkdir(fs, &path).is_ok() as isize)
        }
        SyscallNo::Readdir => match process.readdir(fs, args[0]) {
            Ok(Some(name)) => {
                debug_assert!(name.len() <= NAME_MAX);
                let mut bytes = name.into_bytes();
                bytes.push(0);
                process.write_user(fs, vm, args[1], &bytes)?;
                Ok(1)
            }
            Ok(None) | Err(_) => Ok(0),
        },
        SyscallNo::IsDir => Ok(process.isdir(args[0]).map(|b| b as isize).unwrap_or(-1)),
        SyscallNo::Inumber => Ok(process
            .inumber(args[0])
            .map(|n| n as isize)
            .unwrap_or(-1)),
    }
}
