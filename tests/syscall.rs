//! The system-call surface, driven end to end through user memory.

mod common;

use common::kernel;
use minos::{
    mm::{PAGE_SIZE, USER_TOP},
    process::Process,
    syscall::{handle, SyscallNo},
    Kernel,
};

fn call(process: &mut Process, kernel: &Kernel, no: SyscallNo, args: [usize; 3]) -> isize {
    handle(process, kernel, usize::from(no), args)
}

/// Places a NUL-terminated string in user memory.
fn put_cstr(process: &Process, kernel: &Kernel, addr: usize, s: &str) {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    process
        .write_user(&kernel.fs, &kernel.vm, addr, &bytes)
        .unwrap();
}

#[test]
fn file_calls_round_trip_through_user_buffers() {
    let kernel = kernel(16);
    let mut p = Process::new(&kernel.fs).unwrap();
    let scratch = USER_TOP - PAGE_SIZE;

    put_cstr(&p, &kernel, scratch, "/f");
    assert_eq!(call(&mut p, &kernel, SyscallNo::Create, [scratch, 512, 0]), 1);
    let fd = call(&mut p, &kernel, SyscallNo::Open, [scratch, 0, 0]);
    assert_eq!(fd, 2, "first user descriptor");
    let fd = fd as usize;

    let payload = [b'B'; 300];
    p.write_user(&kernel.fs, &kernel.vm, scratch + 0x100, &payload)
        .unwrap();
    assert_eq!(
        call(&mut p, &kernel, SyscallNo::Write, [fd, scratch + 0x100, 300]),
        300
    );
    assert_eq!(call(&mut p, &kernel, SyscallNo::Tell, [fd, 0, 0]), 300);
    assert_eq!(call(&mut p, &kernel, SyscallNo::Seek, [fd, 0, 0]), 0);
    assert_eq!(call(&mut p, &kernel, SyscallNo::Tell, [fd, 0, 0]), 0);

    assert_eq!(
        call(&mut p, &kernel, SyscallNo::Read, [fd, scratch + 0x600, 300]),
        300
    );
    let mut out = [0u8; 300];
    p.read_user(&kernel.fs, &kernel.vm, scratch + 0x600, &mut out)
        .unwrap();
    assert_eq!(out, payload);

    assert_eq!(call(&mut p, &kernel, SyscallNo::Filesize, [fd, 0, 0]), 512);
    assert_eq!(call(&mut p, &kernel, SyscallNo::IsDir, [fd, 0, 0]), 0);
    assert!(call(&mut p, &kernel, SyscallNo::Inumber, [fd, 0, 0]) > 1);

    assert_eq!(call(&mut p, &kernel, SyscallNo::Close, [fd, 0, 0]), 0);
    assert_eq!(call(&mut p, &kernel, SyscallNo::Close, [fd, 0, 0]), -1);

    p.exit(&kernel.fs, &kernel.vm, 0);
    kernel.shutdown();
}

#[test]
fn directory_calls_build_and_tear_down_a_tree() {
    let kernel = kernel(16);
    let mut p = Process::new(&kernel.fs).unwrap();
    let path = USER_TOP - PAGE_SIZE;
    let name = USER_TOP - PAGE_SIZE / 2;

    for dir in ["/a", "/a/b"] {
        put_cstr(&p, &kernel, path, dir);
        assert_eq!(call(&mut p, &kernel, SyscallNo::Mkdir, [path, 0, 0]), 1);
    }
    put_cstr(&p, &kernel, path, "/a/b/c");
    assert_eq!(call(&mut p, &kernel, SyscallNo::Create, [path, 0, 0]), 1);

    // readdir of /a sees exactly "b".
    put_cstr(&p, &kernel, path, "/a");
    let dir_fd = call(&mut p, &kernel, SyscallNo::Open, [path, 0, 0]) as usize;
    assert_eq!(call(&mut p, &kernel, SyscallNo::IsDir, [dir_fd, 0, 0]), 1);
    assert_eq!(
        call(&mut p, &kernel, SyscallNo::Readdir, [dir_fd, name, 0]),
        1
    );
    assert_eq!(
        p.read_user_cstring(&kernel.fs, &kernel.vm, name, 64).unwrap(),
        "b"
    );
    assert_eq!(
        call(&mut p, &kernel, SyscallNo::Readdir, [dir_fd, name, 0]),
        0
    );

    // chdir into the leaf and open its file by a relative path.
    put_cstr(&p, &kernel, path, "/a/b");
    assert_eq!(call(&mut p, &kernel, SyscallNo::Chdir, [path, 0, 0]), 1);
    put_cstr(&p, &kernel, path, "c");
    let fd = call(&mut p, &kernel, SyscallNo::Open, [path, 0, 0]);
    assert!(fd >= 2);
    assert_eq!(call(&mut p, &kernel, SyscallNo::Close, [fd as usize, 0, 0]), 0);

    // Removals: the occupied ancestor fails, leaf-first order succeeds.
    put_cstr(&p, &kernel, path, "/a");
    assert_eq!(call(&mut p, &kernel, SyscallNo::Remove, [path, 0, 0]), 0);
    for victim in ["/a/b/c", "/a/b", "/a"] {
        put_cstr(&p, &kernel, path, victim);
        assert_eq!(
            call(&mut p, &kernel, SyscallNo::Remove, [path, 0, 0]),
            1,
            "removing {victim}"
        );
    }

    p.exit(&kernel.fs, &kernel.vm, 0);
    kernel.shutdown();
}

#[test]
fn console_descriptors() {
    let kernel = kernel(8);
    let mut p = Process::new(&kernel.fs).unwrap();
    let scratch = USER_TOP - PAGE_SIZE;

    p.write_user(&kernel.fs, &kernel.vm, scratch, b"hello, console")
        .unwrap();
    assert_eq!(
        call(&mut p, &kernel, SyscallNo::Write, [1, scratch, 14]),
        14
    );
    assert_eq!(p.console, b"hello, console");

    // Descriptor 0 models an exhausted input stream.
    assert_eq!(call(&mut p, &kernel, SyscallNo::Read, [0, scratch, 8]), 0);

    p.exit(&kernel.fs, &kernel.vm, 0);
    kernel.shutdown();
}

#[test]
fn invalid_user_pointer_terminates_the_process() {
    let kernel = kernel(8);
    let mut p = Process::new(&kernel.fs).unwrap();

    // 0x2000 is neither mapped nor plausibly stack.
    assert_eq!(call(&mut p, &kernel, SyscallNo::Create, [0x2000, 0, 0]), -1);
    assert_eq!(p.exit_code(), Some(-1));
    kernel.shutdown();
}

#[test]
fn unknown_syscall_number_terminates_the_process() {
    let kernel = kernel(8);
    let mut p = Process::new(&kernel.fs).unwrap();
    assert_eq!(handle(&mut p, &kernel, 99, [0, 0, 0]), -1);
    assert_eq!(p.exit_code(), Some(-1));
    kernel.shutdown();
}

#[test]
fn exit_reports_its_status() {
    let kernel = kernel(8);
    let mut p = Process::new(&kernel.fs).unwrap();
    assert_eq!(call(&mut p, &kernel, SyscallNo::Exit, [7, 0, 0]), 7);
    assert_eq!(p.exit_code(), Some(7));

    // Halt is acknowledged; the harness owns the actual shutdown.
    let mut q = Process::new(&kernel.fs).unwrap();
    assert_eq!(call(&mut q, &kernel, SyscallNo::Halt, [0, 0, 0]), 0);
    q.exit(&kernel.fs, &kernel.vm, 0);
    kernel.shutdown();
}

#[test]
fn mmap_calls_round_trip() {
    let kernel = kernel(8);
    let mut p = Process::new(&kernel.fs).unwrap();
    let path = USER_TOP - PAGE_SIZE;

    put_cstr(&p, &kernel, path, "/m");
    assert_eq!(
        call(&mut p, &kernel, SyscallNo::Create, [path, PAGE_SIZE, 0]),
        1
    );
    let fd = call(&mut p, &kernel, SyscallNo::Open, [path, 0, 0]) as usize;

    let addr = 0x1000_0000;
    let id = call(&mut p, &kernel, SyscallNo::Mmap, [fd, addr, 0]);
    assert!(id >= 2);
    p.write_user(&kernel.fs, &kernel.vm, addr, b"via mmap")
        .unwrap();
    assert_eq!(
        call(&mut p, &kernel, SyscallNo::Munmap, [id as usize, 0, 0]),
        0
    );

    assert_eq!(call(&mut p, &kernel, SyscallNo::Seek, [fd, 0, 0]), 0);
    assert_eq!(call(&mut p, &kernel, SyscallNo::Read, [fd, path + 0x800, 8]), 8);
    let mut out = [0u8; 8];
    p.read_user(&kernel.fs, &kernel.vm, path + 0x800, &mut out)
        .unwrap();
    assert_eq!(&out, b"via mmap");

    p.exit(&kernel.fs, &kernel.vm, 0);
    kernel.shutdown();
}
