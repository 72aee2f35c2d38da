//! Memory-mapped files.

mod common;

use common::kernel;
use minos::{mm::PAGE_SIZE, process::Process};

#[test]
fn mmap_round_trip_writes_back_on_munmap() {
    let kernel = kernel(8);
    let (fs, vm) = (&kernel.fs, &kernel.vm);
    let mut process = Process::new(fs).unwrap();

    process.create(fs, "/m", 8192).unwrap();
    let fd = process.open(fs, "/m").unwrap();
    // A fresh file is zero-filled; stamp it with 'x'.
    let mut buf = vec![b'x'; 8192];
    assert_eq!(process.write(fs, fd, &buf).unwrap(), 8192);

    let addr = 0x1000_0000;
    let id = process.mmap(fs, vm, fd, addr).unwrap();
    assert!(id >= 2, "map ids start at 2");

    // Mapped pages are populated eagerly.
    assert_eq!(kernel.vm.frames.len(), 2);
    let mut head = [0u8; 16];
    process.read_user(fs, vm, addr, &mut head).unwrap();
    assert_eq!(head, [b'x'; 16]);

    process.write_user(fs, vm, addr, &[b'y'; 10]).unwrap();
    process.munmap(fs, vm, id).unwrap();
    assert!(
        process.space.inner.lock().spt.is_empty(),
        "no descriptor may carry the id after munmap"
    );

    // Re-read through the file system.
    process.seek(fd, 0).unwrap();
    buf.fill(0);
    assert_eq!(process.read(fs, fd, &mut buf).unwrap(), 8192);
    assert_eq!(&buf[..10], &[b'y'; 10]);
    assert_eq!(buf[10], b'x');
    assert!(buf[11..].iter().all(|&b| b == b'x'));

    process.exit(fs, vm, 0);
    kernel.shutdown();
}

#[test]
fn mmap_argument_validation() {
    let kernel = kernel(4);
    let (fs, vm) = (&kernel.fs, &kernel.vm);
    let mut process = Process::new(fs).unwrap();

    process.create(fs, "/f", 100).unwrap();
    let fd = process.open(fs, "/f").unwrap();

    assert!(process.mmap(fs, vm, fd, 0).is_err(), "null address");
    assert!(
        process.mmap(fs, vm, fd, 0x1000_0123).is_err(),
        "unaligned address"
    );
    assert!(process.mmap(fs, vm, 42, 0x1000_0000).is_err(), "bad fd");

    process.create(fs, "/empty", 0).unwrap();
    let empty = process.open(fs, "/empty").unwrap();
    assert!(
        process.mmap(fs, vm, empty, 0x1000_0000).is_err(),
        "empty file"
    );

    process.exit(fs, vm, 0);
    kernel.shutdown();
}

#[test]
fn overlapping_mappings_are_rejected() {
    let kernel = kernel(8);
    let (fs, vm) = (&kernel.fs, &kernel.vm);
    let mut process = Process::new(fs).unwrap();

    process.create(fs, "/f", (2 * PAGE_SIZE) as u32).unwrap();
    let fd = process.open(fs, "/f").unwrap();

    let addr = 0x2000_0000;
    let id = process.mmap(fs, vm, fd, addr).unwrap();
    assert!(
        process.mmap(fs, vm, fd, addr + PAGE_SIZE).is_err(),
        "second page overlaps the live mapping"
    );

    process.munmap(fs, vm, id).unwrap();
    assert!(process.munmap(fs, vm, id).is_err(), "id is gone");
    assert!(
        process.mmap(fs, vm, fd, addr + PAGE_SIZE).is_ok(),
        "the region is free again"
    );

    process.exit(fs, vm, 0);
    kernel.shutdown();
}

#[test]
fn closing_the_fd_keeps_the_mapping_alive() {
    let kernel = kernel(4);
    let (fs, vm) = (&kernel.fs, &kernel.vm);
    let mut process = Process::new(fs).unwrap();

    process.create(fs, "/f", PAGE_SIZE as u32).unwrap();
    let fd = process.open(fs, "/f").unwrap();
    let addr = 0x3000_0000;
    let id = process.mmap(fs, vm, fd, addr).unwrap();
    process.close(fs, fd).unwrap();

    process.write_user(fs, vm, addr, b"alive").unwrap();
    process.munmap(fs, vm, id).unwrap();

    let fd = process.open(fs, "/f").unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(process.read(fs, fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"alive");

    process.exit(fs, vm, 0);
    kernel.shutdown();
}

#[test]
fn evicted_mmap_pages_still_reach_the_file() {
    // Pool smaller than the mapping, so pages round-trip through swap
    // before the unmap.
    let kernel = kernel(2);
    let (fs, vm) = (&kernel.fs, &kernel.vm);
    let mut process = Process::new(fs).unwrap();

    let len = 4 * PAGE_SIZE;
    process.create(fs, "/big", len as u32).unwrap();
    let fd = process.open(fs, "/big").unwrap();

    let addr = 0x4000_0000;
    let id = process.mmap(fs, vm, fd, addr).unwrap();
    for i in 0..4 {
        let pattern = vec![0x40 + i as u8; PAGE_SIZE];
        process
            .write_user(fs, vm, addr + i * PAGE_SIZE, &pattern)
            .unwrap();
    }
    assert!(kernel.vm.swap.used_slots() > 0);
    process.munmap(fs, vm, id).unwrap();
    assert_eq!(kernel.vm.swap.used_slots(), 0, "munmap releases the slots");

    process.seek(fd, 0).unwrap();
    for i in 0..4 {
        let mut out = vec![0u8; PAGE_SIZE];
        assert_eq!(process.read(fs, fd, &mut out).unwrap(), PAGE_SIZE);
        assert_eq!(out, vec![0x40 + i as u8; PAGE_SIZE], "page {i}");
    }

    process.exit(fs, vm, 0);
    kernel.shutdown();
}

#[test]
fn exit_unmaps_and_writes_back() {
    let kernel = kernel(4);
    let (fs, vm) = (&kernel.fs, &kernel.vm);
    let mut process = Process::new(fs).unwrap();

    process.create(fs, "/f", PAGE_SIZE as u32).unwrap();
    let fd = process.open(fs, "/f").unwrap();
    let addr = 0x5000_0000;
    process.mmap(fs, vm, fd, addr).unwrap();
    process.write_user(fs, vm, addr, b"at exit").unwrap();

    process.exit(fs, vm, 0);
    assert_eq!(process.exit_code(), Some(0));
    assert!(kernel.vm.frames.is_empty());

    let fs2 = &kernel.fs;
    let root = fs2.open_root().unwrap();
    let file = fs2.open(&root, "/f").unwrap().into_file().unwrap();
    let mut buf = [0u8; 7];
    assert_eq!(file.read_at(fs2, &mut buf, 0).unwrap(), 7);
    assert_eq!(&buf, b"at exit");
    file.close(fs2).unwrap();
    root.close(fs2).unwrap();
    kernel.shutdown();
}
