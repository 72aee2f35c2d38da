//! End-to-end scenarios for the buffered file system.

mod common;

use common::{fresh_fs, DISK_SECTORS};
use minos::{
    dev::{Disk, Role, Sector, SECTOR_SIZE},
    fs::{disk_layout::MAX_FILE_SIZE, FileSys},
};
use rand::{Rng, SeedableRng};

#[test]
fn write_then_flush_survives_reboot() {
    let disk = Disk::new(Role::FileSys, DISK_SECTORS);
    {
        let fs = FileSys::mount(disk.clone(), true).unwrap();
        let root = fs.open_root().unwrap();
        fs.create(&root, "/x", 1024).unwrap();

        let mut file = fs.open(&root, "/x").unwrap().into_file().unwrap();
        assert_eq!(file.write(&fs, &[b'A'; 1024]).unwrap(), 1024);
        file.close(&fs).unwrap();
        root.close(&fs).unwrap();
        fs.shutdown();
    }

    // Reboot: mount the same device without formatting.
    let fs = FileSys::mount(disk, false).unwrap();
    let root = fs.open_root().unwrap();
    let mut file = fs.open(&root, "/x").unwrap().into_file().unwrap();
    let mut buf = [0u8; 1024];
    assert_eq!(file.read(&fs, &mut buf).unwrap(), 1024);
    assert_eq!(buf, [b'A'; 1024]);
    file.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn large_file_growth_zero_fills_the_gap() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/big", 0).unwrap();

    let mut file = fs.open(&root, "/big").unwrap().into_file().unwrap();
    file.seek(100_000);
    assert_eq!(file.write(&fs, b"end").unwrap(), 3);
    assert_eq!(file.size(), 100_003);

    let mut byte = [0xffu8; 1];
    assert_eq!(file.read_at(&fs, &mut byte, 99_999).unwrap(), 1);
    assert_eq!(byte[0], 0);
    let mut tail = [0u8; 3];
    assert_eq!(file.read_at(&fs, &mut tail, 100_000).unwrap(), 3);
    assert_eq!(&tail, b"end");

    file.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn directory_tree_create_and_remove_in_order() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();

    fs.mkdir(&root, "/a").unwrap();
    fs.mkdir(&root, "/a/b").unwrap();
    fs.create(&root, "/a/b/c", 0).unwrap();

    // chdir to /a/b and open c by a relative path.
    let cwd = fs.open_dir(&root, "/a/b").unwrap();
    let file = fs.open(&cwd, "c").unwrap().into_file().unwrap();
    file.close(&fs).unwrap();

    assert!(fs.remove(&root, "/a").is_err(), "non-empty removal must fail");
    assert!(fs.remove(&root, "/").is_err(), "root removal must fail");

    fs.remove(&root, "/a/b/c").unwrap();
    fs.remove(&root, "/a/b").unwrap();
    fs.remove(&root, "/a").unwrap();

    cwd.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn dot_and_dotdot_resolution() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.mkdir(&root, "/a").unwrap();
    fs.create(&root, "/top", 0).unwrap();

    let a = fs.open_dir(&root, "/a").unwrap();
    // The root is its own parent.
    let via_up = fs.open(&a, "../../../top").unwrap();
    assert!(!via_up.is_dir());
    via_up.close(&fs).unwrap();

    let same = fs.open_dir(&a, ".").unwrap();
    assert_eq!(same.sector(), a.sector());
    same.close(&fs).unwrap();

    a.close(&fs).unwrap();
    fs.remove(&root, "/top").unwrap();
    fs.remove(&root, "/a").unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn readdir_lists_children_without_dot_entries() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.mkdir(&root, "/a").unwrap();
    fs.mkdir(&root, "/a/b").unwrap();

    let mut dir = fs.open_dir(&root, "/a").unwrap();
    let mut names = Vec::new();
    while let Some(name) = dir.readdir(&fs).unwrap() {
        names.push(name);
    }
    assert_eq!(names, ["b"]);

    dir.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn index_level_boundaries() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/b", 0).unwrap();
    let mut file = fs.open(&root, "/b").unwrap().into_file().unwrap();

    // Crossing from the direct pointers into the indirect block.
    file.seek(12 * SECTOR_SIZE);
    assert_eq!(file.write(&fs, &[1u8]).unwrap(), 1);
    assert_eq!(file.size(), 12 * SECTOR_SIZE + 1);

    // Crossing from the indirect block into the doubly-indirect tree.
    file.seek((12 + 128) * SECTOR_SIZE);
    assert_eq!(file.write(&fs, &[2u8]).unwrap(), 1);
    assert_eq!(file.size(), (12 + 128) * SECTOR_SIZE + 1);

    let mut byte = [0u8; 1];
    assert_eq!(file.read_at(&fs, &mut byte, 12 * SECTOR_SIZE).unwrap(), 1);
    assert_eq!(byte[0], 1);
    assert_eq!(
        file.read_at(&fs, &mut byte, (12 + 128) * SECTOR_SIZE).unwrap(),
        1
    );
    assert_eq!(byte[0], 2);

    // A write at the index limit must fail cleanly.
    file.seek(MAX_FILE_SIZE);
    assert_eq!(file.write(&fs, &[3u8]).unwrap(), 0);
    assert_eq!(file.size(), (12 + 128) * SECTOR_SIZE + 1);

    file.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn read_at_end_of_file() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/f", 100).unwrap();
    let file = fs.open(&root, "/f").unwrap().into_file().unwrap();

    let mut buf = [0u8; 10];
    assert_eq!(file.read_at(&fs, &mut buf, 100).unwrap(), 0);
    assert_eq!(file.read_at(&fs, &mut buf, 99).unwrap(), 1);

    file.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn close_flushes_through_to_the_device() {
    let disk = Disk::new(Role::FileSys, DISK_SECTORS);
    let fs = FileSys::mount(disk.clone(), true).unwrap();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/f", SECTOR_SIZE as u32).unwrap();

    let mut file = fs.open(&root, "/f").unwrap().into_file().unwrap();
    let data_sector = file.inode().byte_to_sector(&fs, 0).unwrap().unwrap();
    let pattern = [0xc3u8; SECTOR_SIZE];
    assert_eq!(file.write(&fs, &pattern).unwrap(), SECTOR_SIZE);
    file.close(&fs).unwrap();

    // No explicit flush: the close of the last opener must have made the
    // write durable.
    let mut direct = [0u8; SECTOR_SIZE];
    disk.read(data_sector, &mut direct).unwrap();
    assert_eq!(direct, pattern);

    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn write_read_round_trip_random_payload() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/r", 0).unwrap();
    let mut file = fs.open(&root, "/r").unwrap().into_file().unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let payload: Vec<u8> = (0..50_000).map(|_| rng.gen()).collect();
    assert_eq!(file.write(&fs, &payload).unwrap(), payload.len());

    file.seek(0);
    let mut out = vec![0u8; payload.len()];
    assert_eq!(file.read(&fs, &mut out).unwrap(), payload.len());
    assert_eq!(out, payload);

    file.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn deny_write_blocks_other_handles_until_release() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/d", 16).unwrap();

    let mut writer = fs.open(&root, "/d").unwrap().into_file().unwrap();
    let mut holder = fs.open(&root, "/d").unwrap().into_file().unwrap();
    assert!(std::sync::Arc::ptr_eq(writer.inode(), holder.inode()));

    holder.deny_write();
    assert_eq!(writer.write(&fs, b"nope").unwrap(), 0);

    holder.close(&fs).unwrap();
    assert_eq!(writer.write(&fs, b"yes!").unwrap(), 4);

    writer.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn removed_file_stays_readable_until_last_close() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/victim", 0).unwrap();
    let mut file = fs.open(&root, "/victim").unwrap().into_file().unwrap();
    assert_eq!(file.write(&fs, b"still here").unwrap(), 10);

    let free_before = fs.free_map.free_count();
    fs.remove(&root, "/victim").unwrap();
    assert!(fs.open(&root, "/victim").is_err(), "name must be gone");

    let mut buf = [0u8; 10];
    assert_eq!(file.read_at(&fs, &mut buf, 0).unwrap(), 10);
    assert_eq!(&buf, b"still here");

    file.close(&fs).unwrap();
    // Record sector plus one data sector came back.
    assert_eq!(fs.free_map.free_count(), free_before + 2);

    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn full_inode_deletion_returns_every_sector() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    let free_before = fs.free_map.free_count();

    // Spans the direct, indirect, and doubly-indirect levels.
    fs.create(&root, "/huge", 0).unwrap();
    let mut file = fs.open(&root, "/huge").unwrap().into_file().unwrap();
    file.seek(160 * SECTOR_SIZE);
    assert_eq!(file.write(&fs, &[9u8]).unwrap(), 1);
    file.close(&fs).unwrap();
    assert!(fs.free_map.free_count() < free_before);

    fs.remove(&root, "/huge").unwrap();
    assert_eq!(fs.free_map.free_count(), free_before);

    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn free_map_persists_across_remount() {
    let disk = Disk::new(Role::FileSys, DISK_SECTORS);
    let free_after_create;
    {
        let fs = FileSys::mount(disk.clone(), true).unwrap();
        let root = fs.open_root().unwrap();
        fs.create(&root, "/keep", 3 * SECTOR_SIZE as u32).unwrap();
        free_after_create = fs.free_map.free_count();
        root.close(&fs).unwrap();
        fs.shutdown();
    }

    let fs = FileSys::mount(disk, false).unwrap();
    assert_eq!(fs.free_map.free_count(), free_after_create);

    let root = fs.open_root().unwrap();
    fs.remove(&root, "/keep").unwrap();
    // Record plus three data sectors.
    assert_eq!(fs.free_map.free_count(), free_after_create + 4);
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn open_table_keeps_one_inode_per_sector() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/one", 0).unwrap();

    let a = fs.open(&root, "/one").unwrap().into_file().unwrap();
    let b = fs.open(&root, "/one").unwrap().into_file().unwrap();
    assert!(std::sync::Arc::ptr_eq(a.inode(), b.inode()));
    assert_eq!(a.inode().open_cnt(), 2);

    a.close(&fs).unwrap();
    b.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn reopen_gets_a_fresh_cursor() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    fs.create(&root, "/c", 0).unwrap();
    let mut file = fs.open(&root, "/c").unwrap().into_file().unwrap();
    file.write(&fs, b"0123456789").unwrap();
    assert_eq!(file.tell(), 10);

    let mut dup = file.reopen();
    assert_eq!(dup.tell(), 0);
    let mut buf = [0u8; 4];
    assert_eq!(dup.read(&fs, &mut buf).unwrap(), 4);
    assert_eq!(&buf, b"0123");

    dup.close(&fs).unwrap();
    file.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn freed_sectors_are_reused() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();

    fs.create(&root, "/tmp", 20 * SECTOR_SIZE as u32).unwrap();
    let file = fs.open(&root, "/tmp").unwrap().into_file().unwrap();
    let reused_sector: Sector = file.inode().byte_to_sector(&fs, 0).unwrap().unwrap();
    file.close(&fs).unwrap();
    fs.remove(&root, "/tmp").unwrap();

    fs.create(&root, "/new", 20 * SECTOR_SIZE as u32).unwrap();
    let file = fs.open(&root, "/new").unwrap().into_file().unwrap();
    let mut seen = false;
    for i in 0..20 {
        if file.inode().byte_to_sector(&fs, i * SECTOR_SIZE).unwrap() == Some(reused_sector) {
            seen = true;
        }
    }
    assert!(seen, "released sectors must be allocatable again");

    // And the recycled sector reads back as zeros.
    let mut buf = [0xaau8; SECTOR_SIZE];
    file.read_at(&fs, &mut buf, 0).unwrap();
    assert_eq!(buf, [0u8; SECTOR_SIZE]);

    file.close(&fs).unwrap();
    root.close(&fs).unwrap();
    fs.shutdown();
}

#[test]
fn name_length_limit_is_enforced() {
    let fs = fresh_fs();
    let root = fs.open_root().unwrap();
    assert!(fs.create(&root, "/exactly-14-len", 0).is_ok());
    assert!(fs.create(&root, "/fifteen-letters", 0).is_err());
    root.close(&fs).unwrap();
    fs.shutdown();
}
