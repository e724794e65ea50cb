//! End-to-end tests driving the engine exactly as the shell does: attach a
//! host-backed image, format, mount, and exercise the facade against a real
//! temp-file-backed device rather than an in-memory fake.

use fatimg::block::MediaKind;
use fatimg::{BlockDevice, Fat12FileSystem, FsError, GrubInstaller};

fn image_path(name: &str) -> std::path::PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::mem::forget(dir); // keep the directory alive for the test's duration
    path
}

fn formatted_device(name: &str) -> Fat12FileSystem {
    let path = image_path(name);
    let mut dev = BlockDevice::create(&path, MediaKind::Floppy, true).unwrap();
    dev.init(512, 2880).unwrap();
    let dev = Fat12FileSystem::format(dev, "FATIMG", 0, None).unwrap();
    Fat12FileSystem::mount(dev).unwrap()
}

#[test]
fn format_and_mount_yields_an_empty_root() {
    let fs = formatted_device("format-mount.img");
    assert_eq!(fs.get_directory_list().count(), 0);
}

#[test]
fn touch_then_list_shows_the_new_file() {
    let mut fs = formatted_device("touch-ls.img");
    fs.create_file("readme.txt").unwrap();
    fs.flush().unwrap();

    let names: Vec<_> = fs.get_directory_list().map(|n| n.name.clone()).collect();
    assert_eq!(names, vec!["README.TXT".to_string()]);
}

#[test]
fn write_then_read_round_trips_contents() {
    let mut fs = formatted_device("write-read.img");
    let payload = b"hello from the image".to_vec();
    fs.write("hello.txt", &payload).unwrap();

    let back = fs.read("hello.txt").unwrap();
    assert_eq!(back, payload);
}

#[test]
fn write_grows_the_file_across_a_cluster_boundary() {
    let mut fs = formatted_device("grow.img");
    // one sector = one cluster on this default floppy layout, so this spans
    // several clusters.
    let payload = vec![0x5A; 3 * 512 + 17];
    fs.write("big.bin", &payload).unwrap();

    let back = fs.read("big.bin").unwrap();
    assert_eq!(back, payload);

    let node = fs.get_node("big.bin").unwrap();
    assert_eq!(node.size as usize, payload.len());
}

#[test]
fn shrink_then_remove_frees_the_file() {
    let mut fs = formatted_device("shrink-remove.img");
    fs.write("data.bin", &vec![1u8; 2000]).unwrap();
    fs.write("data.bin", &vec![2u8; 10]).unwrap();

    let back = fs.read("data.bin").unwrap();
    assert_eq!(back, vec![2u8; 10]);

    fs.remove("data.bin").unwrap();
    assert!(fs.get_node("data.bin").is_none());
}

#[test]
fn mkdir_creates_a_navigable_subdirectory_with_dot_entries() {
    let mut fs = formatted_device("mkdir.img");
    fs.create_dir("sub").unwrap();
    fs.flush().unwrap();

    fs.set_directory("sub").unwrap();
    assert!(fs.get_node(".").unwrap().is_directory());
    assert!(fs.get_node("..").unwrap().is_directory());
}

#[test]
fn grub_install_rejects_an_incompatible_stage1() {
    let mut fs = formatted_device("grub-incompatible.img");

    let mut stage1 = vec![0u8; 512];
    stage1[0x3E] = 9; // wrong compat major
    stage1[0x3F] = 9;
    let stage2 = vec![0u8; 1024];

    let installer = GrubInstaller::new("/boot/grub");
    let err = installer.install(&mut fs, &stage1, &stage2).unwrap_err();
    assert!(matches!(err, FsError::GrubIncompatible { .. }));
}

#[test]
fn collision_avoidance_assigns_distinct_short_names() {
    let mut fs = formatted_device("collisions.img");
    fs.create_file("configuration.cfg").unwrap();
    fs.create_file("configuration-alt.cfg").unwrap();
    fs.flush().unwrap();

    let names: Vec<_> = fs.get_directory_list().map(|n| n.name.clone()).collect();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
}
