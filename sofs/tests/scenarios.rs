//! End-to-end scenarios (§8 S1-S6), each driven through `Sofs` against a
//! freshly formatted image backed by a real temp file, the way `rufs`'s
//! own integration suite drives a mounted image through its public
//! surface rather than its internals.

use std::ffi::OsStr;

use sofs::{Error, FormatOptions, InodeType, Process, Sofs, CLUSTER_SIZE};
use tempfile::tempdir;

fn open() -> (tempfile::TempDir, Sofs<std::fs::File>) {
	let dir = tempdir().unwrap();
	let path = dir.path().join("image.sofs");
	let fs = Sofs::create(&path, 8192, &FormatOptions::default()).unwrap();
	(dir, fs)
}

#[test]
fn s1_create_write_read_back() {
	let (_dir, mut fs) = open();
	let dzone_free_before = fs.info().dzone_free;

	fs.create_file("/a", 0o644, Process::ROOT).unwrap();
	let n = fs.write("/a", 0, b"hello", Process::ROOT).unwrap();
	assert_eq!(n, 5);

	let mut buf = [0u8; 5];
	let n = fs.read("/a", 0, &mut buf, Process::ROOT).unwrap();
	assert_eq!(n, 5);
	assert_eq!(&buf, b"hello");

	let inr = fs.resolve("/a", Process::ROOT).unwrap();
	let attr = fs.getattr(inr).unwrap();
	assert_eq!(attr.size, 5);
	assert_eq!(attr.clucount, 1);
	assert_eq!(fs.info().dzone_free, dzone_free_before - 1);
}

#[test]
fn s2_sparse_write_then_read_hole() {
	let (_dir, mut fs) = open();
	fs.create_file("/b", 0o644, Process::ROOT).unwrap();

	let pos = 3 * CLUSTER_SIZE + 7;
	fs.write("/b", pos, b"X", Process::ROOT).unwrap();

	let mut buf = [0xFFu8; 10];
	let n = fs.read("/b", 0, &mut buf, Process::ROOT).unwrap();
	assert_eq!(n, 10);
	assert_eq!(buf, [0u8; 10]);

	let inr = fs.resolve("/b", Process::ROOT).unwrap();
	let attr = fs.getattr(inr).unwrap();
	assert_eq!(attr.size, pos + 1);
	assert_eq!(attr.clucount, 1);
}

#[test]
fn s3_rename_across_directories() {
	let (_dir, mut fs) = open();
	fs.mkdir("/d1", 0o755, Process::ROOT).unwrap();
	fs.mkdir("/d2", 0o755, Process::ROOT).unwrap();
	let file_x = fs.create_file("/d1/x", 0o644, Process::ROOT).unwrap();

	fs.rename("/d1/x", "/d2/y", Process::ROOT).unwrap();

	let err = fs.resolve("/d1/x", Process::ROOT).unwrap_err();
	assert_eq!(err, Error::NoEntry);

	let moved = fs.resolve("/d2/y", Process::ROOT).unwrap();
	assert_eq!(moved, file_x);
	assert_eq!(fs.getattr(file_x).unwrap().nlink, 1);
}

#[test]
fn s4_remove_non_empty_directory_fails() {
	let (_dir, mut fs) = open();
	fs.mkdir("/d1", 0o755, Process::ROOT).unwrap();
	fs.create_file("/d1/y", 0o644, Process::ROOT).unwrap();

	let err = fs.remove("/d1", Process::ROOT).unwrap_err();
	assert_eq!(err, Error::NotEmpty);

	// State unchanged: "y" is still there.
	let entries = fs.readdir("/d1", Process::ROOT).unwrap();
	assert!(entries.iter().any(|(n, _)| n == OsStr::new("y")));
}

#[test]
fn s5_truncate_shrink_frees_clusters() {
	let (_dir, mut fs) = open();
	fs.create_file("/big", 0o644, Process::ROOT).unwrap();
	let data = vec![0xABu8; (CLUSTER_SIZE * 4) as usize];
	fs.write("/big", 0, &data, Process::ROOT).unwrap();

	let inr = fs.resolve("/big", Process::ROOT).unwrap();
	assert_eq!(fs.getattr(inr).unwrap().clucount, 4);
	let dzone_free_before = fs.info().dzone_free;

	fs.truncate("/big", CLUSTER_SIZE + 1, Process::ROOT).unwrap();

	let attr = fs.getattr(inr).unwrap();
	assert_eq!(attr.size, CLUSTER_SIZE + 1);
	assert_eq!(attr.clucount, 2);
	assert_eq!(fs.info().dzone_free, dzone_free_before + 2);

	let mut one = [0u8; 1];
	assert_eq!(fs.read("/big", CLUSTER_SIZE, &mut one, Process::ROOT).unwrap(), 1);

	let mut past = [0u8; 4];
	assert_eq!(fs.read("/big", CLUSTER_SIZE + 1, &mut past, Process::ROOT).unwrap(), 0);
}

#[test]
fn s6_symlink_loop_detection() {
	let (_dir, mut fs) = open();
	fs.symlink("/s1", OsStr::new("/s2"), Process::ROOT).unwrap();
	fs.symlink("/s2", OsStr::new("/s1"), Process::ROOT).unwrap();

	let err = fs.resolve("/s1/anything", Process::ROOT).unwrap_err();
	assert_eq!(err, Error::Loop);
}

#[test]
fn symlinks_resolve_as_inode_type_on_their_own() {
	let (_dir, mut fs) = open();
	let inr = fs.symlink("/s", OsStr::new("/a"), Process::ROOT).unwrap();
	assert_eq!(fs.getattr(inr).unwrap().kind, InodeType::Symlink);
}

#[test]
fn reopening_an_image_preserves_its_tree() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("image.sofs");
	let mut fs = Sofs::create(&path, 8192, &FormatOptions::default()).unwrap();
	fs.create_file("/a", 0o644, Process::ROOT).unwrap();
	fs.write("/a", 0, b"persisted", Process::ROOT).unwrap();
	fs.close().unwrap();

	let mut reopened = Sofs::open(&path).unwrap();
	let mut buf = [0u8; 9];
	reopened.read("/a", 0, &mut buf, Process::ROOT).unwrap();
	assert_eq!(&buf, b"persisted");
}
