//! The five path-addressed operations (§4.8) this filesystem exposes
//! above its directory/inode engine, grounded one-to-one on
//! `syscalls15/{soRead,soWrite,soTruncate,soReaddir,soRename}.c`: each
//! resolves a path (or two) to inode numbers via [`crate::path`], checks
//! permissions, then delegates to the L3/L4 engine.

use std::ffi::OsStr;

use crate::{
	blockdev::{Backend, BlockDevice},
	dir::{self, add_entry, find_entry, iter_entries, remove_entry, rename_entry, AttachOp, Lookup, RemoveMode},
	dirent::is_reserved,
	error::{Error, Result},
	fcluster::{self, read_inode, write_inode},
	perm::check_access,
	path::resolve_parent,
	superblock::Superblock,
	types::{AccessMask, InodeNum, InodeType, Process},
};

/// `soRead`: read up to `buf.len()` bytes from the regular file at `path`
/// starting at `pos`. Returns the number of bytes copied.
pub fn read(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	path: &str,
	pos: u64,
	buf: &mut [u8],
	proc: Process,
	now: u32,
) -> Result<usize> {
	let (parent, name) = resolve_parent(dev, sb, root, path, proc)?;
	let inr = lookup_child(dev, sb, parent, name)?;
	let mut inode = read_inode(dev, sb, inr, now)?;
	if inode.kind() == Some(InodeType::Directory) {
		return Err(Error::IsDirectory);
	}
	check_access(&inode, proc, AccessMask::R)?;
	fcluster::read_bytes(dev, sb, &mut inode, pos, buf)
}

/// `soWrite`: write `data` at `pos` into the regular file at `path`,
/// growing it and allocating clusters as needed.
pub fn write(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	path: &str,
	pos: u64,
	data: &[u8],
	proc: Process,
	now: u32,
) -> Result<usize> {
	let (parent, name) = resolve_parent(dev, sb, root, path, proc)?;
	let inr = lookup_child(dev, sb, parent, name)?;
	let mut inode = read_inode(dev, sb, inr, now)?;
	if inode.kind() == Some(InodeType::Directory) {
		return Err(Error::IsDirectory);
	}
	check_access(&inode, proc, AccessMask::W)?;
	let n = fcluster::write_bytes(dev, sb, &mut inode, pos, data)?;
	write_inode(dev, sb, inr, &mut inode, now)?;
	Ok(n)
}

/// `soTruncate`: resize the regular file at `path` to `length` bytes,
/// freeing every cluster beyond the new last one when shrinking, or
/// allocating every cluster up to the new last one when growing.
pub fn truncate(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	path: &str,
	length: u64,
	proc: Process,
	now: u32,
) -> Result<()> {
	if length > crate::layout::MAX_FILE_SIZE {
		return Err(Error::FileTooBig);
	}
	let (parent, name) = resolve_parent(dev, sb, root, path, proc)?;
	let inr = lookup_child(dev, sb, parent, name)?;
	let mut inode = read_inode(dev, sb, inr, now)?;
	if inode.kind() == Some(InodeType::Directory) {
		return Err(Error::IsDirectory);
	}
	check_access(&inode, proc, AccessMask::RW)?;

	if length >= inode.size {
		fcluster::alloc_through(dev, sb, &mut inode, length)?;
		inode.size = length;
	} else {
		let first_dead = length.div_ceil(crate::layout::CLUSTER_SIZE);
		fcluster::free_suffix(dev, sb, &mut inode, first_dead)?;
		inode.size = length;
	}
	write_inode(dev, sb, inr, &mut inode, now)
}

/// `soReaddir`: list every live entry of the directory at `path`.
pub fn readdir(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	path: &str,
	proc: Process,
	now: u32,
) -> Result<Vec<(std::ffi::OsString, InodeNum)>> {
	let inr = crate::path::resolve(dev, sb, root, path, proc)?;
	let mut dir = read_inode(dev, sb, inr, now)?;
	dir.assert_kind(InodeType::Directory)?;
	check_access(&dir, proc, AccessMask::R)?;
	iter_entries(dev, sb, &mut dir)
}

/// `soRename`: move/rename the entry at `old_path` to `new_path`.
/// Supports moving between directories (rewriting a moved directory's
/// ".." via `Attach-Entry`); refuses to rename onto a non-empty existing
/// directory.
pub fn rename(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	old_path: &str,
	new_path: &str,
	proc: Process,
	now: u32,
) -> Result<()> {
	let (old_parent, old_name) = resolve_parent(dev, sb, root, old_path, proc)?;
	let (new_parent, new_name) = resolve_parent(dev, sb, root, new_path, proc)?;
	if is_reserved(old_name) || is_reserved(new_name) {
		return Err(Error::InvalidArgument);
	}

	let mut old_dir = read_inode(dev, sb, old_parent, now)?;
	check_access(&old_dir, proc, AccessMask::WX)?;

	if old_parent == new_parent {
		rename_entry(dev, sb, &mut old_dir, old_name, new_name)?;
		write_inode(dev, sb, old_parent, &mut old_dir, now)?;
		return Ok(());
	}

	let mut new_dir = read_inode(dev, sb, new_parent, now)?;
	check_access(&new_dir, proc, AccessMask::WX)?;

	let moved = match find_entry(dev, sb, &mut old_dir, old_name)? {
		Lookup::Found { inode, .. } => inode,
		Lookup::NotFound { .. } => return Err(Error::NoEntry),
	};
	let mut moved_rec = fcluster::peek_inode(dev, sb, moved)?;
	let moved_is_dir = moved_rec.kind() == Some(InodeType::Directory);

	if let Lookup::Found { inode: existing, .. } = find_entry(dev, sb, &mut new_dir, new_name)? {
		let mut existing_rec = fcluster::peek_inode(dev, sb, existing)?;
		if existing_rec.kind() == Some(InodeType::Directory) && !dir::is_empty(dev, sb, &mut existing_rec)? {
			return Err(Error::NotEmpty);
		}
		remove_entry(dev, sb, &mut new_dir, new_name, RemoveMode::Tombstone)?;
	}

	let op = if moved_is_dir { AttachOp::Attach } else { AttachOp::Add };
	add_entry(dev, sb, &mut new_dir, new_parent, new_name, &mut moved_rec, moved, op)?;
	dev.encode_at(sb.ino_byte_offset(moved)?, &moved_rec)?;

	remove_entry(dev, sb, &mut old_dir, old_name, RemoveMode::Detach)?;
	if moved_is_dir {
		// `moved`'s ".." no longer points at `old_dir`; sever that link.
		old_dir.refcount -= 1;
	}

	write_inode(dev, sb, old_parent, &mut old_dir, now)?;
	write_inode(dev, sb, new_parent, &mut new_dir, now)?;
	Ok(())
}

fn lookup_child(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	parent: InodeNum,
	name: &OsStr,
) -> Result<InodeNum> {
	let mut dir = fcluster::peek_inode(dev, sb, parent)?;
	dir.assert_kind(InodeType::Directory)?;
	match find_entry(dev, sb, &mut dir, name)? {
		Lookup::Found { inode, .. } => Ok(inode),
		Lookup::NotFound { .. } => Err(Error::NoEntry),
	}
}

#[cfg(test)]
mod t {
	use std::{ffi::OsStr, io::Cursor};

	use super::*;
	use crate::{
		dir::add_entry,
		ialloc::alloc_inode,
		inode::InodeRecord,
		layout::{CLUSTER_SIZE, INODE_SIZE},
		superblock::{InsertionCache, RetrievalCache, MSTAT_CLEAN},
	};

	fn fresh(itotal: u32, dzone_total: u32) -> (BlockDevice<Cursor<Vec<u8>>>, Superblock) {
		let bytes = (dzone_total as u64 + 4) * CLUSTER_SIZE + itotal as u64 * INODE_SIZE;
		let mut sb = Superblock {
			magic: crate::layout::MAGIC_NUMBER,
			version: 1,
			name: [0; 32],
			ntotal: 1000,
			mstat: MSTAT_CLEAN,
			itable_start: 0,
			itable_size: itotal,
			itotal,
			ifree: itotal - 1,
			ihdtl: 1,
			tbfc_start: 0,
			tbfc_size: 0,
			tbfc_head: 1,
			tbfc_tail: 0,
			dzone_start: 4,
			dzone_total,
			dzone_free: dzone_total - 1,
			retrieval: RetrievalCache::empty(),
			insertion: InsertionCache::empty(),
		};
		let mut dev = BlockDevice::new(Cursor::new(vec![0u8; bytes as usize]));
		for i in 1..itotal {
			let prev = if i == 1 { itotal - 1 } else { i - 1 };
			let next = if i == itotal - 1 { 1 } else { i + 1 };
			let mut rec = InodeRecord::free_singleton(i);
			rec.set_free_prev(prev);
			rec.set_free_next(next);
			dev.encode_at(sb.ino_byte_offset(InodeNum::new(i)).unwrap(), &rec).unwrap();
		}
		for i in 1..dzone_total {
			let off = sb.fct_entry_byte_offset(i as u64).unwrap();
			dev.encode_at(off, &(i + 4)).unwrap();
		}
		let mut root = InodeRecord::free_singleton(0);
		root.activate(InodeType::Directory, 0, 0, 1);
		root.mode |= 0o755;
		dir::seed_self(&mut dev, &mut sb, &mut root, InodeNum::ROOT, InodeNum::ROOT).unwrap();
		dev.encode_at(sb.ino_byte_offset(InodeNum::ROOT).unwrap(), &root).unwrap();
		(dev, sb)
	}

	fn mkfile(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock, name: &str) -> InodeNum {
		let inr = alloc_inode(dev, sb, InodeType::File, 0, 0, 1).unwrap();
		let mut rec = fcluster::peek_inode(dev, sb, inr).unwrap();
		rec.mode |= 0o644;
		let mut root = fcluster::peek_inode(dev, sb, InodeNum::ROOT).unwrap();
		add_entry(dev, sb, &mut root, InodeNum::ROOT, OsStr::new(name), &mut rec, inr, AttachOp::Add).unwrap();
		dev.encode_at(sb.ino_byte_offset(inr).unwrap(), &rec).unwrap();
		dev.encode_at(sb.ino_byte_offset(InodeNum::ROOT).unwrap(), &root).unwrap();
		inr
	}

	fn mkdir(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock, parent: InodeNum, name: &str) -> InodeNum {
		let inr = alloc_inode(dev, sb, InodeType::Directory, 0, 0, 1).unwrap();
		let mut rec = fcluster::peek_inode(dev, sb, inr).unwrap();
		rec.mode |= 0o755;
		let mut parent_rec = fcluster::peek_inode(dev, sb, parent).unwrap();
		add_entry(dev, sb, &mut parent_rec, parent, OsStr::new(name), &mut rec, inr, AttachOp::Add).unwrap();
		dev.encode_at(sb.ino_byte_offset(inr).unwrap(), &rec).unwrap();
		dev.encode_at(sb.ino_byte_offset(parent).unwrap(), &parent_rec).unwrap();
		inr
	}

	#[test]
	fn write_then_read_roundtrip() {
		let (mut dev, mut sb) = fresh(8, 64);
		mkfile(&mut dev, &mut sb, "f.txt");

		let n = write(&mut dev, &mut sb, InodeNum::ROOT, "/f.txt", 0, b"hello", Process::ROOT, 10).unwrap();
		assert_eq!(n, 5);

		let mut buf = [0u8; 5];
		let n = read(&mut dev, &mut sb, InodeNum::ROOT, "/f.txt", 0, &mut buf, Process::ROOT, 11).unwrap();
		assert_eq!(n, 5);
		assert_eq!(&buf, b"hello");
	}

	#[test]
	fn truncate_shrinks_and_frees_clusters() {
		let (mut dev, mut sb) = fresh(8, 64);
		mkfile(&mut dev, &mut sb, "f.txt");
		let data = vec![0xABu8; (CLUSTER_SIZE * 2) as usize];
		write(&mut dev, &mut sb, InodeNum::ROOT, "/f.txt", 0, &data, Process::ROOT, 1).unwrap();
		let before = sb.dzone_free;

		truncate(&mut dev, &mut sb, InodeNum::ROOT, "/f.txt", CLUSTER_SIZE, Process::ROOT, 2).unwrap();
		assert!(sb.dzone_free > before);
	}

	#[test]
	fn truncate_extends_and_allocates_clusters() {
		let (mut dev, mut sb) = fresh(8, 64);
		let inr = mkfile(&mut dev, &mut sb, "f.txt");
		write(&mut dev, &mut sb, InodeNum::ROOT, "/f.txt", 0, b"hi", Process::ROOT, 1).unwrap();
		let before = sb.dzone_free;

		truncate(&mut dev, &mut sb, InodeNum::ROOT, "/f.txt", CLUSTER_SIZE + 1, Process::ROOT, 2).unwrap();

		let rec = fcluster::peek_inode(&mut dev, &sb, inr).unwrap();
		assert_eq!(rec.size, CLUSTER_SIZE + 1);
		assert_eq!(rec.clucount, 2);
		assert_eq!(sb.dzone_free, before - 1);
	}

	#[test]
	fn rename_within_same_directory() {
		let (mut dev, mut sb) = fresh(8, 64);
		let inr = mkfile(&mut dev, &mut sb, "a.txt");
		rename(&mut dev, &mut sb, InodeNum::ROOT, "/a.txt", "/b.txt", Process::ROOT, 1).unwrap();

		let names = readdir(&mut dev, &mut sb, InodeNum::ROOT, "/", Process::ROOT, 2).unwrap();
		assert!(names.iter().any(|(n, i)| n == OsStr::new("b.txt") && *i == inr));
		assert!(!names.iter().any(|(n, _)| n == OsStr::new("a.txt")));
	}

	#[test]
	fn rename_across_directories_rewrites_dotdot() {
		let (mut dev, mut sb) = fresh(8, 64);
		let d1 = mkdir(&mut dev, &mut sb, InodeNum::ROOT, "d1");
		let _d2 = mkdir(&mut dev, &mut sb, InodeNum::ROOT, "d2");
		let file_x = {
			let mut dir1 = fcluster::peek_inode(&mut dev, &sb, d1).unwrap();
			let inr = alloc_inode(&mut dev, &mut sb, InodeType::File, 0, 0, 1).unwrap();
			let mut rec = fcluster::peek_inode(&mut dev, &sb, inr).unwrap();
			add_entry(&mut dev, &mut sb, &mut dir1, d1, OsStr::new("x"), &mut rec, inr, AttachOp::Add).unwrap();
			dev.encode_at(sb.ino_byte_offset(inr).unwrap(), &rec).unwrap();
			dev.encode_at(sb.ino_byte_offset(d1).unwrap(), &dir1).unwrap();
			inr
		};

		rename(&mut dev, &mut sb, InodeNum::ROOT, "/d1/x", "/d2/y", Process::ROOT, 5).unwrap();
		let err = readdir(&mut dev, &mut sb, InodeNum::ROOT, "/d1/x", Process::ROOT, 6).unwrap_err();
		assert_eq!(err, Error::NoEntry);
		let names = readdir(&mut dev, &mut sb, InodeNum::ROOT, "/d2", Process::ROOT, 7).unwrap();
		assert!(names.iter().any(|(n, i)| n == OsStr::new("y") && *i == file_x));

		let moved_rec = fcluster::peek_inode(&mut dev, &sb, file_x).unwrap();
		assert_eq!(moved_rec.refcount, 1);
	}

	#[test]
	fn read_directory_is_rejected() {
		let (mut dev, mut sb) = fresh(8, 64);
		mkdir(&mut dev, &mut sb, InodeNum::ROOT, "sub");

		let mut buf = [0u8; 4];
		let err =
			read(&mut dev, &mut sb, InodeNum::ROOT, "/sub", 0, &mut buf, Process::ROOT, 3).unwrap_err();
		assert_eq!(err, Error::IsDirectory);
	}
}
