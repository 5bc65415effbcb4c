//! Directory engine (§4.7): directories are regular files whose data
//! clusters hold fixed-size arrays of [`DirEntry`] records, addressed
//! through the same per-inode cluster index as any other file. Every
//! in-use directory carries its own "." (self) and ".." (parent) records
//! in slots 0 and 1 (§3 invariant 7).
//!
//! Grounded on `soGetDirEntryByName.c`/`soAddAttDirEntry.c`/
//! `soRemDetachDirEntry.c`/`soRenameDirEntry.c`: a directory scan walks
//! every allocated cluster of the directory inode, decoding `DPC` entries
//! per cluster, looking for a name match while also remembering the first
//! reusable slot in case the caller wants to add an entry.

use std::ffi::OsStr;

use crate::{
	blockdev::{Backend, BlockDevice},
	dirent::{check_name, is_reserved, DirEntry},
	error::{Error, Result},
	fcluster::{self, handle_file_cluster, ClusterOp},
	ialloc,
	inode::InodeRecord,
	layout::{CLUSTER_SIZE, DIRENT_SIZE, DPC},
	superblock::Superblock,
	types::{ClusterRef, InodeNum, InodeType},
};

/// The location of one directory entry: which logical cluster of the
/// directory file it lives in, and which of the `DPC` slots within it.
#[derive(Debug, Clone, Copy)]
pub struct EntrySlot {
	pub cluster_index: u64,
	pub offset: usize,
}

fn entry_byte_offset(cref: ClusterRef, slot: usize) -> u64 {
	cref.get() as u64 * CLUSTER_SIZE + slot as u64 * DIRENT_SIZE
}

fn read_entry(dev: &mut BlockDevice<impl Backend>, cref: ClusterRef, slot: usize) -> Result<DirEntry> {
	dev.decode_at(entry_byte_offset(cref, slot))
}

fn write_entry(
	dev: &mut BlockDevice<impl Backend>,
	cref: ClusterRef,
	slot: usize,
	entry: &DirEntry,
) -> Result<()> {
	dev.encode_at(entry_byte_offset(cref, slot), entry)
}

fn store_inode(dev: &mut BlockDevice<impl Backend>, sb: &Superblock, inr: InodeNum, rec: &InodeRecord) -> Result<()> {
	dev.encode_at(sb.ino_byte_offset(inr)?, rec)
}

fn allocated_clusters(dir: &InodeRecord) -> u64 {
	dir.size.div_ceil(CLUSTER_SIZE)
}

/// Outcome of scanning a directory for a name.
pub enum Lookup {
	Found { inode: InodeNum, slot: EntrySlot },
	NotFound { free_slot: Option<EntrySlot> },
}

/// Scan `dir` for an entry named `name` (§4.7's `Get-Entry-By-Name`,
/// generalized to also report the first reusable slot for `Add-Entry`).
pub fn find_entry(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	dir: &mut InodeRecord,
	name: &OsStr,
) -> Result<Lookup> {
	check_name(name)?;
	let mut free_slot = None;
	for ci in 0..allocated_clusters(dir) {
		let cref = handle_file_cluster(dev, sb, dir, ci, ClusterOp::Get)?;
		crate::error::consist!(!cref.is_null(), "directory-cluster-hole");
		for offset in 0..DPC as usize {
			let entry = read_entry(dev, cref, offset)?;
			if entry.name_eq(name) {
				return Ok(Lookup::Found {
					inode: entry.inode(),
					slot: EntrySlot { cluster_index: ci, offset },
				});
			}
			if free_slot.is_none() && entry.is_free() {
				free_slot = Some(EntrySlot { cluster_index: ci, offset });
			}
		}
	}
	Ok(Lookup::NotFound { free_slot })
}

/// Whether `dir` holds nothing but its own "." and ".." entries (§4.7's
/// emptiness check for `Rem-Entry` on a directory, §7's `Not-Empty`).
pub fn is_empty(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock, dir: &mut InodeRecord) -> Result<bool> {
	Ok(iter_entries(dev, sb, dir)?.len() <= 2)
}

fn init_dir_cluster(dev: &mut BlockDevice<impl Backend>, cref: ClusterRef) -> Result<()> {
	let empty = DirEntry::empty();
	for offset in 0..DPC as usize {
		write_entry(dev, cref, offset, &empty)?;
	}
	Ok(())
}

/// Seed a freshly created (empty, cluster-less) directory's cluster 0
/// with "." (self) and ".." (parent) entries. Sets `dir.refcount` to
/// account for the "." self-reference (1), plus one more (2 total) when
/// `dir_inr == parent_inr` — the root-bootstrap case, which has no
/// enclosing parent to go through `Add-Entry` with and so never receives
/// the later "named in a parent" increment that `add_entry` applies for
/// every other directory.
pub fn seed_self(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	dir: &mut InodeRecord,
	dir_inr: InodeNum,
	parent_inr: InodeNum,
) -> Result<()> {
	let cref = handle_file_cluster(dev, sb, dir, 0, ClusterOp::Alloc)?;
	init_dir_cluster(dev, cref)?;
	write_entry(dev, cref, 0, &DirEntry::new(OsStr::new("."), dir_inr)?)?;
	write_entry(dev, cref, 1, &DirEntry::new(OsStr::new(".."), parent_inr)?)?;
	dir.refcount = if dir_inr == parent_inr { 2 } else { 1 };
	dir.size = CLUSTER_SIZE;
	Ok(())
}

fn rewrite_dotdot(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	ent: &mut InodeRecord,
	new_parent: InodeNum,
) -> Result<()> {
	let cref = handle_file_cluster(dev, sb, ent, 0, ClusterOp::Get)?;
	crate::error::consist!(!cref.is_null(), "directory-missing-cluster-zero");
	write_entry(dev, cref, 1, &DirEntry::new(OsStr::new(".."), new_parent)?)
}

/// Which of `Add-Entry`'s two forms `add_entry` performs (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOp {
	/// `ent` is a brand-new directory being given its first name: seed its
	/// cluster 0 with "." and "..", and set its `refcount` to 2.
	Add,
	/// `ent` is an already-initialized directory gaining another parent
	/// link (e.g. a cross-directory move): rewrite its ".." in place.
	Attach,
}

/// Add `name -> ent` to `dir` (`Add/Attach-Entry`, §4.7). Fails with
/// [`Error::Exists`] if the name is already present; otherwise reuses the
/// first free slot or extends the directory by one cluster.
#[allow(clippy::too_many_arguments)]
pub fn add_entry(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	dir: &mut InodeRecord,
	dir_inr: InodeNum,
	name: &OsStr,
	ent: &mut InodeRecord,
	ent_inr: InodeNum,
	op: AttachOp,
) -> Result<()> {
	if is_reserved(name) {
		return Err(Error::InvalidArgument);
	}
	let free_slot = match find_entry(dev, sb, dir, name)? {
		Lookup::Found { .. } => return Err(Error::Exists),
		Lookup::NotFound { free_slot } => free_slot,
	};

	match op {
		AttachOp::Add => {
			if ent.kind() == Some(InodeType::Directory) {
				crate::error::consist!(ent.refcount == 0, "add-entry-fresh-directory");
				seed_self(dev, sb, ent, ent_inr, dir_inr)?;
				dir.refcount += 1;
			}
		}
		AttachOp::Attach => {
			dir.assert_kind(InodeType::Directory)?;
			ent.assert_kind(InodeType::Directory)?;
			crate::error::consist!(ent.refcount >= 1, "attach-entry-initialized-directory");
			rewrite_dotdot(dev, sb, ent, dir_inr)?;
			dir.refcount += 1;
		}
	}

	let slot = match free_slot {
		Some(slot) => slot,
		None => {
			let ci = allocated_clusters(dir);
			let cref = handle_file_cluster(dev, sb, dir, ci, ClusterOp::Alloc)?;
			init_dir_cluster(dev, cref)?;
			dir.size += CLUSTER_SIZE;
			EntrySlot { cluster_index: ci, offset: 0 }
		}
	};
	let cref = handle_file_cluster(dev, sb, dir, slot.cluster_index, ClusterOp::Get)?;
	write_entry(dev, cref, slot.offset, &DirEntry::new(name, ent_inr)?)?;
	ent.refcount += 1;
	Ok(())
}

/// How a removed entry's slot is encoded (§4.7, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
	/// `Rem-Entry`: tombstone the slot so it is never reused by `Add-Entry`.
	Tombstone,
	/// `Detach-Entry`: zero-fill the slot so it becomes reusable.
	Detach,
}

/// Remove the entry named `name` from `dir` (`Rem-Entry`/`Detach-Entry`,
/// §4.7). "." and ".." may never be named. `Tombstone`-removing a
/// directory entry requires it be empty (only "." and ".." left) and
/// additionally severs the "." / ".." relationship (`dir.refcount` and
/// `ent.refcount` both drop once more). Either mode always drops
/// `ent.refcount` once for the removed hard link itself, freeing `ent`'s
/// clusters and inode when it reaches zero.
pub fn remove_entry(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	dir: &mut InodeRecord,
	name: &OsStr,
	mode: RemoveMode,
) -> Result<InodeNum> {
	if is_reserved(name) {
		return Err(Error::InvalidArgument);
	}
	let (ent_inr, slot) = match find_entry(dev, sb, dir, name)? {
		Lookup::Found { inode, slot } => (inode, slot),
		Lookup::NotFound { .. } => return Err(Error::NoEntry),
	};

	let mut ent = fcluster::peek_inode(dev, sb, ent_inr)?;
	let ent_is_dir = ent.kind() == Some(InodeType::Directory);

	if mode == RemoveMode::Tombstone && ent_is_dir {
		if !is_empty(dev, sb, &mut ent)? {
			return Err(Error::NotEmpty);
		}
		dir.refcount -= 1;
		ent.refcount -= 1;
	}

	let cref = handle_file_cluster(dev, sb, dir, slot.cluster_index, ClusterOp::Get)?;
	let mut entry = read_entry(dev, cref, slot.offset)?;
	match mode {
		RemoveMode::Tombstone => entry.tombstone(),
		RemoveMode::Detach => entry.clear(),
	}
	write_entry(dev, cref, slot.offset, &entry)?;

	ent.refcount -= 1;
	store_inode(dev, sb, ent_inr, &ent)?;
	if ent.refcount == 0 {
		fcluster::free_suffix(dev, sb, &mut ent, 0)?;
		store_inode(dev, sb, ent_inr, &ent)?;
		ialloc::free_inode(dev, sb, ent_inr)?;
	}
	Ok(ent_inr)
}

/// Rename the entry named `old` to `new` within the same directory
/// (`Rename-Entry`, §4.7). "." and ".." are not permitted as either name.
/// Existence of `new` is checked by a fresh read-then-compare scan, not
/// by reusing `old`'s cached slot, so a rename never confuses the two
/// names' storage (§9).
pub fn rename_entry(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	dir: &mut InodeRecord,
	old: &OsStr,
	new: &OsStr,
) -> Result<()> {
	if is_reserved(old) || is_reserved(new) {
		return Err(Error::InvalidArgument);
	}
	let (inode, slot) = match find_entry(dev, sb, dir, old)? {
		Lookup::Found { inode, slot } => (inode, slot),
		Lookup::NotFound { .. } => return Err(Error::NoEntry),
	};
	if let Lookup::Found { .. } = find_entry(dev, sb, dir, new)? {
		return Err(Error::Exists);
	}
	let cref = handle_file_cluster(dev, sb, dir, slot.cluster_index, ClusterOp::Get)?;
	let mut entry = read_entry(dev, cref, slot.offset)?;
	entry.set(new, inode)?;
	write_entry(dev, cref, slot.offset, &entry)
}

/// Iterate every live entry in `dir`, in on-disk order (`Readdir`, §4.8).
/// Includes "." and "..".
pub fn iter_entries(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	dir: &mut InodeRecord,
) -> Result<Vec<(std::ffi::OsString, InodeNum)>> {
	let mut out = Vec::new();
	for ci in 0..allocated_clusters(dir) {
		let cref = handle_file_cluster(dev, sb, dir, ci, ClusterOp::Get)?;
		for offset in 0..DPC as usize {
			let entry = read_entry(dev, cref, offset)?;
			if entry.in_use() {
				out.push((entry.name(), entry.inode()));
			}
		}
	}
	Ok(out)
}
