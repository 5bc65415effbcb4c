//! The on-disk inode record (§3) and its dual-use `vD1`/`vD2` fields.

use bincode::{Decode, Encode};

use crate::{
	error::{Error, Result},
	layout::{N_DIRECT, NULL_CLUSTER},
	types::{mode, InodeType},
};

/// One inode-table record.
///
/// `v_d1`/`v_d2` are a tagged union keyed on `mode`'s `FREE` bit: while the
/// inode is free they hold the doubly-linked free-list `prev`/`next`
/// indices; while in use they hold `atime`/`mtime`. The accessor methods
/// below are the only places that should read/write them, so the tag
/// invariant stays in one place.
#[derive(Debug, Clone, Decode, Encode)]
pub struct InodeRecord {
	pub mode: u16,
	pub refcount: u32,
	pub owner: u32,
	pub group: u32,
	pub size: u64,
	pub clucount: u32,
	v_d1: u32,
	v_d2: u32,
	pub d: [u32; N_DIRECT],
	pub i1: u32,
	pub i2: u32,
}

impl InodeRecord {
	/// A free inode that is its own singleton free-list node.
	pub fn free_singleton(self_index: u32) -> Self {
		Self {
			mode: mode::FREE,
			refcount: 0,
			owner: 0,
			group: 0,
			size: 0,
			clucount: 0,
			v_d1: self_index,
			v_d2: self_index,
			d: [NULL_CLUSTER; N_DIRECT],
			i1: NULL_CLUSTER,
			i2: NULL_CLUSTER,
		}
	}

	pub fn is_free(&self) -> bool {
		self.mode & mode::FREE != 0
	}

	pub fn kind(&self) -> Option<InodeType> {
		if self.is_free() {
			None
		} else {
			InodeType::from_bits(self.mode)
		}
	}

	pub fn perm(&self) -> u16 {
		self.mode & mode::PERM_MASK
	}

	pub fn assert_in_use(&self) -> Result<()> {
		if self.is_free() || self.kind().is_none() {
			Err(Error::Inconsistent("in-use-inode"))
		} else {
			Ok(())
		}
	}

	pub fn assert_kind(&self, want: InodeType) -> Result<()> {
		self.assert_in_use()?;
		if self.kind() == Some(want) {
			Ok(())
		} else if want == InodeType::Directory {
			Err(Error::NotDirectory)
		} else {
			Err(Error::IsDirectory)
		}
	}

	// --- free-list interpretation (valid only while `is_free()`) ---

	pub fn free_prev(&self) -> u32 {
		debug_assert!(self.is_free());
		self.v_d1
	}

	pub fn set_free_prev(&mut self, prev: u32) {
		debug_assert!(self.is_free());
		self.v_d1 = prev;
	}

	pub fn free_next(&self) -> u32 {
		debug_assert!(self.is_free());
		self.v_d2
	}

	pub fn set_free_next(&mut self, next: u32) {
		debug_assert!(self.is_free());
		self.v_d2 = next;
	}

	// --- in-use interpretation (valid only while `!is_free()`) ---

	pub fn atime(&self) -> u32 {
		debug_assert!(!self.is_free());
		self.v_d1
	}

	pub fn set_atime(&mut self, t: u32) {
		debug_assert!(!self.is_free());
		self.v_d1 = t;
	}

	pub fn mtime(&self) -> u32 {
		debug_assert!(!self.is_free());
		self.v_d2
	}

	pub fn set_mtime(&mut self, t: u32) {
		debug_assert!(!self.is_free());
		self.v_d2 = t;
	}

	/// Transition a free inode to in-use, per `Alloc-Inode`'s step 4.
	pub fn activate(&mut self, kind: InodeType, owner: u32, group: u32, now: u32) {
		self.mode = kind.type_bits();
		self.owner = owner;
		self.group = group;
		self.size = 0;
		self.clucount = 0;
		self.refcount = 0;
		self.v_d1 = now; // atime
		self.v_d2 = now; // mtime
		self.d = [NULL_CLUSTER; N_DIRECT];
		self.i1 = NULL_CLUSTER;
		self.i2 = NULL_CLUSTER;
	}

	/// Transition an in-use inode back to free, preparing it to be spliced
	/// into the free list by the caller.
	pub fn deactivate(&mut self) {
		self.mode = mode::FREE;
		self.owner = 0;
		self.group = 0;
		self.size = 0;
		self.clucount = 0;
		self.refcount = 0;
		self.d = [NULL_CLUSTER; N_DIRECT];
		self.i1 = NULL_CLUSTER;
		self.i2 = NULL_CLUSTER;
	}
}
