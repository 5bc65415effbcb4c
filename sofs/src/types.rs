//! Small newtypes shared across layers: inode/cluster numbers, the inode
//! type tag, and the (uid, gid) pair operations are authorized against.

use std::fmt;

use bincode::{Decode, Encode};

use crate::layout::{NULL_CLUSTER, NULL_INODE, ROOT_INODE};

/// An inode table index. `NULL_INODE` is a valid bit pattern but never a
/// valid inode number to operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Decode, Encode)]
pub struct InodeNum(u32);

impl InodeNum {
	pub const ROOT: Self = Self(ROOT_INODE);
	pub const NULL: Self = Self(NULL_INODE);

	pub const fn new(n: u32) -> Self {
		Self(n)
	}

	pub const fn get(self) -> u32 {
		self.0
	}

	pub const fn is_null(self) -> bool {
		self.0 == NULL_INODE
	}
}

impl fmt::Display for InodeNum {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

impl From<u32> for InodeNum {
	fn from(n: u32) -> Self {
		Self(n)
	}
}

/// A logical data-cluster number. `NULL_CLUSTER` means "unallocated" /
/// "hole" wherever it appears in an inode's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Decode, Encode)]
pub struct ClusterRef(u32);

impl ClusterRef {
	pub const NULL: Self = Self(NULL_CLUSTER);
	pub const ROOT: Self = Self(0);

	pub const fn new(n: u32) -> Self {
		Self(n)
	}

	pub const fn get(self) -> u32 {
		self.0
	}

	pub const fn is_null(self) -> bool {
		self.0 == NULL_CLUSTER
	}
}

impl fmt::Display for ClusterRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_null() {
			write!(f, "<null>")
		} else {
			write!(f, "{}", self.0)
		}
	}
}

impl From<u32> for ClusterRef {
	fn from(n: u32) -> Self {
		Self(n)
	}
}

impl Default for ClusterRef {
	fn default() -> Self {
		Self::NULL
	}
}

/// The legal inode type tags. Exactly one of these bits is set in an
/// in-use inode's `mode` field; the `FREE` bit lives alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
	File,
	Directory,
	Symlink,
}

/// `mode` bit layout: bits 9-11 hold the type tag, bit 12 the free flag,
/// bits 0-8 the rwx permission triples.
pub mod mode {
	pub const PERM_MASK: u16 = 0o777;
	pub const TYPE_FILE: u16 = 0o1 << 9;
	pub const TYPE_DIR: u16 = 0o2 << 9;
	pub const TYPE_SYMLINK: u16 = 0o4 << 9;
	pub const TYPE_MASK: u16 = 0o7 << 9;
	pub const FREE: u16 = 1 << 12;

	pub const OWNER_R: u16 = 0o400;
	pub const OWNER_W: u16 = 0o200;
	pub const OWNER_X: u16 = 0o100;
	pub const GROUP_R: u16 = 0o040;
	pub const GROUP_W: u16 = 0o020;
	pub const GROUP_X: u16 = 0o010;
	pub const OTHER_R: u16 = 0o004;
	pub const OTHER_W: u16 = 0o002;
	pub const OTHER_X: u16 = 0o001;
}

impl InodeType {
	pub fn type_bits(self) -> u16 {
		match self {
			Self::File => mode::TYPE_FILE,
			Self::Directory => mode::TYPE_DIR,
			Self::Symlink => mode::TYPE_SYMLINK,
		}
	}

	pub fn from_bits(bits: u16) -> Option<Self> {
		match bits & mode::TYPE_MASK {
			mode::TYPE_FILE => Some(Self::File),
			mode::TYPE_DIR => Some(Self::Directory),
			mode::TYPE_SYMLINK => Some(Self::Symlink),
			_ => None,
		}
	}
}

/// Operations being requested against a permission check (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMask {
	pub read: bool,
	pub write: bool,
	pub exec: bool,
}

impl AccessMask {
	pub const R: Self = Self { read: true, write: false, exec: false };
	pub const W: Self = Self { read: false, write: true, exec: false };
	pub const X: Self = Self { read: false, write: false, exec: true };
	pub const RW: Self = Self { read: true, write: true, exec: false };
	pub const WX: Self = Self { read: false, write: true, exec: true };
	pub const RWX: Self = Self { read: true, write: true, exec: true };
}

/// The identity of the process performing an operation, for permission
/// checks. There is no kernel here, so callers supply this explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Process {
	pub uid: u32,
	pub gid: u32,
}

impl Process {
	pub const ROOT: Self = Self { uid: 0, gid: 0 };

	pub fn is_root(self) -> bool {
		self.uid == 0
	}
}
