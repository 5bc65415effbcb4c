//! Directory entry records (§3, §4.7).

use std::ffi::{OsStr, OsString};

use bincode::{Decode, Encode};

use crate::{
	error::{Error, Result},
	layout::{MAX_NAME, NULL_INODE},
	types::InodeNum,
};

/// One directory-cluster slot: a NUL-padded name and an inode number.
/// A slot is free when `name[0] == 0`.
#[derive(Debug, Clone, Decode, Encode)]
pub struct DirEntry {
	name: [u8; MAX_NAME + 1],
	inode: u32,
}

impl DirEntry {
	pub fn empty() -> Self {
		Self { name: [0u8; MAX_NAME + 1], inode: NULL_INODE }
	}

	pub fn new(name: &OsStr, inr: InodeNum) -> Result<Self> {
		let bytes = name.as_encoded_bytes();
		if bytes.is_empty() || bytes.len() > MAX_NAME {
			return Err(Error::NameTooLong);
		}
		if bytes.contains(&b'/') || bytes.contains(&0) {
			return Err(Error::InvalidArgument);
		}
		let mut buf = [0u8; MAX_NAME + 1];
		buf[..bytes.len()].copy_from_slice(bytes);
		Ok(Self { name: buf, inode: inr.get() })
	}

	/// Whether this slot is reusable by a future `Add-Entry` scan (§4.7):
	/// literally `name[0] == '\0'`. Distinct from [`Self::in_use`] — a
	/// tombstoned entry (see [`Self::tombstone`]) is *not* in use but also
	/// does not report as a free slot, per the spec's eccentric REM
	/// encoding.
	pub fn is_free(&self) -> bool {
		self.name[0] == 0
	}

	/// Whether this slot currently names a live directory entry.
	pub fn in_use(&self) -> bool {
		!self.inode().is_null()
	}

	pub fn inode(&self) -> InodeNum {
		InodeNum::new(self.inode)
	}

	pub fn name(&self) -> OsString {
		let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		unsafe { OsStr::from_encoded_bytes_unchecked(&self.name[..end]) }.to_owned()
	}

	pub fn name_eq(&self, other: &OsStr) -> bool {
		self.in_use() && self.name() == other
	}

	/// `Rem-Entry`'s eccentric tombstone encoding: swap the first and last
	/// bytes of the name so the slot no longer matches any valid lookup
	/// while the final byte still hints at the removed name for undelete
	/// tooling.
	pub fn tombstone(&mut self) {
		let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		if end > 0 {
			self.name.swap(0, end - 1);
		}
		self.inode = NULL_INODE;
	}

	/// `Detach-Entry`'s plain clear: zero-fill the name.
	pub fn clear(&mut self) {
		self.name = [0u8; MAX_NAME + 1];
		self.inode = NULL_INODE;
	}

	pub fn set(&mut self, name: &OsStr, inr: InodeNum) -> Result<()> {
		*self = Self::new(name, inr)?;
		Ok(())
	}
}

/// Whether `name` is one of the reserved self/parent names, which may
/// never be used as an Add/Remove/Rename-Entry target (§4.7).
pub fn is_reserved(name: &OsStr) -> bool {
	name == OsStr::new(".") || name == OsStr::new("..")
}

/// Validate a path component name per §4.7: non-null, non-empty, within
/// `MAX_NAME`, and free of `/`.
pub fn check_name(name: &OsStr) -> Result<()> {
	let bytes = name.as_encoded_bytes();
	if bytes.is_empty() {
		return Err(Error::InvalidArgument);
	}
	if bytes.len() > MAX_NAME {
		return Err(Error::NameTooLong);
	}
	if bytes.contains(&b'/') {
		return Err(Error::InvalidArgument);
	}
	Ok(())
}
