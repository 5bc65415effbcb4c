//! POSIX-style permission checks (§4.7), grounded on `soAccessGranted.c`:
//! owner/group/other rwx triples, with root bypassing read/write entirely
//! and still requiring at least one actor to hold the execute bit.

use crate::{
	error::{Error, Result},
	inode::InodeRecord,
	types::{mode, AccessMask, InodeType, Process},
};

fn any_exec_bit(m: u16) -> bool {
	m & (mode::OWNER_X | mode::GROUP_X | mode::OTHER_X) != 0
}

/// Check `proc`'s access to `inode` against `want`. `inode` must already
/// be in use; a free inode is a caller bug, not an access-control outcome.
pub fn check_access(inode: &InodeRecord, proc: Process, want: AccessMask) -> Result<()> {
	inode.assert_in_use()?;

	if proc.is_root() {
		return if want.exec && !any_exec_bit(inode.mode) { Err(Error::Access) } else { Ok(()) };
	}

	let triple = if inode.owner == proc.uid {
		(inode.mode >> 6) & 0o7
	} else if inode.group == proc.gid {
		(inode.mode >> 3) & 0o7
	} else {
		inode.mode & 0o7
	};

	let need = (want.read as u16) << 2 | (want.write as u16) << 1 | want.exec as u16;
	let missing = need & !triple;
	if missing == 0 {
		return Ok(());
	}

	// §7: Access is the X-missing case; Permission is specifically a
	// missing W bit on a directory, with X-missing taking priority when
	// both are absent.
	if missing & 0b001 == 0 && missing & 0b010 != 0 && inode.kind() == Some(InodeType::Directory) {
		Err(Error::Permission)
	} else {
		Err(Error::Access)
	}
}
