//! Path traversal (§4.7): split an absolute path into components, walk
//! the directory tree, and resolve symbolic links along the way.
//!
//! Grounded on `soGetDirEntryByPath.c`'s component-by-component descent;
//! symlink following and loop detection have no equivalent there since
//! SOFS15 doesn't implement symlinks end-to-end, so this is built from the
//! same pattern `rufs` uses at its FUSE boundary for `lookup`/`readlink`
//! chains. Loop detection is a single flag, not a hop counter: a
//! resolution may follow one symlink, but a second one encountered before
//! it finishes fails with `Loop` (§4.7/§7), regardless of how few hops
//! that is.

use std::ffi::OsStr;

use crate::{
	blockdev::{Backend, BlockDevice},
	dir::{find_entry, Lookup},
	error::{Error, Result},
	fcluster::{peek_inode, read_bytes},
	layout::MAX_PATH,
	perm::check_access,
	superblock::Superblock,
	types::{AccessMask, InodeNum, InodeType, Process},
};

/// Resolve an absolute path to the inode it names, following symlinks.
pub fn resolve(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	path: &str,
	proc: Process,
) -> Result<InodeNum> {
	resolve_inner(dev, sb, root, path, proc, false)
}

/// Resolve the parent directory of `path`'s last component and return
/// `(parent_inode, last_component)`, following symlinks on every
/// component but the last.
pub fn resolve_parent<'a>(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	path: &'a str,
	proc: Process,
) -> Result<(InodeNum, &'a OsStr)> {
	if path.len() > MAX_PATH {
		return Err(Error::NameTooLong);
	}
	let path = path.strip_prefix('/').ok_or(Error::RelativePath)?;
	let (parent_path, last) = match path.rsplit_once('/') {
		Some((p, l)) => (p, l),
		None => ("", path),
	};
	let parent = if parent_path.is_empty() {
		resolve_inner(dev, sb, root, "/", proc, false)?
	} else {
		resolve_inner(dev, sb, root, &format!("/{parent_path}"), proc, false)?
	};
	if last.is_empty() {
		return Err(Error::InvalidArgument);
	}
	Ok((parent, OsStr::new(last)))
}

fn resolve_inner(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	root: InodeNum,
	path: &str,
	proc: Process,
	followed: bool,
) -> Result<InodeNum> {
	if path.len() > MAX_PATH {
		return Err(Error::NameTooLong);
	}
	let rest = path.strip_prefix('/').ok_or(Error::RelativePath)?;
	let mut current = root;
	for component in rest.split('/').filter(|c| !c.is_empty()) {
		let mut dir = peek_inode(dev, sb, current)?;
		dir.assert_kind(InodeType::Directory)?;
		check_access(&dir, proc, AccessMask::X)?;

		let next = match find_entry(dev, sb, &mut dir, OsStr::new(component))? {
			Lookup::Found { inode, .. } => inode,
			Lookup::NotFound { .. } => return Err(Error::NoEntry),
		};

		let next_rec = peek_inode(dev, sb, next)?;
		current = if next_rec.kind() == Some(InodeType::Symlink) {
			if followed {
				return Err(Error::Loop);
			}
			let target = read_symlink(dev, sb, next)?;
			let target = target.to_str().ok_or(Error::InvalidArgument)?;
			let base = if target.starts_with('/') { root } else { current };
			if target.starts_with('/') {
				resolve_inner(dev, sb, root, target, proc, true)?
			} else {
				resolve_relative(dev, sb, base, target, proc, true)?
			}
		} else {
			next
		};
	}
	Ok(current)
}

/// Resolve `target` (no leading `/`) relative to directory inode `base`.
fn resolve_relative(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	base: InodeNum,
	target: &str,
	proc: Process,
	followed: bool,
) -> Result<InodeNum> {
	let mut current = base;
	for component in target.split('/').filter(|c| !c.is_empty()) {
		if component == "." {
			continue;
		}
		let mut dir = peek_inode(dev, sb, current)?;
		dir.assert_kind(InodeType::Directory)?;
		check_access(&dir, proc, AccessMask::X)?;
		current = match find_entry(dev, sb, &mut dir, OsStr::new(component))? {
			Lookup::Found { inode, .. } => inode,
			Lookup::NotFound { .. } => return Err(Error::NoEntry),
		};
		let rec = peek_inode(dev, sb, current)?;
		if rec.kind() == Some(InodeType::Symlink) {
			if followed {
				return Err(Error::Loop);
			}
			let link = read_symlink(dev, sb, current)?;
			let link = link.to_str().ok_or(Error::InvalidArgument)?;
			current = if link.starts_with('/') {
				resolve_inner(dev, sb, current, link, proc, true)?
			} else {
				resolve_relative(dev, sb, current, link, proc, true)?
			};
		}
	}
	Ok(current)
}

/// Read a symlink's stored target path.
pub fn read_symlink(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	inr: InodeNum,
) -> Result<std::ffi::OsString> {
	let mut ino = peek_inode(dev, sb, inr)?;
	ino.assert_kind(InodeType::Symlink)?;
	let mut buf = vec![0u8; ino.size as usize];
	read_bytes(dev, sb, &mut ino, 0, &mut buf)?;
	Ok(std::os::unix::ffi::OsStringExt::from_vec(buf))
}
