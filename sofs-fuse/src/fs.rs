use std::{
	ffi::{c_int, OsStr},
	fs::File,
	io::{Error as IoError, ErrorKind, Result as IoResult},
	path::Path,
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use fuser::{
	FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen,
	ReplyStatfs, ReplyWrite, Request,
};
use sofs::{Attr, Error, InodeNum, InodeType, Process, Sofs};

const TTL: Duration = Duration::from_secs(1);

pub struct Fs {
	sofs: Sofs<File>,
}

impl Fs {
	pub fn open(device: &Path) -> anyhow::Result<Self> {
		let sofs = Sofs::open(device)?;
		Ok(Self { sofs })
	}
}

/// Map a FUSE inode number onto ours: FUSE's well-known root id doesn't
/// have to equal our on-disk root inode number, so it's translated at the
/// boundary rather than baked into the allocator (mirrors `rufs`'s
/// `transino`).
fn transino(inr: u64, root: InodeNum) -> IoResult<InodeNum> {
	if inr == fuser::FUSE_ROOT_ID {
		Ok(root)
	} else {
		let inr: u32 = inr.try_into().map_err(|_| IoError::from(ErrorKind::InvalidInput))?;
		Ok(InodeNum::new(inr))
	}
}

fn run<T>(f: impl FnOnce() -> Result<T, Error>) -> Result<T, c_int> {
	f().map_err(|e| {
		log::error!("{e}");
		let io: IoError = e.into();
		io.raw_os_error().unwrap_or(libc::EIO)
	})
}

fn file_type(kind: InodeType) -> FileType {
	match kind {
		InodeType::File => FileType::RegularFile,
		InodeType::Directory => FileType::Directory,
		InodeType::Symlink => FileType::Symlink,
	}
}

fn secs(t: u32) -> SystemTime {
	UNIX_EPOCH + Duration::from_secs(t as u64)
}

fn file_attr(a: Attr) -> FileAttr {
	FileAttr {
		ino: a.ino.get() as u64,
		size: a.size,
		blocks: a.size.div_ceil(512),
		atime: secs(a.atime),
		mtime: secs(a.mtime),
		ctime: secs(a.mtime),
		crtime: secs(a.mtime),
		kind: file_type(a.kind),
		perm: a.mode,
		nlink: a.nlink,
		uid: 0,
		gid: 0,
		rdev: 0,
		blksize: 4096,
		flags: 0,
	}
}

impl Filesystem for Fs {
	fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
		Ok(())
	}

	fn destroy(&mut self) {}

	fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
		let root = self.sofs.root();
		let f = || {
			let parent = transino(parent, root).map_err(|_| Error::InvalidArgument)?;
			let inr = self.sofs.lookup(parent, name)?;
			self.sofs.getattr(inr)
		};
		match run(f) {
			Ok(a) => reply.entry(&TTL, &file_attr(a), 0),
			Err(e) => reply.error(e),
		}
	}

	fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
		let root = self.sofs.root();
		let f = || {
			let inr = transino(ino, root).map_err(|_| Error::InvalidArgument)?;
			self.sofs.getattr(inr)
		};
		match run(f) {
			Ok(a) => reply.attr(&TTL, &file_attr(a)),
			Err(e) => reply.error(e),
		}
	}

	fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
		reply.opened(0, 0);
	}

	fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
		reply.opened(0, 0);
	}

	fn read(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		size: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyData,
	) {
		let root = self.sofs.root();
		let f = || {
			let inr = transino(ino, root).map_err(|_| Error::InvalidArgument)?;
			let mut buf = vec![0u8; size as usize];
			let n = self.sofs.read_inode(inr, offset as u64, &mut buf)?;
			buf.truncate(n);
			Ok(buf)
		};
		match run(f) {
			Ok(buf) => reply.data(&buf),
			Err(e) => reply.error(e),
		}
	}

	fn write(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		data: &[u8],
		_write_flags: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyWrite,
	) {
		let root = self.sofs.root();
		let f = || {
			let inr = transino(ino, root).map_err(|_| Error::InvalidArgument)?;
			self.sofs.write_inode(inr, offset as u64, data)
		};
		match run(f) {
			Ok(n) => reply.written(n as u32),
			Err(e) => reply.error(e),
		}
	}

	fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
		let root = self.sofs.root();
		let f = || {
			let inr = transino(ino, root).map_err(|_| Error::InvalidArgument)?;
			self.sofs.readdir_inode(inr)
		};
		match run(f) {
			Ok(entries) => {
				for (i, (name, inr)) in entries.into_iter().enumerate().skip(offset as usize) {
					let kind = self.sofs.getattr(inr).map(|a| file_type(a.kind)).unwrap_or(FileType::RegularFile);
					if reply.add(inr.get() as u64, (i + 1) as i64, kind, &name) {
						break;
					}
				}
				reply.ok()
			}
			Err(e) => reply.error(e),
		}
	}

	fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
		let root = self.sofs.root();
		let f = || {
			let inr = transino(ino, root).map_err(|_| Error::InvalidArgument)?;
			self.sofs.readlink(inr)
		};
		match run(f) {
			Ok(target) => reply.data(target.as_encoded_bytes()),
			Err(e) => reply.error(e),
		}
	}

	fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
		let sb = self.sofs.info();
		reply.statfs(
			sb.dzone_total as u64,
			sb.dzone_free as u64,
			sb.dzone_free as u64,
			(sb.itotal - sb.ifree) as u64,
			sb.ifree as u64,
			4096,
			255,
			4096,
		)
	}

	fn rename(
		&mut self,
		_req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		newparent: u64,
		newname: &OsStr,
		_flags: u32,
		reply: fuser::ReplyEmpty,
	) {
		let root = self.sofs.root();
		let f = || {
			let parent = transino(parent, root).map_err(|_| Error::InvalidArgument)?;
			let newparent = transino(newparent, root).map_err(|_| Error::InvalidArgument)?;
			let old = abs_path(&mut self.sofs, parent, name)?;
			let new = abs_path(&mut self.sofs, newparent, newname)?;
			self.sofs.rename(&old, &new, Process::ROOT)
		};
		match run(f) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}
}

/// Build the one-level path `sofs::Sofs::rename` needs from a directory's
/// inode and a child name, using `..`/entry-scan to recover the parent's
/// own name when it isn't the root. `sofs`'s syscall layer is
/// path-addressed (§4.8); FUSE hands back inode numbers, so `rename` is
/// the one call here that still needs a path round trip.
fn abs_path(sofs: &mut Sofs<File>, dir: InodeNum, name: &OsStr) -> Result<String, Error> {
	let root = sofs.root();
	let mut components = vec![name.to_string_lossy().into_owned()];
	let mut current = dir;
	while current != root {
		let parent = sofs.lookup(current, OsStr::new(".."))?;
		let mut found = None;
		for (n, inr) in sofs.readdir_inode(parent)? {
			if inr == current {
				found = Some(n.to_string_lossy().into_owned());
				break;
			}
		}
		components.push(found.ok_or(Error::NoEntry)?);
		current = parent;
	}
	components.reverse();
	Ok(format!("/{}", components.join("/")))
}
