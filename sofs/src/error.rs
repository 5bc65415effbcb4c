//! Error taxonomy shared by every layer of the filesystem.

use std::{fmt, io};

/// Every way an operation on a `sofs` image can fail.
///
/// Variants map roughly one-to-one onto the error kinds of the system this
/// crate re-implements; the `Inconsistent` variant covers every structural
/// invariant violation (superblock, free lists, directory records, ...).
/// Callers that receive `Inconsistent` must treat the image as corrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// Null pointer, out-of-range index, illegal op selector, path syntax,
	/// name containing `/`, or an empty name.
	InvalidArgument,
	/// A name exceeded `MAX_NAME`, or a path exceeded `MAX_PATH`.
	NameTooLong,
	/// An allocator (inode or cluster) is exhausted.
	NoSpace,
	/// Expected a directory, found something else.
	NotDirectory,
	/// Expected a non-directory, found a directory.
	IsDirectory,
	/// Directory removal attempted with entries beyond `.`/`..`.
	NotEmpty,
	/// Directory lookup miss, or path component miss.
	NoEntry,
	/// Missing `X` permission.
	Access,
	/// Missing `W` permission on a directory.
	Permission,
	/// A second symlink was encountered during one path resolution.
	Loop,
	/// `Add-Entry`'s target name already exists.
	Exists,
	/// A reference count would overflow its limit.
	TooManyLinks,
	/// A file size would exceed `MAX_FILE_SIZE`.
	FileTooBig,
	/// A path did not start with `/`.
	RelativePath,
	/// A file-cluster index that is supposed to be free is occupied.
	AlreadyAllocated,
	/// A file-cluster index that is supposed to be occupied is free.
	NotAllocated,
	/// A structural invariant was violated; the named component identifies
	/// which substructure failed its consistency check.
	Inconsistent(&'static str),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::InvalidArgument => write!(f, "invalid argument"),
			Self::NameTooLong => write!(f, "name too long"),
			Self::NoSpace => write!(f, "no space left on device"),
			Self::NotDirectory => write!(f, "not a directory"),
			Self::IsDirectory => write!(f, "is a directory"),
			Self::NotEmpty => write!(f, "directory not empty"),
			Self::NoEntry => write!(f, "no such entry"),
			Self::Access => write!(f, "search permission denied"),
			Self::Permission => write!(f, "permission denied"),
			Self::Loop => write!(f, "too many levels of symbolic links"),
			Self::Exists => write!(f, "entry already exists"),
			Self::TooManyLinks => write!(f, "too many links"),
			Self::FileTooBig => write!(f, "file too large"),
			Self::RelativePath => write!(f, "path is not absolute"),
			Self::AlreadyAllocated => write!(f, "file-cluster index already allocated"),
			Self::NotAllocated => write!(f, "file-cluster index not allocated"),
			Self::Inconsistent(what) => write!(f, "inconsistent {what}"),
		}
	}
}

impl std::error::Error for Error {}

impl Error {
	/// The nearest POSIX errno for this error, used at the syscall/FUSE
	/// boundary. `Inconsistent` has no good errno, so it maps to `EIO`.
	pub fn raw_os_error(&self) -> i32 {
		match self {
			Self::InvalidArgument => libc::EINVAL,
			Self::NameTooLong => libc::ENAMETOOLONG,
			Self::NoSpace => libc::ENOSPC,
			Self::NotDirectory => libc::ENOTDIR,
			Self::IsDirectory => libc::EISDIR,
			Self::NotEmpty => libc::ENOTEMPTY,
			Self::NoEntry => libc::ENOENT,
			Self::Access => libc::EACCES,
			Self::Permission => libc::EPERM,
			Self::Loop => libc::ELOOP,
			Self::Exists => libc::EEXIST,
			Self::TooManyLinks => libc::EMLINK,
			Self::FileTooBig => libc::EFBIG,
			Self::RelativePath => libc::EINVAL,
			Self::AlreadyAllocated => libc::EINVAL,
			Self::NotAllocated => libc::EINVAL,
			Self::Inconsistent(_) => libc::EIO,
		}
	}
}

impl From<Error> for io::Error {
	fn from(e: Error) -> Self {
		io::Error::from_raw_os_error(e.raw_os_error())
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		match e.raw_os_error() {
			Some(libc::EINVAL) => Self::InvalidArgument,
			Some(libc::ENOSPC) => Self::NoSpace,
			Some(libc::ENOENT) => Self::NoEntry,
			_ => Self::Inconsistent("io"),
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;

/// (INTERNAL) Shorthand for returning an [`Error::Inconsistent`] after
/// logging it, matching the `sbassert!`-style checks of the teacher.
macro_rules! consist {
	($cond:expr, $what:expr) => {
		if !($cond) {
			log::error!("consistency check failed: {}", $what);
			return Err($crate::error::Error::Inconsistent($what));
		}
	};
}

pub(crate) use consist;
