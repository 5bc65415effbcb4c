#![cfg_attr(fuzzing, allow(dead_code, unused_imports, unused_mut))]

mod balloc;
mod blockdev;
mod dir;
mod dirent;
mod error;
mod fcluster;
mod format;
mod fs;
mod ialloc;
mod inode;
mod layout;
mod path;
mod perm;
mod superblock;
mod syscall;
mod types;

pub use crate::{
	blockdev::{Backend, BlockDevice},
	error::{Error, Result},
	format::{format, read_superblock, FormatOptions},
	fs::{Attr, Sofs},
	layout::{CLUSTER_SIZE, MAX_FILE_SIZE},
	superblock::Superblock,
	types::{AccessMask, InodeNum, InodeType, Process},
};
