//! Inode allocator (§4.3): a circular doubly-linked free list threaded
//! through the inode table itself, anchored at the superblock's `ihdtl`.
//!
//! Grounded on `soAllocInode.c`/`soFreeInode.c`: a free inode's `vD1`/`vD2`
//! fields double as `prev`/`next` list pointers (see
//! [`crate::inode::InodeRecord::free_prev`]). `ihdtl` names the *head* of
//! the list, the next inode number `alloc_inode` will hand out; the head's
//! `free_prev` is the tail, so the whole ring is one rotation away from any
//! node.

use crate::{
	blockdev::{Backend, BlockDevice},
	error::{Error, Result},
	inode::InodeRecord,
	layout::NULL_INODE,
	superblock::Superblock,
	types::{InodeNum, InodeType},
};

fn load(dev: &mut BlockDevice<impl Backend>, sb: &Superblock, inr: InodeNum) -> Result<InodeRecord> {
	dev.decode_at(sb.ino_byte_offset(inr)?)
}

fn store(
	dev: &mut BlockDevice<impl Backend>,
	sb: &Superblock,
	inr: InodeNum,
	rec: &InodeRecord,
) -> Result<()> {
	dev.encode_at(sb.ino_byte_offset(inr)?, rec)
}

/// Pop the head of the free-inode list, activate it, and return its number.
pub fn alloc_inode(
	dev: &mut BlockDevice<impl Backend>,
	sb: &mut Superblock,
	kind: InodeType,
	owner: u32,
	group: u32,
	now: u32,
) -> Result<InodeNum> {
	log::trace!("alloc_inode(kind={kind:?})");
	if sb.ifree == 0 {
		return Err(Error::NoSpace);
	}
	let head = InodeNum::new(sb.ihdtl);
	let mut rec = load(dev, sb, head)?;
	crate::error::consist!(rec.is_free(), "free-inode-list-head");

	let prev = rec.free_prev();
	let next = rec.free_next();

	if prev == head.get() && next == head.get() {
		// Singleton: the list becomes empty.
		sb.ihdtl = NULL_INODE;
	} else {
		sb.ihdtl = next;
		let mut next_rec = load(dev, sb, InodeNum::new(next))?;
		next_rec.set_free_prev(prev);
		store(dev, sb, InodeNum::new(next), &next_rec)?;

		let mut prev_rec = load(dev, sb, InodeNum::new(prev))?;
		prev_rec.set_free_next(next);
		store(dev, sb, InodeNum::new(prev), &prev_rec)?;
	}

	rec.activate(kind, owner, group, now);
	store(dev, sb, head, &rec)?;
	sb.ifree -= 1;
	Ok(head)
}

/// Push `inr` onto the free-inode list and deactivate it. `inr` must be
/// in use with `refcount == 0`.
pub fn free_inode(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock, inr: InodeNum) -> Result<()> {
	log::trace!("free_inode({inr})");
	if inr == InodeNum::ROOT {
		return Err(Error::InvalidArgument);
	}
	let mut rec = load(dev, sb, inr)?;
	rec.assert_in_use()?;
	crate::error::consist!(rec.refcount == 0, "inode-refcount-on-free");

	rec.deactivate();

	if sb.ihdtl == NULL_INODE {
		rec.set_free_prev(inr.get());
		rec.set_free_next(inr.get());
		sb.ihdtl = inr.get();
		store(dev, sb, inr, &rec)?;
	} else {
		let head = InodeNum::new(sb.ihdtl);
		let mut head_rec = load(dev, sb, head)?;
		let tail = InodeNum::new(head_rec.free_prev());

		rec.set_free_next(head.get());
		rec.set_free_prev(tail.get());
		store(dev, sb, inr, &rec)?;

		head_rec.set_free_prev(inr.get());
		store(dev, sb, head, &head_rec)?;

		let mut tail_rec = load(dev, sb, tail)?;
		tail_rec.set_free_next(inr.get());
		store(dev, sb, tail, &tail_rec)?;
	}

	sb.ifree += 1;
	Ok(())
}

#[cfg(test)]
mod t {
	use std::io::Cursor;

	use super::*;
	use crate::layout::{INODE_SIZE, N_DIRECT, NULL_CLUSTER};
	use crate::superblock::{InsertionCache, RetrievalCache, MSTAT_CLEAN};

	fn fresh(itotal: u32) -> (BlockDevice<Cursor<Vec<u8>>>, Superblock) {
		let mut dev = BlockDevice::new(Cursor::new(vec![0u8; (itotal as u64 * INODE_SIZE + 4096) as usize]));
		let mut sb = Superblock {
			magic: crate::layout::MAGIC_NUMBER,
			version: 1,
			name: [0; 32],
			ntotal: 100,
			mstat: MSTAT_CLEAN,
			itable_start: 0,
			itable_size: 10,
			itotal,
			ifree: itotal,
			ihdtl: 0,
			tbfc_start: 0,
			tbfc_size: 0,
			tbfc_head: 0,
			tbfc_tail: 0,
			dzone_start: 0,
			dzone_total: 0,
			dzone_free: 0,
			retrieval: RetrievalCache::empty(),
			insertion: InsertionCache::empty(),
		};
		// Root is never in the free list; inodes 1..itotal form the ring.
		sb.ihdtl = 1;
		for i in 1..itotal {
			let prev = if i == 1 { itotal - 1 } else { i - 1 };
			let next = if i == itotal - 1 { 1 } else { i + 1 };
			let mut rec = InodeRecord::free_singleton(i);
			rec.set_free_prev(prev);
			rec.set_free_next(next);
			store(&mut dev, &sb, InodeNum::new(i), &rec).unwrap();
		}
		let _ = N_DIRECT;
		let _ = NULL_CLUSTER;
		(dev, sb)
	}

	#[test]
	fn alloc_then_free_restores_count() {
		let (mut dev, mut sb) = fresh(4);
		let inr = alloc_inode(&mut dev, &mut sb, InodeType::File, 1, 1, 1000).unwrap();
		assert_ne!(inr, InodeNum::ROOT);
		assert_eq!(sb.ifree, 2);

		let mut rec = load(&mut dev, &sb, inr).unwrap();
		rec.refcount = 0;
		store(&mut dev, &sb, inr, &rec).unwrap();

		free_inode(&mut dev, &mut sb, inr).unwrap();
		assert_eq!(sb.ifree, 3);
	}

	#[test]
	fn exhaustion_reports_no_space() {
		let (mut dev, mut sb) = fresh(2);
		let a = alloc_inode(&mut dev, &mut sb, InodeType::File, 0, 0, 1).unwrap();
		assert_eq!(sb.ifree, 0);
		let err = alloc_inode(&mut dev, &mut sb, InodeType::File, 0, 0, 1).unwrap_err();
		assert_eq!(err, Error::NoSpace);
		let _ = a;
	}

	#[test]
	fn root_can_never_be_freed() {
		let (mut dev, mut sb) = fresh(4);
		let err = free_inode(&mut dev, &mut sb, InodeNum::ROOT).unwrap_err();
		assert_eq!(err, Error::InvalidArgument);
	}
}
