//! Data-cluster allocator (§4.4): a three-tier design trading one flat free
//! list for two fixed-capacity in-superblock caches plus a slower backing
//! ring, so that the common case of alloc/free never touches the ring.
//!
//! Grounded on `soAllocDataCluster.c`/`soFreeDataCluster.c`: the retrieval
//! cache feeds allocation and is refilled from the ring by `replenish`
//! when empty; the insertion cache absorbs frees and is flushed to the
//! ring by `deplete` when full.

use crate::{
	blockdev::{Backend, BlockDevice},
	error::Result,
	layout::CACHE_CAP,
	superblock::Superblock,
	types::ClusterRef,
};

/// Pull clusters off the ring into the retrieval cache until it is full or
/// the ring runs dry.
///
/// Grounded on `soReplenish`: if the ring cannot fill the cache on its own
/// it first drains the insertion cache into the ring (so the references a
/// caller just freed become available again), then keeps reading.
fn replenish(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock) -> Result<()> {
	log::trace!("replenish()");
	let want = CACHE_CAP.min(sb.dzone_free as usize);
	let mut n = CACHE_CAP - want;
	let mut index = sb.tbfc_head as u64;

	while n < CACHE_CAP {
		if index == sb.tbfc_tail as u64 {
			break;
		}
		let off = sb.fct_entry_byte_offset(index)?;
		let r: u32 = dev.decode_at(off)?;
		sb.retrieval.refs[n] = r;
		dev.encode_at(off, &crate::layout::NULL_CLUSTER)?;
		index = sb.fct_advance(index as u32) as u64;
		n += 1;
	}

	if n != CACHE_CAP {
		deplete(dev, sb)?;
		while n < CACHE_CAP {
			let off = sb.fct_entry_byte_offset(index)?;
			let r: u32 = dev.decode_at(off)?;
			sb.retrieval.refs[n] = r;
			dev.encode_at(off, &crate::layout::NULL_CLUSTER)?;
			index = sb.fct_advance(index as u32) as u64;
			n += 1;
		}
	}

	sb.retrieval.idx = (CACHE_CAP - want) as u32;
	sb.tbfc_head = index as u32;
	Ok(())
}

/// Push the insertion cache's contents onto the ring tail until it is
/// empty, grounded on `soDeplete`.
fn deplete(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock) -> Result<()> {
	log::trace!("deplete()");
	let mut index = sb.tbfc_tail as u64;
	for n in 0..sb.insertion.filled() {
		let off = sb.fct_entry_byte_offset(index)?;
		dev.encode_at(off, &sb.insertion.refs[n])?;
		sb.insertion.refs[n] = crate::layout::NULL_CLUSTER;
		index = sb.fct_advance(index as u32) as u64;
	}
	sb.insertion.idx = 0;
	sb.tbfc_tail = index as u32;
	Ok(())
}

/// Allocate one free data cluster from the retrieval cache, replenishing
/// it first if empty.
pub fn alloc_cluster(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock) -> Result<ClusterRef> {
	log::trace!("alloc_cluster()");
	if sb.dzone_free == 0 {
		return Err(crate::error::Error::NoSpace);
	}
	if sb.retrieval.is_empty() {
		replenish(dev, sb)?;
	}
	let idx = sb.retrieval.idx as usize;
	let r = sb.retrieval.refs[idx];
	sb.retrieval.idx += 1;
	sb.dzone_free -= 1;
	Ok(ClusterRef::new(r))
}

/// Return a previously allocated cluster to the insertion cache,
/// depleting it first if full.
pub fn free_cluster(dev: &mut BlockDevice<impl Backend>, sb: &mut Superblock, cref: ClusterRef) -> Result<()> {
	log::trace!("free_cluster({cref})");
	crate::error::consist!(!cref.is_null() && cref != ClusterRef::ROOT, "free-root-or-null-cluster");
	if sb.insertion.is_full() {
		deplete(dev, sb)?;
	}
	let idx = sb.insertion.idx as usize;
	sb.insertion.refs[idx] = cref.get();
	sb.insertion.idx += 1;
	sb.dzone_free += 1;
	Ok(())
}

#[cfg(test)]
mod t {
	use std::io::Cursor;

	use super::*;
	use crate::layout::{NULL_CLUSTER, RPB};
	use crate::superblock::{InsertionCache, RetrievalCache, MSTAT_CLEAN};

	fn fresh(total: u32) -> (BlockDevice<Cursor<Vec<u8>>>, Superblock) {
		let fct_blocks = (total as u64).div_ceil(RPB);
		let bytes = fct_blocks * crate::layout::BLOCK_SIZE;
		let mut dev = BlockDevice::new(Cursor::new(vec![0u8; bytes as usize]));
		let mut sb = Superblock {
			magic: crate::layout::MAGIC_NUMBER,
			version: 1,
			name: [0; 32],
			ntotal: 100,
			mstat: MSTAT_CLEAN,
			itable_start: 0,
			itable_size: 0,
			itotal: 0,
			ifree: 0,
			ihdtl: crate::layout::NULL_INODE,
			tbfc_start: 0,
			tbfc_size: fct_blocks as u32,
			tbfc_head: 1,
			tbfc_tail: 0,
			dzone_start: 0,
			dzone_total: total,
			dzone_free: total - 1,
			retrieval: RetrievalCache::empty(),
			insertion: InsertionCache::empty(),
		};
		for i in 1..total {
			let off = sb.fct_entry_byte_offset(i as u64).unwrap();
			dev.encode_at(off, &i).unwrap();
		}
		let root_off = sb.fct_entry_byte_offset(0).unwrap();
		dev.encode_at(root_off, &NULL_CLUSTER).unwrap();
		(dev, sb)
	}

	#[test]
	fn alloc_free_roundtrip() {
		let (mut dev, mut sb) = fresh(200);
		let c = alloc_cluster(&mut dev, &mut sb).unwrap();
		assert!(!c.is_null());
		assert_eq!(sb.dzone_free, 198);
		free_cluster(&mut dev, &mut sb, c).unwrap();
		assert_eq!(sb.dzone_free, 199);
	}

	#[test]
	fn replenish_crosses_cache_boundary() {
		let (mut dev, mut sb) = fresh(200);
		for _ in 0..120 {
			alloc_cluster(&mut dev, &mut sb).unwrap();
		}
		assert_eq!(sb.dzone_free, 79);
	}

	#[test]
	fn exhaustion_reports_no_space() {
		let (mut dev, mut sb) = fresh(2);
		alloc_cluster(&mut dev, &mut sb).unwrap();
		let err = alloc_cluster(&mut dev, &mut sb).unwrap_err();
		assert_eq!(err, crate::error::Error::NoSpace);
	}
}
