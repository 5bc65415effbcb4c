//! The formatting tool (§6): lay out a fresh superblock, inode table,
//! free-data-cluster ring, and an empty root directory across a raw
//! storage image.
//!
//! Grounded on `mkfs_sofs15.c`: `balance_layout` ports its three-step
//! fixed-point iteration for carving a device's blocks into an inode
//! table, a free-cluster ring, and a data zone with no leftover blocks;
//! the rest mirrors its `fillInSuperBlock`/`fillInINT`/`fillInRootDir`/
//! `fillInTRefFDC` in sequence. Where the original hardcodes the root
//! directory's data cluster to physical cluster 0 and keeps the ring's
//! slot 0 forever empty as a placeholder, this implementation instead
//! lets the root inode pull its first cluster through the ordinary
//! allocator, like any other freshly seeded directory (see `DESIGN.md`).

use crate::{
	blockdev::{Backend, BlockDevice},
	dir,
	error::{Error, Result},
	inode::InodeRecord,
	layout::{BAD_MAGIC, BLOCK_SIZE, CLUSTER_BLOCKS, CLUSTER_SIZE, MAGIC_NUMBER, PAD_BYTE, RPB},
	superblock::{inodes_per_block, InsertionCache, RetrievalCache, Superblock, MSTAT_CLEAN},
	types::{InodeNum, InodeType},
};

/// Tunables accepted by [`format`], mirroring `mkfs_sofs15`'s `-n`/`-i`/`-z`
/// options.
#[derive(Debug, Clone)]
pub struct FormatOptions {
	/// Volume label stored in the superblock (truncated to fit).
	pub volume_name: String,
	/// Total inode count. `None` picks `ntotal / 8`, same as the default.
	pub itotal: Option<u32>,
	/// Zero out every data cluster beyond the root directory's.
	pub zero_fill: bool,
}

impl Default for FormatOptions {
	fn default() -> Self {
		Self { volume_name: "SOFS15".to_string(), itotal: None, zero_fill: false }
	}
}

/// Carve `ntotal` blocks into (inode-table blocks, final inode count,
/// free-cluster-table blocks, data-zone cluster count), occupying the
/// device in full. Ports `mkfs_sofs15.c`'s three-step fixed point: each
/// zone's size depends on the others', so the equation is solved by
/// iterating it to convergence rather than in closed form.
fn balance_layout(ntotal: u32, itotal_hint: u32) -> Result<(u32, u32, u32, u32)> {
	let ipb = inodes_per_block() as u32;
	let cpb = CLUSTER_BLOCKS as u32;
	let rpb = RPB as u32;

	if ntotal < 2 {
		return Err(Error::NoSpace);
	}

	let itotal = if itotal_hint == 0 { ntotal >> 3 } else { itotal_hint };
	let mut iblk = itotal.div_ceil(ipb);
	if iblk >= ntotal {
		return Err(Error::NoSpace);
	}

	let tmp = (ntotal - 1 - iblk) / cpb;
	let mut fct_blk = tmp.div_ceil(rpb);

	let mut dzone_total = (ntotal - 1).saturating_sub(iblk).saturating_sub(fct_blk) / cpb;
	fct_blk = dzone_total.div_ceil(rpb);

	let consumed = iblk + fct_blk + dzone_total * cpb;
	if dzone_total % rpb != 0 && (ntotal - 1).saturating_sub(consumed) >= cpb {
		dzone_total += 1;
	}

	let consumed_clusters = fct_blk + dzone_total * cpb;
	if consumed_clusters + 1 > ntotal {
		return Err(Error::NoSpace);
	}
	iblk = ntotal - 1 - fct_blk - dzone_total * cpb;
	let itotal = iblk * ipb;

	if itotal < 2 || dzone_total < 2 {
		return Err(Error::NoSpace);
	}
	Ok((iblk, itotal, fct_blk, dzone_total))
}

/// Format `dev`, a raw image of exactly `ntotal` `BLOCK_SIZE` blocks,
/// as a fresh, empty volume. `now` stamps the root directory's
/// access/modification time. Returns the superblock describing the new
/// volume; callers that keep operating on the image should hold onto it
/// rather than re-deriving it.
pub fn format(
	dev: &mut BlockDevice<impl Backend>,
	ntotal: u32,
	opts: &FormatOptions,
	now: u32,
) -> Result<Superblock> {
	log::info!("formatting {ntotal} blocks as \"{}\"", opts.volume_name);
	let (itable_size, itotal, tbfc_size, dzone_total) = balance_layout(ntotal, opts.itotal.unwrap_or(0))?;

	let itable_start = 1;
	let tbfc_start = itable_start + itable_size;
	let dzone_start = tbfc_start + tbfc_size;

	let mut sb = Superblock {
		magic: BAD_MAGIC,
		version: 1,
		name: [0u8; 32],
		ntotal,
		mstat: MSTAT_CLEAN,
		itable_start,
		itable_size,
		itotal,
		ifree: itotal - 1,
		ihdtl: 1,
		tbfc_start,
		tbfc_size,
		tbfc_head: 1,
		tbfc_tail: 0,
		dzone_start,
		dzone_total,
		dzone_free: dzone_total - 1,
		retrieval: RetrievalCache::empty(),
		insertion: InsertionCache::empty(),
	};
	sb.set_volume_name(&opts.volume_name);

	// Mark the image as "format in progress": a crash partway through
	// leaves a magic number no `open` call will accept.
	dev.fill_at(0, PAD_BYTE, BLOCK_SIZE)?;
	dev.encode_at(0, &sb)?;

	write_inode_table(dev, &sb)?;
	write_fct_ring(dev, &sb)?;

	let mut root = InodeRecord::free_singleton(InodeNum::ROOT.get());
	root.activate(InodeType::Directory, 0, 0, now);
	root.mode |= 0o755;
	dir::seed_self(dev, &mut sb, &mut root, InodeNum::ROOT, InodeNum::ROOT)?;
	dev.encode_at(sb.ino_byte_offset(InodeNum::ROOT)?, &root)?;

	if opts.zero_fill {
		zero_data_zone(dev, &sb, root.d[0])?;
	}

	sb.magic = MAGIC_NUMBER;
	dev.encode_at(0, &sb)?;
	log::info!(
		"format done: {itotal} inodes, {dzone_total} data clusters, root cluster {}",
		root.d[0]
	);
	Ok(sb)
}

/// Thread every non-root inode slot into one circular doubly-linked free
/// list, head and tail both at inode 1 (`fillInINT`).
fn write_inode_table(dev: &mut BlockDevice<impl Backend>, sb: &Superblock) -> Result<()> {
	for i in 1..sb.itotal {
		let prev = if i == 1 { sb.itotal - 1 } else { i - 1 };
		let next = if i == sb.itotal - 1 { 1 } else { i + 1 };
		let mut rec = InodeRecord::free_singleton(i);
		rec.set_free_prev(prev);
		rec.set_free_next(next);
		dev.encode_at(sb.ino_byte_offset(InodeNum::new(i))?, &rec)?;
	}
	Ok(())
}

/// Seed the free-data-cluster ring with every cluster but the one the
/// root directory will claim (`fillInTRefFDC`, minus the zero-fill
/// pass, which `format` runs separately once the root cluster is known).
fn write_fct_ring(dev: &mut BlockDevice<impl Backend>, sb: &Superblock) -> Result<()> {
	for i in 1..sb.dzone_total as u64 {
		let off = sb.fct_entry_byte_offset(i)?;
		dev.encode_at(off, &(i as u32 + sb.dzone_start))?;
	}
	Ok(())
}

/// Zero every data cluster except `root_cluster`, which already holds
/// live directory content.
fn zero_data_zone(dev: &mut BlockDevice<impl Backend>, sb: &Superblock, root_cluster: u32) -> Result<()> {
	let blank = vec![0u8; CLUSTER_SIZE as usize];
	for i in 0..sb.dzone_total {
		let cno = sb.dzone_start + i;
		if cno != root_cluster {
			dev.write_cluster(cno, &blank)?;
		}
	}
	Ok(())
}

/// Open an already-formatted image's superblock, failing if its magic
/// number doesn't match (a format in progress, or not a `sofs` image at
/// all).
pub fn read_superblock(dev: &mut BlockDevice<impl Backend>) -> Result<Superblock> {
	let sb: Superblock = dev.decode_at(0)?;
	if sb.magic != MAGIC_NUMBER {
		return Err(Error::Inconsistent("superblock-magic"));
	}
	Ok(sb)
}

#[cfg(test)]
mod t {
	use std::io::Cursor;

	use super::*;
	use crate::{dir::iter_entries, fcluster::peek_inode};

	fn image(ntotal: u32) -> BlockDevice<Cursor<Vec<u8>>> {
		BlockDevice::new(Cursor::new(vec![0u8; (ntotal as u64 * BLOCK_SIZE) as usize]))
	}

	#[test]
	fn formats_and_seeds_an_empty_root() {
		let mut dev = image(2048);
		let mut sb = format(&mut dev, 2048, &FormatOptions::default(), 1000).unwrap();
		assert_eq!(sb.magic, MAGIC_NUMBER);
		assert!(sb.itotal >= 2);
		assert!(sb.dzone_total >= 2);

		let mut root = peek_inode(&mut dev, &sb, InodeNum::ROOT).unwrap();
		assert_eq!(root.refcount, 2);
		assert_eq!(root.size, CLUSTER_SIZE);
		let entries = iter_entries(&mut dev, &mut sb, &mut root).unwrap();
		assert_eq!(entries.len(), 2);
	}

	#[test]
	fn reopening_requires_the_real_magic_number() {
		let mut dev = image(2048);
		format(&mut dev, 2048, &FormatOptions::default(), 1).unwrap();
		let sb = read_superblock(&mut dev).unwrap();
		assert_eq!(sb.magic, MAGIC_NUMBER);
	}

	#[test]
	fn rejects_a_device_too_small_to_hold_anything() {
		let mut dev = image(1);
		let err = format(&mut dev, 1, &FormatOptions::default(), 1).unwrap_err();
		assert_eq!(err, Error::NoSpace);
	}

	#[test]
	fn honors_an_explicit_inode_count() {
		let mut dev = image(4096);
		let opts = FormatOptions { itotal: Some(64), ..Default::default() };
		let sb = format(&mut dev, 4096, &opts, 1).unwrap();
		assert!(sb.itotal >= 64);
	}
}
