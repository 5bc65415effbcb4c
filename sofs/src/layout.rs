//! Compile-time layout constants (§3 / §6 of the design).
//!
//! These are fixed for every image this crate formats; they are not stored
//! in the superblock because, unlike `itotal`/`dzone_total`, they never vary
//! between volumes.

/// Size of one device block, in bytes.
pub const BLOCK_SIZE: u64 = 512;

/// Number of blocks per data cluster.
pub const CLUSTER_BLOCKS: u64 = 8;

/// Size of one data cluster, in bytes.
pub const CLUSTER_SIZE: u64 = BLOCK_SIZE * CLUSTER_BLOCKS;

/// Size of one inode/cluster reference, in bytes (little-endian `u32`).
pub const REF_SIZE: u64 = 4;

/// References per cluster (used for single/double-indirect blocks).
pub const RPC: u64 = CLUSTER_SIZE / REF_SIZE;

/// References per block (used for the free-cluster table).
pub const RPB: u64 = BLOCK_SIZE / REF_SIZE;

/// Number of direct data-cluster references held in an inode.
pub const N_DIRECT: usize = 6;

/// Longest legal component name, not counting the NUL terminator.
pub const MAX_NAME: usize = 59;

/// Longest legal absolute path.
pub const MAX_PATH: usize = 255;

/// On-disk size of one directory entry: `MAX_NAME + 1` name bytes + a `u32`
/// inode number.
pub const DIRENT_SIZE: u64 = (MAX_NAME as u64 + 1) + 4;

/// On-disk size of one inode record under fixed-width little-endian
/// encoding: `mode(2) + refcount(4) + owner(4) + group(4) + size(8) +
/// clucount(4) + vD1(4) + vD2(4) + d[N_DIRECT](4 each) + i1(4) + i2(4)`.
pub const INODE_SIZE: u64 = 2 + 4 + 4 + 4 + 8 + 4 + 4 + 4 + (N_DIRECT as u64) * 4 + 4 + 4;

/// Directory entries per cluster.
pub const DPC: u64 = CLUSTER_SIZE / DIRENT_SIZE;

/// Fixed capacity of the retrieval and insertion free-cluster caches.
pub const CACHE_CAP: usize = 50;

/// Sentinel meaning "no such inode".
pub const NULL_INODE: u32 = u32::MAX;

/// Sentinel meaning "no such cluster".
pub const NULL_CLUSTER: u32 = u32::MAX;

/// Inode number of the root directory.
pub const ROOT_INODE: u32 = 0;

/// Logical cluster number permanently charged to the root directory.
pub const ROOT_CLUSTER: u32 = 0;

/// Canonical magic number, written last during formatting.
pub const MAGIC_NUMBER: u32 = 0x53_4F_46_53;

/// Sentinel magic written while a format is in progress.
pub const BAD_MAGIC: u32 = 0;

/// Padding byte used to fill the superblock's reserved area during format.
pub const PAD_BYTE: u8 = 0xEE;

/// Highest legal file-cluster index (inclusive): direct + single-indirect +
/// double-indirect capacity.
pub const MAX_CLUSTER_INDEX: u64 = N_DIRECT as u64 + RPC + RPC * RPC;

/// Largest legal file size, in bytes.
pub const MAX_FILE_SIZE: u64 = (MAX_CLUSTER_INDEX + 1) * CLUSTER_SIZE - 1;

/// Maximum legal reference count before [`crate::Error::TooManyLinks`].
pub const MAX_LINKS: u32 = u16::MAX as u32;

/// Split a file byte offset into (file-cluster index, intra-cluster offset).
pub fn split_offset(byte_offset: u64) -> (u64, u64) {
	(byte_offset / CLUSTER_SIZE, byte_offset % CLUSTER_SIZE)
}
