//! Block/Cluster Cache (L0, §4.1) and the typed scratch slots built on it.
//!
//! Grounded in `rufs::blockreader::BlockReader`'s `Backend` blanket trait
//! and `rufs::decoder::Decoder`'s `decode_at`/`encode_at` helpers, simplified
//! to the access pattern this filesystem actually needs: every structure is
//! read or written a whole block (or cluster) at a time via `bincode`, so
//! there is no need for `BlockReader`'s sliding byte-buffer or `BufRead`
//! impl — just seek, then decode/encode a fixed-size record.

use std::{
	fs::File,
	io::{Read, Result as IoResult, Seek, SeekFrom, Write},
	path::Path,
};

use bincode::{
	config::{Configuration, Fixint, LittleEndian, NoLimit},
	Decode, Encode,
};

use crate::{
	error::{Error, Result},
	layout::{BLOCK_SIZE, CLUSTER_SIZE},
};

/// Anything a [`BlockDevice`] can be backed by.
pub trait Backend: Read + Write + Seek {}
impl<T: Read + Write + Seek> Backend for T {}

const CODEC: Configuration<LittleEndian, Fixint, NoLimit> =
	bincode::config::standard().with_fixed_int_encoding().with_little_endian();

/// Block-level abstraction over a backing image (§4.1).
///
/// Every `load`/`get`/`store` triple named in the design maps onto a single
/// `read_*`/`write_*` pair here: the "currently loaded scratch block" of the
/// C implementation is just the caller's local variable in this
/// implementation, since Rust's ownership already forbids holding two
/// mutable views of the same structure at once — ordering that the spec's
/// C original had to enforce by hand (§5, §9) falls out of the type system.
pub struct BlockDevice<B: Backend> {
	inner: B,
}

impl BlockDevice<File> {
	pub fn open(path: &Path, rw: bool) -> IoResult<Self> {
		let file = File::options().read(true).write(rw).open(path)?;
		Ok(Self::new(file))
	}

	pub fn create(path: &Path, len: u64) -> IoResult<Self> {
		let file = File::options().read(true).write(true).create(true).truncate(true).open(path)?;
		file.set_len(len)?;
		Ok(Self::new(file))
	}
}

impl<B: Backend> BlockDevice<B> {
	pub fn new(inner: B) -> Self {
		Self { inner }
	}

	pub fn into_inner(self) -> B {
		self.inner
	}

	fn seek_to(&mut self, byte_offset: u64) -> Result<()> {
		self.inner.seek(SeekFrom::Start(byte_offset)).map_err(|_| Error::Inconsistent("seek"))?;
		Ok(())
	}

	/// Read exactly `BLOCK_SIZE` bytes starting at block `bno`.
	pub fn read_block(&mut self, bno: u64) -> Result<Vec<u8>> {
		let mut buf = vec![0u8; BLOCK_SIZE as usize];
		self.seek_to(bno * BLOCK_SIZE)?;
		self.inner.read_exact(&mut buf).map_err(|_| Error::Inconsistent("block-read"))?;
		Ok(buf)
	}

	/// Write exactly `BLOCK_SIZE` bytes starting at block `bno`.
	pub fn write_block(&mut self, bno: u64, data: &[u8]) -> Result<()> {
		debug_assert_eq!(data.len() as u64, BLOCK_SIZE);
		self.seek_to(bno * BLOCK_SIZE)?;
		self.inner.write_all(data).map_err(|_| Error::Inconsistent("block-write"))?;
		Ok(())
	}

	/// Read exactly `CLUSTER_SIZE` bytes of raw cluster `cno`.
	pub fn read_cluster(&mut self, cno: u32) -> Result<Vec<u8>> {
		let mut buf = vec![0u8; CLUSTER_SIZE as usize];
		self.seek_to(cno as u64 * CLUSTER_SIZE)?;
		self.inner.read_exact(&mut buf).map_err(|_| Error::Inconsistent("cluster-read"))?;
		Ok(buf)
	}

	/// Write exactly `CLUSTER_SIZE` bytes to raw cluster `cno`.
	pub fn write_cluster(&mut self, cno: u32, data: &[u8]) -> Result<()> {
		debug_assert_eq!(data.len() as u64, CLUSTER_SIZE);
		self.seek_to(cno as u64 * CLUSTER_SIZE)?;
		self.inner.write_all(data).map_err(|_| Error::Inconsistent("cluster-write"))?;
		Ok(())
	}

	/// Decode a `bincode`-encoded value at a byte offset.
	pub fn decode_at<T: Decode>(&mut self, byte_offset: u64) -> Result<T> {
		self.seek_to(byte_offset)?;
		bincode::decode_from_std_read(&mut self.inner, CODEC)
			.map_err(|_| Error::Inconsistent("decode"))
	}

	/// Encode a `bincode`-encodable value at a byte offset.
	pub fn encode_at<T: Encode>(&mut self, byte_offset: u64, value: &T) -> Result<()> {
		self.seek_to(byte_offset)?;
		bincode::encode_into_std_write(value, &mut self.inner, CODEC)
			.map_err(|_| Error::Inconsistent("encode"))?;
		Ok(())
	}

	/// Fill `len` bytes starting at `byte_offset` with `byte`.
	pub fn fill_at(&mut self, byte_offset: u64, byte: u8, len: u64) -> Result<()> {
		self.seek_to(byte_offset)?;
		let buf = vec![byte; len as usize];
		self.inner.write_all(&buf).map_err(|_| Error::Inconsistent("fill"))?;
		Ok(())
	}
}

#[cfg(test)]
mod t {
	use std::io::Cursor;

	use super::*;

	#[test]
	fn block_roundtrip() {
		let mut dev = BlockDevice::new(Cursor::new(vec![0u8; (BLOCK_SIZE * 4) as usize]));
		let data = vec![0x42u8; BLOCK_SIZE as usize];
		dev.write_block(2, &data).unwrap();
		assert_eq!(dev.read_block(2).unwrap(), data);
	}

	#[test]
	fn cluster_roundtrip() {
		let mut dev = BlockDevice::new(Cursor::new(vec![0u8; (CLUSTER_SIZE * 2) as usize]));
		let data = vec![0x7eu8; CLUSTER_SIZE as usize];
		dev.write_cluster(1, &data).unwrap();
		assert_eq!(dev.read_cluster(1).unwrap(), data);
	}

	#[test]
	fn decode_encode_roundtrip() {
		let mut dev = BlockDevice::new(Cursor::new(vec![0u8; 64]));
		dev.encode_at(4, &0xdeadbeefu32).unwrap();
		let v: u32 = dev.decode_at(4).unwrap();
		assert_eq!(v, 0xdeadbeef);
	}
}
