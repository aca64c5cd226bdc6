//! Runtime configuration.

use std::path::PathBuf;

/// Which structure keeps the key directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
	/// An ordered tree kept in memory
	BTree,
	/// A radix tree kept in memory
	RadixTree,
	/// A B+ tree persisted beside the data files; reopening skips the
	/// segment replay entirely
	BPlusTree,
}

/// Settings for [`Database::open`](crate::Database::open).
#[derive(Clone, Debug)]
pub struct Options {
	/// Where the segment files live
	pub dir_path: PathBuf,
	/// Size at which the active segment is rolled over, in bytes.
	/// Must be greater than zero.
	pub data_file_size: u64,
	/// Call fsync after every single append
	pub sync_writes: bool,
	/// When nonzero (and `sync_writes` is off), call fsync once this
	/// many bytes have been appended since the last sync
	pub bytes_per_sync: u64,
	pub index_type: IndexType,
	/// Read the segments through a memory map while reopening
	pub mmap_at_startup: bool,
}

impl Default for Options {
	fn default() -> Options {
		Options {
			dir_path: std::env::temp_dir().join("barrique"),
			data_file_size: 256 * 1024 * 1024,
			sync_writes: false,
			bytes_per_sync: 0,
			index_type: IndexType::BTree,
			mmap_at_startup: false,
		}
	}
}

/// Settings for [`Database::iterator`](crate::Database::iterator).
#[derive(Clone, Debug, Default)]
pub struct IteratorOptions {
	/// Yield only keys that start with these bytes
	pub prefix: Vec<u8>,
	/// Iterate in descending key order
	pub reverse: bool,
}

/// Settings for [`Database::new_write_batch`](crate::Database::new_write_batch).
#[derive(Clone, Copy, Debug)]
pub struct WriteBatchOptions {
	/// The largest number of records one batch may stage
	pub max_batch_num: u32,
	/// Call fsync as part of a successful commit
	pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
	fn default() -> WriteBatchOptions {
		WriteBatchOptions {
			max_batch_num: 10000,
			sync_writes: true,
		}
	}
}
