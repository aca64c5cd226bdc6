//! The key directory: every live key mapped to its newest location.

use std::collections::BTreeMap;
use std::path::Path;

use antidote::RwLock;

use crate::errors::Result;
use crate::options::IndexType;
use crate::record::RecordPosition;

/// Keyed lookup plus ordered iteration over the live keys.
///
/// Implementations serialize writers and let readers run concurrently.
pub(crate) trait Index: Send + Sync {
	/// Remember `pos` as the newest location of `key`, returning
	/// whether an earlier entry was replaced.
	fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<bool>;

	fn get(&self, key: &[u8]) -> Option<RecordPosition>;

	/// Forget `key`, returning whether an entry existed.
	fn delete(&self, key: &[u8]) -> Result<bool>;

	/// A consistent snapshot of the directory, in key order.
	fn iterator(&self, reverse: bool) -> IndexIter;

	fn len(&self) -> usize;

	/// Flush anything the implementation keeps on disk.
	fn close(&self) -> Result<()> {
		Ok(())
	}
}

pub(crate) fn new_index(index_type: IndexType, dir: &Path) -> Result<Box<dyn Index>> {
	match index_type {
		IndexType::BTree => Ok(Box::new(BTreeIndex::new())),
		IndexType::RadixTree => Ok(Box::new(crate::radix::RadixIndex::new())),
		IndexType::BPlusTree => Ok(Box::new(crate::bptree::BPlusTreeIndex::open(dir)?)),
	}
}

/// A cursor over `(key, position)` pairs copied out of the directory
/// when the iterator was created.
pub(crate) struct IndexIter {
	items: Vec<(Vec<u8>, RecordPosition)>,
	reverse: bool,
	current: usize,
}

impl IndexIter {
	/// `items` must be in ascending key order.
	pub(crate) fn new(mut items: Vec<(Vec<u8>, RecordPosition)>, reverse: bool) -> IndexIter {
		if reverse {
			items.reverse();
		}
		IndexIter {
			items,
			reverse,
			current: 0,
		}
	}

	pub(crate) fn rewind(&mut self) {
		self.current = 0;
	}

	/// Position at the first key `>=` (forward) or `<=` (reverse) the
	/// given key.
	pub(crate) fn seek(&mut self, key: &[u8]) {
		self.current = if self.reverse {
			self.items.partition_point(|(k, _)| k.as_slice() > key)
		} else {
			self.items.partition_point(|(k, _)| k.as_slice() < key)
		};
	}

	pub(crate) fn next(&mut self) {
		self.current += 1;
	}

	pub(crate) fn valid(&self) -> bool {
		self.current < self.items.len()
	}

	pub(crate) fn key(&self) -> &[u8] {
		&self.items[self.current].0
	}

	pub(crate) fn value(&self) -> RecordPosition {
		self.items[self.current].1
	}
}

/// The default directory, an in-memory ordered tree.
pub(crate) struct BTreeIndex {
	tree: RwLock<BTreeMap<Vec<u8>, RecordPosition>>,
}

impl BTreeIndex {
	pub(crate) fn new() -> BTreeIndex {
		BTreeIndex {
			tree: RwLock::new(BTreeMap::new()),
		}
	}
}

impl Index for BTreeIndex {
	fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<bool> {
		Ok(self.tree.write().insert(key, pos).is_some())
	}

	fn get(&self, key: &[u8]) -> Option<RecordPosition> {
		self.tree.read().get(key).copied()
	}

	fn delete(&self, key: &[u8]) -> Result<bool> {
		Ok(self.tree.write().remove(key).is_some())
	}

	fn iterator(&self, reverse: bool) -> IndexIter {
		let items = self
			.tree
			.read()
			.iter()
			.map(|(key, pos)| (key.clone(), *pos))
			.collect();
		IndexIter::new(items, reverse)
	}

	fn len(&self) -> usize {
		self.tree.read().len()
	}
}
