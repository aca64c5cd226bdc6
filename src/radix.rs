//! Radix-tree variant of the key directory.

use antidote::RwLock;
use radix_trie::{Trie, TrieCommon};

use crate::errors::Result;
use crate::index::{Index, IndexIter};
use crate::record::RecordPosition;

pub(crate) struct RadixIndex {
	tree: RwLock<Trie<Vec<u8>, RecordPosition>>,
}

impl RadixIndex {
	pub(crate) fn new() -> RadixIndex {
		RadixIndex {
			tree: RwLock::new(Trie::new()),
		}
	}
}

impl Index for RadixIndex {
	fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<bool> {
		Ok(self.tree.write().insert(key, pos).is_some())
	}

	fn get(&self, key: &[u8]) -> Option<RecordPosition> {
		self.tree.read().get(&key.to_vec()).copied()
	}

	fn delete(&self, key: &[u8]) -> Result<bool> {
		Ok(self.tree.write().remove(&key.to_vec()).is_some())
	}

	fn iterator(&self, reverse: bool) -> IndexIter {
		// trie traversal yields keys in ascending byte order
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
