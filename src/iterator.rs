//! Ordered iteration over the live keys.

use crate::db::Database;
use crate::errors::Result;
use crate::index::IndexIter;
use crate::options::IteratorOptions;

/// A cursor over the database's live keys, in key order.
///
/// The set of keys is a snapshot taken when the iterator is created;
/// writes made afterwards are not observed. Values are read from disk
/// on demand by [`Iter::value`].
pub struct Iter<'db> {
	db: &'db Database,
	index_iter: IndexIter,
	options: IteratorOptions,
}

impl Database {
	/// Iterate the live keys in order, optionally filtered by prefix
	/// and reversed.
	pub fn iterator(&self, options: IteratorOptions) -> Iter<'_> {
		let mut iter = Iter {
			index_iter: self.index.iterator(options.reverse),
			db: self,
			options,
		};
		iter.skip_to_next();
		iter
	}
}

impl<'db> Iter<'db> {
	/// Go back to the first key.
	pub fn rewind(&mut self) {
		self.index_iter.rewind();
		self.skip_to_next();
	}

	/// Jump to the first key at or beyond `key` in iteration order.
	pub fn seek(&mut self, key: &[u8]) {
		self.index_iter.seek(key);
		self.skip_to_next();
	}

	/// Advance to the next key.
	pub fn next(&mut self) {
		self.index_iter.next();
		self.skip_to_next();
	}

	/// False once the iterator has moved past its last key.
	pub fn valid(&self) -> bool {
		self.index_iter.valid()
	}

	/// The key under the cursor.
	pub fn key(&self) -> &[u8] {
		self.index_iter.key()
	}

	/// Read the value under the cursor.
	pub fn value(&self) -> Result<Vec<u8>> {
		self.db.value_at(self.index_iter.value())
	}

	fn skip_to_next(&mut self) {
		if self.options.prefix.is_empty() {
			return;
		}
		while self.index_iter.valid() {
			if self.index_iter.key().starts_with(&self.options.prefix) {
				break;
			}
			self.index_iter.next();
		}
	}
}
