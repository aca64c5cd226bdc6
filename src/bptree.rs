//! Key directory persisted in a B+ tree beside the data files.
//!
//! With this variant the directory survives restarts on its own, so
//! reopening does not replay the segments at all.

use std::path::Path;

use antidote::RwLock;
use jammdb::DB;

use crate::errors::{Error, Result};
use crate::index::{Index, IndexIter};
use crate::record::RecordPosition;

pub(crate) const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const BUCKET_NAME: &str = "barrique";

pub(crate) struct BPlusTreeIndex {
	// None once the directory has been closed
	tree: RwLock<Option<DB>>,
}

impl BPlusTreeIndex {
	pub(crate) fn open(dir: &Path) -> Result<BPlusTreeIndex> {
		let tree = DB::open(dir.join(BPTREE_INDEX_FILE_NAME)).map_err(index_error)?;
		{
			let tx = tree.tx(true).map_err(index_error)?;
			tx.get_or_create_bucket(BUCKET_NAME).map_err(index_error)?;
			tx.commit().map_err(index_error)?;
		}
		Ok(BPlusTreeIndex {
			tree: RwLock::new(Some(tree)),
		})
	}
}

impl Index for BPlusTreeIndex {
	fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<bool> {
		let guard = self.tree.read();
		let tree = guard.as_ref().ok_or(Error::IndexUpdateFailed)?;
		let tx = tree.tx(true).map_err(index_error)?;
		let bucket = tx.get_bucket(BUCKET_NAME).map_err(index_error)?;
		let replaced = bucket.get_kv(&key).is_some();
		bucket.put(key, pos.encode()).map_err(index_error)?;
		tx.commit().map_err(index_error)?;
		Ok(replaced)
	}

	fn get(&self, key: &[u8]) -> Option<RecordPosition> {
		let guard = self.tree.read();
		let tree = guard.as_ref().expect("the b+ tree has been closed");
		let tx = tree.tx(false).expect("read transaction on the b+ tree");
		let bucket = tx.get_bucket(BUCKET_NAME).expect("bucket in the b+ tree");
		bucket
			.get_kv(key)
			.map(|kv| RecordPosition::decode(kv.value()))
	}

	fn delete(&self, key: &[u8]) -> Result<bool> {
		let guard = self.tree.read();
		let tree = guard.as_ref().ok_or(Error::IndexUpdateFailed)?;
		let tx = tree.tx(true).map_err(index_error)?;
		let bucket = tx.get_bucket(BUCKET_NAME).map_err(index_error)?;
		let existed = bucket.delete(key).is_ok();
		tx.commit().map_err(index_error)?;
		Ok(existed)
	}

	fn iterator(&self, reverse: bool) -> IndexIter {
		let guard = self.tree.read();
		let tree = guard.as_ref().expect("the b+ tree has been closed");
		let tx = tree.tx(false).expect("read transaction on the b+ tree");
		let bucket = tx.get_bucket(BUCKET_NAME).expect("bucket in the b+ tree");
		let mut items = Vec::new();
		// the bucket holds key-value pairs only, never nested buckets
		for data in bucket.cursor() {
			let kv = data.kv();
			items.push((kv.key().to_vec(), RecordPosition::decode(kv.value())));
		}
		IndexIter::new(items, reverse)
	}

	fn len(&self) -> usize {
		let guard = self.tree.read();
		let tree = guard.as_ref().expect("the b+ tree has been closed");
		let tx = tree.tx(false).expect("read transaction on the b+ tree");
		let bucket = tx.get_bucket(BUCKET_NAME).expect("bucket in the b+ tree");
		bucket.cursor().count()
	}

	/// Flush and release the backing file. Every committed transaction
	/// is already on disk, so dropping the handle is the release.
	fn close(&self) -> Result<()> {
		self.tree.write().take();
		Ok(())
	}
}

fn index_error(_: jammdb::Error) -> Error {
	Error::IndexUpdateFailed
}
