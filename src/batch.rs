//! Atomic multi-record writes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use antidote::Mutex;

use crate::db::Database;
use crate::errors::{Error, Result};
use crate::options::WriteBatchOptions;
use crate::record::{LogRecord, RecordType};

/// Sequence number carried by records written outside any batch.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// Key of the record marking a committed batch.
pub(crate) const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// A set of writes that becomes durable all at once.
///
/// Stage changes with [`WriteBatch::put`] and [`WriteBatch::delete`],
/// then call [`WriteBatch::commit`]. Until then nothing is written;
/// a batch dropped without committing has no effect. If the process
/// dies mid-commit, reopening discards the half-written batch.
pub struct WriteBatch<'db> {
	db: &'db Database,
	options: WriteBatchOptions,
	/// the latest staged intent per key
	pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Database {
	/// Start an empty write batch.
	pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
		WriteBatch {
			db: self,
			options,
			pending: Mutex::new(HashMap::new()),
		}
	}
}

impl<'db> WriteBatch<'db> {
	/// Stage storing `value` under `key`.
	///
	/// A later `put` or `delete` of the same key within this batch
	/// replaces the staged intent.
	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		if key.is_empty() {
			return Err(Error::KeyIsEmpty);
		}
		let mut pending = self.pending.lock();
		pending.insert(
			key.to_vec(),
			LogRecord {
				key: key.to_vec(),
				value: value.to_vec(),
				rec_type: RecordType::Normal,
			},
		);
		Ok(())
	}

	/// Stage removing `key`.
	pub fn delete(&self, key: &[u8]) -> Result<()> {
		if key.is_empty() {
			return Err(Error::KeyIsEmpty);
		}
		let mut pending = self.pending.lock();
		if self.db.index.get(key).is_none() {
			// nothing on disk to delete; forget any staged put
			pending.remove(key);
			return Ok(());
		}
		pending.insert(
			key.to_vec(),
			LogRecord {
				key: key.to_vec(),
				value: Vec::new(),
				rec_type: RecordType::Deleted,
			},
		);
		Ok(())
	}

	/// Append every staged record and a finish marker, then apply the
	/// batch to the key directory.
	///
	/// The marker is what makes the batch real: reopening applies a
	/// batch only once its marker is found in the log.
	pub fn commit(&self) -> Result<()> {
		let mut pending = self.pending.lock();
		if pending.is_empty() {
			return Ok(());
		}
		if pending.len() > self.options.max_batch_num as usize {
			return Err(Error::ExceedMaxBatchNum);
		}

		// writers stay out for the whole commit
		let mut active = self.db.active.write();

		let seq = self.db.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

		let mut applied = Vec::with_capacity(pending.len());
		for record in pending.values() {
			let staged = LogRecord {
				key: key_with_seq(&record.key, seq),
				value: record.value.clone(),
				rec_type: record.rec_type,
			};
			let pos = self.db.append_record_locked(&mut active, &staged)?;
			applied.push((record.key.clone(), record.rec_type, pos));
		}

		let finished = LogRecord {
			key: key_with_seq(TXN_FIN_KEY, seq),
			value: Vec::new(),
			rec_type: RecordType::TxnFinished,
		};
		self.db.append_record_locked(&mut active, &finished)?;

		if self.options.sync_writes {
			active.sync()?;
		}

		for (key, rec_type, pos) in applied {
			match rec_type {
				RecordType::Deleted => {
					self.db.index.delete(&key)?;
				}
				_ => {
					self.db.index.put(key, pos)?;
				}
			}
		}

		pending.clear();
		Ok(())
	}
}

/// Prefix `key` with a batch sequence number.
pub(crate) fn key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
	let mut seqbuf = unsigned_varint::encode::u64_buffer();
	let seq = unsigned_varint::encode::u64(seq, &mut seqbuf);
	let mut out = Vec::with_capacity(seq.len() + key.len());
	out.extend_from_slice(seq);
	out.extend_from_slice(key);
	out
}

/// Split a stored key back into the user key and its sequence number.
pub(crate) fn parse_record_key(key: &[u8]) -> (&[u8], u64) {
	let (seq, rest) =
		unsigned_varint::decode::u64(key).expect("stored key begins with a sequence number");
	(rest, seq)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seq_prefix_roundtrip() {
		for seq in [0u64, 1, 127, 128, 1 << 40] {
			let stored = key_with_seq(b"the-key", seq);
			let (key, parsed) = parse_record_key(&stored);
			assert_eq!(key, b"the-key");
			assert_eq!(parsed, seq);
		}
		// seq 0 costs exactly one byte
		assert_eq!(key_with_seq(b"k", 0).len(), 2);
	}
}
