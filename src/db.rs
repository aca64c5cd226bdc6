//! The storage engine: an append-only log plus the key directory.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use antidote::{Mutex, RwLock};
use fs2::FileExt;

use crate::batch::{key_with_seq, parse_record_key, NON_TXN_SEQ_NO};
use crate::data_file::{DataFile, IoType, DATA_FILE_SUFFIX, SEQ_NO_FILE_NAME};
use crate::errors::{Error, Result};
use crate::index::{new_index, Index};
use crate::merge;
use crate::options::{IndexType, Options};
use crate::record::{LogRecord, ReadRecord, RecordPosition, RecordType};

/// Held for the lifetime of an open database so no second process can
/// open the same directory.
pub(crate) const FILE_LOCK_NAME: &str = "flock";
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// An open database.
///
/// All reads and writes go through this handle. It can be shared
/// freely between threads (for instance behind an `Arc`); writes are
/// serialized internally, reads run concurrently.
pub struct Database {
	pub(crate) options: Options,
	/// the one segment receiving appends
	pub(crate) active: RwLock<DataFile>,
	/// frozen segments by id
	pub(crate) older: RwLock<HashMap<u32, DataFile>>,
	pub(crate) index: Box<dyn Index>,
	/// the most recently assigned batch sequence number
	pub(crate) seq_no: AtomicU64,
	/// bytes appended since the last sync, for `bytes_per_sync`
	bytes_write: AtomicU64,
	pub(crate) merge_lock: Mutex<()>,
	lock_file: File,
}

impl Database {
	/// Open the database in `options.dir_path`, creating it if needed.
	///
	/// Reopening an existing directory first applies any compaction
	/// output left by [`Database::merge`], then rebuilds the key
	/// directory from the hint file and the segments (unless the
	/// directory is the persistent B+ tree kind, which needs no
	/// replay).
	pub fn open(options: Options) -> Result<Database> {
		check_options(&options)?;
		let dir = options.dir_path.clone();
		if !dir.is_dir() {
			fs::create_dir_all(&dir)?;
		}

		let lock_file = fs::OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(dir.join(FILE_LOCK_NAME))?;
		lock_file
			.try_lock_exclusive()
			.map_err(|_| Error::DatabaseIsUsing)?;

		let merge_applied = merge::load_merge_files(&dir)?;

		let io_type = if options.mmap_at_startup {
			IoType::Mmap
		} else {
			IoType::Standard
		};
		let mut data_files = load_data_files(&dir, io_type)?;
		if data_files.is_empty() {
			data_files.push(DataFile::open(&dir, 0, IoType::Standard)?);
		}

		let index = new_index(options.index_type, &dir)?;

		let seq_no;
		if options.index_type == IndexType::BPlusTree {
			if merge_applied {
				// the directory survived on its own, but the merge just
				// moved every record below its boundary; refresh those
				// entries from the hint file, then let the untouched
				// segments win again by replaying them on top
				merge::load_index_from_hint_file(&dir, index.as_ref())?;
				let boundary = merge::non_merge_file_id(&dir)?;
				load_index_from_data_files(index.as_ref(), &mut data_files, boundary)?;
			} else {
				let active = data_files.last_mut().expect("at least one data file");
				let size = active.size()?;
				active.set_write_off(size);
			}
			seq_no = load_seq_no(&dir)?;
		} else {
			let non_merge_file_id = merge::non_merge_file_id(&dir)?;
			if non_merge_file_id.is_some() {
				merge::load_index_from_hint_file(&dir, index.as_ref())?;
			}
			seq_no = load_index_from_data_files(index.as_ref(), &mut data_files, non_merge_file_id)?;
		}

		if options.mmap_at_startup {
			for file in &mut data_files {
				file.reset_io(&dir)?;
			}
		}

		let active = data_files.pop().expect("at least one data file");
		let older = data_files
			.into_iter()
			.map(|file| (file.file_id(), file))
			.collect();

		Ok(Database {
			options,
			active: RwLock::new(active),
			older: RwLock::new(older),
			index,
			seq_no: AtomicU64::new(seq_no),
			bytes_write: AtomicU64::new(0),
			merge_lock: Mutex::new(()),
			lock_file,
		})
	}

	/// Store `value` under `key`, replacing any earlier value.
	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		if key.is_empty() {
			return Err(Error::KeyIsEmpty);
		}
		let record = LogRecord {
			key: key_with_seq(key, NON_TXN_SEQ_NO),
			value: value.to_vec(),
			rec_type: RecordType::Normal,
		};
		let pos = self.append_log_record(&record)?;
		self.index.put(key.to_vec(), pos)?;
		Ok(())
	}

	/// Read the value stored under `key`.
	pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
		if key.is_empty() {
			return Err(Error::KeyIsEmpty);
		}
		let pos = self.index.get(key).ok_or(Error::KeyNotFound)?;
		self.value_at(pos)
	}

	/// Remove `key` from the database.
	///
	/// Removing a key that does not exist succeeds without writing
	/// anything.
	pub fn delete(&self, key: &[u8]) -> Result<()> {
		if key.is_empty() {
			return Err(Error::KeyIsEmpty);
		}
		if self.index.get(key).is_none() {
			return Ok(());
		}
		let record = LogRecord {
			key: key_with_seq(key, NON_TXN_SEQ_NO),
			value: Vec::new(),
			rec_type: RecordType::Deleted,
		};
		self.append_log_record(&record)?;
		self.index.delete(key)?;
		Ok(())
	}

	/// Every live key, in ascending order.
	pub fn list_keys(&self) -> Vec<Vec<u8>> {
		let mut iter = self.index.iterator(false);
		let mut keys = Vec::with_capacity(self.index.len());
		while iter.valid() {
			keys.push(iter.key().to_vec());
			iter.next();
		}
		keys
	}

	/// Visit every live key-value pair in ascending key order until
	/// `f` returns false.
	pub fn fold(&self, mut f: impl FnMut(&[u8], Vec<u8>) -> bool) -> Result<()> {
		let mut iter = self.index.iterator(false);
		while iter.valid() {
			let value = self.value_at(iter.value())?;
			if !f(iter.key(), value) {
				break;
			}
			iter.next();
		}
		Ok(())
	}

	/// Force everything appended so far onto disk.
	pub fn sync(&self) -> Result<()> {
		self.active.read().sync()
	}

	/// Flush, persist the sequence counter if the key directory lives
	/// on disk, and release the directory lock.
	pub fn close(&self) -> Result<()> {
		let result = self.close_inner();
		// the directory lock is released even when flushing failed
		let unlock = self.lock_file.unlock().map_err(Error::from);
		result.and(unlock)
	}

	fn close_inner(&self) -> Result<()> {
		self.index.close()?;
		if self.options.index_type == IndexType::BPlusTree {
			let mut seq_file = DataFile::seq_no_file(&self.options.dir_path)?;
			let record = LogRecord {
				key: SEQ_NO_KEY.to_vec(),
				value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
				rec_type: RecordType::Normal,
			};
			seq_file.append(&record.encode())?;
			seq_file.sync()?;
		}
		self.active.read().sync()?;
		Ok(())
	}

	/// Read a record's value, resolving which segment holds it.
	pub(crate) fn value_at(&self, pos: RecordPosition) -> Result<Vec<u8>> {
		let read = {
			let active = self.active.read();
			if active.file_id() == pos.file_id {
				active.read_record(pos.offset)?
			} else {
				drop(active);
				let older = self.older.read();
				let file = older.get(&pos.file_id).ok_or(Error::DataFileNotFound)?;
				file.read_record(pos.offset)?
			}
		};
		match read {
			Some(ReadRecord { record, .. }) if record.rec_type == RecordType::Deleted => {
				// the directory never points at a tombstone, but a read
				// must not resurrect one regardless
				Err(Error::KeyNotFound)
			}
			Some(ReadRecord { record, .. }) => Ok(record.value),
			None => Err(Error::KeyNotFound),
		}
	}

	pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<RecordPosition> {
		let mut active = self.active.write();
		self.append_record_locked(&mut active, record)
	}

	/// Append under an already-held write lock on the active segment,
	/// rolling it over first when the record would overflow it.
	pub(crate) fn append_record_locked(
		&self,
		active: &mut DataFile,
		record: &LogRecord,
	) -> Result<RecordPosition> {
		let encoded = record.encode();

		if active.write_off() + encoded.len() as u64 > self.options.data_file_size {
			active.sync()?;
			let next = DataFile::open(&self.options.dir_path, active.file_id() + 1, IoType::Standard)?;
			let old = std::mem::replace(active, next);
			self.older.write().insert(old.file_id(), old);
		}

		let write_off = active.write_off();
		active.append(&encoded)?;

		let bytes = self.bytes_write.fetch_add(encoded.len() as u64, Ordering::SeqCst)
			+ encoded.len() as u64;
		let need_sync = self.options.sync_writes
			|| (self.options.bytes_per_sync > 0 && bytes >= self.options.bytes_per_sync);
		if need_sync {
			active.sync()?;
			self.bytes_write.store(0, Ordering::SeqCst);
		}

		Ok(RecordPosition {
			file_id: active.file_id(),
			offset: write_off,
		})
	}
}

fn check_options(options: &Options) -> Result<()> {
	if options.dir_path.as_os_str().is_empty() {
		return Err(Error::InvalidOptions("dir_path is empty"));
	}
	if options.data_file_size == 0 {
		return Err(Error::InvalidOptions(
			"data_file_size must be greater than zero",
		));
	}
	Ok(())
}

/// Open every segment in `dir`, sorted by id.
fn load_data_files(dir: &Path, io_type: IoType) -> Result<Vec<DataFile>> {
	let mut file_ids: Vec<u32> = Vec::new();
	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name();
		let name = name.to_string_lossy();
		if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
			let file_id = stem.parse().map_err(|_| Error::DataDirectoryCorrupted)?;
			file_ids.push(file_id);
		}
	}
	file_ids.sort_unstable();

	let mut data_files = Vec::with_capacity(file_ids.len());
	for file_id in file_ids {
		data_files.push(DataFile::open(dir, file_id, io_type)?);
	}
	Ok(data_files)
}

fn load_seq_no(dir: &Path) -> Result<u64> {
	let path = dir.join(SEQ_NO_FILE_NAME);
	if !path.is_file() {
		return Ok(NON_TXN_SEQ_NO);
	}
	let file = DataFile::seq_no_file(dir)?;
	let read = file.read_record(0)?.ok_or(Error::DataDirectoryCorrupted)?;
	let text = String::from_utf8(read.record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
	let seq_no = text.parse().map_err(|_| Error::DataDirectoryCorrupted)?;
	// stale once the database is running again
	fs::remove_file(path)?;
	Ok(seq_no)
}

/// Replay the segments into the key directory.
///
/// Batched records are buffered per sequence number and take effect
/// only when their finish marker shows up; a batch whose marker never
/// arrives (a crash mid-commit) is discarded entirely. Returns the
/// highest sequence number seen.
fn load_index_from_data_files(
	index: &dyn Index,
	data_files: &mut [DataFile],
	non_merge_file_id: Option<u32>,
) -> Result<u64> {
	let mut current_seq = NON_TXN_SEQ_NO;
	let mut pending_txns: HashMap<u64, Vec<(LogRecord, RecordPosition)>> = HashMap::new();
	let mut last_offset = 0u64;

	for file in data_files.iter() {
		if let Some(boundary) = non_merge_file_id {
			// segments below the boundary are covered by the hint file
			if file.file_id() < boundary {
				continue;
			}
		}

		let mut offset = 0u64;
		while let Some(read) = file.read_record(offset)? {
			let pos = RecordPosition {
				file_id: file.file_id(),
				offset,
			};
			let (user_key, seq) = parse_record_key(&read.record.key);
			let user_key = user_key.to_vec();

			if seq == NON_TXN_SEQ_NO {
				apply_to_index(index, user_key, read.record.rec_type, pos);
			} else if read.record.rec_type == RecordType::TxnFinished {
				// the batch reached its durable commit point
				if let Some(staged) = pending_txns.remove(&seq) {
					for (record, pos) in staged {
						apply_to_index(index, record.key, record.rec_type, pos);
					}
				}
			} else {
				let mut record = read.record;
				record.key = user_key;
				pending_txns.entry(seq).or_default().push((record, pos));
			}

			if seq > current_seq {
				current_seq = seq;
			}
			offset += read.size;
		}
		last_offset = offset;
	}

	// appends resume where the scan of the last segment stopped
	if let Some(last) = data_files.last_mut() {
		last.set_write_off(last_offset);
	}
	Ok(current_seq)
}

fn apply_to_index(index: &dyn Index, key: Vec<u8>, rec_type: RecordType, pos: RecordPosition) {
	let result = match rec_type {
		RecordType::Deleted => index.delete(&key).map(|_| ()),
		_ => index.put(key, pos).map(|_| ()),
	};
	result.expect("failed to update the key directory while reopening");
}
