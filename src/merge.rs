//! Compaction: rewrite the live records and drop everything else.

use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::{key_with_seq, NON_TXN_SEQ_NO};
use crate::data_file::{
	data_file_path, DataFile, IoType, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::db::{Database, FILE_LOCK_NAME};
use crate::errors::{Error, Result};
use crate::index::Index;
use crate::options::{IndexType, Options};
use crate::record::{LogRecord, RecordPosition, RecordType};

const MERGE_DIR_SUFFIX: &str = "-merge";
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

impl Database {
	/// Rewrite every live record into fresh segments and emit an index
	/// image for faster reopening.
	///
	/// The compacted segments replace the old ones the next time the
	/// database is opened; until then the database keeps serving from
	/// its current files, and reads and writes proceed normally while
	/// the merge runs. A second merge started while one is running
	/// fails with [`Error::MergeInProgress`].
	pub fn merge(&self) -> Result<()> {
		let _guard = match self.merge_lock.try_lock() {
			Ok(guard) => guard,
			Err(_) => return Err(Error::MergeInProgress),
		};

		// Freeze the active segment and remember the boundary id:
		// everything below it is merged, everything from it on stays in
		// place and is replayed on reopen. The directory snapshot is
		// taken under the same lock so it cannot name anything newer.
		let (boundary, mut snapshot) = {
			let mut active = self.active.write();
			if active.write_off() == 0 && self.older.read().is_empty() {
				return Ok(());
			}
			active.sync()?;
			let next =
				DataFile::open(&self.options.dir_path, active.file_id() + 1, IoType::Standard)?;
			let old = std::mem::replace(&mut *active, next);
			self.older.write().insert(old.file_id(), old);
			(active.file_id(), self.index.iterator(false))
		};

		let merge_dir = merge_path(&self.options.dir_path);
		if merge_dir.is_dir() {
			fs::remove_dir_all(&merge_dir)?;
		}
		fs::create_dir_all(&merge_dir)?;

		// a scratch database receives the rewritten records; its own
		// key directory stays empty, appends do not go through it
		let scratch = Database::open(Options {
			dir_path: merge_dir.clone(),
			sync_writes: false,
			index_type: IndexType::BTree,
			mmap_at_startup: false,
			..self.options.clone()
		})?;
		let mut hint_file = DataFile::hint_file(&merge_dir)?;

		while snapshot.valid() {
			let value = self.value_at(snapshot.value())?;
			let record = LogRecord {
				key: key_with_seq(snapshot.key(), NON_TXN_SEQ_NO),
				value,
				rec_type: RecordType::Normal,
			};
			let pos = scratch.append_log_record(&record)?;
			hint_file.write_hint_record(snapshot.key(), pos)?;
			snapshot.next();
		}

		scratch.sync()?;
		hint_file.sync()?;

		// written only after every merged record is durable; its
		// presence is what makes the merge output authoritative
		let mut finished_file = DataFile::merge_finished_file(&merge_dir)?;
		let finished = LogRecord {
			key: MERGE_FINISHED_KEY.to_vec(),
			value: boundary.to_string().into_bytes(),
			rec_type: RecordType::Normal,
		};
		finished_file.append(&finished.encode())?;
		finished_file.sync()?;

		scratch.close()?;
		Ok(())
	}
}

/// Apply the output of a completed merge, if one is waiting beside the
/// data directory. Returns whether anything was applied.
///
/// Runs while opening, before the segments are scanned.
pub(crate) fn load_merge_files(dir: &Path) -> Result<bool> {
	let merge_dir = merge_path(dir);
	if !merge_dir.is_dir() {
		return Ok(false);
	}

	let mut names: Vec<std::ffi::OsString> = Vec::new();
	let mut finished = false;
	for entry in fs::read_dir(&merge_dir)? {
		let entry = entry?;
		let name = entry.file_name();
		if name == FILE_LOCK_NAME || name == SEQ_NO_FILE_NAME {
			continue;
		}
		if name == MERGE_FINISHED_FILE_NAME {
			finished = true;
			continue;
		}
		names.push(name);
	}

	if !finished {
		// the merge never completed; its output is worthless
		fs::remove_dir_all(&merge_dir)?;
		return Ok(false);
	}

	let boundary = read_merge_finished(&merge_dir)?.ok_or(Error::DataDirectoryCorrupted)?;

	// drop the segments the merge replaced
	for file_id in 0..boundary {
		let path = data_file_path(dir, file_id);
		if path.is_file() {
			fs::remove_file(&path)?;
		}
	}

	// move the compacted segments in; the finish marker goes last so
	// that a crash part-way leaves the marker, and with it this whole
	// procedure, intact for the next open. Entries an interrupted
	// apply already moved are skipped, so retrying is harmless.
	for name in &names {
		let from = merge_dir.join(name);
		if from.is_file() {
			fs::rename(&from, dir.join(name))?;
		}
	}
	fs::rename(
		merge_dir.join(MERGE_FINISHED_FILE_NAME),
		dir.join(MERGE_FINISHED_FILE_NAME),
	)?;

	if let Err(e) = fs::remove_dir_all(&merge_dir) {
		eprintln!("warning: failed to remove {:?}: {}", merge_dir, e);
	}
	Ok(true)
}

/// The first segment id the last merge did not cover, or `None` when
/// no merge output is recorded in `dir`.
pub(crate) fn non_merge_file_id(dir: &Path) -> Result<Option<u32>> {
	read_merge_finished(dir)
}

/// Rebuild directory entries for the merged segments from the hint
/// file, one encoded position per live key.
pub(crate) fn load_index_from_hint_file(dir: &Path, index: &dyn Index) -> Result<()> {
	let path = dir.join(HINT_FILE_NAME);
	if !path.is_file() {
		return Ok(());
	}
	let hint_file = DataFile::hint_file(dir)?;
	let mut offset = 0u64;
	while let Some(read) = hint_file.read_record(offset)? {
		let pos = RecordPosition::decode(&read.record.value);
		index
			.put(read.record.key, pos)
			.expect("failed to update the key directory from the hint file");
		offset += read.size;
	}
	Ok(())
}

fn read_merge_finished(dir: &Path) -> Result<Option<u32>> {
	if !dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
		return Ok(None);
	}
	let file = DataFile::merge_finished_file(dir)?;
	let read = file.read_record(0)?.ok_or(Error::DataDirectoryCorrupted)?;
	let text = String::from_utf8(read.record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
	let boundary = text.parse().map_err(|_| Error::DataDirectoryCorrupted)?;
	Ok(Some(boundary))
}

/// Where the merge writes its output: a sibling of the data directory.
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
	let mut name = dir.file_name().unwrap_or_default().to_os_string();
	name.push(MERGE_DIR_SUFFIX);
	match dir.parent() {
		Some(parent) => parent.join(name),
		None => PathBuf::from(name),
	}
}
