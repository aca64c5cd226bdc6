//! One append-only segment file.

use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};
use crate::fio::{FileIo, IoBackend, MmapIo};
use crate::record::{self, LogRecord, ReadRecord, RecordPosition, RecordType, MAX_HEADER_SIZE};

pub(crate) const DATA_FILE_SUFFIX: &str = ".data";
/// The index image written by a merge
pub(crate) const HINT_FILE_NAME: &str = "hint-index";
/// Present once a merge has completely written its output
pub(crate) const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
/// The last batch sequence number, written at clean shutdown when the
/// key directory is itself on disk
pub(crate) const SEQ_NO_FILE_NAME: &str = "seq-no";

/// How a segment reads its bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IoType {
	Standard,
	Mmap,
}

/// A segment: one log file and the offset its next append goes to.
///
/// The engine is the only writer; readers use [`DataFile::read_record`]
/// concurrently through a shared reference.
pub(crate) struct DataFile {
	file_id: u32,
	write_off: u64,
	io: Box<dyn IoBackend>,
}

/// The path of segment `file_id` under `dir`.
pub(crate) fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
	dir.join(format!("{:09}{}", file_id, DATA_FILE_SUFFIX))
}

impl DataFile {
	/// Open (creating if missing) the segment with this id.
	pub(crate) fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<DataFile> {
		let path = data_file_path(dir, file_id);
		let io: Box<dyn IoBackend> = match io_type {
			IoType::Standard => Box::new(FileIo::open(&path)?),
			IoType::Mmap => Box::new(MmapIo::open(&path)?),
		};
		Ok(DataFile {
			file_id,
			write_off: 0,
			io,
		})
	}

	fn open_named(dir: &Path, name: &str) -> Result<DataFile> {
		Ok(DataFile {
			file_id: 0,
			write_off: 0,
			io: Box::new(FileIo::open(&dir.join(name))?),
		})
	}

	pub(crate) fn hint_file(dir: &Path) -> Result<DataFile> {
		Self::open_named(dir, HINT_FILE_NAME)
	}

	pub(crate) fn merge_finished_file(dir: &Path) -> Result<DataFile> {
		Self::open_named(dir, MERGE_FINISHED_FILE_NAME)
	}

	pub(crate) fn seq_no_file(dir: &Path) -> Result<DataFile> {
		Self::open_named(dir, SEQ_NO_FILE_NAME)
	}

	pub(crate) fn file_id(&self) -> u32 {
		self.file_id
	}

	pub(crate) fn write_off(&self) -> u64 {
		self.write_off
	}

	pub(crate) fn set_write_off(&mut self, offset: u64) {
		self.write_off = offset;
	}

	pub(crate) fn size(&self) -> Result<u64> {
		Ok(self.io.size()?)
	}

	/// Append pre-encoded bytes at the current write offset.
	pub(crate) fn append(&mut self, data: &[u8]) -> Result<usize> {
		let n = self.io.write_at(data, self.write_off)?;
		self.write_off += n as u64;
		Ok(n)
	}

	/// Append a record whose value is an encoded position; a merge
	/// writes one of these per live key into the hint file.
	pub(crate) fn write_hint_record(&mut self, key: &[u8], pos: RecordPosition) -> Result<()> {
		let record = LogRecord {
			key: key.to_vec(),
			value: pos.encode(),
			rec_type: RecordType::Normal,
		};
		self.append(&record.encode())?;
		Ok(())
	}

	/// Read the record at `offset` and report how many bytes it spans.
	///
	/// `Ok(None)` is the end of the segment: either past the last byte,
	/// or at a short or zeroed header such as the tail a crash leaves.
	pub(crate) fn read_record(&self, offset: u64) -> Result<Option<ReadRecord>> {
		let file_size = self.io.size()?;
		if offset >= file_size {
			return Ok(None);
		}
		let header_len = MAX_HEADER_SIZE.min((file_size - offset) as usize);
		let mut header_buf = vec![0u8; header_len];
		self.io.read_at(&mut header_buf, offset)?;

		let (header, header_size) = match record::decode_header(&header_buf)? {
			Some(h) => h,
			None => return Ok(None),
		};
		if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
			return Ok(None);
		}

		let mut kv = vec![0u8; header.key_size + header.value_size];
		if !kv.is_empty() {
			self.io.read_at(&mut kv, offset + header_size as u64)?;
		}
		let value = kv.split_off(header.key_size);
		let rec_type = RecordType::from_u8(header.rec_type).ok_or(Error::InvalidRecordCrc)?;
		let record = LogRecord {
			key: kv,
			value,
			rec_type,
		};

		if record::record_crc(&record, &header_buf[4..header_size]) != header.crc {
			return Err(Error::InvalidRecordCrc);
		}

		Ok(Some(ReadRecord {
			size: (header_size + header.key_size + header.value_size) as u64,
			record,
		}))
	}

	pub(crate) fn sync(&self) -> Result<()> {
		Ok(self.io.sync()?)
	}

	/// Swap the backend back to ordinary file descriptors; the memory
	/// map used while reopening cannot append.
	pub(crate) fn reset_io(&mut self, dir: &Path) -> Result<()> {
		self.io = Box::new(FileIo::open(&data_file_path(dir, self.file_id))?);
		Ok(())
	}
}
