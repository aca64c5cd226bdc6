//! The failures this crate reports.

/// A reason a database operation could not be completed
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// An empty key was passed to a read, write, or delete
	#[error("the key is empty")]
	KeyIsEmpty,
	/// The key has no live value in the database
	#[error("key not found in database")]
	KeyNotFound,
	/// The key directory pointed at a segment this database does not have
	#[error("data file not found")]
	DataFileNotFound,
	/// A file in the data directory is not named like a segment, or a
	/// bookkeeping file does not hold what it should
	#[error("the data directory may be corrupted")]
	DataDirectoryCorrupted,
	/// A stored record does not match its checksum
	#[error("invalid crc, the record may be corrupted")]
	InvalidRecordCrc,
	/// The key directory rejected an update
	#[error("failed to update the key directory")]
	IndexUpdateFailed,
	/// More records were staged in one batch than `max_batch_num` allows
	#[error("too many records in one write batch")]
	ExceedMaxBatchNum,
	/// Another merge is already running
	#[error("merge is in progress, try again later")]
	MergeInProgress,
	/// Another process has the database directory open
	#[error("the database directory is used by another process")]
	DatabaseIsUsing,
	/// The options passed to `Database::open` are unusable
	#[error("invalid options: {0}")]
	InvalidOptions(&'static str),
	/// An error from the operating system
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
