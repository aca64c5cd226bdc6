//! Byte-level access to a single file.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Positioned reads and writes on one backing file.
///
/// The store never seeks; every access names its offset, so readers
/// and the single writer can share a backend without coordination.
pub(crate) trait IoBackend: Send + Sync {
	/// Fill all of `buf` from the given position.
	fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
	/// Write all of `data` at the given position, returning its length.
	fn write_at(&self, data: &[u8], offset: u64) -> io::Result<usize>;
	/// Call `fsync`
	fn sync(&self) -> io::Result<()>;
	/// The current length of the file
	fn size(&self) -> io::Result<u64>;
}

/// The standard backend: an ordinary file descriptor.
pub(crate) struct FileIo {
	file: File,
}

impl FileIo {
	pub(crate) fn open(path: &Path) -> io::Result<FileIo> {
		let file = std::fs::OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(path)?;
		Ok(FileIo { file })
	}
}

impl IoBackend for FileIo {
	fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
		self.file.read_exact_at(buf, offset)
	}

	fn write_at(&self, data: &[u8], offset: u64) -> io::Result<usize> {
		self.file.write_all_at(data, offset)?;
		Ok(data.len())
	}

	fn sync(&self) -> io::Result<()> {
		self.file.sync_all()
	}

	fn size(&self) -> io::Result<u64> {
		Ok(self.file.metadata()?.len())
	}
}

/// A read-only memory-mapped backend.
///
/// Used only while reopening a database, where it makes the replay of
/// large segments considerably cheaper. It cannot write.
pub(crate) struct MmapIo {
	// an empty file has no map
	map: Option<memmap2::Mmap>,
}

impl MmapIo {
	pub(crate) fn open(path: &Path) -> io::Result<MmapIo> {
		let file = File::open(path)?;
		let map = if file.metadata()?.len() == 0 {
			None
		} else {
			Some(unsafe { memmap2::Mmap::map(&file)? })
		};
		Ok(MmapIo { map })
	}

	fn data(&self) -> &[u8] {
		self.map.as_deref().unwrap_or(&[])
	}
}

impl IoBackend for MmapIo {
	fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
		let data = self.data();
		let start = offset as usize;
		let end = start.checked_add(buf.len()).filter(|&e| e <= data.len());
		match end {
			Some(end) => {
				buf.copy_from_slice(&data[start..end]);
				Ok(())
			}
			None => Err(io::ErrorKind::UnexpectedEof.into()),
		}
	}

	fn write_at(&self, _data: &[u8], _offset: u64) -> io::Result<usize> {
		Err(io::Error::new(
			io::ErrorKind::Unsupported,
			"memory-mapped segments are read-only",
		))
	}

	fn sync(&self) -> io::Result<()> {
		Err(io::Error::new(
			io::ErrorKind::Unsupported,
			"memory-mapped segments are read-only",
		))
	}

	fn size(&self) -> io::Result<u64> {
		Ok(self.data().len() as u64)
	}
}
