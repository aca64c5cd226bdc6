//! The wire codec for one log record.
//!
//! A record is stored as a little-endian CRC32 over everything that
//! follows it, a one-byte type tag, the key and value lengths as
//! signed varints, and then the key and value bytes themselves.

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::{Error, Result};

/// crc (4) + type (1) + two sizes at up to five varint bytes each
pub(crate) const MAX_HEADER_SIZE: usize = 15;

/// What an append means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RecordType {
	/// An ordinary key-value pair
	Normal = 0,
	/// A tombstone hiding every earlier record for its key
	Deleted = 1,
	/// The durable commit point of a write batch
	TxnFinished = 2,
}

impl RecordType {
	pub(crate) fn from_u8(value: u8) -> Option<RecordType> {
		match value {
			0 => Some(RecordType::Normal),
			1 => Some(RecordType::Deleted),
			2 => Some(RecordType::TxnFinished),
			_ => None,
		}
	}
}

/// One append unit. Records are immutable once written.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LogRecord {
	pub(crate) key: Vec<u8>,
	pub(crate) value: Vec<u8>,
	pub(crate) rec_type: RecordType,
}

/// The decoded fixed part of a stored record.
pub(crate) struct RecordHeader {
	pub(crate) crc: u32,
	pub(crate) rec_type: u8,
	pub(crate) key_size: usize,
	pub(crate) value_size: usize,
}

/// A record read back from a segment, with its stored size.
pub(crate) struct ReadRecord {
	pub(crate) record: LogRecord,
	pub(crate) size: u64,
}

/// Where a record lives on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RecordPosition {
	pub(crate) file_id: u32,
	pub(crate) offset: u64,
}

impl LogRecord {
	/// Encode for appending. The checksum covers every byte after
	/// itself, so it guards the sizes as well as the payload.
	pub(crate) fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());
		buf.extend_from_slice(&[0u8; 4]);
		buf.push(self.rec_type as u8);

		let mut lenbuf = unsigned_varint::encode::u64_buffer();
		buf.extend_from_slice(unsigned_varint::encode::u64(
			zigzag(self.key.len() as i64),
			&mut lenbuf,
		));
		buf.extend_from_slice(unsigned_varint::encode::u64(
			zigzag(self.value.len() as i64),
			&mut lenbuf,
		));
		buf.extend_from_slice(&self.key);
		buf.extend_from_slice(&self.value);

		let crc = crc32fast::hash(&buf[4..]);
		LittleEndian::write_u32(&mut buf[..4], crc);
		buf
	}
}

/// Decode the header at the start of `buf`, returning it and its
/// encoded length.
///
/// `Ok(None)` means `buf` is too short to hold a header, which the
/// caller treats as the end of the segment.
pub(crate) fn decode_header(buf: &[u8]) -> Result<Option<(RecordHeader, usize)>> {
	if buf.len() <= 4 {
		return Ok(None);
	}
	let crc = LittleEndian::read_u32(&buf[..4]);
	let rec_type = buf[4];

	let (key_size, rest) = match take_size(&buf[5..])? {
		Some(v) => v,
		None => return Ok(None),
	};
	let (value_size, rest) = match take_size(rest)? {
		Some(v) => v,
		None => return Ok(None),
	};
	// a negative size can only come from corruption
	if key_size < 0 || value_size < 0 {
		return Err(Error::InvalidRecordCrc);
	}

	let header_size = buf.len() - rest.len();
	let header = RecordHeader {
		crc,
		rec_type,
		key_size: key_size as usize,
		value_size: value_size as usize,
	};
	Ok(Some((header, header_size)))
}

/// The checksum of a record as stored: the header bytes after the CRC
/// field, then the key, then the value.
pub(crate) fn record_crc(record: &LogRecord, header_rest: &[u8]) -> u32 {
	let mut hasher = crc32fast::Hasher::new();
	hasher.update(header_rest);
	hasher.update(&record.key);
	hasher.update(&record.value);
	hasher.finalize()
}

fn take_size(buf: &[u8]) -> Result<Option<(i64, &[u8])>> {
	match unsigned_varint::decode::u64(buf) {
		Ok((v, rest)) => Ok(Some((unzigzag(v), rest))),
		Err(unsigned_varint::decode::Error::Insufficient) => Ok(None),
		Err(_) => Err(Error::InvalidRecordCrc),
	}
}

// sizes are stored as signed varints; the least significant bit
// carries the sign
fn zigzag(v: i64) -> u64 {
	((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
	((v >> 1) as i64) ^ -((v & 1) as i64)
}

impl RecordPosition {
	pub(crate) fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(15);
		let mut idbuf = unsigned_varint::encode::u32_buffer();
		buf.extend_from_slice(unsigned_varint::encode::u32(self.file_id, &mut idbuf));
		let mut offbuf = unsigned_varint::encode::u64_buffer();
		buf.extend_from_slice(unsigned_varint::encode::u64(
			zigzag(self.offset as i64),
			&mut offbuf,
		));
		buf
	}

	/// Decode a position produced by [`RecordPosition::encode`]. The
	/// bytes were checksummed by whichever record or tree carried them.
	pub(crate) fn decode(buf: &[u8]) -> RecordPosition {
		let (file_id, rest) = unsigned_varint::decode::u32(buf).expect("file id of a record position");
		let (offset, _) = unsigned_varint::decode::u64(rest).expect("offset of a record position");
		RecordPosition {
			file_id,
			offset: unzigzag(offset) as u64,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrip() {
		let record = LogRecord {
			key: b"name".to_vec(),
			value: b"a rather ordinary value".to_vec(),
			rec_type: RecordType::Normal,
		};
		let buf = record.encode();

		let (header, header_size) = decode_header(&buf).unwrap().unwrap();
		assert_eq!(header.key_size, 4);
		assert_eq!(header.value_size, 23);
		assert_eq!(header.rec_type, RecordType::Normal as u8);
		assert_eq!(buf.len(), header_size + header.key_size + header.value_size);
		assert_eq!(&buf[header_size..header_size + 4], b"name");
		assert_eq!(record_crc(&record, &buf[4..header_size]), header.crc);
	}

	#[test]
	fn roundtrip_empty_value() {
		let record = LogRecord {
			key: b"gone".to_vec(),
			value: vec![],
			rec_type: RecordType::Deleted,
		};
		let buf = record.encode();
		let (header, header_size) = decode_header(&buf).unwrap().unwrap();
		assert_eq!(header.rec_type, RecordType::Deleted as u8);
		assert_eq!(header.key_size, 4);
		assert_eq!(header.value_size, 0);
		assert_eq!(buf.len(), header_size + 4);
	}

	#[test]
	fn short_buffer_is_eof() {
		assert!(decode_header(&[]).unwrap().is_none());
		assert!(decode_header(&[1, 2, 3, 4]).unwrap().is_none());
		// header cut off in the middle of a size varint
		assert!(decode_header(&[9, 9, 9, 9, 0, 0x80]).unwrap().is_none());
	}

	#[test]
	fn zeroed_buffer_decodes_to_empty_header() {
		let (header, _) = decode_header(&[0u8; 15]).unwrap().unwrap();
		assert_eq!(header.crc, 0);
		assert_eq!(header.key_size, 0);
		assert_eq!(header.value_size, 0);
	}

	#[test]
	fn negative_size_is_corruption() {
		// zigzag(-1) == 1
		let buf = [9u8, 9, 9, 9, 0, 1, 2, 0, 0, 0];
		assert!(matches!(
			decode_header(&buf),
			Err(crate::Error::InvalidRecordCrc)
		));
	}

	#[test]
	fn corrupted_byte_changes_crc() {
		let record = LogRecord {
			key: b"k".to_vec(),
			value: b"value".to_vec(),
			rec_type: RecordType::Normal,
		};
		let mut buf = record.encode();
		let last = buf.len() - 1;
		buf[last] ^= 0xff;

		let (header, header_size) = decode_header(&buf).unwrap().unwrap();
		let tampered = LogRecord {
			key: buf[header_size..header_size + 1].to_vec(),
			value: buf[header_size + 1..].to_vec(),
			rec_type: RecordType::Normal,
		};
		assert_ne!(record_crc(&tampered, &buf[4..header_size]), header.crc);
	}

	#[test]
	fn position_roundtrip() {
		let pos = RecordPosition {
			file_id: 42,
			offset: 1 << 33,
		};
		assert_eq!(RecordPosition::decode(&pos.encode()), pos);
	}
}
