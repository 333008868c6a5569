//! JPEG marker-segment walker.
//!
//! Written against the JFIF/EXIF marker-segment layout, the way the
//! teacher's `validation/jpeg.rs` walks markers, but re-architected per
//! `spec.md`: a fresh [`JpegParse`] owns all scratch state for the
//! duration of one `validate` call, and the three orthogonal outcomes
//! (conforms / exhausted / terminated) are reported through [`Status`]
//! instead of a single overloaded boolean.

use std::io;

use log::debug;

use crate::{
	source::{read_to_fill, ByteSource},
	validation::{Details, DetailValue, Segment, Status, Validator},
};

const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
/// Default size of the window used to scan entropy-coded scan data for the
/// marker that follows it, per `spec.md` §4.2.
const SCAN_WINDOW: usize = 2048;

pub struct JpegValidator {
	status: Status,
	details: Details,
}

impl JpegValidator {
	pub fn new() -> Self {
		JpegValidator {
			status: Status::default(),
			details: Details::new(),
		}
	}
}

impl Default for JpegValidator {
	fn default() -> Self {
		Self::new()
	}
}

impl Validator for JpegValidator {
	fn validate(&mut self, source: &mut dyn ByteSource) -> bool {
		let mut parse = JpegParse {
			source,
			pos: 0,
			segments: Vec::new(),
		};

		let (status, segments) = parse.run();
		status.debug_check(parse.pos);
		self.status = status;

		self.details = Details::new();
		self.details.insert("segments".to_string(), DetailValue::from(
			segments.into_iter().map(DetailValue::from).collect::<Vec<_>>()
		));
		self.details.insert("extensions".to_string(), DetailValue::from(vec![DetailValue::from(".jpg")]));

		self.status.is_valid
	}

	fn status(&self) -> Status {
		self.status
	}

	fn details(&self) -> &Details {
		&self.details
	}
}

struct JpegParse<'s> {
	source: &'s mut dyn ByteSource,
	pos: u64,
	segments: Vec<Segment>,
}

/// What happened when we asked for more bytes.
enum Fill {
	Full(Vec<u8>),
	Short,
}

impl<'s> JpegParse<'s> {
	fn fill(&mut self, n: usize) -> io::Result<Fill> {
		let mut buf = vec![0u8; n];
		let filled = read_to_fill(self.source, &mut buf)?;
		self.pos += filled as u64;
		if filled == n {
			Ok(Fill::Full(buf))
		} else {
			Ok(Fill::Short)
		}
	}

	fn run(&mut self) -> (Status, Vec<Segment>) {
		match self.run_inner() {
			Ok(status) => (status, std::mem::take(&mut self.segments)),
			Err(_) => (
				Status { is_valid: false, eof: true, bytes_last_valid: 0, end: false },
				std::mem::take(&mut self.segments),
			),
		}
	}

	fn run_inner(&mut self) -> io::Result<Status> {
		let mut last_valid = 0u64;

		let soi = match self.fill(2)? {
			Fill::Full(b) => b,
			Fill::Short => return Ok(Status { is_valid: false, eof: true, bytes_last_valid: 0, end: false }),
		};
		if soi != [0xFF, 0xD8] {
			debug!("JPEG does not open with an SOI marker: {:02X?}", soi);
			return Ok(Status { is_valid: false, eof: false, bytes_last_valid: 0, end: false });
		}
		self.segments.push(Segment { identifier: "SOI".to_string(), offset: 0, length: 2, crc: None });
		last_valid = self.pos;

		loop {
			let marker = match self.fill(2)? {
				Fill::Full(b) => b,
				Fill::Short => return Ok(Status { is_valid: true, eof: true, bytes_last_valid: last_valid, end: false }),
			};
			let marker_offset = self.pos - 2;

			if marker[0] != 0xFF {
				return Ok(Status { is_valid: false, eof: false, bytes_last_valid: last_valid, end: false });
			}
			let tag = marker[1];

			let is_valid_marker = (0xC0..=0xFE).contains(&tag) && !(0xD0..=0xD7).contains(&tag);
			if !is_valid_marker {
				return Ok(Status { is_valid: false, eof: false, bytes_last_valid: last_valid, end: false });
			}

			if tag == EOI {
				self.segments.push(Segment { identifier: "EOI".to_string(), offset: marker_offset, length: 2, crc: None });
				return Ok(Status { is_valid: true, eof: false, bytes_last_valid: self.pos, end: true });
			}

			if tag == SOS {
				self.segments.push(Segment { identifier: "SOS".to_string(), offset: marker_offset, length: 2, crc: None });
				last_valid = self.pos;

				match self.scan_entropy_data()? {
					ScanResult::Resync => {
						last_valid = self.pos;
						continue;
					}
					ScanResult::Eof => return Ok(Status { is_valid: true, eof: true, bytes_last_valid: last_valid, end: false }),
					ScanResult::Corrupt => return Ok(Status { is_valid: false, eof: false, bytes_last_valid: last_valid, end: false }),
				}
			}

			// Any other marker in the valid set: 2-byte big-endian length
			// (including itself), followed by length - 2 payload bytes.
			let len_bytes = match self.fill(2)? {
				Fill::Full(b) => b,
				Fill::Short => return Ok(Status { is_valid: true, eof: true, bytes_last_valid: last_valid, end: false }),
			};
			let length = u16::from_be_bytes([len_bytes[0], len_bytes[1]]);
			if length < 2 {
				return Ok(Status { is_valid: false, eof: false, bytes_last_valid: last_valid, end: false });
			}

			let payload_len = (length - 2) as usize;
			if payload_len > 0 {
				match self.fill(payload_len)? {
					Fill::Full(_) => {}
					Fill::Short => return Ok(Status { is_valid: true, eof: true, bytes_last_valid: last_valid, end: false }),
				}
			}

			self.segments.push(Segment {
				identifier: format!("0x{tag:02X}"),
				offset: marker_offset,
				length: 2 + length as u64,
				crc: None,
			});
			last_valid = self.pos;
		}
	}

	/// Scans forward one byte at a time, refilling a `SCAN_WINDOW`-sized
	/// buffer as needed, for the `0xFF` byte that resumes marker-segment
	/// parsing. `0xFF 0x00` (stuffed byte) and `0xFF` followed by a restart
	/// marker are skipped over; any other `0xFF xx` stops the scan.
	fn scan_entropy_data(&mut self) -> io::Result<ScanResult> {
		let mut window = Vec::with_capacity(SCAN_WINDOW);
		loop {
			if window.len() < 2 {
				let mut chunk = vec![0u8; SCAN_WINDOW];
				let filled = read_to_fill(self.source, &mut chunk)?;
				if filled == 0 {
					return Ok(if window.is_empty() { ScanResult::Eof } else { ScanResult::Corrupt });
				}
				chunk.truncate(filled);
				window.extend_from_slice(&chunk);
				self.pos += filled as u64;
			}

			if window.len() < 2 {
				return Ok(ScanResult::Eof);
			}

			let mut i = 0;
			while i + 1 < window.len() {
				if window[i] == 0xFF {
					let next = window[i + 1];
					if next == 0x00 || (0xD0..=0xD7).contains(&next) {
						i += 2;
						continue;
					}
					// Found a real marker - rewind the source to its start.
					let consumed = window.len() as u64;
					let unconsumed = consumed - i as u64;
					self.pos -= unconsumed;
					self.source.seek(self.pos)?;
					debug!("resynced to marker 0xFF{:02X} after entropy-coded scan data", next);
					return Ok(ScanResult::Resync);
				}
				i += 1;
			}

			// Keep the trailing byte in case it's the start of a split `0xFF xx`.
			let keep = window[window.len() - 1];
			window.clear();
			window.push(keep);
		}
	}
}

enum ScanResult {
	Resync,
	Eof,
	Corrupt,
}

#[cfg(test)]
mod test {
	use super::*;

	fn minimal_jpeg() -> Vec<u8> {
		let mut data = vec![0xFF, 0xD8]; // SOI
		data.extend([0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46]); // APP0, len=4, 2 bytes payload
		data.extend([0xFF, 0xDA]); // SOS
		data.extend([0x00, 0x01, 0x02, 0xFF, 0x00, 0x03]); // entropy data with a stuffed 0xFF00
		data.extend([0xFF, 0xD9]); // EOI
		data
	}

	#[test]
	fn happy_path() {
		let data = minimal_jpeg();
		let mut v = JpegValidator::new();
		assert!(v.validate_bytes(&data));
		let status = v.status();
		assert!(status.end);
		assert_eq!(status.bytes_last_valid, data.len() as u64);
		assert!(!status.eof);
	}

	#[test]
	fn truncated_before_eoi_is_a_valid_prefix() {
		let data = minimal_jpeg();
		let truncated = &data[..data.len() - 2];
		let mut v = JpegValidator::new();
		assert!(v.validate_bytes(truncated));
		let status = v.status();
		assert!(!status.end);
		assert!(status.eof);
		assert_eq!(status.bytes_last_valid, truncated.len() as u64);
	}

	#[test]
	fn bad_soi_is_rejected() {
		let _ = env_logger::builder().is_test(true).try_init();
		let mut v = JpegValidator::new();
		assert!(!v.validate_bytes(&[0x00, 0x00, 0xFF, 0xD9]));
		assert!(!v.status().is_valid);
	}

	#[test]
	fn short_length_field_invalidates() {
		let mut data = vec![0xFF, 0xD8];
		data.extend([0xFF, 0xE0, 0x00, 0x01]); // length of 1 is < 2
		let mut v = JpegValidator::new();
		assert!(!v.validate_bytes(&data));
	}

	fn marker(tag: u8, payload: &[u8]) -> Vec<u8> {
		let mut out = vec![0xFF, tag];
		out.extend(((payload.len() + 2) as u16).to_be_bytes());
		out.extend(payload);
		out
	}

	fn full_jpeg() -> Vec<u8> {
		let mut data = vec![0xFF, 0xD8];
		data.extend(marker(0xE0, b"JFIF\0"));
		data.extend(marker(0xDB, &[0u8; 65]));
		data.extend([0xFF, 0xDA, 0x00, 0x08, 0x01, 0x00, 0x00, 0x00, 0x3F, 0x00]);
		data.extend([0x12, 0x34, 0xFF, 0x00, 0x56, 0x78]);
		data.extend([0xFF, 0xD9]);
		data
	}

	#[test]
	fn complete_file_with_several_segments_lists_them_all() {
		let data = full_jpeg();
		let mut v = JpegValidator::new();

		assert!(v.validate_bytes(&data));
		let status = v.status();
		assert!(status.end);
		assert!(!status.eof);
		assert_eq!(status.bytes_last_valid, data.len() as u64);

		let DetailValue::List(segments) = &v.details()["segments"] else { panic!("expected a segment list") };
		assert!(segments.len() >= 4);
	}

	#[test]
	fn truncated_immediately_after_sos_is_a_valid_eof_prefix() {
		let mut data = vec![0xFF, 0xD8];
		data.extend(marker(0xE0, b"JFIF\0"));
		data.extend(marker(0xDB, &[0u8; 65]));
		data.extend([0xFF, 0xDA]); // SOS marker, no entropy-coded data behind it

		let mut v = JpegValidator::new();
		assert!(v.validate_bytes(&data));
		let status = v.status();
		assert!(!status.end);
		assert!(status.eof);
		assert_eq!(status.bytes_last_valid, data.len() as u64);
	}

	#[test]
	fn corrupted_marker_byte_invalidates() {
		let mut data = full_jpeg();
		data[2] = 0x00; // replace APP0's 0xFF lead byte with garbage
		let mut v = JpegValidator::new();

		assert!(!v.validate_bytes(&data));
		assert!(!v.status().is_valid);
		assert_eq!(v.status().bytes_last_valid, 2);
	}
}
