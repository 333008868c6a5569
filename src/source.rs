//! The byte-source contract validators read from.
//!
//! `spec.md`'s source material cast its input as "a file-like object or a
//! string" and branched on which it got. That's re-expressed here as a
//! single trait so every validator has one code path regardless of whether
//! the caller handed over an in-memory buffer or a real file: wrap a slice
//! in a `Cursor` and it reads exactly like a seekable stream would.

use std::io::{self, Read, Seek};

/// Anything a validator can read from at absolute offsets.
///
/// `read` follows `std::io::Read::read`'s contract: it may return fewer
/// bytes than `buf.len()` to signal that the underlying source is
/// exhausted (a short read), never an error, for ordinary end-of-data.
pub trait ByteSource {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
	fn seek(&mut self, pos: u64) -> io::Result<u64>;
}

impl<T: Read + Seek> ByteSource for T {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		Read::read(self, buf)
	}

	fn seek(&mut self, pos: u64) -> io::Result<u64> {
		Seek::seek(self, io::SeekFrom::Start(pos))
	}
}

/// Reads up to `buf.len()` bytes, retrying short reads until the source is
/// genuinely exhausted or `buf` is full. Returns the number of bytes
/// actually placed into `buf`; a return value less than `buf.len()` means
/// EOF was reached.
pub fn read_to_fill(source: &mut dyn ByteSource, buf: &mut [u8]) -> io::Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		let n = source.read(&mut buf[filled..])?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(filled)
}
