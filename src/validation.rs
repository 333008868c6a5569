pub mod jpeg;
pub mod ntfs;
pub mod ole;
pub mod png;
pub mod shelllink;
pub mod sqlite;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::source::ByteSource;

/// The three orthogonal outcomes of a validation run, disentangled from the
/// "return True on valid prefix" + EOF-booleans shape `spec.md` §9 calls out
/// as needing re-architecture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
	/// The examined prefix conforms to the format's structural rules.
	pub is_valid: bool,
	/// The byte source was exhausted before validation finished.
	pub eof: bool,
	/// Offset of the end of the largest structurally valid prefix.
	pub bytes_last_valid: u64,
	/// The format's proper terminal structure was observed.
	pub end: bool,
}

impl Status {
	/// Asserts the invariants every validator must uphold before handing a
	/// `Status` back to a caller: `end` implies `is_valid`, and
	/// `bytes_last_valid` never runs ahead of what was actually read.
	#[cfg(debug_assertions)]
	fn debug_check(self, bytes_read: u64) {
		debug_assert!(!self.end || self.is_valid, "end=true must imply is_valid=true");
		debug_assert!(self.bytes_last_valid <= bytes_read, "bytes_last_valid must not exceed bytes read");
	}

	#[cfg(not(debug_assertions))]
	fn debug_check(self, _bytes_read: u64) {}
}

/// A typed value in a validator's `details()` map. Open-ended on purpose:
/// external collaborators (a pretty-printer, a CSV/HTML report writer) walk
/// this structure without knowing the format ahead of time, per `spec.md`
/// §3/§6.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DetailValue {
	Bool(bool),
	UInt(u64),
	Int(i64),
	Str(String),
	Bytes(Vec<u8>),
	List(Vec<DetailValue>),
	Map(Details),
}

impl From<bool> for DetailValue {
	fn from(v: bool) -> Self { DetailValue::Bool(v) }
}
impl From<u64> for DetailValue {
	fn from(v: u64) -> Self { DetailValue::UInt(v) }
}
impl From<u32> for DetailValue {
	fn from(v: u32) -> Self { DetailValue::UInt(v as u64) }
}
impl From<usize> for DetailValue {
	fn from(v: usize) -> Self { DetailValue::UInt(v as u64) }
}
impl From<i64> for DetailValue {
	fn from(v: i64) -> Self { DetailValue::Int(v) }
}
impl From<i32> for DetailValue {
	fn from(v: i32) -> Self { DetailValue::Int(v as i64) }
}
impl From<String> for DetailValue {
	fn from(v: String) -> Self { DetailValue::Str(v) }
}
impl From<&str> for DetailValue {
	fn from(v: &str) -> Self { DetailValue::Str(v.to_string()) }
}
impl From<Vec<u8>> for DetailValue {
	fn from(v: Vec<u8>) -> Self { DetailValue::Bytes(v) }
}
impl<T: Into<DetailValue>> From<Vec<T>> for DetailValue {
	fn from(v: Vec<T>) -> Self { DetailValue::List(v.into_iter().map(Into::into).collect()) }
}
impl From<Details> for DetailValue {
	fn from(v: Details) -> Self { DetailValue::Map(v) }
}

/// The format-specific, read-only mapping populated by `validate`. An empty
/// map is a legal "no details" result.
pub type Details = BTreeMap<String, DetailValue>;

/// A shared marker/chunk record, used by the JPEG and PNG validators.
/// Appended strictly in file order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
	pub identifier: String,
	pub offset: u64,
	pub length: u64,
	/// `(stored, computed)` CRC pair, for formats that checksum segments.
	pub crc: Option<(u32, u32)>,
}

impl From<Segment> for DetailValue {
	fn from(s: Segment) -> Self {
		let mut map = Details::new();
		map.insert("identifier".to_string(), s.identifier.into());
		map.insert("offset".to_string(), s.offset.into());
		map.insert("length".to_string(), s.length.into());
		if let Some((stored, computed)) = s.crc {
			map.insert("crc_stored".to_string(), (stored as u64).into());
			map.insert("crc_computed".to_string(), (computed as u64).into());
		}
		DetailValue::Map(map)
	}
}

/// The contract every format validator implements. No validator keeps
/// state between calls beyond the last `Status`/`Details` - `validate`
/// resets all accounting up front by building a fresh per-call parser that
/// owns the in-progress scratch state, matching the redesign `spec.md` §9
/// calls for ("mutable accumulation on an instance").
pub trait Validator {
	/// Consumes `source` from the start, updating `status()`/`details()`
	/// to reflect this input. Returns `status().is_valid`.
	fn validate(&mut self, source: &mut dyn ByteSource) -> bool;

	fn status(&self) -> Status;

	fn details(&self) -> &Details;

	/// Convenience entry point for the common case of validating an
	/// in-memory byte sequence, wrapping it in a `Cursor` to satisfy the
	/// `ByteSource` contract.
	fn validate_bytes(&mut self, bytes: &[u8]) -> bool {
		let mut cursor = std::io::Cursor::new(bytes);
		self.validate(&mut cursor)
	}
}
