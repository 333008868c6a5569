//! GUID raw-bytes <-> canonical brace-form conversion.
//!
//! A GUID is 16 raw bytes. Its textual form groups them as
//! `{AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE}` where the first three groups are
//! little-endian (the raw bytes are reversed within each group) and the
//! last two groups are emitted in raw byte order.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid([u8; 16]);

impl Guid {
	pub fn from_bytes(bytes: [u8; 16]) -> Self {
		Guid(bytes)
	}

	pub fn raw(&self) -> &[u8; 16] {
		&self.0
	}

	pub fn to_brace_string(&self) -> String {
		let b = &self.0;
		format!(
			"{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
			u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
			u16::from_le_bytes([b[4], b[5]]),
			u16::from_le_bytes([b[6], b[7]]),
			b[8], b[9],
			b[10], b[11], b[12], b[13], b[14], b[15],
		)
	}

	/// Parses a canonical brace-form GUID string back into its raw bytes.
	/// Returns `None` on any deviation from the expected shape.
	pub fn from_brace_str(s: &str) -> Option<Self> {
		let inner = s.strip_prefix('{')?.strip_suffix('}')?;
		let groups: Vec<&str> = inner.split('-').collect();
		if groups.len() != 5 || groups[0].len() != 8 || groups[1].len() != 4 || groups[2].len() != 4 || groups[3].len() != 4 || groups[4].len() != 12 {
			return None;
		}

		let g0 = u32::from_str_radix(groups[0], 16).ok()?.to_le_bytes();
		let g1 = u16::from_str_radix(groups[1], 16).ok()?.to_le_bytes();
		let g2 = u16::from_str_radix(groups[2], 16).ok()?.to_le_bytes();

		let mut bytes = [0u8; 16];
		bytes[0..4].copy_from_slice(&g0);
		bytes[4..6].copy_from_slice(&g1);
		bytes[6..8].copy_from_slice(&g2);
		for (i, chunk) in groups[3].as_bytes().chunks(2).enumerate() {
			bytes[8 + i] = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
		}
		for (i, chunk) in groups[4].as_bytes().chunks(2).enumerate() {
			bytes[10 + i] = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
		}

		Some(Guid(bytes))
	}

	/// Brace-form equality is case-insensitive, per `spec.md` §3.
	pub fn eq_brace_form(&self, other: &Guid) -> bool {
		self.to_brace_string().eq_ignore_ascii_case(&other.to_brace_string())
	}
}

impl fmt::Display for Guid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_brace_string())
	}
}
