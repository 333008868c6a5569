//! StringData: the sequence of optional Name/RelativePath/WorkingDir/
//! Arguments/IconLocation strings that follow LinkInfo, each a 2-byte
//! character count then that many characters (one byte wide if the
//! header's `IsUnicode` flag is clear, UTF-16 code units otherwise).

use crate::util::bytes::u16_le;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringData {
	pub name: Option<String>,
	pub relative_path: Option<String>,
	pub working_dir: Option<String>,
	pub arguments: Option<String>,
	pub icon_location: Option<String>,
}

/// Reads one string's worth of data starting at `data[*pos..]`, advancing
/// `*pos` past it. `None` on a count that runs past `data`.
fn read_one(data: &[u8], pos: &mut usize, is_unicode: bool) -> Option<String> {
	if *pos + 2 > data.len() {
		return None;
	}
	let count = u16_le(data, *pos) as usize;
	*pos += 2;

	if is_unicode {
		let byte_len = count * 2;
		if *pos + byte_len > data.len() {
			return None;
		}
		let units: Vec<u16> = data[*pos..*pos + byte_len]
			.chunks_exact(2)
			.map(|c| u16::from_le_bytes([c[0], c[1]]))
			.collect();
		*pos += byte_len;
		String::from_utf16(&units).ok()
	} else {
		if *pos + count > data.len() {
			return None;
		}
		let s = String::from_utf8_lossy(&data[*pos..*pos + count]).into_owned();
		*pos += count;
		Some(s)
	}
}

pub struct Parsed {
	pub strings: StringData,
	pub consumed: usize,
}

#[allow(clippy::too_many_arguments)]
pub fn parse(
	data: &[u8],
	offset: usize,
	is_unicode: bool,
	has_name: bool,
	has_relative_path: bool,
	has_working_dir: bool,
	has_arguments: bool,
	has_icon_location: bool,
) -> Option<Parsed> {
	let mut pos = offset;
	let mut strings = StringData::default();

	if has_name {
		strings.name = Some(read_one(data, &mut pos, is_unicode)?);
	}
	if has_relative_path {
		strings.relative_path = Some(read_one(data, &mut pos, is_unicode)?);
	}
	if has_working_dir {
		strings.working_dir = Some(read_one(data, &mut pos, is_unicode)?);
	}
	if has_arguments {
		strings.arguments = Some(read_one(data, &mut pos, is_unicode)?);
	}
	if has_icon_location {
		strings.icon_location = Some(read_one(data, &mut pos, is_unicode)?);
	}

	Some(Parsed { strings, consumed: pos - offset })
}

#[cfg(test)]
mod test {
	use super::*;

	fn ascii_field(s: &str) -> Vec<u8> {
		let mut out = (s.len() as u16).to_le_bytes().to_vec();
		out.extend(s.as_bytes());
		out
	}

	#[test]
	fn ascii_name_and_arguments() {
		let mut data = ascii_field("My Link");
		data.extend(ascii_field("-v"));

		let parsed = parse(&data, 0, false, true, false, false, true, false).unwrap();
		assert_eq!(parsed.strings.name.as_deref(), Some("My Link"));
		assert_eq!(parsed.strings.arguments.as_deref(), Some("-v"));
		assert_eq!(parsed.consumed, data.len());
	}

	#[test]
	fn truncated_count_is_rejected() {
		let data = vec![0x05, 0x00, b'a', b'b']; // declares 5 chars, only 2 present
		assert!(parse(&data, 0, false, true, false, false, false, false).is_none());
	}
}
