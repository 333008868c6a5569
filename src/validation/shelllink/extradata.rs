//! ExtraData: a sequence of length-prefixed, signature-tagged blocks
//! following StringData, terminated by a zero-size block.

use crate::util::{bytes::u32_le, guid::Guid};
use crate::validation::shelllink::propertystore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ExtraBlockKind {
	Console,
	#[strum(serialize = "ConsoleFE")]
	ConsoleFe,
	Darwin,
	Environment,
	Icon,
	KnownFolder,
	Property,
	Shim,
	SpecialFolder,
	Tracker,
	Vista,
}

impl ExtraBlockKind {
	fn decode(signature: u32) -> Option<Self> {
		Some(match signature {
			0xA000_0002 => ExtraBlockKind::Console,
			0xA000_0004 => ExtraBlockKind::ConsoleFe,
			0xA000_0006 => ExtraBlockKind::Darwin,
			0xA000_0001 => ExtraBlockKind::Environment,
			0xA000_0007 => ExtraBlockKind::Icon,
			0xA000_000B => ExtraBlockKind::KnownFolder,
			0xA000_0009 => ExtraBlockKind::Property,
			0xA000_0008 => ExtraBlockKind::Shim,
			0xA000_0005 => ExtraBlockKind::SpecialFolder,
			0xA000_0003 => ExtraBlockKind::Tracker,
			0xA000_000C => ExtraBlockKind::Vista,
			_ => return None,
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerData {
	pub machine_id: String,
	pub droid: [Guid; 2],
	pub droid_birth: [Guid; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnownFolderData {
	pub folder_id: Guid,
	pub offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockContent {
	Console,
	ConsoleFe,
	Darwin,
	Environment,
	Icon,
	KnownFolder(KnownFolderData),
	Property(Vec<propertystore::StorageUnit>),
	Shim,
	SpecialFolder,
	Tracker(TrackerData),
	Vista,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtraBlock {
	pub kind: ExtraBlockKind,
	pub content: BlockContent,
}

const CONSOLE_BLOCK_SIZE: usize = 0xCC;

fn parse_block(kind: ExtraBlockKind, content: &[u8], total_size: usize) -> Option<BlockContent> {
	Some(match kind {
		ExtraBlockKind::Console => {
			if total_size != CONSOLE_BLOCK_SIZE {
				return None;
			}
			BlockContent::Console
		}
		ExtraBlockKind::ConsoleFe => BlockContent::ConsoleFe,
		ExtraBlockKind::Darwin => BlockContent::Darwin,
		ExtraBlockKind::Environment => BlockContent::Environment,
		ExtraBlockKind::Icon => BlockContent::Icon,
		ExtraBlockKind::Shim => BlockContent::Shim,
		ExtraBlockKind::SpecialFolder => BlockContent::SpecialFolder,
		ExtraBlockKind::Vista => BlockContent::Vista,
		ExtraBlockKind::KnownFolder => {
			if content.len() < 20 {
				return None;
			}
			let folder_id = Guid::from_bytes(content[0..16].try_into().ok()?);
			let offset = u32_le(content, 16);
			BlockContent::KnownFolder(KnownFolderData { folder_id, offset })
		}
		ExtraBlockKind::Tracker => {
			// Length(4) + Version(4) + MachineID(16) + Droid(2x16) + DroidBirth(2x16).
			if content.len() < 8 + 16 + 32 + 32 {
				return None;
			}
			let machine_id_raw = &content[8..24];
			let machine_id_end = machine_id_raw.iter().position(|&b| b == 0).unwrap_or(machine_id_raw.len());
			let machine_id = String::from_utf8_lossy(&machine_id_raw[..machine_id_end]).into_owned();
			let droid = [
				Guid::from_bytes(content[24..40].try_into().ok()?),
				Guid::from_bytes(content[40..56].try_into().ok()?),
			];
			let droid_birth = [
				Guid::from_bytes(content[56..72].try_into().ok()?),
				Guid::from_bytes(content[72..88].try_into().ok()?),
			];
			BlockContent::Tracker(TrackerData { machine_id, droid, droid_birth })
		}
		ExtraBlockKind::Property => {
			let parsed = propertystore::parse(content, 0)?;
			BlockContent::Property(parsed.storage_units)
		}
	})
}

pub struct Parsed {
	pub blocks: Vec<ExtraBlock>,
	pub consumed: usize,
}

/// Walks blocks starting at `data[offset..]` until a zero-size terminator.
/// An unrecognized signature invalidates, per `spec.md` §4.6.
pub fn parse(data: &[u8], offset: usize) -> Option<Parsed> {
	let mut blocks = Vec::new();
	let mut pos = offset;

	loop {
		if pos + 4 > data.len() {
			return None;
		}
		let size = u32_le(data, pos) as usize;
		if size == 0 {
			pos += 4;
			break;
		}
		if size < 8 || pos + size > data.len() {
			return None;
		}

		let signature = u32_le(data, pos + 4);
		let kind = ExtraBlockKind::decode(signature)?;
		let content = &data[pos + 8..pos + size];
		let block_content = parse_block(kind, content, size)?;

		blocks.push(ExtraBlock { kind, content: block_content });
		pos += size;
	}

	Some(Parsed { blocks, consumed: pos - offset })
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn console_block_must_be_exact_size() {
		let mut data = (CONSOLE_BLOCK_SIZE as u32).to_le_bytes().to_vec();
		data.extend(0xA000_0002u32.to_le_bytes());
		data.extend(vec![0u8; CONSOLE_BLOCK_SIZE - 8]);
		data.extend(0u32.to_le_bytes()); // terminator

		let parsed = parse(&data, 0).unwrap();
		assert_eq!(parsed.blocks.len(), 1);
		assert_eq!(parsed.blocks[0].kind, ExtraBlockKind::Console);
	}

	#[test]
	fn unknown_signature_invalidates() {
		let mut data = 12u32.to_le_bytes().to_vec();
		data.extend(0xDEAD_BEEFu32.to_le_bytes());
		data.extend([0u8; 4]);
		assert!(parse(&data, 0).is_none());
	}

	#[test]
	fn zero_size_terminates_immediately() {
		let data = 0u32.to_le_bytes().to_vec();
		let parsed = parse(&data, 0).unwrap();
		assert!(parsed.blocks.is_empty());
		assert_eq!(parsed.consumed, 4);
	}
}
