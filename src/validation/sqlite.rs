//! SQLite 3 database header and page-graph validator.
//!
//! Built fresh in the same per-call-parser shape as the MS-OLE validator,
//! since random-access page addressing makes it a closer cousin of the
//! sector-graph walk than of the sequential JPEG/PNG chunk walks. `PageKind`
//! follows the tagged-enum redesign applied to MS-OLE's `SatSlot`: a raw
//! `u8` page-type byte is classified once at the edge instead of compared
//! against magic numbers throughout the traversal.

use std::io;

use log::{debug, warn};

use crate::{
	source::{read_to_fill, ByteSource},
	util::bytes::{u16_be, u32_be},
	validation::{Details, DetailValue, Status, Validator},
};

const MAGIC: &[u8; 16] = b"SQLite format 3\0";
const HEADER_LEN: usize = 100;
const RESERVED_ZONE_OFFSET: usize = 68;
const RESERVED_ZONE_LEN: usize = 24;

/// A SQLite B-tree page's leading type byte, decoded once at the point of
/// use. Overflow and pointer-map pages carry no type byte of their own and
/// so aren't represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum PageKind {
	InteriorIndex,
	InteriorTable,
	LeafIndex,
	LeafTable,
}

impl PageKind {
	fn decode(raw: u8) -> Option<Self> {
		Some(match raw {
			2 => PageKind::InteriorIndex,
			5 => PageKind::InteriorTable,
			10 => PageKind::LeafIndex,
			13 => PageKind::LeafTable,
			_ => return None,
		})
	}

	fn is_interior(self) -> bool {
		matches!(self, PageKind::InteriorIndex | PageKind::InteriorTable)
	}
}

pub struct SqliteValidator {
	status: Status,
	details: Details,
}

impl SqliteValidator {
	pub fn new() -> Self {
		SqliteValidator { status: Status::default(), details: Details::new() }
	}
}

impl Default for SqliteValidator {
	fn default() -> Self {
		Self::new()
	}
}

impl Validator for SqliteValidator {
	fn validate(&mut self, source: &mut dyn ByteSource) -> bool {
		let mut parse = SqliteParse { source, bytes_read: 0 };
		let (status, details) = match parse.run() {
			Ok(r) => r,
			Err(_) => (Status { is_valid: false, eof: true, bytes_last_valid: 0, end: false }, Details::new()),
		};
		self.status = status;
		self.details = details;
		self.status.is_valid
	}

	fn status(&self) -> Status {
		self.status
	}

	fn details(&self) -> &Details {
		&self.details
	}
}

struct SqliteParse<'s> {
	source: &'s mut dyn ByteSource,
	bytes_read: u64,
}

macro_rules! invalid {
	($last:expr) => {
		return Ok((Status { is_valid: false, eof: false, bytes_last_valid: $last, end: false }, Details::new()))
	};
}

impl<'s> SqliteParse<'s> {
	fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
		self.source.seek(offset)?;
		let mut buf = vec![0u8; len];
		let n = read_to_fill(self.source, &mut buf)?;
		buf.truncate(n);
		if offset + n as u64 > self.bytes_read {
			self.bytes_read = offset + n as u64;
		}
		Ok(buf)
	}

	fn run(&mut self) -> io::Result<(Status, Details)> {
		let header = self.read_at(0, HEADER_LEN)?;
		if header.len() < HEADER_LEN {
			return Ok((Status { is_valid: false, eof: true, bytes_last_valid: 0, end: false }, Details::new()));
		}
		if &header[0..16] != MAGIC {
			debug!("SQLite header magic mismatch: {:02X?}", &header[0..16]);
			invalid!(0);
		}

		let page_size_raw = u16_be(&header, 16);
		let page_size: u32 = match page_size_raw {
			1 => 65536,
			n => n as u32,
		};
		if !(512..=65536).contains(&page_size) || !page_size.is_power_of_two() {
			invalid!(0);
		}

		let write_version = header[18];
		let read_version = header[19];
		if !(1..=2).contains(&write_version) || !(1..=2).contains(&read_version) {
			invalid!(0);
		}

		let reserved_bytes_per_page = header[20] as u32;
		let max_payload_fraction = header[21];
		let min_payload_fraction = header[22];
		let leaf_payload_fraction = header[23];
		if (max_payload_fraction, min_payload_fraction, leaf_payload_fraction) != (64, 32, 32) {
			invalid!(0);
		}

		let file_change_counter = u32_be(&header, 24);
		let header_page_count = u32_be(&header, 28);
		let first_freelist_trunk = u32_be(&header, 32);
		let total_freelist_pages = u32_be(&header, 36);
		let schema_format = u32_be(&header, 44);
		if !(1..=4).contains(&schema_format) {
			invalid!(0);
		}
		let largest_root_vacuum = u32_be(&header, 52);
		let text_encoding = u32_be(&header, 56);
		if !(1..=3).contains(&text_encoding) {
			invalid!(0);
		}
		let version_valid_for = u32_be(&header, 92);

		if header[RESERVED_ZONE_OFFSET..RESERVED_ZONE_OFFSET + RESERVED_ZONE_LEN].iter().any(|&b| b != 0) {
			invalid!(0);
		}

		let usable_page_size = page_size - reserved_bytes_per_page;
		let pointer_map_fanout = usable_page_size / 5;

		let header_trustworthy = file_change_counter == version_valid_for && header_page_count > 0;
		let has_pointer_map = largest_root_vacuum > 0;

		let mut ptrmap_pages: Vec<u32> = Vec::new();
		let mut recovered_page_count = None;

		if has_pointer_map {
			let mut next_ptrmap = 2u32;
			let mut referenced = 0u32;
			loop {
				let page_offset = (next_ptrmap as u64 - 1) * page_size as u64;
				let page = self.read_at(page_offset, page_size as usize)?;
				if page.len() < page_size as usize {
					return Ok((
						Status { is_valid: true, eof: true, bytes_last_valid: self.bytes_read, end: false },
						Details::new(),
					));
				}
				ptrmap_pages.push(next_ptrmap);

				let mut stopped = false;
				let mut i = 0usize;
				while i + 5 <= page.len() {
					let kind = page[i];
					if kind == 0 {
						stopped = true;
						break;
					}
					if !(1..=5).contains(&kind) {
						invalid!(self.bytes_read);
					}
					referenced += 1;
					i += 5;
				}

				if stopped {
					break;
				}
				next_ptrmap += 1 + pointer_map_fanout;
				if ptrmap_pages.len() > 1_000_000 {
					invalid!(self.bytes_read);
				}
			}

			if !header_trustworthy {
				let recovered = 1 + ptrmap_pages.len() as u32 + referenced;
				warn!("header page count is untrustworthy, recovered {} pages from the pointer-map chain", recovered);
				recovered_page_count = Some(recovered);
			}
		}

		let page_count = if header_trustworthy {
			header_page_count
		} else if let Some(recovered) = recovered_page_count {
			recovered
		} else {
			warn!("header page count is untrustworthy and no pointer-map chain was available to recover it from");
			return Ok((
				Status { is_valid: false, eof: false, bytes_last_valid: HEADER_LEN as u64, end: false },
				sqlite_details(
					page_size, usable_page_size, 0, total_freelist_pages, schema_format, text_encoding,
					header_trustworthy, Vec::new(),
				),
			));
		};

		let mut freelist: Vec<u32> = Vec::new();
		if first_freelist_trunk > 0 {
			let mut trunk = first_freelist_trunk;
			let mut seen = std::collections::HashSet::new();
			while trunk != 0 {
				if !seen.insert(trunk) {
					invalid!(self.bytes_read);
				}
				freelist.push(trunk);
				let offset = (trunk as u64 - 1) * page_size as u64;
				let page = self.read_at(offset, page_size as usize)?;
				if page.len() < page_size as usize {
					return Ok((
						Status { is_valid: true, eof: true, bytes_last_valid: self.bytes_read, end: false },
						Details::new(),
					));
				}
				let next_trunk = u32_be(&page, 0);
				let leaf_count = u32_be(&page, 4) as usize;
				for i in 0..leaf_count {
					let off = 8 + i * 4;
					if off + 4 > page.len() {
						break;
					}
					freelist.push(u32_be(&page, off));
				}
				trunk = next_trunk;
			}
		}
		let freelist_set: std::collections::HashSet<u32> = freelist.iter().copied().collect();

		let mut last_valid = HEADER_LEN as u64;
		let mut pages_detail = Vec::new();

		for page_no in 2..=page_count {
			if ptrmap_pages.contains(&page_no) {
				last_valid = (page_no as u64) * page_size as u64;
				continue;
			}
			if freelist_set.contains(&page_no) {
				last_valid = (page_no as u64) * page_size as u64;
				continue;
			}

			let offset = (page_no as u64 - 1) * page_size as u64;
			let page = self.read_at(offset, page_size as usize)?;
			if page.len() < page_size as usize {
				return Ok((
					Status { is_valid: true, eof: true, bytes_last_valid: last_valid, end: false },
					sqlite_details(
						page_size, usable_page_size, page_count, total_freelist_pages, schema_format,
						text_encoding, header_trustworthy, pages_detail,
					),
				));
			}

			if let Some(kind) = PageKind::decode(page[0]) {
				if kind.is_interior() {
					let right_pointer = u32_be(&page, 8);
					if right_pointer > page_count {
						invalid!(last_valid);
					}
				}
				pages_detail.push((page_no, kind.to_string()));
			} else {
				let next = u32_be(&page, 0);
				if next > page_count {
					invalid!(last_valid);
				}
				pages_detail.push((page_no, "overflow".to_string()));
			}

			last_valid = offset + page_size as u64;
		}

		let details = sqlite_details(
			page_size, usable_page_size, page_count, total_freelist_pages, schema_format, text_encoding,
			header_trustworthy, pages_detail,
		);
		Ok((Status { is_valid: true, eof: false, bytes_last_valid: last_valid, end: true }, details))
	}
}

fn sqlite_details(
	page_size: u32,
	usable_page_size: u32,
	page_count: u32,
	freelist_page_count: u32,
	schema_format: u32,
	text_encoding: u32,
	page_count_trusted: bool,
	pages: Vec<(u32, String)>,
) -> Details {
	let mut details = Details::new();
	details.insert("page_size".to_string(), DetailValue::from(page_size as u64));
	details.insert("usable_page_size".to_string(), DetailValue::from(usable_page_size as u64));
	details.insert("page_count".to_string(), DetailValue::from(page_count as u64));
	details.insert("page_count_trusted".to_string(), DetailValue::from(page_count_trusted));
	details.insert("freelist_page_count".to_string(), DetailValue::from(freelist_page_count as u64));
	details.insert("schema_format".to_string(), DetailValue::from(schema_format as u64));
	details.insert("text_encoding".to_string(), DetailValue::from(text_encoding as u64));
	details.insert(
		"pages".to_string(),
		DetailValue::from(
			pages
				.into_iter()
				.map(|(no, kind)| {
					let mut m = Details::new();
					m.insert("page".to_string(), DetailValue::from(no as u64));
					m.insert("kind".to_string(), DetailValue::from(kind));
					DetailValue::Map(m)
				})
				.collect::<Vec<_>>(),
		),
	);
	details.insert("extensions".to_string(), DetailValue::from(vec![DetailValue::from(".sqlite")]));
	details
}
