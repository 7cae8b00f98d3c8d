//! Just enough of the PE format (ECMA-335 II.25) to find the CLI metadata:
//! the DOS stub is only consulted for the PE signature offset, the optional
//! header only for its data directories, and sections only to map RVAs back
//! to file offsets.

use std::fmt::{Debug, Formatter};

use bitflags::bitflags;

use crate::utilities::ByteReader;
use crate::{Error, Result};

/// The parsed headers of a PE image, retaining no references into the image.
///
/// Section data is never copied; [`PEFile::resolve_rva`] maps a virtual
/// address back to a file offset so callers can slice the original bytes.
#[derive(Debug, Clone)]
pub struct PEFile {
	pub coff: CoffHeader,
	pub optional: OptionalHeader,
	pub sections: Vec<SectionHeader>,
}

impl PEFile {
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn read(data: &[u8]) -> Result<Self> {
		if !data.starts_with(b"MZ") {
			return Err(Error::Malformed("missing DOS signature"));
		}

		// Offset 0x3C of the DOS stub holds the file offset of the PE
		// signature.
		let pe_start = ByteReader::at(data, 0x3C)?.read_u32()? as usize;
		let mut reader = ByteReader::at(data, pe_start)?;
		if reader.read_u32()? != 0x0000_4550 {
			return Err(Error::Malformed("PE signature does not match"));
		}

		let coff = CoffHeader::read(&mut reader)?;
		if !(1..=100).contains(&coff.number_of_sections) {
			return Err(Error::Malformed("unreasonable PE section count"));
		}

		let sections_start = reader.offset() + coff.size_of_optional_header as usize;
		let optional = OptionalHeader::read(&mut reader)?;
		if reader.offset() > sections_start {
			return Err(Error::Malformed("optional header is truncated"));
		}

		let mut reader = ByteReader::at(data, sections_start)?;
		let mut sections = Vec::with_capacity(coff.number_of_sections as usize);
		for _ in 0..coff.number_of_sections {
			let section = SectionHeader::read(&mut reader)?;
			let raw_end = section.pointer_to_raw_data as usize + section.size_of_raw_data as usize;
			if raw_end > data.len() {
				return Err(Error::Malformed("section data out of range"));
			}
			sections.push(section);
		}

		Ok(Self { coff, optional, sections })
	}

	/// Maps `rva..rva + size` to the file offset of its first byte.
	pub fn resolve_rva(&self, rva: u32, size: u32) -> Result<usize> {
		let section = self.sections
			.iter()
			.find(|s| rva >= s.virtual_address && rva - s.virtual_address < s.size_of_raw_data)
			.ok_or(Error::Malformed("RVA does not land in any section"))?;

		let offset = rva - section.virtual_address;
		if offset + size > section.size_of_raw_data {
			return Err(Error::Malformed("RVA range extends past its section"));
		}
		Ok((section.pointer_to_raw_data + offset) as usize)
	}

	/// The `CLI_HEADER` data directory (index 14).
	pub fn cli_header_directory(&self) -> Result<DataDirectory> {
		let directory = self.optional.directories.get(14).copied()
			.ok_or(Error::Malformed("missing CLI header data directory"))?;
		match directory.virtual_address {
			0 => Err(Error::Malformed("image contains no CLI metadata")),
			_ => Ok(directory),
		}
	}
}

/// The COFF file header that follows the PE signature.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CoffHeader {
	pub machine: u16,
	pub number_of_sections: u16,
	pub time_date_stamp: u32,
	pub pointer_to_symbol_table: u32,
	pub number_of_symbols: u32,
	pub size_of_optional_header: u16,
	pub characteristics: u16,
}

impl CoffHeader {
	fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
		Ok(Self {
			machine: reader.read_u16()?,
			number_of_sections: reader.read_u16()?,
			time_date_stamp: reader.read_u32()?,
			pointer_to_symbol_table: reader.read_u32()?,
			number_of_symbols: reader.read_u32()?,
			size_of_optional_header: reader.read_u16()?,
			characteristics: reader.read_u16()?,
		})
	}
}

/// The optional header, reduced to what the metadata loader consumes: the
/// magic (which fixes the PE32 vs PE32+ field layout) and the data
/// directories.
#[derive(Debug, Clone)]
pub struct OptionalHeader {
	pub magic: u16,
	pub directories: Vec<DataDirectory>,
}

impl OptionalHeader {
	fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
		let magic = reader.read_u16()?;

		// The standard and NT-specific fields between the magic and the
		// directory count are fixed-size: 90 bytes for PE32, 106 for PE32+.
		match magic {
			0x010B => reader.skip(90)?,
			0x020B => reader.skip(106)?,
			_ => return Err(Error::Malformed("optional header magic does not match")),
		}

		let count = reader.read_u32()?;
		if count > 16 {
			return Err(Error::Malformed("unreasonable data directory count"));
		}

		let mut directories = Vec::with_capacity(count as usize);
		for _ in 0..count {
			directories.push(DataDirectory {
				virtual_address: reader.read_u32()?,
				size: reader.read_u32()?,
			});
		}

		Ok(Self { magic, directories })
	}

	pub fn is_pe32_plus(&self) -> bool {
		self.magic == 0x020B
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DataDirectory {
	pub virtual_address: u32,
	pub size: u32,
}

/// An 8-byte, NUL-padded section name.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SectionName([u8; 8]);

impl SectionName {
	/// The name without its NUL padding, or `None` when it is not UTF-8.
	pub fn as_str(&self) -> Option<&str> {
		std::str::from_utf8(&self.0).ok().map(|name| name.trim_end_matches('\0'))
	}
}

impl Debug for SectionName {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self.as_str() {
			Some(name) => Debug::fmt(name, f),
			None => write!(f, "{:02X?}", self.0),
		}
	}
}

/// A section header, without the relocation and line-number bookkeeping the
/// loader has no use for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SectionHeader {
	pub name: SectionName,
	pub virtual_size: u32,
	pub virtual_address: u32,
	pub size_of_raw_data: u32,
	pub pointer_to_raw_data: u32,
	pub characteristics: u32,
}

impl SectionHeader {
	fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
		let name = SectionName(reader.read_bytes(8)?.try_into().unwrap());
		let virtual_size = reader.read_u32()?;
		let virtual_address = reader.read_u32()?;
		let size_of_raw_data = reader.read_u32()?;
		let pointer_to_raw_data = reader.read_u32()?;
		reader.skip(12)?; // relocation and line-number fields
		let characteristics = reader.read_u32()?;

		Ok(Self {
			name,
			virtual_size,
			virtual_address,
			size_of_raw_data,
			pointer_to_raw_data,
			characteristics,
		})
	}
}

/// The CLI header pointed to by data directory 14 (ECMA-335 II.25.3.3).
/// Its strong-name and vtable-fixup trailer is validated for presence but
/// not decoded.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CLIHeader {
	pub size_in_bytes: u32,
	pub major_runtime_version: u16,
	pub minor_runtime_version: u16,
	pub metadata: DataDirectory,
	pub flags: RuntimeFlags,
	pub entry_point_token: u32,
	pub resources: DataDirectory,
}

impl CLIHeader {
	/// The full header occupies 72 bytes.
	pub const SIZE: usize = 72;

	pub fn read_at(data: &[u8], offset: usize) -> Result<Self> {
		let mut reader = ByteReader::at(data, offset)?;

		let size_in_bytes = reader.read_u32()?;
		if (size_in_bytes as usize) < Self::SIZE {
			return Err(Error::Malformed("CLI header is truncated"));
		}

		let header = Self {
			size_in_bytes,
			major_runtime_version: reader.read_u16()?,
			minor_runtime_version: reader.read_u16()?,
			metadata: DataDirectory {
				virtual_address: reader.read_u32()?,
				size: reader.read_u32()?,
			},
			flags: RuntimeFlags::from_bits_retain(reader.read_u32()?),
			entry_point_token: reader.read_u32()?,
			resources: DataDirectory {
				virtual_address: reader.read_u32()?,
				size: reader.read_u32()?,
			},
		};

		reader.skip(Self::SIZE - (reader.offset() - offset))?;
		Ok(header)
	}
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq)]
	pub struct RuntimeFlags: u32 {
		const IL_ONLY = 0x1;
		const REQUIRE_32_BIT = 0x2;
		const IL_LIBRARY = 0x4;
		const STRONG_NAME_SIGNED = 0x8;
		const PREFER_32_BIT = 0x00020000;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_image::build_minimal_pe;

	#[test]
	fn minimal_image_walks_to_the_cli_header() {
		let image = build_minimal_pe(&[0u8; 16]);
		let pe = PEFile::read(&image).unwrap();

		assert_eq!(pe.sections.len(), 1);
		assert_eq!(pe.sections[0].name.as_str(), Some(".text"));
		assert!(!pe.optional.is_pe32_plus());

		let directory = pe.cli_header_directory().unwrap();
		let offset = pe.resolve_rva(directory.virtual_address, directory.size).unwrap();
		let cli = CLIHeader::read_at(&image, offset).unwrap();
		assert_eq!(cli.size_in_bytes as usize, CLIHeader::SIZE);
		assert!(cli.flags.contains(RuntimeFlags::IL_ONLY));
		assert_eq!(cli.entry_point_token, 0);
	}

	#[test]
	fn truncated_images_are_rejected() {
		assert!(matches!(PEFile::read(&[0u8; 10]), Err(Error::Malformed(_))));

		let image = build_minimal_pe(&[0u8; 16]);
		assert!(PEFile::read(&image[..image.len() / 2]).is_err());
	}

	#[test]
	fn rvas_outside_every_section_are_rejected() {
		let image = build_minimal_pe(&[0u8; 16]);
		let pe = PEFile::read(&image).unwrap();
		assert!(pe.resolve_rva(0x0000_0001, 4).is_err());
		assert!(pe.resolve_rva(0x00F0_0000, 4).is_err());
	}

	#[test]
	fn section_names_render_without_their_padding() {
		let name = SectionName(*b".rsrc\0\0\0");
		assert_eq!(name.as_str(), Some(".rsrc"));
		assert_eq!(format!("{name:?}"), "\".rsrc\"");

		let raw = SectionName([0xFF; 8]);
		assert_eq!(raw.as_str(), None);
	}
}
