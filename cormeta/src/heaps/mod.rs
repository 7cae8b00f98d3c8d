use crate::utilities::ByteReader;
use crate::{Error, Result};

pub use crate::heaps::blob::{Blob, BlobHeap};
pub use crate::heaps::guid::GuidHeap;
pub use crate::heaps::string::StringHeap;

pub mod blob;
pub mod guid;
pub mod string;

/// A range projection of the database image shared between the heaps.
pub(crate) type Bytes = owning_ref::ArcRef<[u8]>;

/// Byte offset into the `#Strings` heap.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StringIndex(pub usize);

/// One-based record index into the `#GUID` heap; zero means "no GUID".
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GuidIndex(pub usize);

/// Byte offset into the `#Blob` heap, pointing at a length prefix.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlobIndex(pub usize);

/// The five stream kinds a metadata root may carry (ECMA-335 II.24.2.2).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) enum StreamKind {
	String,
	UserString,
	Blob,
	Guid,
	Table,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct StreamHeader {
	pub offset: u32,
	pub size: u32,
	pub kind: StreamKind,
}

impl StreamHeader {
	pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
		let offset = reader.read_u32()?;
		let size = reader.read_u32()?;

		// The name is NUL-terminated ASCII padded to a four-byte boundary;
		// consuming it in four-byte chunks lands the reader on the boundary.
		// "#Strings" is the longest defined name, so 32 bytes is generous.
		let mut name = [0u8; 32];
		let mut length = 0;
		loop {
			if length == name.len() {
				return Err(Error::Malformed("unterminated stream name"));
			}
			let chunk = reader.read_bytes(4)?;
			name[length..length + 4].copy_from_slice(chunk);
			length += 4;
			if chunk.contains(&0) {
				break;
			}
		}

		let end = name.iter().position(|b| *b == 0).unwrap();
		let name = std::str::from_utf8(&name[..end])
			.map_err(|_| Error::Malformed("stream name is not valid ASCII"))?;
		let kind = match name {
			"#Strings" => StreamKind::String,
			"#US" => StreamKind::UserString,
			"#Blob" => StreamKind::Blob,
			"#GUID" => StreamKind::Guid,
			"#~" => StreamKind::Table,
			_ => return Err(Error::Malformed("unknown stream name")),
		};

		Ok(Self { offset, size, kind })
	}
}
