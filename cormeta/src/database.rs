use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

use crate::heaps::{BlobHeap, Bytes, GuidHeap, StreamHeader, StreamKind, StringHeap};
use crate::pe::{CLIHeader, PEFile};
use crate::rows::TableRow;
use crate::tables::{TableId, TableStream};
use crate::utilities::{round_up, ByteReader};
use crate::{Error, Result};

/// A loaded metadata image.
///
/// The database owns its backing byte array; tokens, rows, blobs and
/// non-instantiated signatures are views that borrow from it. The table
/// schema (index widths, column offsets, row sizes) is computed eagerly
/// during construction; all other decoding happens on access.
pub struct Database {
	version: Arc<str>,
	strings: StringHeap,
	guids: GuidHeap,
	blobs: BlobHeap,
	tables: TableStream,
}

impl Database {
	/// Reads a PE image from a file and loads its metadata.
	pub fn create_from_file(path: impl AsRef<Path>) -> Result<Database> {
		let bytes = std::fs::read(path)?;
		Self::from_image(bytes)
	}

	/// Loads the metadata of an already-mapped PE image.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn from_image(bytes: impl Into<Arc<[u8]>>) -> Result<Database> {
		let bytes: Arc<[u8]> = bytes.into();

		let pe = PEFile::read(&bytes)?;
		let directory = pe.cli_header_directory()?;
		let cli_offset = pe.resolve_rva(directory.virtual_address, directory.size)?;
		let cli_header = CLIHeader::read_at(&bytes, cli_offset)?;

		let metadata = cli_header.metadata;
		let root = pe.resolve_rva(metadata.virtual_address, metadata.size)?;
		Self::read_metadata(bytes, root)
	}

	/// Loads a bare metadata root (the `BSJB` image), as found in some
	/// Windows Runtime metadata containers.
	pub fn from_metadata(bytes: impl Into<Arc<[u8]>>) -> Result<Database> {
		Self::read_metadata(bytes.into(), 0)
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	fn read_metadata(bytes: Arc<[u8]>, root: usize) -> Result<Database> {
		let data = bytes.get(root..)
			.ok_or(Error::Malformed("metadata root offset out of range"))?;

		let mut reader = ByteReader::new(data);
		if reader.read_u32()? != 0x424A5342 {
			return Err(Error::Malformed("metadata magic signature does not match"));
		}
		reader.skip(8)?; // major/minor version, four reserved bytes

		let length = round_up(reader.read_u32()? as usize, 4);
		let version = std::str::from_utf8(reader.read_bytes(length)?)
			.map_err(|_| Error::Malformed("metadata version string is not valid UTF-8"))?
			.trim_end_matches('\0');
		let version = Arc::<str>::from(version);

		reader.skip(2)?; // flags
		let stream_count = reader.read_u16()?;

		let mut streams: [Option<StreamHeader>; 5] = [None; 5];
		for _ in 0..stream_count {
			let header = StreamHeader::read(&mut reader)?;
			let slot = &mut streams[header.kind as usize];
			if slot.is_some() {
				return Err(Error::Malformed("duplicate metadata stream"));
			}
			*slot = Some(header);
		}

		let project = |kind: StreamKind| -> Result<Bytes> {
			match streams[kind as usize] {
				None => Ok(Bytes::new(Arc::from(&[][..]))),
				Some(header) => {
					let first = root + header.offset as usize;
					let last = first + header.size as usize;
					if last > bytes.len() {
						return Err(Error::Malformed("metadata stream out of range"));
					}
					Ok(Bytes::new(bytes.clone()).map(|b| &b[first..last]))
				},
			}
		};

		if streams[StreamKind::Table as usize].is_none() {
			return Err(Error::Malformed("image has no tables stream"));
		}

		// The #US stream is parsed and discarded; user strings are not metadata.
		let _ = project(StreamKind::UserString)?;

		// A missing #Strings stream degenerates to the canonical one-byte heap.
		let strings = match streams[StreamKind::String as usize] {
			None => Bytes::new(Arc::from(&[0u8][..])),
			Some(_) => project(StreamKind::String)?,
		};

		Ok(Database {
			version,
			strings: StringHeap::try_from(strings)?,
			guids: GuidHeap::try_from(project(StreamKind::Guid)?)?,
			blobs: BlobHeap::from(project(StreamKind::Blob)?),
			tables: TableStream::try_from(project(StreamKind::Table)?)?,
		})
	}

	/// The version string of the metadata root, e.g. `v4.0.30319`.
	pub fn version(&self) -> &str {
		&self.version
	}

	pub fn strings(&self) -> &StringHeap {
		&self.strings
	}

	pub fn guids(&self) -> &GuidHeap {
		&self.guids
	}

	pub fn blobs(&self) -> &BlobHeap {
		&self.blobs
	}

	pub fn tables(&self) -> &TableStream {
		&self.tables
	}

	/// The row accessor for row `index` (zero-based) of `R`'s table.
	pub fn row<'l, R: TableRow<'l>>(&'l self, index: u32) -> Result<R> {
		match index < self.tables.table(R::ID).row_count() {
			true => Ok(R::at(self, index)),
			false => Err(Error::OutOfRange("row index past the end of its table")),
		}
	}

	/// Iterates every row of `R`'s table in token order.
	pub fn rows<'l, R: TableRow<'l>>(&'l self) -> impl ExactSizeIterator<Item = R> + 'l {
		(0..self.tables.table(R::ID).row_count()).map(move |i| R::at(self, i))
	}

	/// The number of rows in `table`.
	pub fn row_count(&self, table: TableId) -> u32 {
		self.tables.table(table).row_count()
	}
}

impl Debug for Database {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("Database");
		dbg.field("version", &self.version);
		dbg.field("tables", &self.tables);
		dbg.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_image::{build_minimal_pe, ImageBuilder};

	#[test]
	fn pe_walk_reaches_the_metadata_root() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let pe = build_minimal_pe(&image.build_metadata());

		let db = Database::from_image(pe).unwrap();
		assert_eq!(db.version(), "v4.0.30319");
		assert_eq!(db.row_count(TableId::Module), 1);
	}

	#[test]
	fn raw_metadata_roots_load_without_a_pe_wrapper() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let db = Database::from_metadata(image.build_metadata()).unwrap();
		assert_eq!(db.row_count(TableId::Module), 1);
		assert_eq!(db.row_count(TableId::TypeDef), 0);
	}

	#[test]
	fn bad_magic_is_rejected() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let mut metadata = image.build_metadata();
		metadata[0] = 0x00;
		assert!(matches!(
			Database::from_metadata(metadata),
			Err(Error::Malformed("metadata magic signature does not match"))
		));
	}

	#[test]
	fn unknown_stream_names_are_rejected() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let mut metadata = image.build_metadata();
		let name_offset = image.stream_name_offset("#GUID");
		metadata[name_offset..name_offset + 5].copy_from_slice(b"#Bad\0");
		assert!(matches!(
			Database::from_metadata(metadata),
			Err(Error::Malformed("unknown stream name"))
		));
	}
}
