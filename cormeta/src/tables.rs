use std::fmt::{Debug, Formatter};

use cormeta_derive::FromRepr;

use crate::heaps::Bytes;
use crate::indices::coded_index::CodedIndexKind;
use crate::indices::sizes::IndexSizes;
use crate::utilities::{read_unsigned, set_bits, ByteReader};
use crate::{Error, Result};

/// One past the highest assigned table id (0x2C).
pub(crate) const TABLE_COUNT: usize = 0x2D;

/// The widest table (TypeDef, MethodDef, Assembly, AssemblyRef) has six columns.
pub(crate) const MAX_COLUMN_COUNT: usize = 6;

/// The 38 metadata tables of ECMA-335 II.22. Ids are assigned in
/// `[0x00, 0x2C]` with gaps; a `valid` bit for an unassigned id is a format
/// error.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, FromRepr)]
pub enum TableId {
	Module = 0x00,
	TypeRef = 0x01,
	TypeDef = 0x02,
	Field = 0x04,
	MethodDef = 0x06,
	Param = 0x08,
	InterfaceImpl = 0x09,
	MemberRef = 0x0a,
	Constant = 0x0b,
	CustomAttribute = 0x0c,
	FieldMarshal = 0x0d,
	DeclSecurity = 0x0e,
	ClassLayout = 0x0f,
	FieldLayout = 0x10,
	StandAloneSig = 0x11,
	EventMap = 0x12,
	Event = 0x14,
	PropertyMap = 0x15,
	Property = 0x17,
	MethodSemantics = 0x18,
	MethodImpl = 0x19,
	ModuleRef = 0x1a,
	TypeSpec = 0x1b,
	ImplMap = 0x1c,
	FieldRVA = 0x1d,
	Assembly = 0x20,
	AssemblyProcessor = 0x21,
	AssemblyOS = 0x22,
	AssemblyRef = 0x23,
	AssemblyRefProcessor = 0x24,
	AssemblyRefOS = 0x25,
	File = 0x26,
	ExportedType = 0x27,
	ManifestResource = 0x28,
	NestedClass = 0x29,
	GenericParam = 0x2a,
	MethodSpec = 0x2b,
	GenericParamConstraint = 0x2c,
}

impl TableId {
	pub const ALL: [TableId; 38] = [
		TableId::Module, TableId::TypeRef, TableId::TypeDef, TableId::Field,
		TableId::MethodDef, TableId::Param, TableId::InterfaceImpl,
		TableId::MemberRef, TableId::Constant, TableId::CustomAttribute,
		TableId::FieldMarshal, TableId::DeclSecurity, TableId::ClassLayout,
		TableId::FieldLayout, TableId::StandAloneSig, TableId::EventMap,
		TableId::Event, TableId::PropertyMap, TableId::Property,
		TableId::MethodSemantics, TableId::MethodImpl, TableId::ModuleRef,
		TableId::TypeSpec, TableId::ImplMap, TableId::FieldRVA,
		TableId::Assembly, TableId::AssemblyProcessor, TableId::AssemblyOS,
		TableId::AssemblyRef, TableId::AssemblyRefProcessor,
		TableId::AssemblyRefOS, TableId::File, TableId::ExportedType,
		TableId::ManifestResource, TableId::NestedClass, TableId::GenericParam,
		TableId::MethodSpec, TableId::GenericParamConstraint,
	];
}

/// The type of one column in a table's row layout. Together with the index
/// widths of a database this determines the column's byte width.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Column {
	Fixed(u8),
	Str,
	Guid,
	Blob,
	Table(TableId),
	Coded(CodedIndexKind),
}

/// The column layouts of ECMA-335 II.22.2 through II.22.39, in table order.
pub(crate) const fn columns(table: TableId) -> &'static [Column] {
	use CodedIndexKind as C;
	use Column::*;
	match table {
		TableId::Module => &[Fixed(2), Str, Guid, Guid, Guid],
		TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
		TableId::TypeDef => &[Fixed(4), Str, Str, Coded(C::TypeDefOrRef), Table(TableId::Field), Table(TableId::MethodDef)],
		TableId::Field => &[Fixed(2), Str, Blob],
		TableId::MethodDef => &[Fixed(4), Fixed(2), Fixed(2), Str, Blob, Table(TableId::Param)],
		TableId::Param => &[Fixed(2), Fixed(2), Str],
		TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(C::TypeDefOrRef)],
		TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
		TableId::Constant => &[Fixed(2), Coded(C::HasConstant), Blob],
		TableId::CustomAttribute => &[Coded(C::HasCustomAttribute), Coded(C::CustomAttributeType), Blob],
		TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
		TableId::DeclSecurity => &[Fixed(2), Coded(C::HasDeclSecurity), Blob],
		TableId::ClassLayout => &[Fixed(2), Fixed(4), Table(TableId::TypeDef)],
		TableId::FieldLayout => &[Fixed(4), Table(TableId::Field)],
		TableId::StandAloneSig => &[Blob],
		TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
		TableId::Event => &[Fixed(2), Str, Coded(C::TypeDefOrRef)],
		TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
		TableId::Property => &[Fixed(2), Str, Blob],
		TableId::MethodSemantics => &[Fixed(2), Table(TableId::MethodDef), Coded(C::HasSemantics)],
		TableId::MethodImpl => &[Table(TableId::TypeDef), Coded(C::MethodDefOrRef), Coded(C::MethodDefOrRef)],
		TableId::ModuleRef => &[Str],
		TableId::TypeSpec => &[Blob],
		TableId::ImplMap => &[Fixed(2), Coded(C::MemberForwarded), Str, Table(TableId::ModuleRef)],
		TableId::FieldRVA => &[Fixed(4), Table(TableId::Field)],
		TableId::Assembly => &[Fixed(4), Fixed(8), Fixed(4), Blob, Str, Str],
		TableId::AssemblyProcessor => &[Fixed(4)],
		TableId::AssemblyOS => &[Fixed(4), Fixed(4), Fixed(4)],
		TableId::AssemblyRef => &[Fixed(8), Fixed(4), Blob, Str, Str, Blob],
		TableId::AssemblyRefProcessor => &[Fixed(4), Table(TableId::AssemblyRef)],
		TableId::AssemblyRefOS => &[Fixed(4), Fixed(4), Fixed(4), Table(TableId::AssemblyRef)],
		TableId::File => &[Fixed(4), Str, Blob],
		TableId::ExportedType => &[Fixed(4), Fixed(4), Str, Str, Coded(C::Implementation)],
		TableId::ManifestResource => &[Fixed(4), Fixed(4), Str, Coded(C::Implementation)],
		TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
		TableId::GenericParam => &[Fixed(2), Fixed(2), Coded(C::TypeOrMethodDef), Str],
		TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
		TableId::GenericParamConstraint => &[Table(TableId::GenericParam), Coded(C::TypeDefOrRef)],
	}
}

/// One table's extent inside the `#~` stream.
#[derive(Debug, Default, Copy, Clone)]
pub struct Table {
	pub(crate) offset: usize,
	row_size: u32,
	row_count: u32,
	sorted: bool,
}

#[allow(clippy::len_without_is_empty)]
impl Table {
	pub fn row_count(&self) -> u32 {
		self.row_count
	}

	pub fn row_size(&self) -> u32 {
		self.row_size
	}

	pub fn is_sorted(&self) -> bool {
		self.sorted
	}

	pub(crate) fn byte_len(&self) -> usize {
		self.row_count as usize * self.row_size as usize
	}
}

/// The parsed `#~` stream: index widths, column offsets, row sizes and the
/// extent of every present table, all computed once at load time so that a
/// column read reduces to an offset addition and a width-selected
/// little-endian load.
pub struct TableStream {
	data: Bytes,
	major_version: u8,
	minor_version: u8,
	sizes: IndexSizes,
	offsets: [[u16; MAX_COLUMN_COUNT]; TABLE_COUNT],
	row_sizes: [u16; TABLE_COUNT],
	tables: [Table; TABLE_COUNT],
}

impl TryFrom<Bytes> for TableStream {
	type Error = Error;

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	fn try_from(data: Bytes) -> Result<Self> {
		let mut reader = ByteReader::new(data.as_ref());
		reader.skip(4)?; // reserved
		let major_version = reader.read_u8()?;
		let minor_version = reader.read_u8()?;
		let heap_sizes = reader.read_u8()?;
		reader.skip(1)?; // reserved
		let valid = reader.read_u64()?;
		let sorted = reader.read_u64()?;

		let mut row_counts = [0u32; TABLE_COUNT];
		for bit in set_bits(valid) {
			let bit = bit as usize;
			if bit >= TABLE_COUNT || TableId::from_repr(bit as u8).is_none() {
				return Err(Error::Malformed("tables stream presence vector has invalid bits set"));
			}
			row_counts[bit] = reader.read_u32()?;
		}

		let sizes = IndexSizes::new(heap_sizes, &row_counts);

		let mut offsets = [[0u16; MAX_COLUMN_COUNT]; TABLE_COUNT];
		let mut row_sizes = [0u16; TABLE_COUNT];
		for table in TableId::ALL {
			let mut offset = 0u16;
			for (i, column) in columns(table).iter().enumerate() {
				offsets[table as usize][i] = offset;
				offset += column_width(&sizes, column) as u16;
			}
			row_sizes[table as usize] = offset;
		}

		let mut tables = [Table::default(); TABLE_COUNT];
		let mut offset = reader.offset();
		for table in TableId::ALL {
			let row_count = row_counts[table as usize];
			if row_count == 0 {
				continue;
			}

			let entry = Table {
				offset,
				row_count,
				row_size: row_sizes[table as usize] as u32,
				sorted: sorted & (1 << table as u64) != 0,
			};
			offset += entry.byte_len();
			if offset > data.len() {
				return Err(Error::Malformed("table rows extend past the tables stream"));
			}
			tables[table as usize] = entry;
		}

		Ok(Self {
			data,
			major_version,
			minor_version,
			sizes,
			offsets,
			row_sizes,
			tables,
		})
	}
}

impl TableStream {
	pub fn major_version(&self) -> u8 {
		self.major_version
	}

	pub fn minor_version(&self) -> u8 {
		self.minor_version
	}

	pub fn table(&self, table: TableId) -> &Table {
		&self.tables[table as usize]
	}

	/// The bytes of row `index` (zero-based) of `table`.
	pub fn row_bytes(&self, table: TableId, index: u32) -> Result<&[u8]> {
		let entry = self.table(table);
		if index >= entry.row_count {
			return Err(Error::Malformed("attempted to read past the end of a table"));
		}

		let size = entry.row_size as usize;
		let first = entry.offset + size * index as usize;
		Ok(&self.data[first..first + size])
	}

	/// The contiguous bytes of every row of `table`.
	pub(crate) fn rows_bytes(&self, table: TableId) -> &[u8] {
		let entry = self.table(table);
		&self.data[entry.offset..entry.offset + entry.byte_len()]
	}

	pub fn string_heap_index_size(&self) -> usize {
		self.sizes.string
	}

	pub fn guid_heap_index_size(&self) -> usize {
		self.sizes.guid
	}

	pub fn blob_heap_index_size(&self) -> usize {
		self.sizes.blob
	}

	pub fn table_index_size(&self, table: TableId) -> usize {
		self.sizes.tables[table as usize]
	}

	pub fn composite_index_size(&self, index: CodedIndexKind) -> usize {
		self.sizes.coded[index as usize]
	}

	pub fn table_column_offset(&self, table: TableId, column: usize) -> usize {
		debug_assert!(column < columns(table).len());
		self.offsets[table as usize][column] as usize
	}

	pub(crate) fn column_width(&self, column: &Column) -> usize {
		column_width(&self.sizes, column)
	}

	/// Reads the raw value of `column` from a row's bytes.
	pub(crate) fn read_column(&self, row: &[u8], table: TableId, column: usize) -> Result<u32> {
		let offset = self.table_column_offset(table, column);
		let width = self.column_width(&columns(table)[column]);
		read_unsigned(&row[offset..], width)
			.ok_or(Error::Malformed("column read past the end of a row"))
	}
}

fn column_width(sizes: &IndexSizes, column: &Column) -> usize {
	match column {
		Column::Fixed(width) => *width as usize,
		Column::Str => sizes.string,
		Column::Guid => sizes.guid,
		Column::Blob => sizes.blob,
		Column::Table(table) => sizes.tables[*table as usize],
		Column::Coded(kind) => sizes.coded[*kind as usize],
	}
}

impl Debug for TableStream {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("TableStream");
		dbg.field("major_version", &self.major_version);
		dbg.field("minor_version", &self.minor_version);
		for table in TableId::ALL {
			let entry = self.table(table);
			if entry.row_count != 0 {
				dbg.field(&format!("{table:?}"), &entry.row_count);
			}
		}
		dbg.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_image::ImageBuilder;

	#[test]
	fn row_extents_match_counts_and_sizes() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		image.row(TableId::TypeRef, &[0, 1, 1]);
		image.row(TableId::TypeRef, &[0, 1, 1]);
		let db = image.build_database();

		let tables = db.tables();
		for table in TableId::ALL {
			let entry = tables.table(table);
			let extent = tables.rows_bytes(table).len();
			assert_eq!(entry.row_count() as usize * entry.row_size() as usize, extent);
		}
		assert_eq!(tables.table(TableId::TypeRef).row_count(), 2);
		assert!(tables.row_bytes(TableId::TypeRef, 1).is_ok());
		assert!(tables.row_bytes(TableId::TypeRef, 2).is_err());
		assert!(tables.row_bytes(TableId::MethodDef, 0).is_err());
	}

	#[test]
	fn column_offsets_stay_within_rows() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		let db = image.build_database();

		let tables = db.tables();
		for table in TableId::ALL {
			let row_size = tables.row_sizes[table as usize] as usize;
			for (i, column) in columns(table).iter().enumerate() {
				let offset = tables.table_column_offset(table, i);
				assert!(offset + tables.column_width(column) <= row_size);
			}
		}
	}

	#[test]
	fn narrow_image_uses_two_byte_indices() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let db = image.build_database();

		let tables = db.tables();
		assert_eq!(tables.string_heap_index_size(), 2);
		assert_eq!(tables.guid_heap_index_size(), 2);
		assert_eq!(tables.blob_heap_index_size(), 2);
		// Module: u16 generation + three 2-byte indices after a 2-byte name.
		assert_eq!(tables.table(TableId::Module).row_size(), 2 + 2 + 2 * 3);
	}

	#[test]
	fn wide_heap_bits_widen_heap_columns() {
		let mut image = ImageBuilder::new();
		image.heap_sizes(0x7);
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let db = image.build_database();

		let tables = db.tables();
		assert_eq!(tables.string_heap_index_size(), 4);
		assert_eq!(tables.table(TableId::Module).row_size(), 2 + 4 + 4 * 3);
	}

	#[test]
	fn invalid_presence_bits_are_rejected() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let mut metadata = image.build_metadata();

		// The #~ stream begins right after the five stream headers; flip an
		// unassigned presence bit (0x03, FieldPtr) in its `valid` mask.
		let tables_offset = image.tables_stream_offset();
		metadata[tables_offset + 8] |= 1 << 3;
		assert!(crate::Database::from_metadata(metadata).is_err());
	}

	#[test]
	fn truncated_row_data_is_rejected() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let metadata = image.build_metadata();
		// Clip the final row bytes off the image.
		assert!(crate::Database::from_metadata(&metadata[..metadata.len() - 4]).is_err());
	}
}
