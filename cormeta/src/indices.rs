pub mod metadata_token {
	use std::fmt::{Debug, Formatter};
	use std::hash::{Hash, Hasher};

	use paste::paste;

	use crate::database::Database;
	use crate::{Error, Result};

	pub use crate::tables::TableId;

	/// A typed reference to a row in a metadata table.
	///
	/// A token carries the database it originates from (its *scope*), the
	/// table id and a zero-based row index. The wire form packs the table id
	/// into the high 8 bits and a one-based row number into the low 24 bits;
	/// a wire row number of zero decodes to `None` rather than to a token.
	#[derive(Copy, Clone)]
	pub struct Token<'l> {
		scope: &'l Database,
		table: TableId,
		index: u32,
	}

	impl<'l> Token<'l> {
		pub fn new(scope: &'l Database, table: TableId, index: u32) -> Self {
			debug_assert!(index < 0x00FF_FFFF);
			Self { scope, table, index }
		}

		/// Decodes a 32-bit wire token. Wire row zero yields `None`.
		pub fn from_wire(scope: &'l Database, value: u32) -> Result<Option<Self>> {
			let Some(table) = TableId::from_repr((value >> 24) as u8) else {
				return Err(Error::Malformed("wire token references an undefined table"));
			};
			match value & 0x00FF_FFFF {
				0 => Ok(None),
				row => Ok(Some(Self::new(scope, table, row - 1))),
			}
		}

		pub fn scope(&self) -> &'l Database {
			self.scope
		}

		pub fn table(&self) -> TableId {
			self.table
		}

		/// Zero-based row index.
		pub fn index(&self) -> u32 {
			self.index
		}

		/// The 32-bit wire form (one-based row number).
		pub fn value(&self) -> u32 {
			((self.table as u32) << 24) | (self.index + 1)
		}

		/// The token for the next row of the same table, if there is one.
		pub fn next(self) -> Option<Token<'l>> {
			let row_count = self.scope.tables().table(self.table).row_count();
			match self.index + 1 < row_count {
				true => Some(Self::new(self.scope, self.table, self.index + 1)),
				false => None,
			}
		}
	}

	impl Debug for Token<'_> {
		fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
			write!(f, "Token::{:?}(", self.table)?;
			self.index.fmt(f)?;
			write!(f, ")")
		}
	}

	impl PartialEq for Token<'_> {
		fn eq(&self, other: &Self) -> bool {
			std::ptr::eq(self.scope, other.scope)
				&& self.table == other.table
				&& self.index == other.index
		}
	}

	impl Eq for Token<'_> {}

	impl Hash for Token<'_> {
		fn hash<H: Hasher>(&self, state: &mut H) {
			(self.scope as *const Database).hash(state);
			self.table.hash(state);
			self.index.hash(state);
		}
	}

	macro_rules! define_metadata_token {
		($($id: ident),*) => {
			paste! {
				$(
					#[repr(transparent)]
					#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
					pub struct [<$id Token>]<'l>(Token<'l>);

					impl<'l> [<$id Token>]<'l> {
						pub fn new(scope: &'l Database, index: u32) -> Self {
							Self(Token::new(scope, TableId::$id, index))
						}

						pub fn token(&self) -> Token<'l> {
							self.0
						}

						pub fn scope(&self) -> &'l Database {
							self.0.scope()
						}

						pub fn index(&self) -> u32 {
							self.0.index()
						}

						pub fn value(&self) -> u32 {
							self.0.value()
						}
					}

					impl<'l> From<[<$id Token>]<'l>> for Token<'l> {
						fn from(value: [<$id Token>]<'l>) -> Self {
							value.0
						}
					}

					impl<'l> TryFrom<Token<'l>> for [<$id Token>]<'l> {
						type Error = Error;
						fn try_from(value: Token<'l>) -> Result<Self> {
							match value.table() {
								TableId::$id => Ok(Self(value)),
								_ => Err(Error::InvalidConversion(stringify!($id))),
							}
						}
					}
				)*
			}
		};
	}

	define_metadata_token! {
		Module, TypeRef, TypeDef, Field, MethodDef, Param, InterfaceImpl,
		MemberRef, Constant, CustomAttribute, FieldMarshal, DeclSecurity,
		ClassLayout, FieldLayout, StandAloneSig, EventMap, Event, PropertyMap,
		Property, MethodSemantics, MethodImpl, ModuleRef, TypeSpec, ImplMap,
		FieldRVA, Assembly, AssemblyProcessor, AssemblyOS, AssemblyRef,
		AssemblyRefProcessor, AssemblyRefOS, File, ExportedType,
		ManifestResource, NestedClass, GenericParam, MethodSpec,
		GenericParamConstraint
	}
}

pub mod coded_index {
	use paste::paste;

	use crate::database::Database;
	use crate::indices::metadata_token::*;
	use crate::tables::{TableId, TABLE_COUNT};
	use crate::{Error, Result};

	macro_rules! define_coded_index {
		($($id: ident [$bits: literal]: { $($tag: literal => $table: ident),* }),* $(,)?) => {
			/// The thirteen composite (coded) indices of ECMA-335 II.24.2.6,
			/// each packing a fixed-width table-selector tag and a one-based
			/// row number into a single 2- or 4-byte column.
			#[repr(u32)]
			#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
			pub enum CodedIndexKind {
				$($id),*
			}

			impl CodedIndexKind {
				pub const COUNT: usize = [$(CodedIndexKind::$id),*].len();

				pub const fn tag_bits(&self) -> u32 {
					match self {
						$(Self::$id => $bits),*
					}
				}

				pub const fn mask(&self) -> u32 {
					(1 << self.tag_bits()) - 1
				}

				/// The table selected by `tag`, or `None` for an unassigned tag.
				pub const fn target(&self, tag: u32) -> Option<TableId> {
					match self {
						$(Self::$id => match tag {
							$($tag => Some(TableId::$table),)*
							_ => None,
						}),*
					}
				}

				/// The tag that selects `table`, or `None` if the table is not
				/// referenceable through this index.
				pub const fn tag_of(&self, table: TableId) -> Option<u32> {
					match self {
						$(Self::$id => match table {
							$(TableId::$table => Some($tag),)*
							_ => None,
						}),*
					}
				}

				/// The width of this index: two bytes iff every referenceable
				/// table has fewer than `2^(16 - tag_bits)` rows.
				pub fn size(&self, row_counts: &[u32; TABLE_COUNT]) -> usize {
					let limit = 1u32 << (16 - self.tag_bits());
					let fits = match self {
						$(Self::$id => [$(TableId::$table),*]
							.iter()
							.all(|t| row_counts[*t as usize] < limit)),*
					};
					match fits {
						true => 2,
						false => 4,
					}
				}
			}

			$(
				#[repr(transparent)]
				#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
				pub struct $id<'l>(Token<'l>);

				impl<'l> $id<'l> {
					pub const KIND: CodedIndexKind = CodedIndexKind::$id;

					/// Splits a wire-form composite value into its tag and row
					/// number. A row number of zero yields `None`; an
					/// unassigned tag is a format error.
					pub fn decode(scope: &'l Database, value: u32) -> Result<Option<Self>> {
						let tag = value & Self::KIND.mask();
						let Some(table) = Self::KIND.target(tag) else {
							return Err(Error::Malformed(concat!("invalid ", stringify!($id), " tag")));
						};
						match value >> Self::KIND.tag_bits() {
							0 => Ok(None),
							row => Ok(Some(Self(Token::new(scope, table, row - 1)))),
						}
					}

					/// Recomposes the wire-form value of this index.
					pub fn key(&self) -> u32 {
						let tag = Self::KIND.tag_of(self.0.table()).unwrap();
						tag | ((self.0.index() + 1) << Self::KIND.tag_bits())
					}

					pub fn token(&self) -> Token<'l> {
						self.0
					}

					pub fn scope(&self) -> &'l Database {
						self.0.scope()
					}

					pub fn table(&self) -> TableId {
						self.0.table()
					}

					pub fn index(&self) -> u32 {
						self.0.index()
					}
				}

				impl<'l> From<$id<'l>> for Token<'l> {
					fn from(value: $id<'l>) -> Self {
						value.0
					}
				}

				impl<'l> TryFrom<Token<'l>> for $id<'l> {
					type Error = Error;
					fn try_from(value: Token<'l>) -> Result<Self> {
						match value.table() {
							$(TableId::$table)|* => Ok(Self(value)),
							_ => Err(Error::InvalidConversion(stringify!($id))),
						}
					}
				}

				paste! {
					$(
						impl<'l> From<[<$table Token>]<'l>> for $id<'l> {
							fn from(value: [<$table Token>]<'l>) -> Self {
								Self(value.token())
							}
						}

						impl<'l> TryFrom<$id<'l>> for [<$table Token>]<'l> {
							type Error = Error;
							fn try_from(value: $id<'l>) -> Result<Self> {
								Self::try_from(value.token())
							}
						}
					)*
				}
			)*
		};
	}

	define_coded_index! {
		TypeDefOrRef[2]: { 0 => TypeDef, 1 => TypeRef, 2 => TypeSpec },
		HasConstant[2]: { 0 => Field, 1 => Param, 2 => Property },
		HasCustomAttribute[5]: {
			0 => MethodDef, 1 => Field, 2 => TypeRef, 3 => TypeDef, 4 => Param,
			5 => InterfaceImpl, 6 => MemberRef, 7 => Module, 8 => DeclSecurity,
			9 => Property, 10 => Event, 11 => StandAloneSig, 12 => ModuleRef,
			13 => TypeSpec, 14 => Assembly, 15 => AssemblyRef, 16 => File,
			17 => ExportedType, 18 => ManifestResource, 19 => GenericParam,
			20 => GenericParamConstraint, 21 => MethodSpec
		},
		HasFieldMarshal[1]: { 0 => Field, 1 => Param },
		HasDeclSecurity[2]: { 0 => TypeDef, 1 => MethodDef, 2 => Assembly },
		MemberRefParent[3]: { 0 => TypeDef, 1 => TypeRef, 2 => ModuleRef, 3 => MethodDef, 4 => TypeSpec },
		HasSemantics[1]: { 0 => Event, 1 => Property },
		MethodDefOrRef[1]: { 0 => MethodDef, 1 => MemberRef },
		MemberForwarded[1]: { 0 => Field, 1 => MethodDef },
		Implementation[2]: { 0 => File, 1 => AssemblyRef, 2 => ExportedType },
		CustomAttributeType[3]: { 2 => MethodDef, 3 => MemberRef },
		ResolutionScope[2]: { 0 => Module, 1 => ModuleRef, 2 => AssemblyRef, 3 => TypeRef },
		TypeOrMethodDef[1]: { 0 => TypeDef, 1 => MethodDef },
	}
}

pub(crate) mod sizes {
	use crate::indices::coded_index::CodedIndexKind;
	use crate::tables::TABLE_COUNT;

	/// Precomputed widths (2 or 4 bytes) of every heap, table and composite
	/// index in one database, derived once from `heap_sizes` and the row
	/// counts.
	#[derive(Debug)]
	pub(crate) struct IndexSizes {
		pub string: usize,
		pub guid: usize,
		pub blob: usize,
		pub tables: [usize; TABLE_COUNT],
		pub coded: [usize; CodedIndexKind::COUNT],
	}

	impl IndexSizes {
		pub fn new(heap_sizes: u8, row_counts: &[u32; TABLE_COUNT]) -> Self {
			Self {
				string: 2 + 2 * ((heap_sizes & 0x1) != 0) as usize,
				guid: 2 + 2 * ((heap_sizes & 0x2) != 0) as usize,
				blob: 2 + 2 * ((heap_sizes & 0x4) != 0) as usize,
				tables: {
					let mut tables = [0; TABLE_COUNT];
					for (size, len) in tables.iter_mut().zip(row_counts) {
						*size = 2 + 2 * (*len >= (1 << 16)) as usize;
					}
					tables
				},
				coded: {
					let mut coded = [0; CodedIndexKind::COUNT];
					let kinds = [
						CodedIndexKind::TypeDefOrRef,
						CodedIndexKind::HasConstant,
						CodedIndexKind::HasCustomAttribute,
						CodedIndexKind::HasFieldMarshal,
						CodedIndexKind::HasDeclSecurity,
						CodedIndexKind::MemberRefParent,
						CodedIndexKind::HasSemantics,
						CodedIndexKind::MethodDefOrRef,
						CodedIndexKind::MemberForwarded,
						CodedIndexKind::Implementation,
						CodedIndexKind::CustomAttributeType,
						CodedIndexKind::ResolutionScope,
						CodedIndexKind::TypeOrMethodDef,
					];
					for kind in kinds {
						coded[kind as usize] = kind.size(row_counts);
					}
					coded
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::coded_index::*;
	use super::metadata_token::*;
	use super::sizes::IndexSizes;
	use crate::tables::{TableId, TABLE_COUNT};
	use crate::test_image::empty_database;
	use crate::Error;

	#[test]
	fn coded_index_split() {
		// TypeDefOrRef has a two-bit tag: 0x0009 -> tag 1 (TypeRef), row 2.
		let db = empty_database();
		let index = TypeDefOrRef::decode(&db, 0x0009).unwrap().unwrap();
		assert_eq!(index.table(), TableId::TypeRef);
		assert_eq!(index.index(), 1);
		assert_eq!(index.key(), 0x0009);
	}

	#[test]
	fn coded_index_null_and_invalid_tags() {
		let db = empty_database();
		assert!(TypeDefOrRef::decode(&db, 0x0003).is_err());
		assert!(TypeDefOrRef::decode(&db, 0x0001).unwrap().is_none());
		// CustomAttributeType leaves tags 0 and 1 unassigned.
		assert!(CustomAttributeType::decode(&db, 1 << 3).is_err());
		assert!(CustomAttributeType::decode(&db, (1 << 3) | 2).unwrap().is_some());
	}

	#[test]
	fn token_conversions_are_mask_checked() {
		let db = empty_database();
		let field = FieldToken::new(&db, 3);

		let widened: HasConstant = field.into();
		assert_eq!(widened.table(), TableId::Field);
		assert_eq!(widened.key(), (4 << 2) | 0);

		let narrowed = FieldToken::try_from(widened.token()).unwrap();
		assert_eq!(narrowed, field);
		assert!(matches!(
			TypeDefToken::try_from(widened.token()),
			Err(Error::InvalidConversion(_))
		));
	}

	#[test]
	fn wire_tokens_round_trip() {
		let db = empty_database();
		let token = Token::from_wire(&db, 0x0200_0001).unwrap().unwrap();
		assert_eq!(token.table(), TableId::TypeDef);
		assert_eq!(token.index(), 0);
		assert_eq!(token.value(), 0x0200_0001);

		assert!(Token::from_wire(&db, 0x0200_0000).unwrap().is_none());
		assert!(Token::from_wire(&db, 0x0300_0001).is_err());
	}

	#[test]
	fn table_index_width_flips_at_two_to_the_sixteenth() {
		let mut counts = [0u32; TABLE_COUNT];

		counts[TableId::TypeDef as usize] = (1 << 16) - 1;
		assert_eq!(IndexSizes::new(0, &counts).tables[TableId::TypeDef as usize], 2);

		counts[TableId::TypeDef as usize] = 1 << 16;
		assert_eq!(IndexSizes::new(0, &counts).tables[TableId::TypeDef as usize], 4);

		counts[TableId::TypeDef as usize] = (1 << 16) + 1;
		assert_eq!(IndexSizes::new(0, &counts).tables[TableId::TypeDef as usize], 4);
	}

	#[test]
	fn coded_index_width_accounts_for_tag_bits() {
		let mut counts = [0u32; TABLE_COUNT];

		// TypeDefOrRef spends two bits on the tag.
		counts[TableId::TypeRef as usize] = (1 << 14) - 1;
		assert_eq!(CodedIndexKind::TypeDefOrRef.size(&counts), 2);
		counts[TableId::TypeRef as usize] = 1 << 14;
		assert_eq!(CodedIndexKind::TypeDefOrRef.size(&counts), 4);
		counts[TableId::TypeRef as usize] = (1 << 14) + 1;
		assert_eq!(CodedIndexKind::TypeDefOrRef.size(&counts), 4);

		// HasCustomAttribute spends five.
		let mut counts = [0u32; TABLE_COUNT];
		counts[TableId::MethodSpec as usize] = (1 << 11) - 1;
		assert_eq!(CodedIndexKind::HasCustomAttribute.size(&counts), 2);
		counts[TableId::MethodSpec as usize] = 1 << 11;
		assert_eq!(CodedIndexKind::HasCustomAttribute.size(&counts), 4);
	}

	#[test]
	fn heap_size_bits_select_wide_heap_indices() {
		let counts = [0u32; TABLE_COUNT];
		let sizes = IndexSizes::new(0b101, &counts);
		assert_eq!((sizes.string, sizes.guid, sizes.blob), (4, 2, 4));
	}
}
