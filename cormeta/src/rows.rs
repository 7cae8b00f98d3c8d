use bitflags::bitflags;
use derivative::Derivative;
use paste::paste;
use uuid::Uuid;

use cormeta_derive::FromRepr;

use crate::database::Database;
use crate::heaps::{Blob, BlobIndex, GuidIndex, StringIndex};
use crate::indices::coded_index::*;
use crate::indices::metadata_token::*;
use crate::signatures::ElementType;
use crate::tables::TableId;
use crate::{Error, Result};

/// A lazy accessor over one row of one table.
///
/// Rows are `(scope, index)` views; every column getter re-reads the row's
/// bytes at the schema's precomputed offset.
pub trait TableRow<'l>: Sized {
	const ID: TableId;
	fn at(scope: &'l Database, index: u32) -> Self;
}

/// A four-part assembly version as stored in the 8-byte version column.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AssemblyVersion {
	pub major: u16,
	pub minor: u16,
	pub build: u16,
	pub revision: u16,
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum AssemblyHashAlgorithm {
	None = 0x0000,
	MD5 = 0x8003,
	SHA1 = 0x8004,
	SHA256 = 0x800C,
	SHA384 = 0x800D,
	SHA512 = 0x800E,
}

bitflags! {
	/// TypeDef/ExportedType flags (ECMA-335 II.23.1.15).
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct TypeAttributes: u32 {
		// Visibility (an enumeration under VISIBILITY_MASK; values above
		// PUBLIC mean the type is nested).
		const VISIBILITY_MASK = 0x00000007;
		const NOT_PUBLIC = 0x00000000;
		const PUBLIC = 0x00000001;
		const NESTED_PUBLIC = 0x00000002;
		const NESTED_PRIVATE = 0x00000003;
		const NESTED_FAMILY = 0x00000004;
		const NESTED_ASSEMBLY = 0x00000005;
		const NESTED_FAMILY_AND_ASSEMBLY = 0x00000006;
		const NESTED_FAMILY_OR_ASSEMBLY = 0x00000007;

		// Field layout.
		const LAYOUT_MASK = 0x00000018;
		const AUTO_LAYOUT = 0x00000000;
		const SEQUENTIAL_LAYOUT = 0x00000008;
		const EXPLICIT_LAYOUT = 0x00000010;

		// Class vs interface semantics.
		const CLASS_SEMANTICS_MASK = 0x00000020;
		const CLASS = 0x00000000;
		const INTERFACE = 0x00000020;

		const ABSTRACT = 0x00000080;
		const SEALED = 0x00000100;
		const SPECIAL_NAME = 0x00000400;
		const IMPORTED = 0x00001000;
		const SERIALIZABLE = 0x00002000;

		// String marshalling for native interop.
		const STRING_FORMAT_MASK = 0x00030000;
		const ANSI_CLASS = 0x00000000;
		const UNICODE_CLASS = 0x00010000;
		const AUTO_CLASS = 0x00020000;
		const CUSTOM_FORMAT_CLASS = 0x00030000;
		const CUSTOM_STRING_FORMAT_MASK = 0x00C00000;

		const BEFORE_FIELD_INIT = 0x00100000;
		const RT_SPECIAL_NAME = 0x00000800;
		const HAS_SECURITY = 0x00040000;
		/// Marks an ExportedType row as a type forwarder.
		const IS_TYPE_FORWARDER = 0x00200000;
	}

	/// Field flags (ECMA-335 II.23.1.5).
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct FieldAttributes: u16 {
		// Accessibility (an enumeration under FIELD_ACCESS_MASK).
		const FIELD_ACCESS_MASK = 0x0007;
		const COMPILER_CONTROLLED = 0x0000;
		const PRIVATE = 0x0001;
		const FAMILY_AND_ASSEMBLY = 0x0002;
		const ASSEMBLY = 0x0003;
		const FAMILY = 0x0004;
		const FAMILY_OR_ASSEMBLY = 0x0005;
		const PUBLIC = 0x0006;

		const STATIC = 0x0010;
		/// Writable only inside a constructor.
		const INIT_ONLY = 0x0020;
		/// A compile-time constant; the value lives in the Constant table.
		const LITERAL = 0x0040;
		const NOT_SERIALIZED = 0x0080;
		const SPECIAL_NAME = 0x0200;
		const PINVOKE_IMPL = 0x2000;
		const RT_SPECIAL_NAME = 0x0400;
		const HAS_FIELD_MARSHAL = 0x1000;
		const HAS_DEFAULT = 0x8000;
		const HAS_FIELD_RVA = 0x0100;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodAttributes: u16 {
		const MEMBER_ACCESS_MASK = 0x0007;
		const COMPILER_CONTROLLED = 0x0000;
		const PRIVATE = 0x0001;
		const FAMILY_AND_ASSEMBLY = 0x0002;
		const ASSEMBLY = 0x0003;
		const FAMILY = 0x0004;
		const FAMILY_OR_ASSEMBLY = 0x0005;
		const PUBLIC = 0x0006;

		const STATIC = 0x0010;
		const FINAL = 0x0020;
		const VIRTUAL = 0x0040;
		const HIDE_BY_SIG = 0x0080;

		const VTABLE_LAYOUT_MASK = 0x0100;
		const REUSE_SLOT = 0x0000;
		const NEW_SLOT = 0x0100;

		const STRICT = 0x0200;
		const ABSTRACT = 0x0400;
		const SPECIAL_NAME = 0x0800;

		const PINVOKE_IMPL = 0x2000;
		const RT_SPECIAL_NAME = 0x1000;
		const HAS_SECURITY = 0x4000;
		const REQUIRE_SEC_OBJECT = 0x8000;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodImplAttributes: u16 {
		const CODE_TYPE_MASK = 0x0003;
		const IL = 0x0000;
		const NATIVE = 0x0001;
		const OPTIL = 0x0002;
		const RUNTIME = 0x0003;

		const MANAGED_MASK = 0x0004;
		const UNMANAGED = 0x0004;
		const MANAGED = 0x0000;

		const NO_INLINING = 0x0008;
		const FORWARD_REF = 0x0010;
		const SYNCHRONIZED = 0x0020;
		const NO_OPTIMIZATION = 0x0040;
		const PRESERVE_SIG = 0x0080;
		const INTERNAL_CALL = 0x1000;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ParamAttributes: u16 {
		const IN = 0x0001;
		const OUT = 0x0002;
		const OPTIONAL = 0x0010;
		const HAS_DEFAULT = 0x1000;
		const HAS_FIELD_MARSHAL = 0x2000;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct EventAttributes: u16 {
		const SPECIAL_NAME = 0x0200;
		const RT_SPECIAL_NAME = 0x0400;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct PropertyAttributes: u16 {
		const SPECIAL_NAME = 0x0200;
		const RT_SPECIAL_NAME = 0x0400;
		const HAS_DEFAULT = 0x1000;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodSemanticsAttributes: u16 {
		const SETTER = 0x0001;
		const GETTER = 0x0002;
		const OTHER = 0x0004;
		const ADD_ON = 0x0008;
		const REMOVE_ON = 0x0010;
		const FIRE = 0x0020;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct PInvokeAttributes: u16 {
		const NO_MANGLE = 0x0001;

		const CHAR_SET_MASK = 0x0006;
		const CHAR_SET_NOT_SPEC = 0x0000;
		const CHAR_SET_ANSI = 0x0002;
		const CHAR_SET_UNICODE = 0x0004;
		const CHAR_SET_AUTO = 0x0006;

		const SUPPORTS_LAST_ERROR = 0x0040;

		const CALL_CONV_MASK = 0x0700;
		const CALL_CONV_PLATFORMAPI = 0x0100;
		const CALL_CONV_CDECL = 0x0200;
		const CALL_CONV_STDCALL = 0x0300;
		const CALL_CONV_THISCALL = 0x0400;
		const CALL_CONV_FASTCALL = 0x0500;
	}

	/// Assembly flags (ECMA-335 II.23.1.2), plus the non-standard
	/// content-type bits 9..11 that identify Windows Runtime metadata.
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct AssemblyFlags: u32 {
		/// The full public key is stored instead of its token.
		const PUBLIC_KEY = 0x0001;
		const RETARGETABLE = 0x0100;
		const DISABLE_JIT_COMPILE_OPTIMIZER = 0x4000;
		const ENABLE_JIT_COMPILE_TRACKING = 0x8000;

		const CONTENT_TYPE_MASK = 0x0E00;
		const WINDOWS_RUNTIME = 0x0200;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct FileAttributes: u32 {
		const CONTAINS_NO_METADATA = 0x0001;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ManifestResourceAttributes: u32 {
		const VISIBILITY_MASK = 0x0007;
		const PUBLIC = 0x0001;
		const PRIVATE = 0x0002;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct GenericParamAttributes: u16 {
		const VARIANCE_MASK = 0x0003;
		const COVARIANT = 0x0001;
		const CONTRAVARIANT = 0x0002;

		const SPECIAL_CONSTRAINT_MASK = 0x001C;
		const REFERENCE_TYPE_CONSTRAINT = 0x0004;
		const NOT_NULLABLE_VALUE_TYPE_CONSTRAINT = 0x0008;
		const DEFAULT_CONSTRUCTOR_CONSTRAINT = 0x0010;
	}
}

impl AssemblyFlags {
	/// True when the content-type bits carry the Windows Runtime value.
	pub fn is_windows_runtime(&self) -> bool {
		(*self & Self::CONTENT_TYPE_MASK) == Self::WINDOWS_RUNTIME
	}
}

fn checked_token<'l>(token: Token<'l>) -> Result<Token<'l>> {
	let row_count = token.scope().tables().table(token.table()).row_count();
	match token.index() < row_count {
		true => Ok(token),
		false => Err(Error::Malformed("row reference past the end of its table")),
	}
}

macro_rules! row_column {
	($l: lifetime, $col: literal, $name: ident, u16) => {
		pub fn $name(&self) -> Result<u16> {
			Ok(self.read($col)? as u16)
		}
	};

	($l: lifetime, $col: literal, $name: ident, u32) => {
		pub fn $name(&self) -> Result<u32> {
			self.read($col)
		}
	};

	($l: lifetime, $col: literal, $name: ident, version) => {
		pub fn $name(&self) -> Result<AssemblyVersion> {
			let bytes = self.column_bytes($col, 8)?;
			let part = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
			Ok(AssemblyVersion {
				major: part(0),
				minor: part(2),
				build: part(4),
				revision: part(6),
			})
		}
	};

	($l: lifetime, $col: literal, $name: ident, hash) => {
		pub fn $name(&self) -> Result<AssemblyHashAlgorithm> {
			AssemblyHashAlgorithm::from_repr(self.read($col)?)
				.ok_or(Error::Malformed("unknown assembly hash algorithm"))
		}
	};

	($l: lifetime, $col: literal, $name: ident, element_type) => {
		pub fn $name(&self) -> Result<ElementType> {
			let value = self.read($col)? as u16;
			if value > u8::MAX as u16 {
				return Err(Error::Malformed("invalid constant element type"));
			}
			ElementType::from_repr(value as u8)
				.ok_or(Error::Malformed("invalid constant element type"))
		}
	};

	($l: lifetime, $col: literal, $name: ident, str) => {
		pub fn $name(&self) -> Result<&$l str> {
			self.scope.strings().get(StringIndex(self.read($col)? as usize))
		}
	};

	($l: lifetime, $col: literal, $name: ident, guid) => {
		pub fn $name(&self) -> Result<Option<Uuid>> {
			self.scope.guids().get(GuidIndex(self.read($col)? as usize))
		}
	};

	($l: lifetime, $col: literal, $name: ident, blob) => {
		pub fn $name(&self) -> Result<Blob<$l>> {
			Blob::compute_from_stream(self.scope, BlobIndex(self.read($col)? as usize))
		}
	};

	($l: lifetime, $col: literal, $name: ident, flags16($ty: ident)) => {
		pub fn $name(&self) -> Result<$ty> {
			Ok($ty::from_bits_retain(self.read($col)? as u16))
		}
	};

	($l: lifetime, $col: literal, $name: ident, flags32($ty: ident)) => {
		pub fn $name(&self) -> Result<$ty> {
			Ok($ty::from_bits_retain(self.read($col)?))
		}
	};

	($l: lifetime, $col: literal, $name: ident, table($t: ident)) => {
		paste! {
			pub fn $name(&self) -> Result<Option<[<$t Token>]<$l>>> {
				match self.read($col)? {
					0 => Ok(None),
					raw => {
						let token = checked_token(Token::new(self.scope, TableId::$t, raw - 1))?;
						Ok(Some([<$t Token>]::try_from(token)?))
					},
				}
			}
		}
	};

	($l: lifetime, $col: literal, $name: ident, coded($k: ident)) => {
		pub fn $name(&self) -> Result<Option<$k<$l>>> {
			match $k::decode(self.scope, self.read($col)?)? {
				None => Ok(None),
				Some(index) => {
					checked_token(index.token())?;
					Ok(Some(index))
				},
			}
		}
	};

	// A range-start column: a one-based index into the child table that may
	// point one past its end. Returned zero-based.
	($l: lifetime, $col: literal, $name: ident, list($t: ident)) => {
		pub fn $name(&self) -> Result<u32> {
			match self.read($col)? {
				0 => Err(Error::Malformed("zero row range start")),
				raw => {
					let first = raw - 1;
					let row_count = self.scope.tables().table(TableId::$t).row_count();
					match first <= row_count {
						true => Ok(first),
						false => Err(Error::Malformed("row range start past the end of its table")),
					}
				},
			}
		}
	};
}

macro_rules! define_rows {
	($($(#[$meta: meta])* $id: ident { $($col: literal $name: ident: $kind: ident $(($arg: ident))?),* $(,)? })*) => {
		paste! {$(
			$(#[$meta])*
			#[derive(Derivative, Copy, Clone)]
			#[derivative(Debug)]
			pub struct [<$id Row>]<'l> {
				#[derivative(Debug = "ignore")]
				scope: &'l Database,
				index: u32,
			}

			impl<'l> TableRow<'l> for [<$id Row>]<'l> {
				const ID: TableId = TableId::$id;

				fn at(scope: &'l Database, index: u32) -> Self {
					Self { scope, index }
				}
			}

			impl<'l> [<$id Row>]<'l> {
				pub fn token(&self) -> [<$id Token>]<'l> {
					[<$id Token>]::new(self.scope, self.index)
				}

				pub fn scope(&self) -> &'l Database {
					self.scope
				}

				pub fn index(&self) -> u32 {
					self.index
				}

				fn bytes(&self) -> Result<&'l [u8]> {
					self.scope.tables().row_bytes(Self::ID, self.index)
				}

				fn read(&self, column: usize) -> Result<u32> {
					self.scope.tables().read_column(self.bytes()?, Self::ID, column)
				}

				#[allow(dead_code)]
				fn column_bytes(&self, column: usize, len: usize) -> Result<&'l [u8]> {
					let offset = self.scope.tables().table_column_offset(Self::ID, column);
					let bytes = self.bytes()?;
					bytes.get(offset..offset + len)
						.ok_or(Error::Malformed("column read past the end of a row"))
				}

				$(row_column!('l, $col, $name, $kind $(($arg))?);)*
			}

			impl<'l> [<$id Token>]<'l> {
				pub fn row(&self) -> Result<[<$id Row>]<'l>> {
					self.scope().row(self.index())
				}
			}
		)*}
	};
}

define_rows! {
	/// II.22.30
	Module {
		0 generation: u16,
		1 name: str,
		2 mvid: guid,
		3 enc_id: guid,
		4 enc_base_id: guid,
	}

	/// II.22.38
	TypeRef {
		0 resolution_scope: coded(ResolutionScope),
		1 name: str,
		2 namespace: str,
	}

	/// II.22.37
	TypeDef {
		0 flags: flags32(TypeAttributes),
		1 name: str,
		2 namespace: str,
		3 extends: coded(TypeDefOrRef),
		4 first_field: list(Field),
		5 first_method: list(MethodDef),
	}

	/// II.22.15
	Field {
		0 flags: flags16(FieldAttributes),
		1 name: str,
		2 signature: blob,
	}

	/// II.22.26
	MethodDef {
		0 rva: u32,
		1 impl_flags: flags16(MethodImplAttributes),
		2 flags: flags16(MethodAttributes),
		3 name: str,
		4 signature: blob,
		5 first_param: list(Param),
	}

	/// II.22.33
	Param {
		0 flags: flags16(ParamAttributes),
		1 sequence: u16,
		2 name: str,
	}

	/// II.22.23
	InterfaceImpl {
		0 class: table(TypeDef),
		1 interface: coded(TypeDefOrRef),
	}

	/// II.22.25
	MemberRef {
		0 class: coded(MemberRefParent),
		1 name: str,
		2 signature: blob,
	}

	/// II.22.9
	Constant {
		0 ty: element_type,
		1 parent: coded(HasConstant),
		2 value: blob,
	}

	/// II.22.10
	CustomAttribute {
		0 parent: coded(HasCustomAttribute),
		1 ty: coded(CustomAttributeType),
		2 value: blob,
	}

	/// II.22.17
	FieldMarshal {
		0 parent: coded(HasFieldMarshal),
		1 native_type: blob,
	}

	/// II.22.11
	DeclSecurity {
		0 action: u16,
		1 parent: coded(HasDeclSecurity),
		2 permission_set: blob,
	}

	/// II.22.8
	ClassLayout {
		0 packing_size: u16,
		1 class_size: u32,
		2 parent: table(TypeDef),
	}

	/// II.22.16
	FieldLayout {
		0 offset: u32,
		1 field: table(Field),
	}

	/// II.22.36
	StandAloneSig {
		0 signature: blob,
	}

	/// II.22.12
	EventMap {
		0 parent: table(TypeDef),
		1 first_event: list(Event),
	}

	/// II.22.13
	Event {
		0 flags: flags16(EventAttributes),
		1 name: str,
		2 ty: coded(TypeDefOrRef),
	}

	/// II.22.35
	PropertyMap {
		0 parent: table(TypeDef),
		1 first_property: list(Property),
	}

	/// II.22.34
	Property {
		0 flags: flags16(PropertyAttributes),
		1 name: str,
		2 ty: blob,
	}

	/// II.22.28
	MethodSemantics {
		0 flags: flags16(MethodSemanticsAttributes),
		1 method: table(MethodDef),
		2 association: coded(HasSemantics),
	}

	/// II.22.27
	MethodImpl {
		0 class: table(TypeDef),
		1 method_body: coded(MethodDefOrRef),
		2 method_declaration: coded(MethodDefOrRef),
	}

	/// II.22.31
	ModuleRef {
		0 name: str,
	}

	/// II.22.39
	TypeSpec {
		0 signature: blob,
	}

	/// II.22.22
	ImplMap {
		0 mapping_flags: flags16(PInvokeAttributes),
		1 member_forwarded: coded(MemberForwarded),
		2 import_name: str,
		3 import_scope: table(ModuleRef),
	}

	/// II.22.18
	FieldRVA {
		0 rva: u32,
		1 field: table(Field),
	}

	/// II.22.2
	Assembly {
		0 hash_algorithm: hash,
		1 version: version,
		2 flags: flags32(AssemblyFlags),
		3 public_key: blob,
		4 name: str,
		5 culture: str,
	}

	/// II.22.4
	AssemblyProcessor {
		0 processor: u32,
	}

	/// II.22.3
	AssemblyOS {
		0 platform_id: u32,
		1 major_version: u32,
		2 minor_version: u32,
	}

	/// II.22.5
	AssemblyRef {
		0 version: version,
		1 flags: flags32(AssemblyFlags),
		2 public_key_or_token: blob,
		3 name: str,
		4 culture: str,
		5 hash_value: blob,
	}

	/// II.22.7
	AssemblyRefProcessor {
		0 processor: u32,
		1 assembly_ref: table(AssemblyRef),
	}

	/// II.22.6
	AssemblyRefOS {
		0 platform_id: u32,
		1 major_version: u32,
		2 minor_version: u32,
		3 assembly_ref: table(AssemblyRef),
	}

	/// II.22.19
	File {
		0 flags: flags32(FileAttributes),
		1 name: str,
		2 hash_value: blob,
	}

	/// II.22.14
	ExportedType {
		0 flags: flags32(TypeAttributes),
		1 type_def_id: u32,
		2 name: str,
		3 namespace: str,
		4 implementation: coded(Implementation),
	}

	/// II.22.24
	ManifestResource {
		0 offset: u32,
		1 flags: flags32(ManifestResourceAttributes),
		2 name: str,
		3 implementation: coded(Implementation),
	}

	/// II.22.32
	NestedClass {
		0 nested_class: table(TypeDef),
		1 enclosing_class: table(TypeDef),
	}

	/// II.22.20
	GenericParam {
		0 number: u16,
		1 flags: flags16(GenericParamAttributes),
		2 owner: coded(TypeOrMethodDef),
		3 name: str,
	}

	/// II.22.29
	MethodSpec {
		0 method: coded(MethodDefOrRef),
		1 instantiation: blob,
	}

	/// II.22.21
	GenericParamConstraint {
		0 owner: table(GenericParam),
		1 constraint: coded(TypeDefOrRef),
	}
}

// The range-owning parents. Each row owns the contiguous child range
// [first, next row's first), with the last row extending to the end of the
// child table.

macro_rules! last_of_range {
	($parent: ident, $name: ident, $first: ident, $child: ident) => {
		paste! {
			impl<'l> [<$parent Row>]<'l> {
				/// One past the last owned row of the child table, zero-based.
				pub fn $name(&self) -> Result<u32> {
					let parent_rows = self.scope.tables().table(TableId::$parent).row_count();
					match self.index + 1 < parent_rows {
						true => [<$parent Row>]::at(self.scope, self.index + 1).$first(),
						false => Ok(self.scope.tables().table(TableId::$child).row_count()),
					}
				}
			}
		}
	};
}

last_of_range!(TypeDef, last_field, first_field, Field);
last_of_range!(TypeDef, last_method, first_method, MethodDef);
last_of_range!(MethodDef, last_param, first_param, Param);
last_of_range!(EventMap, last_event, first_event, Event);
last_of_range!(PropertyMap, last_property, first_property, Property);
