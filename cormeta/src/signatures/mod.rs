//! Recursive-descent, part-addressed readers for the ECMA-335 signature
//! grammars (II.23.2): field, property and method signatures, type
//! signatures, array shapes and custom modifiers.
//!
//! Signature values are lazy views over `(scope, bytes)`; every accessor
//! re-seeks from the front of the view. `seek_to` returns the byte offset at
//! which a grammar part begins, reading (and validating) everything before
//! it; `compute_size` is the authoritative byte length of a signature and is
//! what outer grammars use to advance over nested ones.

use derivative::Derivative;

use cormeta_derive::FromRepr;

use crate::database::Database;
use crate::indices::coded_index::{TypeDefOrRef, TypeOrMethodDef};
use crate::indices::metadata_token::Token;
use crate::tables::TableId;
use crate::{Error, Result};

mod compare;
mod instantiate;

pub use compare::SignatureComparer;
pub use instantiate::{
	requires_instantiation_field, requires_instantiation_method,
	requires_instantiation_property, requires_instantiation_type,
	InstantiationArguments, Instantiator, OwnedFieldSig, OwnedMethodSig,
	OwnedPropertySig, OwnedTypeSig,
};

/// Element type codes (ECMA-335 II.23.1.16).
///
/// `AnnotatedVar`, `AnnotatedMvar` and `CrossModuleTypeReference` are
/// library-private codes chosen from unassigned ranges; they appear only in
/// bytes produced by the signature instantiator and are a format error in
/// metadata read from an image.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum ElementType {
	End = 0x00,
	Void = 0x01,
	Boolean = 0x02,
	Char = 0x03,
	I1 = 0x04,
	U1 = 0x05,
	I2 = 0x06,
	U2 = 0x07,
	I4 = 0x08,
	U4 = 0x09,
	I8 = 0x0a,
	U8 = 0x0b,
	R4 = 0x0c,
	R8 = 0x0d,
	String = 0x0e,
	Ptr = 0x0f,
	ByRef = 0x10,
	ValueType = 0x11,
	Class = 0x12,
	Var = 0x13,
	Array = 0x14,
	GenericInst = 0x15,
	TypedByRef = 0x16,
	I = 0x18,
	U = 0x19,
	FnPtr = 0x1b,
	Object = 0x1c,
	SzArray = 0x1d,
	MVar = 0x1e,
	CModReqd = 0x1f,
	CModOpt = 0x20,
	Internal = 0x21,
	AnnotatedVar = 0x2e,
	AnnotatedMvar = 0x2f,
	Modifier = 0x40,
	Sentinel = 0x41,
	Pinned = 0x45,
	Type = 0x50,
	CustomAttributeBoxedObject = 0x51,
	CustomAttributeField = 0x53,
	CustomAttributeProperty = 0x54,
	CustomAttributeEnum = 0x55,
	CrossModuleTypeReference = 0x5f,
}

impl ElementType {
	/// True for the three instantiator-private codes.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			Self::AnnotatedVar | Self::AnnotatedMvar | Self::CrossModuleTypeReference
		)
	}
}

/// The leading-byte attributes of method and property signatures (II.23.2.1).
pub(crate) mod sig_flags {
	pub const HAS_THIS: u8 = 0x20;
	pub const EXPLICIT_THIS: u8 = 0x40;
	pub const GENERIC: u8 = 0x10;
	pub const CALLING_CONVENTION_MASK: u8 = 0x0F;
	pub const FIELD: u8 = 0x06;
	pub const PROPERTY: u8 = 0x08;
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum CallingConvention {
	Default = 0x00,
	C = 0x01,
	StdCall = 0x02,
	ThisCall = 0x03,
	FastCall = 0x04,
	Varargs = 0x05,
}

fn is_custom_modifier(byte: u8) -> bool {
	byte == ElementType::CModOpt as u8 || byte == ElementType::CModReqd as u8
}

/// A range-checked cursor over signature bytes.
///
/// `annotated` records provenance: only instantiator-produced buffers may
/// contain the private element codes or embedded scope pointers.
pub(crate) struct SigReader<'l> {
	data: &'l [u8],
	position: usize,
	annotated: bool,
}

impl<'l> SigReader<'l> {
	pub fn new(data: &'l [u8], annotated: bool) -> Self {
		Self { data, position: 0, annotated }
	}

	pub fn position(&self) -> usize {
		self.position
	}

	pub fn remaining(&self) -> usize {
		self.data.len() - self.position
	}

	pub fn advance(&mut self, n: usize) -> Result<()> {
		if self.remaining() < n {
			return Err(Error::Malformed("unexpectedly reached the end of a signature"));
		}
		self.position += n;
		Ok(())
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		let byte = self.peek_u8()?;
		self.position += 1;
		Ok(byte)
	}

	pub fn peek_u8(&self) -> Result<u8> {
		self.data.get(self.position).copied()
			.ok_or(Error::Malformed("unexpectedly reached the end of a signature"))
	}

	/// A compressed unsigned integer: 1, 2 or 4 bytes selected by the top
	/// bits of the first byte (`0xxx` / `10xx` / `110x`).
	pub fn read_compressed_u32(&mut self) -> Result<u32> {
		let b0 = self.read_u8()?;
		if b0 & 0x80 == 0 {
			Ok(b0 as u32)
		}
		else if b0 & 0x40 == 0 {
			let b1 = self.read_u8()?;
			Ok((((b0 & 0x3F) as u32) << 8) | b1 as u32)
		}
		else if b0 & 0x20 == 0 {
			let b1 = self.read_u8()?;
			let b2 = self.read_u8()?;
			let b3 = self.read_u8()?;
			Ok((((b0 & 0x1F) as u32) << 24) | ((b1 as u32) << 16) | ((b2 as u32) << 8) | b3 as u32)
		}
		else {
			Err(Error::Malformed("invalid compressed integer"))
		}
	}

	/// A compressed signed integer: the unsigned form rotated right by one
	/// bit through its 7-, 14- or 29-bit width, then sign-extended.
	pub fn read_compressed_i32(&mut self) -> Result<i32> {
		let start = self.position;
		let raw = self.read_compressed_u32()?;
		let width = match self.position - start {
			1 => 7,
			2 => 14,
			_ => 29,
		};

		let rotated = (raw >> 1) | ((raw & 1) << (width - 1));
		let sign_extended = match rotated & (1 << (width - 1)) {
			0 => rotated,
			_ => rotated | (u32::MAX << width),
		};
		Ok(sign_extended as i32)
	}

	pub fn read_element_type(&mut self) -> Result<ElementType> {
		let byte = self.read_u8()?;
		let element = ElementType::from_repr(byte)
			.ok_or(Error::Malformed("unexpected element type"))?;
		if element.is_internal() && !self.annotated {
			return Err(Error::Malformed("internal element type in on-disk metadata"));
		}
		Ok(element)
	}

	/// A TypeDefOrRefOrSpec-encoded token (II.23.2.8): a compressed unsigned
	/// whose low two bits select the table and whose high bits are the
	/// one-based row number. Returns the table and the zero-based index.
	pub fn read_type_def_ref_spec(&mut self) -> Result<(TableId, u32)> {
		let value = self.read_compressed_u32()?;
		let table = match value & 0x03 {
			0x00 => TableId::TypeDef,
			0x01 => TableId::TypeRef,
			0x02 => TableId::TypeSpec,
			_ => return Err(Error::Malformed("unexpected table in type def/ref/spec encoded")),
		};
		match value >> 2 {
			0 => Err(Error::Malformed("null type reference in signature")),
			row => Ok((table, row - 1)),
		}
	}

	/// A scope pointer appended by the instantiator after an annotated
	/// element. Never present in on-disk metadata.
	pub fn read_scope_ptr(&mut self) -> Result<&'l Database> {
		if !self.annotated {
			return Err(Error::Malformed("scope pointer in on-disk metadata"));
		}

		const PTR_SIZE: usize = std::mem::size_of::<usize>();
		if self.remaining() < PTR_SIZE {
			return Err(Error::Malformed("unexpectedly reached the end of a signature"));
		}

		let bytes = &self.data[self.position..self.position + PTR_SIZE];
		self.position += PTR_SIZE;
		let address = usize::from_le_bytes(bytes.try_into().unwrap());

		// SAFETY: pointers are only ever written by `Instantiator<'l>`, which
		// takes them from `&'l Database` references; the `annotated` flag is
		// only set on buffers it produced, and those buffers are tied to `'l`
		// by their owning signature type.
		Ok(unsafe { &*(address as *const Database) })
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		if self.remaining() < 4 {
			return Err(Error::Malformed("unexpectedly reached the end of a signature"));
		}
		let bytes = &self.data[self.position..self.position + 4];
		self.position += 4;
		Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
	}
}

/// The structural category of a type signature.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeKind {
	Unknown,
	Primitive,
	GeneralArray,
	SimpleArray,
	ClassType,
	FunctionPointer,
	GenericInstance,
	Pointer,
	Variable,
}

pub(crate) fn kind_of(element: ElementType) -> TypeKind {
	use ElementType::*;
	match element {
		Void | Boolean | Char | I1 | U1 | I2 | U2 | I4 | U4 | I8 | U8 | R4
		| R8 | I | U | String | Object | TypedByRef => TypeKind::Primitive,
		Array => TypeKind::GeneralArray,
		SzArray => TypeKind::SimpleArray,
		Class | ValueType | CrossModuleTypeReference => TypeKind::ClassType,
		FnPtr => TypeKind::FunctionPointer,
		GenericInst => TypeKind::GenericInstance,
		Ptr => TypeKind::Pointer,
		Var | MVar | AnnotatedVar | AnnotatedMvar => TypeKind::Variable,
		_ => TypeKind::Unknown,
	}
}

macro_rules! define_signature_view {
	($($(#[$meta: meta])* $name: ident),* $(,)?) => {$(
		$(#[$meta])*
		#[derive(Derivative, Copy, Clone)]
		#[derivative(Debug)]
		pub struct $name<'l> {
			#[derivative(Debug = "ignore")]
			scope: &'l Database,
			data: &'l [u8],
			annotated: bool,
		}

		impl<'l> $name<'l> {
			pub fn new(scope: &'l Database, data: &'l [u8]) -> Self {
				Self { scope, data, annotated: false }
			}

			pub(crate) fn with_annotations(scope: &'l Database, data: &'l [u8], annotated: bool) -> Self {
				Self { scope, data, annotated }
			}

			pub fn scope(&self) -> &'l Database {
				self.scope
			}

			/// The view's backing range; may extend past the signature's end.
			pub fn bytes(&self) -> &'l [u8] {
				self.data
			}

			#[allow(dead_code)]
			pub(crate) fn is_annotated(&self) -> bool {
				self.annotated
			}

			fn reader_at(&self, offset: usize) -> SigReader<'l> {
				let mut reader = SigReader::new(self.data, self.annotated);
				reader.position = offset;
				reader
			}

			#[allow(dead_code)]
			fn subview(&self, offset: usize) -> TypeSig<'l> {
				TypeSig::with_annotations(self.scope, &self.data[offset..], self.annotated)
			}
		}
	)*};
}

define_signature_view! {
	/// An **ArrayShape** item (II.23.2.13): rank, sizes and lower bounds.
	ArrayShapeSig,
	/// A **CustomMod** item (II.23.2.7): an optional/required modifier tag
	/// and the modifier type.
	CustomModSig,
	/// A **FieldSig** (II.23.2.4): the `FIELD` tag followed by a type.
	FieldSig,
	/// A **PropertySig** (II.23.2.5): the `PROPERTY` tag (optionally with
	/// `HASTHIS`), a parameter count, the property type and the parameters.
	PropertySig,
	/// A **MethodDefSig**, **MethodRefSig** or **StandAloneMethodSig**
	/// (II.23.2.1-3).
	MethodSig,
	/// The unified type grammar (II.23.2.10/11/12/14 and the type portion of
	/// field and property signatures).
	TypeSig,
}

/// Grammar positions of an array shape.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum ArrayShapePart {
	Begin,
	Rank,
	NumSizes,
	FirstSize,
	NumLowBounds,
	FirstLowBound,
	End,
}

impl<'l> ArrayShapeSig<'l> {
	pub fn compute_size(&self) -> Result<usize> {
		self.seek_to(ArrayShapePart::End)
	}

	pub fn rank(&self) -> Result<u32> {
		self.reader_at(self.seek_to(ArrayShapePart::Rank)?).read_compressed_u32()
	}

	pub fn size_count(&self) -> Result<u32> {
		self.reader_at(self.seek_to(ArrayShapePart::NumSizes)?).read_compressed_u32()
	}

	pub fn sizes(&self) -> Result<CompressedU32Iter<'l>> {
		Ok(CompressedU32Iter {
			reader: self.reader_at(self.seek_to(ArrayShapePart::FirstSize)?),
			remaining: self.size_count()?,
		})
	}

	pub fn low_bound_count(&self) -> Result<u32> {
		self.reader_at(self.seek_to(ArrayShapePart::NumLowBounds)?).read_compressed_u32()
	}

	pub fn low_bounds(&self) -> Result<CompressedI32Iter<'l>> {
		Ok(CompressedI32Iter {
			reader: self.reader_at(self.seek_to(ArrayShapePart::FirstLowBound)?),
			remaining: self.low_bound_count()?,
		})
	}

	pub fn seek_to(&self, part: ArrayShapePart) -> Result<usize> {
		use ArrayShapePart as Part;
		let mut reader = self.reader_at(0);

		if part > Part::Rank {
			reader.read_compressed_u32()?;
		}

		let mut size_count = 0;
		if part > Part::NumSizes {
			size_count = reader.read_compressed_u32()?;
		}

		if part > Part::FirstSize {
			for _ in 0..size_count {
				reader.read_compressed_u32()?;
			}
		}

		let mut low_bound_count = 0;
		if part > Part::NumLowBounds {
			low_bound_count = reader.read_compressed_u32()?;
		}

		if part > Part::FirstLowBound {
			for _ in 0..low_bound_count {
				reader.read_compressed_i32()?;
			}
		}

		Ok(reader.position())
	}
}

/// Grammar positions of a custom modifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum CustomModPart {
	Begin,
	ReqOptFlag,
	Type,
	End,
}

impl<'l> CustomModSig<'l> {
	pub fn compute_size(&self) -> Result<usize> {
		self.seek_to(CustomModPart::End)
	}

	pub fn is_optional(&self) -> Result<bool> {
		let offset = self.seek_to(CustomModPart::ReqOptFlag)?;
		Ok(self.reader_at(offset).peek_u8()? == ElementType::CModOpt as u8)
	}

	pub fn is_required(&self) -> Result<bool> {
		let offset = self.seek_to(CustomModPart::ReqOptFlag)?;
		Ok(self.reader_at(offset).peek_u8()? == ElementType::CModReqd as u8)
	}

	/// The modifier type, as a TypeDef, TypeRef or TypeSpec token.
	pub fn ty(&self) -> Result<TypeDefOrRef<'l>> {
		let mut reader = self.reader_at(self.seek_to(CustomModPart::Type)?);
		let (table, index) = reader.read_type_def_ref_spec()?;
		TypeDefOrRef::try_from(Token::new(self.scope, table, index))
	}

	pub fn seek_to(&self, part: CustomModPart) -> Result<usize> {
		use CustomModPart as Part;
		let mut reader = self.reader_at(0);

		if part > Part::ReqOptFlag {
			let tag = reader.read_u8()?;
			if !is_custom_modifier(tag) {
				return Err(Error::Malformed("invalid custom modifier tag"));
			}
		}

		if part > Part::Type {
			reader.read_type_def_ref_spec()?;
		}

		Ok(reader.position())
	}
}

/// Grammar positions of a field signature.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum FieldPart {
	Begin,
	FieldTag,
	Type,
	End,
}

impl<'l> FieldSig<'l> {
	pub fn compute_size(&self) -> Result<usize> {
		self.seek_to(FieldPart::End)
	}

	pub fn ty(&self) -> Result<TypeSig<'l>> {
		Ok(self.subview(self.seek_to(FieldPart::Type)?))
	}

	pub fn seek_to(&self, part: FieldPart) -> Result<usize> {
		use FieldPart as Part;
		let mut reader = self.reader_at(0);

		if part > Part::FieldTag {
			if reader.read_u8()? & sig_flags::CALLING_CONVENTION_MASK != sig_flags::FIELD {
				return Err(Error::Malformed("invalid field signature tag"));
			}
		}

		if part > Part::Type {
			reader.advance(self.subview(reader.position()).compute_size()?)?;
		}

		Ok(reader.position())
	}
}

/// Grammar positions of a property signature.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PropertyPart {
	Begin,
	PropertyTag,
	ParameterCount,
	Type,
	FirstParameter,
	End,
}

impl<'l> PropertySig<'l> {
	pub fn compute_size(&self) -> Result<usize> {
		self.seek_to(PropertyPart::End)
	}

	pub fn has_this(&self) -> Result<bool> {
		let offset = self.seek_to(PropertyPart::PropertyTag)?;
		Ok(self.reader_at(offset).peek_u8()? & sig_flags::HAS_THIS != 0)
	}

	pub fn parameter_count(&self) -> Result<u32> {
		self.reader_at(self.seek_to(PropertyPart::ParameterCount)?).read_compressed_u32()
	}

	/// The type of the property itself.
	pub fn ty(&self) -> Result<TypeSig<'l>> {
		Ok(self.subview(self.seek_to(PropertyPart::Type)?))
	}

	pub fn parameters(&self) -> Result<TypeSigIter<'l>> {
		Ok(TypeSigIter {
			scope: self.scope,
			data: self.data,
			offset: self.seek_to(PropertyPart::FirstParameter)?,
			remaining: self.parameter_count()?,
			annotated: self.annotated,
			stop_at_sentinel: false,
		})
	}

	pub fn seek_to(&self, part: PropertyPart) -> Result<usize> {
		use PropertyPart as Part;
		let mut reader = self.reader_at(0);

		if part > Part::PropertyTag {
			let tag = reader.read_u8()?;
			if tag & !sig_flags::HAS_THIS != sig_flags::PROPERTY {
				return Err(Error::Malformed("invalid property signature tag"));
			}
		}

		let mut parameters = 0;
		if part > Part::ParameterCount {
			parameters = reader.read_compressed_u32()?;
		}

		if part > Part::Type {
			reader.advance(self.subview(reader.position()).compute_size()?)?;
		}

		if part > Part::FirstParameter {
			for _ in 0..parameters {
				reader.advance(self.subview(reader.position()).compute_size()?)?;
			}
		}

		Ok(reader.position())
	}
}

/// Grammar positions of a method signature.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum MethodPart {
	Begin,
	TypeTag,
	GenParamCount,
	ParamCount,
	RetType,
	FirstParam,
	Sentinel,
	FirstVarargParam,
	End,
}

impl<'l> MethodSig<'l> {
	pub fn compute_size(&self) -> Result<usize> {
		self.seek_to(MethodPart::End)
	}

	fn tag(&self) -> Result<u8> {
		self.reader_at(self.seek_to(MethodPart::TypeTag)?).peek_u8()
	}

	pub fn has_this(&self) -> Result<bool> {
		Ok(self.tag()? & sig_flags::HAS_THIS != 0)
	}

	pub fn has_explicit_this(&self) -> Result<bool> {
		Ok(self.tag()? & sig_flags::EXPLICIT_THIS != 0)
	}

	pub fn calling_convention(&self) -> Result<CallingConvention> {
		CallingConvention::from_repr(self.tag()? & sig_flags::CALLING_CONVENTION_MASK)
			.ok_or(Error::Malformed("invalid calling convention"))
	}

	pub fn is_generic(&self) -> Result<bool> {
		Ok(self.tag()? & sig_flags::GENERIC != 0)
	}

	pub fn generic_parameter_count(&self) -> Result<u32> {
		match self.is_generic()? {
			false => Ok(0),
			true => self.reader_at(self.seek_to(MethodPart::GenParamCount)?).read_compressed_u32(),
		}
	}

	/// The declared parameter count, including any vararg tail.
	pub fn parameter_count(&self) -> Result<u32> {
		self.reader_at(self.seek_to(MethodPart::ParamCount)?).read_compressed_u32()
	}

	pub fn return_type(&self) -> Result<TypeSig<'l>> {
		Ok(self.subview(self.seek_to(MethodPart::RetType)?))
	}

	/// The parameters before any `SENTINEL` byte.
	pub fn parameters(&self) -> Result<TypeSigIter<'l>> {
		Ok(TypeSigIter {
			scope: self.scope,
			data: self.data,
			offset: self.seek_to(MethodPart::FirstParam)?,
			remaining: self.parameter_count()?,
			annotated: self.annotated,
			stop_at_sentinel: true,
		})
	}

	fn declared_parameter_count(&self) -> Result<u32> {
		let mut count = 0;
		for parameter in self.parameters()? {
			parameter?;
			count += 1;
		}
		Ok(count)
	}

	/// The parameters following the `SENTINEL` byte, if any.
	pub fn vararg_parameters(&self) -> Result<TypeSigIter<'l>> {
		Ok(TypeSigIter {
			scope: self.scope,
			data: self.data,
			offset: self.seek_to(MethodPart::FirstVarargParam)?,
			remaining: self.parameter_count()? - self.declared_parameter_count()?,
			annotated: self.annotated,
			stop_at_sentinel: false,
		})
	}

	pub fn seek_to(&self, part: MethodPart) -> Result<usize> {
		use MethodPart as Part;
		let mut reader = self.reader_at(0);

		let mut tag = 0;
		if part > Part::TypeTag {
			tag = reader.read_u8()?;
		}

		if part == Part::GenParamCount && tag & sig_flags::GENERIC == 0 {
			return Err(Error::Malformed("method signature is not generic"));
		}

		if part > Part::GenParamCount && tag & sig_flags::GENERIC != 0 {
			reader.read_compressed_u32()?;
		}

		let mut parameters = 0;
		if part > Part::ParamCount {
			parameters = reader.read_compressed_u32()?;
		}

		if part > Part::RetType {
			reader.advance(self.subview(reader.position()).compute_size()?)?;
		}

		let mut parameters_read = 0;
		if part > Part::FirstParam {
			while parameters_read < parameters
				&& reader.peek_u8().ok() != Some(ElementType::Sentinel as u8)
			{
				reader.advance(self.subview(reader.position()).compute_size()?)?;
				parameters_read += 1;
			}
		}

		if part > Part::Sentinel
			&& reader.remaining() > 0
			&& reader.peek_u8()? == ElementType::Sentinel as u8
		{
			reader.read_u8()?;
		}

		if part > Part::FirstVarargParam {
			for _ in parameters_read..parameters {
				reader.advance(self.subview(reader.position()).compute_size()?)?;
			}
		}

		Ok(reader.position())
	}
}

/// Grammar positions of a type signature. Positions past `TypeCode` apply
/// only to the kind they belong to; seeking to a part of another kind fails.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum TypePart {
	Begin,
	FirstCustomMod,
	ByRefTag,
	CrossModuleTag,
	TypeCode,
	ArrayType,
	ArrayShape,
	SzArrayType,
	ClassToken,
	ClassScope,
	FnPtrType,
	GenericInstTypeCode,
	GenericInstToken,
	GenericInstScope,
	GenericInstArgCount,
	FirstGenericInstArg,
	PointerType,
	VariableNumber,
	VariableContext,
	End,
}

impl TypePart {
	fn kind(&self) -> Option<TypeKind> {
		match self {
			Self::ArrayType | Self::ArrayShape => Some(TypeKind::GeneralArray),
			Self::SzArrayType => Some(TypeKind::SimpleArray),
			Self::ClassToken | Self::ClassScope => Some(TypeKind::ClassType),
			Self::FnPtrType => Some(TypeKind::FunctionPointer),
			Self::GenericInstTypeCode
			| Self::GenericInstToken
			| Self::GenericInstScope
			| Self::GenericInstArgCount
			| Self::FirstGenericInstArg => Some(TypeKind::GenericInstance),
			Self::PointerType => Some(TypeKind::Pointer),
			Self::VariableNumber | Self::VariableContext => Some(TypeKind::Variable),
			_ => None,
		}
	}
}

impl<'l> TypeSig<'l> {
	pub fn compute_size(&self) -> Result<usize> {
		self.seek_to(TypePart::End)
	}

	pub fn seek_to(&self, part: TypePart) -> Result<usize> {
		use TypePart as Part;
		let mut reader = self.reader_at(0);

		if part > Part::FirstCustomMod {
			while reader.peek_u8().map(is_custom_modifier).unwrap_or(false) {
				reader.advance(self.custom_mod_at(reader.position()).compute_size()?)?;
			}
		}

		if part > Part::ByRefTag && reader.peek_u8()? == ElementType::ByRef as u8 {
			reader.read_u8()?;
		}

		// The instantiator injects a tag in front of cross-module class
		// references; it is skipped everywhere except when seeking to it.
		let mut cross_module = false;
		if part > Part::CrossModuleTag {
			cross_module = self.annotated
				&& reader.peek_u8()? == ElementType::CrossModuleTypeReference as u8;
			if cross_module {
				reader.read_u8()?;
			}
		}

		if part > Part::TypeCode {
			let element = reader.read_element_type()?;
			let kind = kind_of(element);

			if let Some(required) = part.kind() {
				if required != kind {
					return Err(Error::OutOfRange("signature part does not apply to this kind"));
				}
			}

			match kind {
				TypeKind::Primitive => {},
				TypeKind::GeneralArray => {
					if part > Part::ArrayType {
						reader.advance(self.subview(reader.position()).compute_size()?)?;
					}
					if part > Part::ArrayShape {
						reader.advance(self.array_shape_at(reader.position()).compute_size()?)?;
					}
				},
				TypeKind::SimpleArray => {
					if part > Part::SzArrayType {
						reader.advance(self.subview(reader.position()).compute_size()?)?;
					}
				},
				TypeKind::ClassType => {
					if part > Part::ClassToken {
						reader.read_type_def_ref_spec()?;
					}
					if part > Part::ClassScope && cross_module {
						reader.read_scope_ptr()?;
					}
				},
				TypeKind::FunctionPointer => {
					if part > Part::FnPtrType {
						let method = MethodSig::with_annotations(
							self.scope,
							&self.data[reader.position()..],
							self.annotated,
						);
						reader.advance(method.compute_size()?)?;
					}
				},
				TypeKind::GenericInstance => {
					if part > Part::GenericInstTypeCode {
						reader.read_u8()?;
					}
					if part > Part::GenericInstToken {
						reader.read_type_def_ref_spec()?;
					}
					if part > Part::GenericInstScope && cross_module {
						reader.read_scope_ptr()?;
					}
					let mut arguments = 0;
					if part > Part::GenericInstArgCount {
						arguments = reader.read_compressed_u32()?;
					}
					if part > Part::FirstGenericInstArg {
						for _ in 0..arguments {
							reader.advance(self.subview(reader.position()).compute_size()?)?;
						}
					}
				},
				TypeKind::Pointer => {
					if part > Part::PointerType {
						reader.advance(self.subview(reader.position()).compute_size()?)?;
					}
				},
				TypeKind::Variable => {
					if part > Part::VariableNumber {
						reader.read_compressed_u32()?;
					}
					let is_annotated_variable = element == ElementType::AnnotatedVar
						|| element == ElementType::AnnotatedMvar;
					if part > Part::VariableContext && is_annotated_variable {
						reader.read_u32()?;
						reader.read_scope_ptr()?;
					}
				},
				TypeKind::Unknown => {
					return Err(Error::Malformed("unexpected element type"));
				},
			}
		}

		Ok(reader.position())
	}

	fn custom_mod_at(&self, offset: usize) -> CustomModSig<'l> {
		CustomModSig::with_annotations(self.scope, &self.data[offset..], self.annotated)
	}

	fn array_shape_at(&self, offset: usize) -> ArrayShapeSig<'l> {
		ArrayShapeSig::with_annotations(self.scope, &self.data[offset..], self.annotated)
	}

	/// The element type code of this signature, after custom modifiers, the
	/// by-ref tag and any cross-module tag. Codes outside the defined set
	/// yield [`ElementType::End`] (and a kind of [`TypeKind::Unknown`]).
	pub fn element_type(&self) -> Result<ElementType> {
		let offset = self.seek_to(TypePart::TypeCode)?;
		let byte = self.reader_at(offset).peek_u8()?;
		match ElementType::from_repr(byte) {
			None => Ok(ElementType::End),
			Some(element) if element.is_internal() && !self.annotated => {
				Err(Error::Malformed("internal element type in on-disk metadata"))
			},
			Some(element) => Ok(element),
		}
	}

	pub fn get_kind(&self) -> Result<TypeKind> {
		Ok(kind_of(self.element_type()?))
	}

	pub fn is_kind(&self, kind: TypeKind) -> Result<bool> {
		Ok(self.get_kind()? == kind)
	}

	fn expect_kind(&self, kind: TypeKind) -> Result<()> {
		match self.get_kind()? == kind {
			true => Ok(()),
			false => Err(Error::InvalidConversion("type signature kind mismatch")),
		}
	}

	pub fn is_cross_module_type_reference(&self) -> Result<bool> {
		let offset = self.seek_to(TypePart::CrossModuleTag)?;
		Ok(self.annotated
			&& self.data.get(offset).copied() == Some(ElementType::CrossModuleTypeReference as u8))
	}

	pub fn custom_modifiers(&self) -> Result<CustomModIter<'l>> {
		Ok(CustomModIter {
			scope: self.scope,
			data: self.data,
			offset: self.seek_to(TypePart::FirstCustomMod)?,
			annotated: self.annotated,
			failed: false,
		})
	}

	pub fn is_by_ref(&self) -> Result<bool> {
		let offset = self.seek_to(TypePart::ByRefTag)?;
		Ok(self.data.get(offset).copied() == Some(ElementType::ByRef as u8))
	}

	pub fn is_primitive(&self) -> Result<bool> {
		Ok(self.get_kind()? == TypeKind::Primitive)
	}

	/// The primitive code, for primitive signatures.
	pub fn primitive_type(&self) -> Result<ElementType> {
		self.expect_kind(TypeKind::Primitive)?;
		self.element_type()
	}

	pub fn is_general_array(&self) -> Result<bool> {
		Ok(self.element_type()? == ElementType::Array)
	}

	pub fn is_simple_array(&self) -> Result<bool> {
		Ok(self.element_type()? == ElementType::SzArray)
	}

	/// The element type of an `ARRAY` or `SZARRAY` signature.
	pub fn array_type(&self) -> Result<TypeSig<'l>> {
		let offset = match self.get_kind()? {
			TypeKind::GeneralArray => self.seek_to(TypePart::ArrayType)?,
			TypeKind::SimpleArray => self.seek_to(TypePart::SzArrayType)?,
			_ => return Err(Error::InvalidConversion("type signature kind mismatch")),
		};
		Ok(self.subview(offset))
	}

	/// The shape of an `ARRAY` signature.
	pub fn array_shape(&self) -> Result<ArrayShapeSig<'l>> {
		self.expect_kind(TypeKind::GeneralArray)?;
		Ok(self.array_shape_at(self.seek_to(TypePart::ArrayShape)?))
	}

	pub fn is_class_type(&self) -> Result<bool> {
		Ok(self.element_type()? == ElementType::Class)
	}

	pub fn is_value_type(&self) -> Result<bool> {
		Ok(self.element_type()? == ElementType::ValueType)
	}

	/// The referenced type of a `CLASS`/`VALUETYPE` signature. For
	/// cross-module references the token's scope is the annotated one.
	pub fn class_type(&self) -> Result<TypeDefOrRef<'l>> {
		self.expect_kind(TypeKind::ClassType)?;

		let scope = match self.is_cross_module_type_reference()? {
			false => self.scope,
			true => self.reader_at(self.seek_to(TypePart::ClassScope)?).read_scope_ptr()?,
		};

		let mut reader = self.reader_at(self.seek_to(TypePart::ClassToken)?);
		let (table, index) = reader.read_type_def_ref_spec()?;
		TypeDefOrRef::try_from(Token::new(scope, table, index))
	}

	pub fn is_function_pointer(&self) -> Result<bool> {
		Ok(self.element_type()? == ElementType::FnPtr)
	}

	pub fn function_type(&self) -> Result<MethodSig<'l>> {
		self.expect_kind(TypeKind::FunctionPointer)?;
		let offset = self.seek_to(TypePart::FnPtrType)?;
		Ok(MethodSig::with_annotations(self.scope, &self.data[offset..], self.annotated))
	}

	pub fn is_generic_instance(&self) -> Result<bool> {
		Ok(self.element_type()? == ElementType::GenericInst)
	}

	pub fn is_generic_class_type_instance(&self) -> Result<bool> {
		self.expect_kind(TypeKind::GenericInstance)?;
		let offset = self.seek_to(TypePart::GenericInstTypeCode)?;
		Ok(self.reader_at(offset).peek_u8()? == ElementType::Class as u8)
	}

	pub fn is_generic_value_type_instance(&self) -> Result<bool> {
		self.expect_kind(TypeKind::GenericInstance)?;
		let offset = self.seek_to(TypePart::GenericInstTypeCode)?;
		Ok(self.reader_at(offset).peek_u8()? == ElementType::ValueType as u8)
	}

	/// The generic type definition a `GENERICINST` signature instantiates.
	pub fn generic_type(&self) -> Result<TypeDefOrRef<'l>> {
		self.expect_kind(TypeKind::GenericInstance)?;

		let scope = match self.is_cross_module_type_reference()? {
			false => self.scope,
			true => self.reader_at(self.seek_to(TypePart::GenericInstScope)?).read_scope_ptr()?,
		};

		let mut reader = self.reader_at(self.seek_to(TypePart::GenericInstToken)?);
		let (table, index) = reader.read_type_def_ref_spec()?;
		TypeDefOrRef::try_from(Token::new(scope, table, index))
	}

	pub fn generic_argument_count(&self) -> Result<u32> {
		self.expect_kind(TypeKind::GenericInstance)?;
		self.reader_at(self.seek_to(TypePart::GenericInstArgCount)?).read_compressed_u32()
	}

	pub fn generic_arguments(&self) -> Result<TypeSigIter<'l>> {
		Ok(TypeSigIter {
			scope: self.scope,
			data: self.data,
			offset: self.seek_to(TypePart::FirstGenericInstArg)?,
			remaining: self.generic_argument_count()?,
			annotated: self.annotated,
			stop_at_sentinel: false,
		})
	}

	pub fn is_pointer(&self) -> Result<bool> {
		Ok(self.element_type()? == ElementType::Ptr)
	}

	pub fn pointer_type(&self) -> Result<TypeSig<'l>> {
		self.expect_kind(TypeKind::Pointer)?;
		Ok(self.subview(self.seek_to(TypePart::PointerType)?))
	}

	/// True for `VAR` and annotated `VAR` elements (type variables).
	pub fn is_class_variable(&self) -> Result<bool> {
		let element = self.element_type()?;
		Ok(element == ElementType::Var || element == ElementType::AnnotatedVar)
	}

	/// True for `MVAR` and annotated `MVAR` elements (method variables).
	pub fn is_method_variable(&self) -> Result<bool> {
		let element = self.element_type()?;
		Ok(element == ElementType::MVar || element == ElementType::AnnotatedMvar)
	}

	pub fn variable_number(&self) -> Result<u32> {
		self.expect_kind(TypeKind::Variable)?;
		self.reader_at(self.seek_to(TypePart::VariableNumber)?).read_compressed_u32()
	}

	/// The type or method that owns an annotated variable.
	pub fn variable_context(&self) -> Result<TypeOrMethodDef<'l>> {
		self.expect_kind(TypeKind::Variable)?;

		let element = self.element_type()?;
		if !element.is_internal() {
			return Err(Error::InvalidConversion("variable carries no context annotation"));
		}

		let mut reader = self.reader_at(self.seek_to(TypePart::VariableContext)?);
		let value = reader.read_u32()?;
		let scope = reader.read_scope_ptr()?;
		let token = Token::from_wire(scope, value)?
			.ok_or(Error::Malformed("null variable context annotation"))?;
		TypeOrMethodDef::try_from(token)
	}
}

/// A lazy forward iterator over a counted sequence of type signatures,
/// optionally stopping early at a `SENTINEL` byte.
pub struct TypeSigIter<'l> {
	scope: &'l Database,
	data: &'l [u8],
	offset: usize,
	remaining: u32,
	annotated: bool,
	stop_at_sentinel: bool,
}

impl<'l> Iterator for TypeSigIter<'l> {
	type Item = Result<TypeSig<'l>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.remaining == 0 {
			return None;
		}

		if self.stop_at_sentinel
			&& self.data.get(self.offset).copied() == Some(ElementType::Sentinel as u8)
		{
			self.remaining = 0;
			return None;
		}

		let signature = TypeSig::with_annotations(self.scope, &self.data[self.offset..], self.annotated);
		match signature.compute_size() {
			Err(error) => {
				self.remaining = 0;
				Some(Err(error))
			},
			Ok(size) => {
				self.offset += size;
				self.remaining -= 1;
				Some(Ok(signature))
			},
		}
	}
}

/// A lazy iterator over a custom-modifier sequence; the sequence ends at the
/// first byte that is not `CMOD_OPT`/`CMOD_REQD`.
pub struct CustomModIter<'l> {
	scope: &'l Database,
	data: &'l [u8],
	offset: usize,
	annotated: bool,
	failed: bool,
}

impl<'l> Iterator for CustomModIter<'l> {
	type Item = Result<CustomModSig<'l>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.failed || !self.data.get(self.offset).copied().map(is_custom_modifier).unwrap_or(false) {
			return None;
		}

		let modifier = CustomModSig::with_annotations(self.scope, &self.data[self.offset..], self.annotated);
		match modifier.compute_size() {
			Err(error) => {
				self.failed = true;
				Some(Err(error))
			},
			Ok(size) => {
				self.offset += size;
				Some(Ok(modifier))
			},
		}
	}
}

/// A lazy iterator over a counted sequence of compressed unsigned integers.
pub struct CompressedU32Iter<'l> {
	reader: SigReader<'l>,
	remaining: u32,
}

impl Iterator for CompressedU32Iter<'_> {
	type Item = Result<u32>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.remaining == 0 {
			return None;
		}
		self.remaining -= 1;
		match self.reader.read_compressed_u32() {
			Ok(value) => Some(Ok(value)),
			Err(error) => {
				self.remaining = 0;
				Some(Err(error))
			},
		}
	}
}

/// A lazy iterator over a counted sequence of compressed signed integers.
pub struct CompressedI32Iter<'l> {
	reader: SigReader<'l>,
	remaining: u32,
}

impl Iterator for CompressedI32Iter<'_> {
	type Item = Result<i32>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.remaining == 0 {
			return None;
		}
		self.remaining -= 1;
		match self.reader.read_compressed_i32() {
			Ok(value) => Some(Ok(value)),
			Err(error) => {
				self.remaining = 0;
				Some(Err(error))
			},
		}
	}
}
