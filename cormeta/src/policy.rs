//! The public answer to "what is this type?".
//!
//! A type is either a row in the TypeDef/TypeRef tables or a TypeSpec
//! signature. Queries route to one of eight policies keyed on the token's
//! table or the signature's top-level element code; each policy answers the
//! subset of questions that applies to its shape directly and defers the
//! rest through a recursive resolution step.

use crate::database::Database;
use crate::heaps::Blob;
use crate::indices::coded_index::TypeDefOrRef;
use crate::indices::metadata_token::{TypeDefToken, TypeRefToken};
use crate::relationships::{find_enclosing_class, find_generic_param, find_generic_params};
use crate::resolve::{TypeDefOrSpec, TypeResolver};
use crate::rows::TypeAttributes;
use crate::signatures::{TypeKind, TypeSig};
use crate::tables::TableId;
use crate::{Error, Result};

/// A type, referenced either as a table row or as a signature blob.
#[derive(Debug, Copy, Clone)]
pub enum TypeOrSignature<'l> {
	Token(TypeDefOrRef<'l>),
	Signature(TypeSig<'l>),
}

impl<'l> TypeOrSignature<'l> {
	/// Normalises a TypeDef/TypeRef/TypeSpec token: definition and reference
	/// tokens are kept, TypeSpec tokens are replaced by their signature.
	pub fn from_token(token: TypeDefOrRef<'l>) -> Result<Self> {
		match token.table() {
			TableId::TypeSpec => {
				let spec = crate::indices::metadata_token::TypeSpecToken::try_from(token.token())?;
				Ok(Self::Signature(spec.row()?.signature()?.as_type_sig()))
			},
			_ => Ok(Self::Token(token)),
		}
	}

	pub fn scope(&self) -> &'l Database {
		match self {
			Self::Token(token) => token.scope(),
			Self::Signature(signature) => signature.scope(),
		}
	}
}

impl<'l> From<TypeDefToken<'l>> for TypeOrSignature<'l> {
	fn from(token: TypeDefToken<'l>) -> Self {
		Self::Token(token.into())
	}
}

impl<'l> From<TypeRefToken<'l>> for TypeOrSignature<'l> {
	fn from(token: TypeRefToken<'l>) -> Self {
		Self::Token(token.into())
	}
}

impl<'l> From<Blob<'l>> for TypeOrSignature<'l> {
	fn from(blob: Blob<'l>) -> Self {
		Self::Signature(blob.as_type_sig())
	}
}

impl<'l> From<TypeSig<'l>> for TypeOrSignature<'l> {
	fn from(signature: TypeSig<'l>) -> Self {
		Self::Signature(signature)
	}
}

/// The eight shapes a type reference can take. The set is closed, so the
/// dispatch is a plain enum rather than a trait hierarchy.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypePolicyKind {
	Definition,
	Reference,
	ByRef,
	Array,
	Pointer,
	GenericInstance,
	GenericVariable,
	Specialization,
}

/// Selects the policy for a type. The by-ref check comes first: a by-ref
/// signature is by-ref no matter what it wraps.
pub fn policy_for(ty: &TypeOrSignature<'_>) -> Result<TypePolicyKind> {
	match ty {
		TypeOrSignature::Token(token) => match token.table() {
			TableId::TypeDef => Ok(TypePolicyKind::Definition),
			TableId::TypeRef => Ok(TypePolicyKind::Reference),
			_ => Err(Error::InvalidConversion("token form must be a TypeDef or TypeRef")),
		},
		TypeOrSignature::Signature(signature) => {
			if signature.is_by_ref()? {
				return Ok(TypePolicyKind::ByRef);
			}
			Ok(match signature.get_kind()? {
				TypeKind::GeneralArray | TypeKind::SimpleArray => TypePolicyKind::Array,
				TypeKind::GenericInstance => TypePolicyKind::GenericInstance,
				TypeKind::Pointer => TypePolicyKind::Pointer,
				TypeKind::Variable => TypePolicyKind::GenericVariable,
				_ => TypePolicyKind::Specialization,
			})
		},
	}
}

/// Visibility of a type, decoded from the visibility bits of its flags.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeVisibility {
	NotPublic,
	Public,
	NestedPublic,
	NestedPrivate,
	NestedFamily,
	NestedAssembly,
	NestedFamilyAndAssembly,
	NestedFamilyOrAssembly,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeLayout {
	Auto,
	Sequential,
	Explicit,
}

const PRIMITIVE_NAMES: &[&str] = &[
	"Boolean", "Byte", "Char", "Double", "Int16", "Int32", "Int64", "IntPtr",
	"SByte", "Single", "UInt16", "UInt32", "UInt64", "UIntPtr",
];

/// Category and structural queries over [`TypeOrSignature`] values,
/// parameterised by the caller's resolver.
pub struct TypePolicy<'r, R> {
	resolver: &'r R,
}

impl<'r, R> TypePolicy<'r, R> {
	pub fn new(resolver: &'r R) -> Self {
		Self { resolver }
	}

	fn resolve_definition<'l>(&self, token: TypeDefOrRef<'l>) -> Result<TypeOrSignature<'l>>
	where
		R: TypeResolver<'l>,
	{
		match self.resolver.resolve_type(token)? {
			TypeDefOrSpec::Def(def) => Ok(def.into()),
			TypeDefOrSpec::Spec(spec) => {
				Ok(TypeOrSignature::Signature(spec.row()?.signature()?.as_type_sig()))
			},
		}
	}

	/// The head definition of a generic instance.
	fn resolve_instance_head<'l>(&self, signature: &TypeSig<'l>) -> Result<TypeOrSignature<'l>>
	where
		R: TypeResolver<'l>,
	{
		self.resolve_definition(signature.generic_type()?)
	}

	pub fn is_array<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		Ok(policy_for(ty)? == TypePolicyKind::Array)
	}

	pub fn is_by_ref<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		Ok(policy_for(ty)? == TypePolicyKind::ByRef)
	}

	pub fn is_pointer<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		Ok(policy_for(ty)? == TypePolicyKind::Pointer)
	}

	pub fn is_generic_instance<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		Ok(policy_for(ty)? == TypePolicyKind::GenericInstance)
	}

	pub fn is_generic_parameter<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		Ok(policy_for(ty)? == TypePolicyKind::GenericVariable)
	}

	/// True for the system primitives (`System.Int32` and friends), whether
	/// referenced directly, through a TypeRef, or as a primitive signature.
	pub fn is_primitive<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				let row = TypeDefToken::try_from(token.token())?.row()?;
				Ok(row.namespace()? == "System" && PRIMITIVE_NAMES.contains(&row.name()?))
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				self.is_primitive(&self.resolve_definition(*token)?)
			},
			(TypePolicyKind::Specialization, TypeOrSignature::Signature(signature)) => {
				Ok(signature.get_kind()? == TypeKind::Primitive)
			},
			_ => Ok(false),
		}
	}

	/// True for types declared inside another type.
	pub fn is_nested<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		match self.attributes_opt(ty)? {
			None => Ok(false),
			Some(flags) => {
				Ok((flags & TypeAttributes::VISIBILITY_MASK).bits() > TypeAttributes::PUBLIC.bits())
			},
		}
	}

	pub fn is_interface<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		match self.attributes_opt(ty)? {
			None => Ok(false),
			Some(flags) => Ok((flags & TypeAttributes::CLASS_SEMANTICS_MASK) == TypeAttributes::INTERFACE),
		}
	}

	pub fn is_sealed<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		match self.attributes_opt(ty)? {
			None => Ok(false),
			Some(flags) => Ok(flags.contains(TypeAttributes::SEALED)),
		}
	}

	pub fn is_abstract<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		match self.attributes_opt(ty)? {
			None => Ok(false),
			Some(flags) => Ok(flags.contains(TypeAttributes::ABSTRACT)),
		}
	}

	/// The TypeDef attributes of the type, where it has any: definitions
	/// answer directly, references resolve, generic instances defer to their
	/// head definition.
	pub fn attributes<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<TypeAttributes>
	where
		R: TypeResolver<'l>,
	{
		self.attributes_opt(ty)?
			.ok_or(Error::InvalidConversion("type shape carries no attributes"))
	}

	fn attributes_opt<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<Option<TypeAttributes>>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				Ok(Some(TypeDefToken::try_from(token.token())?.row()?.flags()?))
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				self.attributes_opt(&self.resolve_definition(*token)?)
			},
			(TypePolicyKind::GenericInstance, TypeOrSignature::Signature(signature)) => {
				self.attributes_opt(&self.resolve_instance_head(signature)?)
			},
			(TypePolicyKind::Specialization, TypeOrSignature::Signature(signature)) => {
				match signature.get_kind()? {
					TypeKind::ClassType => {
						self.attributes_opt(&self.resolve_definition(signature.class_type()?)?)
					},
					_ => Ok(None),
				}
			},
			_ => Ok(None),
		}
	}

	pub fn visibility<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<TypeVisibility>
	where
		R: TypeResolver<'l>,
	{
		let flags = self.attributes(ty)?;
		Ok(match (flags & TypeAttributes::VISIBILITY_MASK).bits() {
			0 => TypeVisibility::NotPublic,
			1 => TypeVisibility::Public,
			2 => TypeVisibility::NestedPublic,
			3 => TypeVisibility::NestedPrivate,
			4 => TypeVisibility::NestedFamily,
			5 => TypeVisibility::NestedAssembly,
			6 => TypeVisibility::NestedFamilyAndAssembly,
			_ => TypeVisibility::NestedFamilyOrAssembly,
		})
	}

	pub fn layout<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<TypeLayout>
	where
		R: TypeResolver<'l>,
	{
		let flags = self.attributes(ty)?;
		match (flags & TypeAttributes::LAYOUT_MASK).bits() {
			0x00 => Ok(TypeLayout::Auto),
			0x08 => Ok(TypeLayout::Sequential),
			0x10 => Ok(TypeLayout::Explicit),
			_ => Err(Error::Malformed("invalid type layout bits")),
		}
	}

	/// The type's simple name. Variables name themselves after their
	/// GenericParam row, which requires an annotated signature.
	pub fn primary_name<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<&'l str>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				TypeDefToken::try_from(token.token())?.row()?.name()
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				TypeRefToken::try_from(token.token())?.row()?.name()
			},
			(TypePolicyKind::GenericInstance, TypeOrSignature::Signature(signature)) => {
				self.primary_name(&self.resolve_instance_head(signature)?)
			},
			(TypePolicyKind::ByRef | TypePolicyKind::Array | TypePolicyKind::Pointer, _) => {
				self.primary_name(&self.element_of(ty)?)
			},
			(TypePolicyKind::GenericVariable, TypeOrSignature::Signature(signature)) => {
				let context = signature.variable_context()?;
				let number = signature.variable_number()?;
				find_generic_param(context, number)?.name()
			},
			(TypePolicyKind::Specialization, TypeOrSignature::Signature(signature)) => {
				match signature.get_kind()? {
					TypeKind::ClassType => {
						self.primary_name(&self.resolve_definition(signature.class_type()?)?)
					},
					_ => Err(Error::InvalidConversion("type shape has no name")),
				}
			},
			_ => Err(Error::InvalidConversion("type shape has no name")),
		}
	}

	/// The namespace of the type. Nested definitions report their declaring
	/// type's namespace.
	pub fn namespace_name<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<&'l str>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				let token = TypeDefToken::try_from(token.token())?;
				match find_enclosing_class(token)? {
					Some(declaring) => self.namespace_name(&declaring.into()),
					None => token.row()?.namespace(),
				}
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				TypeRefToken::try_from(token.token())?.row()?.namespace()
			},
			(TypePolicyKind::GenericInstance, TypeOrSignature::Signature(signature)) => {
				self.namespace_name(&self.resolve_instance_head(signature)?)
			},
			(TypePolicyKind::ByRef | TypePolicyKind::Array | TypePolicyKind::Pointer, _) => {
				self.namespace_name(&self.element_of(ty)?)
			},
			(TypePolicyKind::Specialization, TypeOrSignature::Signature(signature)) => {
				match signature.get_kind()? {
					TypeKind::ClassType => {
						self.namespace_name(&self.resolve_definition(signature.class_type()?)?)
					},
					_ => Err(Error::InvalidConversion("type shape has no namespace")),
				}
			},
			_ => Err(Error::InvalidConversion("type shape has no namespace")),
		}
	}

	/// The type a nested definition is declared in, if any.
	pub fn declaring_type<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<Option<TypeOrSignature<'l>>>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				let token = TypeDefToken::try_from(token.token())?;
				Ok(find_enclosing_class(token)?.map(Into::into))
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				self.declaring_type(&self.resolve_definition(*token)?)
			},
			_ => Ok(None),
		}
	}

	/// The base type of a definition (or of whatever a reference or generic
	/// instance resolves to); `None` for `System.Object`, interfaces without
	/// bases, and non-class shapes.
	pub fn base_type<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<Option<TypeOrSignature<'l>>>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				let token = TypeDefToken::try_from(token.token())?;
				match token.row()?.extends()? {
					None => Ok(None),
					Some(extends) => Ok(Some(TypeOrSignature::from_token(extends)?)),
				}
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				self.base_type(&self.resolve_definition(*token)?)
			},
			(TypePolicyKind::GenericInstance, TypeOrSignature::Signature(signature)) => {
				self.base_type(&self.resolve_instance_head(signature)?)
			},
			_ => Ok(None),
		}
	}

	/// A generic instance is visible iff its head definition and all of its
	/// arguments are visible; nested definitions require a visible declaring
	/// type; element shapes defer to their element.
	pub fn is_visible<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				let token = TypeDefToken::try_from(token.token())?;
				if let Some(declaring) = find_enclosing_class(token)? {
					if !self.is_visible(&declaring.into())? {
						return Ok(false);
					}
				}
				Ok(matches!(
					self.visibility(ty)?,
					TypeVisibility::Public | TypeVisibility::NestedPublic
				))
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				self.is_visible(&self.resolve_definition(*token)?)
			},
			(TypePolicyKind::GenericInstance, TypeOrSignature::Signature(signature)) => {
				for argument in signature.generic_arguments()? {
					if !self.is_visible(&argument?.into())? {
						return Ok(false);
					}
				}
				self.is_visible(&self.resolve_instance_head(signature)?)
			},
			(TypePolicyKind::ByRef | TypePolicyKind::Array | TypePolicyKind::Pointer, _) => {
				self.is_visible(&self.element_of(ty)?)
			},
			(TypePolicyKind::GenericVariable, _) => Ok(true),
			(TypePolicyKind::Specialization, TypeOrSignature::Signature(signature)) => {
				match signature.get_kind()? {
					TypeKind::ClassType => {
						self.is_visible(&self.resolve_definition(signature.class_type()?)?)
					},
					_ => Ok(true),
				}
			},
			_ => Ok(true),
		}
	}

	/// The element type of a by-ref, array or pointer shape.
	fn element_of<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<TypeOrSignature<'l>>
	where
		R: TypeResolver<'l>,
	{
		let TypeOrSignature::Signature(signature) = ty else {
			return Err(Error::InvalidConversion("type shape has no element"));
		};

		if signature.is_by_ref()? {
			// Strip the by-ref tag: the element view starts at the type code.
			let offset = signature.seek_to(crate::signatures::TypePart::CrossModuleTag)?;
			return Ok(TypeOrSignature::Signature(TypeSig::with_annotations(
				signature.scope(),
				&signature.bytes()[offset..],
				signature.is_annotated(),
			)));
		}

		match signature.get_kind()? {
			TypeKind::GeneralArray | TypeKind::SimpleArray => {
				Ok(TypeOrSignature::Signature(signature.array_type()?))
			},
			TypeKind::Pointer => Ok(TypeOrSignature::Signature(signature.pointer_type()?)),
			_ => Err(Error::InvalidConversion("type shape has no element")),
		}
	}

	/// The number of generic parameters a definition declares; zero for
	/// anything that is not a generic type definition.
	pub fn generic_parameter_count<'l>(&self, ty: &TypeOrSignature<'l>) -> Result<usize>
	where
		R: TypeResolver<'l>,
	{
		match (policy_for(ty)?, ty) {
			(TypePolicyKind::Definition, TypeOrSignature::Token(token)) => {
				let token = TypeDefToken::try_from(token.token())?;
				Ok(find_generic_params(token.into())?.len())
			},
			(TypePolicyKind::Reference, TypeOrSignature::Token(token)) => {
				self.generic_parameter_count(&self.resolve_definition(*token)?)
			},
			_ => Ok(0),
		}
	}
}
