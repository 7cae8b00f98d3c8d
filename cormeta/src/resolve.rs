use crate::indices::coded_index::TypeDefOrRef;
use crate::indices::metadata_token::{
	FieldToken, MemberRefToken, MethodDefToken, TypeDefToken, TypeSpecToken,
};
use crate::signatures::ElementType;
use crate::Result;

/// The result of resolving a type reference: either a definition or a
/// structural signature, each in the scope that defines it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TypeDefOrSpec<'l> {
	Def(TypeDefToken<'l>),
	Spec(TypeSpecToken<'l>),
}

/// The result of resolving a member reference.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FieldOrMethodDef<'l> {
	Field(FieldToken<'l>),
	MethodDef(MethodDefToken<'l>),
}

/// The abstract resolution operations the core consumes, supplied by the
/// caller. The resolver must outlive any comparison or instantiation that
/// consults it, and may itself raise format errors, which propagate.
pub trait TypeResolver<'l> {
	/// Resolves a TypeDef, TypeRef or TypeSpec token to a definition or a
	/// signature; the identity on TypeDef and TypeSpec. The result may live
	/// in a different scope than the input.
	fn resolve_type(&self, ty: TypeDefOrRef<'l>) -> Result<TypeDefOrSpec<'l>>;

	/// Resolves a MemberRef to the field or method it names.
	///
	/// The result is the *uninstantiated* declaration; callers that need the
	/// instantiated form of a member of a constructed generic type must
	/// re-resolve through the declaring type themselves.
	fn resolve_member(&self, member: MemberRefToken<'l>) -> Result<FieldOrMethodDef<'l>>;

	/// The TypeDef in the system library backing a concrete element type
	/// (`I4`, `STRING`, `OBJECT`, ...). Never called with composite codes
	/// such as `GENERICINST`, nor with sentinels.
	fn resolve_fundamental_type(&self, element: ElementType) -> Result<TypeDefToken<'l>>;
}
