//! Structural signature equivalence per ECMA-335 II.8.6.1.6.

use crate::indices::coded_index::TypeDefOrRef;
use crate::resolve::{TypeDefOrSpec, TypeResolver};
use crate::Result;

use super::{
	ArrayShapeSig, CustomModSig, FieldSig, MethodSig, PropertySig, TypeKind,
	TypeSig, TypeSigIter,
};

/// An equivalence comparer for metadata signatures.
///
/// Class references are compared through the resolver: two references are
/// equal iff they resolve to the same TypeDef in the same scope, or to
/// TypeSpecs whose underlying type signatures are themselves equivalent.
pub struct SignatureComparer<'r, R> {
	resolver: &'r R,
}

impl<'r, R> SignatureComparer<'r, R> {
	pub fn new(resolver: &'r R) -> Self {
		Self { resolver }
	}

	pub fn equals_array_shape<'l>(&self, lhs: &ArrayShapeSig<'l>, rhs: &ArrayShapeSig<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		if lhs.rank()? != rhs.rank()? {
			return Ok(false);
		}

		let (mut a, mut b) = (lhs.sizes()?, rhs.sizes()?);
		loop {
			match (a.next().transpose()?, b.next().transpose()?) {
				(None, None) => break,
				(Some(x), Some(y)) if x == y => continue,
				_ => return Ok(false),
			}
		}

		let (mut a, mut b) = (lhs.low_bounds()?, rhs.low_bounds()?);
		loop {
			match (a.next().transpose()?, b.next().transpose()?) {
				(None, None) => break,
				(Some(x), Some(y)) if x == y => continue,
				_ => return Ok(false),
			}
		}

		Ok(true)
	}

	pub fn equals_custom_modifier<'l>(&self, lhs: &CustomModSig<'l>, rhs: &CustomModSig<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		if lhs.is_optional()? != rhs.is_optional()? {
			return Ok(false);
		}
		self.equals_class_reference(lhs.ty()?, rhs.ty()?)
	}

	pub fn equals_field<'l>(&self, lhs: &FieldSig<'l>, rhs: &FieldSig<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		self.equals_type(&lhs.ty()?, &rhs.ty()?)
	}

	pub fn equals_method<'l>(&self, lhs: &MethodSig<'l>, rhs: &MethodSig<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		if lhs.calling_convention()? != rhs.calling_convention()? {
			return Ok(false);
		}

		if lhs.has_this()? != rhs.has_this()? {
			return Ok(false);
		}

		if lhs.has_explicit_this()? != rhs.has_explicit_this()? {
			return Ok(false);
		}

		if lhs.is_generic()? != rhs.is_generic()? {
			return Ok(false);
		}

		if lhs.generic_parameter_count()? != rhs.generic_parameter_count()? {
			return Ok(false);
		}

		// The parameter counts are checked implicitly by the range compare.
		if !self.equals_type_range(lhs.parameters()?, rhs.parameters()?)? {
			return Ok(false);
		}

		self.equals_type(&lhs.return_type()?, &rhs.return_type()?)
	}

	pub fn equals_property<'l>(&self, lhs: &PropertySig<'l>, rhs: &PropertySig<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		if lhs.has_this()? != rhs.has_this()? {
			return Ok(false);
		}

		if !self.equals_type_range(lhs.parameters()?, rhs.parameters()?)? {
			return Ok(false);
		}

		self.equals_type(&lhs.ty()?, &rhs.ty()?)
	}

	pub fn equals_type<'l>(&self, lhs: &TypeSig<'l>, rhs: &TypeSig<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		let kind = lhs.get_kind()?;
		if kind != rhs.get_kind()? || kind == TypeKind::Unknown {
			return Ok(false);
		}

		match kind {
			TypeKind::Primitive => Ok(lhs.primitive_type()? == rhs.primitive_type()?),

			TypeKind::GeneralArray => {
				if !self.equals_type(&lhs.array_type()?, &rhs.array_type()?)? {
					return Ok(false);
				}
				self.equals_array_shape(&lhs.array_shape()?, &rhs.array_shape()?)
			},

			TypeKind::SimpleArray => self.equals_type(&lhs.array_type()?, &rhs.array_type()?),

			TypeKind::ClassType => {
				if lhs.is_class_type()? != rhs.is_class_type()? {
					return Ok(false);
				}
				self.equals_class_reference(lhs.class_type()?, rhs.class_type()?)
			},

			TypeKind::FunctionPointer => {
				self.equals_method(&lhs.function_type()?, &rhs.function_type()?)
			},

			TypeKind::GenericInstance => {
				if lhs.is_generic_class_type_instance()? != rhs.is_generic_class_type_instance()? {
					return Ok(false);
				}

				if !self.equals_class_reference(lhs.generic_type()?, rhs.generic_type()?)? {
					return Ok(false);
				}

				if lhs.generic_argument_count()? != rhs.generic_argument_count()? {
					return Ok(false);
				}

				self.equals_type_range(lhs.generic_arguments()?, rhs.generic_arguments()?)
			},

			TypeKind::Pointer => self.equals_type(&lhs.pointer_type()?, &rhs.pointer_type()?),

			TypeKind::Variable => {
				if lhs.is_class_variable()? != rhs.is_class_variable()? {
					return Ok(false);
				}
				Ok(lhs.variable_number()? == rhs.variable_number()?)
			},

			TypeKind::Unknown => Ok(false),
		}
	}

	fn equals_type_range<'l>(&self, lhs: TypeSigIter<'l>, rhs: TypeSigIter<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		let (mut lhs, mut rhs) = (lhs, rhs);
		loop {
			match (lhs.next().transpose()?, rhs.next().transpose()?) {
				(None, None) => return Ok(true),
				(Some(a), Some(b)) => {
					if !self.equals_type(&a, &b)? {
						return Ok(false);
					}
				},
				_ => return Ok(false),
			}
		}
	}

	fn equals_class_reference<'l>(&self, lhs: TypeDefOrRef<'l>, rhs: TypeDefOrRef<'l>) -> Result<bool>
	where
		R: TypeResolver<'l>,
	{
		let lhs = self.resolver.resolve_type(lhs)?;
		let rhs = self.resolver.resolve_type(rhs)?;

		match (lhs, rhs) {
			// A pair of TypeDefs is equal only when both name the same row of
			// the same database.
			(TypeDefOrSpec::Def(lhs), TypeDefOrSpec::Def(rhs)) => {
				Ok(std::ptr::eq(lhs.scope(), rhs.scope()) && lhs.index() == rhs.index())
			},

			// A pair of TypeSpecs is compared structurally.
			(TypeDefOrSpec::Spec(lhs), TypeDefOrSpec::Spec(rhs)) => {
				let lhs = lhs.row()?.signature()?;
				let rhs = rhs.row()?.signature()?;
				self.equals_type(&lhs.as_type_sig(), &rhs.as_type_sig())
			},

			_ => Ok(false),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Error;
	use crate::indices::metadata_token::TypeDefToken;
	use crate::signatures::ElementType;
	use crate::tables::TableId;
	use crate::test_image::{empty_database, ImageBuilder};
	use crate::Database;

	/// Resolves every TypeRef to the TypeDef with the same index in the same
	/// scope; good enough for structural tests.
	struct SameScopeResolver;

	impl<'l> TypeResolver<'l> for SameScopeResolver {
		fn resolve_type(&self, ty: TypeDefOrRef<'l>) -> Result<TypeDefOrSpec<'l>> {
			use crate::indices::metadata_token::TypeSpecToken;
			match ty.table() {
				TableId::TypeSpec => Ok(TypeDefOrSpec::Spec(TypeSpecToken::try_from(ty.token())?)),
				_ => Ok(TypeDefOrSpec::Def(TypeDefToken::new(ty.scope(), ty.index()))),
			}
		}

		fn resolve_member(
			&self,
			_: crate::indices::metadata_token::MemberRefToken<'l>,
		) -> Result<crate::resolve::FieldOrMethodDef<'l>> {
			Err(Error::Malformed("member resolution not supported"))
		}

		fn resolve_fundamental_type(&self, _: ElementType) -> Result<TypeDefToken<'l>> {
			Err(Error::Malformed("fundamental type resolution not supported"))
		}
	}

	fn comparer(resolver: &SameScopeResolver) -> SignatureComparer<'_, SameScopeResolver> {
		SignatureComparer::new(resolver)
	}

	#[test]
	fn every_signature_equals_itself() {
		let db = empty_database();
		let resolver = SameScopeResolver;
		let comparer = comparer(&resolver);

		let type_sigs: &[&[u8]] = &[
			&[0x08],
			&[0x1d, 0x0e],
			&[0x14, 0x08, 0x02, 0x01, 0x03, 0x00],
			&[0x12, 0x05],
			&[0x0f, 0x08],
			&[0x15, 0x12, 0x05, 0x02, 0x08, 0x0e],
			&[0x13, 0x01],
			&[0x1b, 0x00, 0x01, 0x01, 0x08],
		];
		for bytes in type_sigs {
			let sig = TypeSig::new(&db, bytes);
			assert!(comparer.equals_type(&sig, &sig).unwrap(), "{bytes:X?}");
		}

		let method = MethodSig::new(&db, &[0x30, 0x01, 0x01, 0x08, 0x12, 0x05]);
		assert!(comparer.equals_method(&method, &method).unwrap());

		let field = FieldSig::new(&db, &[0x06, 0x08]);
		assert!(comparer.equals_field(&field, &field).unwrap());

		let property = PropertySig::new(&db, &[0x28, 0x01, 0x0e, 0x08]);
		assert!(comparer.equals_property(&property, &property).unwrap());
	}

	#[test]
	fn structurally_different_signatures_are_unequal() {
		let db = empty_database();
		let resolver = SameScopeResolver;
		let comparer = comparer(&resolver);

		let i4 = TypeSig::new(&db, &[0x08]);
		let i8 = TypeSig::new(&db, &[0x0a]);
		let array = TypeSig::new(&db, &[0x1d, 0x08]);
		let var0 = TypeSig::new(&db, &[0x13, 0x00]);
		let mvar0 = TypeSig::new(&db, &[0x1e, 0x00]);

		assert!(!comparer.equals_type(&i4, &i8).unwrap());
		assert!(!comparer.equals_type(&i4, &array).unwrap());
		assert!(!comparer.equals_type(&var0, &mvar0).unwrap());

		// Same element type, different class semantics.
		let class = TypeSig::new(&db, &[0x12, 0x05]);
		let value = TypeSig::new(&db, &[0x11, 0x05]);
		assert!(!comparer.equals_type(&class, &value).unwrap());

		// Same parameter list, different conventions.
		let default = MethodSig::new(&db, &[0x00, 0x01, 0x01, 0x08]);
		let vararg = MethodSig::new(&db, &[0x05, 0x01, 0x01, 0x08]);
		assert!(!comparer.equals_method(&default, &vararg).unwrap());
	}

	#[test]
	fn class_references_compare_through_the_resolver() {
		let db = empty_database();
		let resolver = SameScopeResolver;
		let comparer = comparer(&resolver);

		// CLASS TypeDef#1 vs CLASS TypeRef#1: the test resolver maps the
		// TypeRef to TypeDef row 0 in the same scope, so they are equal.
		let direct = TypeSig::new(&db, &[0x12, 0x04]);
		let through_ref = TypeSig::new(&db, &[0x12, 0x05]);
		assert!(comparer.equals_type(&direct, &through_ref).unwrap());

		let other_row = TypeSig::new(&db, &[0x12, 0x08]);
		assert!(!comparer.equals_type(&direct, &other_row).unwrap());
	}

	#[test]
	fn class_references_in_different_scopes_are_unequal() {
		let db_a = empty_database();
		let db_b = empty_database();
		let resolver = SameScopeResolver;
		let comparer = comparer(&resolver);

		let lhs = TypeSig::new(&db_a, &[0x12, 0x04]);
		let rhs = TypeSig::new(&db_b, &[0x12, 0x04]);
		assert!(!comparer.equals_type(&lhs, &rhs).unwrap());
	}

	#[test]
	fn type_specs_compare_structurally() {
		fn build() -> Database {
			let mut image = ImageBuilder::new();
			image.row(TableId::Module, &[0, 1, 1, 0, 0]);
			let a = image.blob(&[0x1d, 0x08]); // SZARRAY I4
			let b = image.blob(&[0x1d, 0x08]);
			let c = image.blob(&[0x1d, 0x0e]); // SZARRAY STRING
			image.row(TableId::TypeSpec, &[a as u64]);
			image.row(TableId::TypeSpec, &[b as u64]);
			image.row(TableId::TypeSpec, &[c as u64]);
			image.build_database()
		}

		let db = build();
		let resolver = SameScopeResolver;
		let comparer = comparer(&resolver);

		// CLASS TypeSpec#1 / TypeSpec#2 / TypeSpec#3
		let spec_1 = TypeSig::new(&db, &[0x12, 0x06]);
		let spec_2 = TypeSig::new(&db, &[0x12, 0x0a]);
		let spec_3 = TypeSig::new(&db, &[0x12, 0x0e]);

		assert!(comparer.equals_type(&spec_1, &spec_2).unwrap());
		assert!(!comparer.equals_type(&spec_1, &spec_3).unwrap());
	}
}
