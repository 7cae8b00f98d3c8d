//! Generic-variable substitution and cross-module annotation.
//!
//! Instantiation walks a signature depth-first, copying byte ranges or
//! emitting transformed replacements: `VAR n` is replaced by the n-th
//! argument's bytes, bare `VAR`/`MVAR` elements are rewritten to their
//! annotated forms carrying the owning type/method token and its scope, and
//! class references are tagged with the scope they must be resolved in.
//! Already-annotated elements copy verbatim, so instantiation is idempotent.

use derivative::Derivative;

use crate::database::Database;
use crate::indices::metadata_token::{MethodDefToken, TypeDefToken};
use crate::{Error, Result};

use super::{
	ElementType, FieldPart, FieldSig, MethodPart, MethodSig, PropertyPart,
	PropertySig, TypeKind, TypePart, TypeSig,
};

/// A scoped sequence of pre-annotated type-signature arguments, one per
/// generic parameter, plus the byte storage the argument views refer into.
///
/// Building the arguments is the expensive half of instantiation; one
/// argument set is typically reused to instantiate many member signatures.
pub struct InstantiationArguments<'l> {
	scope: &'l Database,
	signatures: Vec<Vec<u8>>,
}

impl<'l> InstantiationArguments<'l> {
	/// An empty argument list. Useful for annotation-only instantiation.
	pub fn empty(scope: &'l Database) -> Self {
		Self { scope, signatures: Vec::new() }
	}

	/// Extracts and annotates the arguments of a `GENERICINST` signature.
	/// For non-generic-instance signatures the result is empty.
	pub fn from_generic_instance(signature: &TypeSig<'l>, type_source: TypeDefToken<'l>) -> Result<Self> {
		if !signature.is_generic_instance()? {
			return Ok(Self::empty(type_source.scope()));
		}

		let empty = Self::empty(signature.scope());
		let instantiator = Instantiator::new(&empty).with_type_source(type_source);

		let mut signatures = Vec::new();
		for argument in signature.generic_arguments()? {
			let argument = argument?;
			let mut buffer = Vec::new();
			match instantiator.would_instantiate_type(&argument)? {
				false => buffer.extend_from_slice(&argument.bytes()[..argument.compute_size()?]),
				true => instantiator.instantiate_type_into(&mut buffer, &argument)?,
			}
			signatures.push(buffer);
		}

		Ok(Self {
			scope: type_source.scope(),
			signatures,
		})
	}

	/// The scope the uninstantiated signatures originate from; class
	/// references rewritten during instantiation resolve in this scope.
	pub fn scope(&self) -> &'l Database {
		self.scope
	}

	pub fn len(&self) -> usize {
		self.signatures.len()
	}

	pub fn is_empty(&self) -> bool {
		self.signatures.is_empty()
	}

	/// The n-th argument as an annotated type signature view.
	pub fn argument(&self, n: u32) -> Result<TypeSig<'_>> {
		let bytes = self.signatures.get(n as usize)
			.ok_or(Error::OutOfRange("generic argument index"))?;
		Ok(TypeSig::with_annotations(self.scope, bytes, true))
	}
}

macro_rules! define_owned_signature {
	($($(#[$meta: meta])* $name: ident => $view: ident),* $(,)?) => {$(
		$(#[$meta])*
		#[derive(Derivative, Clone)]
		#[derivative(Debug)]
		pub struct $name<'l> {
			#[derivative(Debug = "ignore")]
			scope: &'l Database,
			bytes: Vec<u8>,
		}

		impl<'l> $name<'l> {
			pub fn scope(&self) -> &'l Database {
				self.scope
			}

			pub fn bytes(&self) -> &[u8] {
				&self.bytes
			}

			/// A parse view over the owned bytes.
			pub fn as_sig(&self) -> $view<'_> {
				$view::with_annotations(self.scope, &self.bytes, true)
			}
		}
	)*};
}

define_owned_signature! {
	/// An instantiated type signature owning its bytes.
	OwnedTypeSig => TypeSig,
	/// An instantiated method signature owning its bytes.
	OwnedMethodSig => MethodSig,
	/// An instantiated field signature owning its bytes.
	OwnedFieldSig => FieldSig,
	/// An instantiated property signature owning its bytes.
	OwnedPropertySig => PropertySig,
}

/// Substitutes generic variables and annotates variables and class
/// references with the context they must be resolved in.
pub struct Instantiator<'a, 'l> {
	arguments: &'a InstantiationArguments<'l>,
	type_source: Option<TypeDefToken<'l>>,
	method_source: Option<MethodDefToken<'l>>,
}

impl<'a, 'l> Instantiator<'a, 'l> {
	pub fn new(arguments: &'a InstantiationArguments<'l>) -> Self {
		Self {
			arguments,
			type_source: None,
			method_source: None,
		}
	}

	/// The type whose generic parameters bare `VAR` elements refer to, used
	/// to annotate them when no substitution is supplied.
	pub fn with_type_source(mut self, type_source: TypeDefToken<'l>) -> Self {
		self.type_source = Some(type_source);
		self
	}

	/// The method whose generic parameters `MVAR` elements refer to.
	pub fn with_method_source(mut self, method_source: MethodDefToken<'l>) -> Self {
		self.method_source = Some(method_source);
		self
	}

	fn is_identity(&self) -> bool {
		self.arguments.is_empty() && self.type_source.is_none() && self.method_source.is_none()
	}

	pub fn would_instantiate_type(&self, signature: &TypeSig<'_>) -> Result<bool> {
		match self.is_identity() {
			true => Ok(false),
			false => requires_instantiation_type(signature),
		}
	}

	pub fn would_instantiate_method(&self, signature: &MethodSig<'_>) -> Result<bool> {
		match self.is_identity() {
			true => Ok(false),
			false => requires_instantiation_method(signature),
		}
	}

	pub fn would_instantiate_field(&self, signature: &FieldSig<'_>) -> Result<bool> {
		match self.is_identity() {
			true => Ok(false),
			false => requires_instantiation_field(signature),
		}
	}

	pub fn would_instantiate_property(&self, signature: &PropertySig<'_>) -> Result<bool> {
		match self.is_identity() {
			true => Ok(false),
			false => requires_instantiation_property(signature),
		}
	}

	/// Instantiates a type signature. Pure byte rewriting: the output
	/// re-parses as a type signature of the same shape with variables
	/// replaced or annotated.
	pub fn instantiate_type<'s>(&self, signature: &TypeSig<'s>) -> Result<OwnedTypeSig<'s>>
	where
		'l: 's,
	{
		let mut bytes = Vec::new();
		match self.would_instantiate_type(signature)? {
			false => bytes.extend_from_slice(&signature.bytes()[..signature.compute_size()?]),
			true => self.instantiate_type_into(&mut bytes, signature)?,
		}
		Ok(OwnedTypeSig { scope: signature.scope(), bytes })
	}

	pub fn instantiate_method<'s>(&self, signature: &MethodSig<'s>) -> Result<OwnedMethodSig<'s>>
	where
		'l: 's,
	{
		let mut bytes = Vec::new();
		match self.would_instantiate_method(signature)? {
			false => bytes.extend_from_slice(&signature.bytes()[..signature.compute_size()?]),
			true => self.instantiate_method_into(&mut bytes, signature)?,
		}
		Ok(OwnedMethodSig { scope: signature.scope(), bytes })
	}

	pub fn instantiate_field<'s>(&self, signature: &FieldSig<'s>) -> Result<OwnedFieldSig<'s>>
	where
		'l: 's,
	{
		let mut bytes = Vec::new();
		match self.would_instantiate_field(signature)? {
			false => bytes.extend_from_slice(&signature.bytes()[..signature.compute_size()?]),
			true => {
				copy_field_parts(&mut bytes, signature, FieldPart::Begin, FieldPart::Type)?;
				self.instantiate_type_into(&mut bytes, &signature.ty()?)?;
			},
		}
		Ok(OwnedFieldSig { scope: signature.scope(), bytes })
	}

	pub fn instantiate_property<'s>(&self, signature: &PropertySig<'s>) -> Result<OwnedPropertySig<'s>>
	where
		'l: 's,
	{
		let mut bytes = Vec::new();
		match self.would_instantiate_property(signature)? {
			false => bytes.extend_from_slice(&signature.bytes()[..signature.compute_size()?]),
			true => {
				copy_property_parts(&mut bytes, signature, PropertyPart::Begin, PropertyPart::Type)?;
				self.instantiate_type_into(&mut bytes, &signature.ty()?)?;
				for parameter in signature.parameters()? {
					self.instantiate_type_into(&mut bytes, &parameter?)?;
				}
			},
		}
		Ok(OwnedPropertySig { scope: signature.scope(), bytes })
	}

	fn instantiate_method_into(&self, buffer: &mut Vec<u8>, signature: &MethodSig<'_>) -> Result<()> {
		copy_method_parts(buffer, signature, MethodPart::Begin, MethodPart::RetType)?;
		self.instantiate_type_into(buffer, &signature.return_type()?)?;
		for parameter in signature.parameters()? {
			self.instantiate_type_into(buffer, &parameter?)?;
		}

		let varargs: Vec<_> = signature.vararg_parameters()?.collect::<Result<_>>()?;
		if varargs.is_empty() {
			return Ok(());
		}

		copy_method_parts(buffer, signature, MethodPart::Sentinel, MethodPart::FirstVarargParam)?;
		for vararg in varargs {
			self.instantiate_type_into(buffer, &vararg)?;
		}
		Ok(())
	}

	fn instantiate_type_into(&self, buffer: &mut Vec<u8>, signature: &TypeSig<'_>) -> Result<()> {
		use TypePart as Part;

		match signature.get_kind()? {
			TypeKind::Primitive => {
				copy_type_parts(buffer, signature, Part::Begin, Part::End)?;
			},
			TypeKind::ClassType => match signature.is_cross_module_type_reference()? {
				true => copy_type_parts(buffer, signature, Part::Begin, Part::End)?,
				false => {
					copy_type_parts(buffer, signature, Part::Begin, Part::TypeCode)?;
					buffer.push(ElementType::CrossModuleTypeReference as u8);
					copy_type_parts(buffer, signature, Part::TypeCode, Part::End)?;
					push_scope(buffer, self.arguments.scope());
				},
			},
			TypeKind::GeneralArray => {
				copy_type_parts(buffer, signature, Part::Begin, Part::ArrayType)?;
				self.instantiate_type_into(buffer, &signature.array_type()?)?;
				copy_type_parts(buffer, signature, Part::ArrayShape, Part::End)?;
			},
			TypeKind::SimpleArray => {
				copy_type_parts(buffer, signature, Part::Begin, Part::SzArrayType)?;
				self.instantiate_type_into(buffer, &signature.array_type()?)?;
			},
			TypeKind::FunctionPointer => {
				copy_type_parts(buffer, signature, Part::Begin, Part::FnPtrType)?;
				self.instantiate_method_into(buffer, &signature.function_type()?)?;
			},
			TypeKind::GenericInstance => match signature.is_cross_module_type_reference()? {
				true => copy_type_parts(buffer, signature, Part::Begin, Part::End)?,
				false => {
					copy_type_parts(buffer, signature, Part::Begin, Part::TypeCode)?;
					buffer.push(ElementType::CrossModuleTypeReference as u8);
					copy_type_parts(buffer, signature, Part::TypeCode, Part::GenericInstArgCount)?;
					push_scope(buffer, self.arguments.scope());
					copy_type_parts(buffer, signature, Part::GenericInstArgCount, Part::FirstGenericInstArg)?;
					for argument in signature.generic_arguments()? {
						self.instantiate_type_into(buffer, &argument?)?;
					}
				},
			},
			TypeKind::Pointer => {
				copy_type_parts(buffer, signature, Part::Begin, Part::PointerType)?;
				self.instantiate_type_into(buffer, &signature.pointer_type()?)?;
			},
			TypeKind::Variable => self.instantiate_variable_into(buffer, signature)?,
			TypeKind::Unknown => {
				return Err(Error::Malformed("unexpected element type"));
			},
		}
		Ok(())
	}

	fn instantiate_variable_into(&self, buffer: &mut Vec<u8>, signature: &TypeSig<'_>) -> Result<()> {
		use TypePart as Part;

		let annotate = |buffer: &mut Vec<u8>, replacement: ElementType, value: u32, scope: &Database| -> Result<()> {
			copy_type_parts(buffer, signature, Part::Begin, Part::TypeCode)?;
			buffer.push(replacement as u8);
			copy_type_parts(buffer, signature, Part::VariableNumber, Part::End)?;
			buffer.extend_from_slice(&value.to_le_bytes());
			push_scope(buffer, scope);
			Ok(())
		};

		match signature.element_type()? {
			ElementType::MVar => {
				let source = self.method_source
					.ok_or(Error::Malformed("method variable outside of a method context"))?;
				annotate(buffer, ElementType::AnnotatedMvar, source.value(), source.scope())
			},
			ElementType::AnnotatedMvar => {
				copy_type_parts(buffer, signature, Part::Begin, Part::End)
			},
			ElementType::Var if self.arguments.is_empty() => {
				let source = self.type_source
					.ok_or(Error::Malformed("type variable outside of a type context"))?;
				annotate(buffer, ElementType::AnnotatedVar, source.value(), source.scope())
			},
			ElementType::AnnotatedVar if self.arguments.is_empty() => {
				copy_type_parts(buffer, signature, Part::Begin, Part::End)
			},
			ElementType::Var | ElementType::AnnotatedVar => {
				let argument = self.arguments.argument(signature.variable_number()?)?;
				copy_type_parts(buffer, signature, Part::Begin, Part::TypeCode)?;
				let size = argument.compute_size()?;
				buffer.extend_from_slice(&argument.bytes()[..size]);
				Ok(())
			},
			_ => Err(Error::Malformed("unexpected variable element type")),
		}
	}
}

fn push_scope(buffer: &mut Vec<u8>, scope: &Database) {
	let address = scope as *const Database as usize;
	buffer.extend_from_slice(&address.to_le_bytes());
}

macro_rules! define_copy_parts {
	($($name: ident($view: ident, $part: ident)),* $(,)?) => {$(
		fn $name(buffer: &mut Vec<u8>, signature: &$view<'_>, from: $part, to: $part) -> Result<()> {
			let first = signature.seek_to(from)?;
			let last = signature.seek_to(to)?;
			buffer.extend_from_slice(&signature.bytes()[first..last]);
			Ok(())
		}
	)*};
}

define_copy_parts! {
	copy_type_parts(TypeSig, TypePart),
	copy_method_parts(MethodSig, MethodPart),
	copy_field_parts(FieldSig, FieldPart),
	copy_property_parts(PropertySig, PropertyPart),
}

/// True iff the signature contains at least one bare `VAR` or `MVAR`.
pub fn requires_instantiation_type(signature: &TypeSig<'_>) -> Result<bool> {
	match signature.get_kind()? {
		TypeKind::Primitive | TypeKind::ClassType => Ok(false),
		TypeKind::GeneralArray | TypeKind::SimpleArray => {
			requires_instantiation_type(&signature.array_type()?)
		},
		TypeKind::FunctionPointer => requires_instantiation_method(&signature.function_type()?),
		TypeKind::GenericInstance => {
			for argument in signature.generic_arguments()? {
				if requires_instantiation_type(&argument?)? {
					return Ok(true);
				}
			}
			Ok(false)
		},
		TypeKind::Pointer => requires_instantiation_type(&signature.pointer_type()?),
		TypeKind::Variable => Ok(matches!(
			signature.element_type()?,
			ElementType::Var | ElementType::MVar
		)),
		TypeKind::Unknown => Err(Error::Malformed("unexpected element type")),
	}
}

/// True iff the return type or any parameter requires instantiation.
pub fn requires_instantiation_method(signature: &MethodSig<'_>) -> Result<bool> {
	if requires_instantiation_type(&signature.return_type()?)? {
		return Ok(true);
	}
	for parameter in signature.parameters()? {
		if requires_instantiation_type(&parameter?)? {
			return Ok(true);
		}
	}
	for parameter in signature.vararg_parameters()? {
		if requires_instantiation_type(&parameter?)? {
			return Ok(true);
		}
	}
	Ok(false)
}

pub fn requires_instantiation_field(signature: &FieldSig<'_>) -> Result<bool> {
	requires_instantiation_type(&signature.ty()?)
}

pub fn requires_instantiation_property(signature: &PropertySig<'_>) -> Result<bool> {
	if requires_instantiation_type(&signature.ty()?)? {
		return Ok(true);
	}
	for parameter in signature.parameters()? {
		if requires_instantiation_type(&parameter?)? {
			return Ok(true);
		}
	}
	Ok(false)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::signatures::TypeKind;
	use crate::tables::TableId;
	use crate::test_image::empty_database;

	#[test]
	fn concrete_signatures_copy_byte_for_byte() {
		let db = empty_database();
		let arguments = InstantiationArguments::empty(&db);
		let instantiator = Instantiator::new(&arguments);

		// SZARRAY CLASS TypeRef#1 is concrete: no VAR/MVAR anywhere.
		let bytes = [0x1d, 0x12, 0x05];
		let sig = TypeSig::new(&db, &bytes);
		assert!(!instantiator.would_instantiate_type(&sig).unwrap());

		let owned = instantiator.instantiate_type(&sig).unwrap();
		assert_eq!(owned.bytes(), &bytes);
	}

	#[test]
	fn type_variables_are_substituted_by_argument_bytes() {
		let db = empty_database();
		// GENERICINST CLASS TypeRef#1 <2>: I4, STRING
		let inst = [0x15, 0x12, 0x05, 0x02, 0x08, 0x0e];
		let inst = TypeSig::new(&db, &inst);
		let source = crate::indices::metadata_token::TypeDefToken::new(&db, 0);
		let arguments = InstantiationArguments::from_generic_instance(&inst, source).unwrap();
		assert_eq!(arguments.len(), 2);

		// SZARRAY VAR 1 -> SZARRAY STRING
		let sig = [0x1d, 0x13, 0x01];
		let sig = TypeSig::new(&db, &sig);
		assert!(requires_instantiation_type(&sig).unwrap());

		let instantiator = Instantiator::new(&arguments);
		let owned = instantiator.instantiate_type(&sig).unwrap();
		assert_eq!(owned.bytes(), &[0x1d, 0x0e]);

		let parsed = owned.as_sig();
		assert!(parsed.is_simple_array().unwrap());
		assert_eq!(parsed.array_type().unwrap().primitive_type().unwrap(), ElementType::String);
	}

	#[test]
	fn out_of_range_variables_are_rejected() {
		let db = empty_database();
		let inst = [0x15, 0x12, 0x05, 0x01, 0x08];
		let inst = TypeSig::new(&db, &inst);
		let source = crate::indices::metadata_token::TypeDefToken::new(&db, 0);
		let arguments = InstantiationArguments::from_generic_instance(&inst, source).unwrap();

		let sig = [0x13, 0x05]; // VAR 5 with only one argument
		let sig = TypeSig::new(&db, &sig);
		let instantiator = Instantiator::new(&arguments);
		assert!(matches!(
			instantiator.instantiate_type(&sig),
			Err(Error::OutOfRange(_))
		));
	}

	#[test]
	fn bare_method_variables_are_annotated_with_their_source() {
		let db = empty_database();
		let arguments = InstantiationArguments::empty(&db);
		let source = MethodDefToken::new(&db, 7);
		let instantiator = Instantiator::new(&arguments).with_method_source(source);

		let sig = [0x1e, 0x02]; // MVAR 2
		let sig = TypeSig::new(&db, &sig);
		let owned = instantiator.instantiate_type(&sig).unwrap();

		let parsed = owned.as_sig();
		assert!(parsed.is_method_variable().unwrap());
		assert_eq!(parsed.element_type().unwrap(), ElementType::AnnotatedMvar);
		assert_eq!(parsed.variable_number().unwrap(), 2);

		let context = parsed.variable_context().unwrap();
		assert_eq!(context.table(), TableId::MethodDef);
		assert_eq!(context.index(), 7);
		assert!(std::ptr::eq(context.scope(), &db));
	}

	#[test]
	fn bare_type_variables_are_annotated_when_no_arguments_exist() {
		let db = empty_database();
		let arguments = InstantiationArguments::empty(&db);
		let source = TypeDefToken::new(&db, 3);
		let instantiator = Instantiator::new(&arguments).with_type_source(source);

		let sig = [0x13, 0x00]; // VAR 0
		let sig = TypeSig::new(&db, &sig);
		let owned = instantiator.instantiate_type(&sig).unwrap();

		let parsed = owned.as_sig();
		assert_eq!(parsed.element_type().unwrap(), ElementType::AnnotatedVar);
		let context = parsed.variable_context().unwrap();
		assert_eq!(context.table(), TableId::TypeDef);
		assert_eq!(context.index(), 3);
	}

	#[test]
	fn class_references_in_rewritten_signatures_carry_their_scope() {
		let defining = empty_database();
		let arguments = InstantiationArguments::empty(&defining);
		let source = TypeDefToken::new(&defining, 0);
		let instantiator = Instantiator::new(&arguments).with_type_source(source);

		// GENERICINST VALUETYPE TypeDef#1 <1>: VAR 0
		let sig = [0x15, 0x11, 0x04, 0x01, 0x13, 0x00];
		let sig = TypeSig::new(&defining, &sig);
		let owned = instantiator.instantiate_type(&sig).unwrap();

		let parsed = owned.as_sig();
		assert!(parsed.is_cross_module_type_reference().unwrap());
		assert!(parsed.is_generic_value_type_instance().unwrap());

		let head = parsed.generic_type().unwrap();
		assert_eq!(head.table(), TableId::TypeDef);
		assert!(std::ptr::eq(head.scope(), &defining));

		let argument = parsed.generic_arguments().unwrap().next().unwrap().unwrap();
		assert_eq!(argument.element_type().unwrap(), ElementType::AnnotatedVar);
	}

	#[test]
	fn instantiation_is_idempotent_on_annotated_signatures() {
		let db = empty_database();
		let arguments = InstantiationArguments::empty(&db);
		let source = TypeDefToken::new(&db, 0);
		let instantiator = Instantiator::new(&arguments).with_type_source(source);

		let sig = [0x12, 0x05, 0x00]; // CLASS TypeRef#1 ... concrete, untouched
		let sig = TypeSig::new(&db, &sig[..2]);
		let once = instantiator.instantiate_type(&sig).unwrap();
		let twice = instantiator.instantiate_type(&once.as_sig()).unwrap();
		assert_eq!(once.bytes(), twice.bytes());

		let var = [0x13, 0x01];
		let var = TypeSig::new(&db, &var);
		let once = instantiator.instantiate_type(&var).unwrap();
		let twice = instantiator.instantiate_type(&once.as_sig()).unwrap();
		assert_eq!(once.bytes(), twice.bytes());
	}

	#[test]
	fn method_signatures_instantiate_return_and_parameters() {
		let db = empty_database();
		let inst = [0x15, 0x12, 0x05, 0x01, 0x08]; // <I4>
		let inst = TypeSig::new(&db, &inst);
		let source = TypeDefToken::new(&db, 0);
		let arguments = InstantiationArguments::from_generic_instance(&inst, source).unwrap();
		let instantiator = Instantiator::new(&arguments);

		// HasThis, 1 param: ret VAR 0, param SZARRAY VAR 0
		let bytes = [0x20, 0x01, 0x13, 0x00, 0x1d, 0x13, 0x00];
		let sig = MethodSig::new(&db, &bytes);
		assert!(requires_instantiation_method(&sig).unwrap());

		let owned = instantiator.instantiate_method(&sig).unwrap();
		assert_eq!(owned.bytes(), &[0x20, 0x01, 0x08, 0x1d, 0x08]);

		let parsed = owned.as_sig();
		assert_eq!(parsed.return_type().unwrap().primitive_type().unwrap(), ElementType::I4);
		let parameter = parsed.parameters().unwrap().next().unwrap().unwrap();
		assert_eq!(parameter.get_kind().unwrap(), TypeKind::SimpleArray);
	}

	#[test]
	fn field_and_property_signatures_instantiate_their_types() {
		let db = empty_database();
		let inst = [0x15, 0x12, 0x05, 0x01, 0x0e]; // <STRING>
		let inst = TypeSig::new(&db, &inst);
		let source = TypeDefToken::new(&db, 0);
		let arguments = InstantiationArguments::from_generic_instance(&inst, source).unwrap();
		let instantiator = Instantiator::new(&arguments);

		let field = FieldSig::new(&db, &[0x06, 0x13, 0x00]);
		let owned = instantiator.instantiate_field(&field).unwrap();
		assert_eq!(owned.bytes(), &[0x06, 0x0e]);

		let property = PropertySig::new(&db, &[0x28, 0x01, 0x13, 0x00, 0x08]);
		let owned = instantiator.instantiate_property(&property).unwrap();
		assert_eq!(owned.bytes(), &[0x28, 0x01, 0x0e, 0x08]);
	}
}
