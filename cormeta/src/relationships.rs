//! Relational navigation over the metadata tables: equal-range lookups on
//! sorted primary-key columns and inverse owner-of lookups on range-owning
//! parent tables.
//!
//! ECMA-335 requires the key columns used here to be sorted; sorted tables
//! are binary searched, unsorted ones fall back to a linear scan (which must
//! still find a contiguous run).

use std::marker::PhantomData;

use crate::database::Database;
use crate::indices::coded_index::{
	HasConstant, HasCustomAttribute, HasSemantics, TypeOrMethodDef,
};
use crate::indices::metadata_token::{
	EventToken, FieldToken, GenericParamToken, MethodDefToken, ParamToken,
	PropertyToken, TypeDefToken,
};
use crate::rows::{
	ConstantRow, CustomAttributeRow, EventMapRow, EventRow, FieldLayoutRow,
	FieldRow, GenericParamConstraintRow, GenericParamRow, InterfaceImplRow,
	MethodDefRow, MethodImplRow, MethodSemanticsRow, ParamRow, PropertyMapRow,
	PropertyRow, TableRow, TypeDefRow,
};
use crate::tables::TableId;
use crate::{Error, Result};

/// A half-open range of rows `[first, last)` of one table.
pub struct RowRange<'l, R> {
	scope: &'l Database,
	first: u32,
	last: u32,
	_marker: PhantomData<R>,
}

impl<'l, R: TableRow<'l>> RowRange<'l, R> {
	fn new(scope: &'l Database, first: u32, last: u32) -> Self {
		debug_assert!(first <= last);
		Self { scope, first, last, _marker: PhantomData }
	}

	fn empty(scope: &'l Database) -> Self {
		Self::new(scope, 0, 0)
	}

	pub fn is_empty(&self) -> bool {
		self.first == self.last
	}
}

impl<'l, R: TableRow<'l>> Iterator for RowRange<'l, R> {
	type Item = R;

	fn next(&mut self) -> Option<R> {
		match self.first < self.last {
			false => None,
			true => {
				let row = R::at(self.scope, self.first);
				self.first += 1;
				Some(row)
			},
		}
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let len = (self.last - self.first) as usize;
		(len, Some(len))
	}
}

impl<'l, R: TableRow<'l>> ExactSizeIterator for RowRange<'l, R> {}

/// The first index in `0..count` for which `pred` is true, assuming `pred`
/// partitions the range (all-false then all-true).
fn partition_point(count: u32, mut pred: impl FnMut(u32) -> Result<bool>) -> Result<u32> {
	let (mut low, mut high) = (0u32, count);
	while low < high {
		let mid = low + (high - low) / 2;
		match pred(mid)? {
			true => high = mid,
			false => low = mid + 1,
		}
	}
	Ok(low)
}

/// All rows of `table` whose key `column` equals `key`.
fn primary_key_equal_range(
	scope: &Database,
	table: TableId,
	column: usize,
	key: u32,
) -> Result<(u32, u32)> {
	let tables = scope.tables();
	let entry = tables.table(table);
	let count = entry.row_count();
	let value_at = |row: u32| tables.read_column(tables.row_bytes(table, row)?, table, column);

	if entry.is_sorted() {
		let first = partition_point(count, |row| Ok(value_at(row)? >= key))?;
		let last = partition_point(count, |row| Ok(value_at(row)? > key))?;
		return Ok((first, last));
	}

	let mut first = None;
	let mut last = 0;
	let mut matches = 0;
	for row in 0..count {
		if value_at(row)? == key {
			if first.is_none() {
				first = Some(row);
			}
			last = row + 1;
			matches += 1;
		}
	}

	match first {
		None => Ok((0, 0)),
		Some(first) if matches == last - first => Ok((first, last)),
		Some(_) => Err(Error::Malformed("unsorted key column with a non-contiguous run")),
	}
}

/// Locates the row of `parent` whose `[first, next_first)` interval contains
/// the one-based row number `owned + 1` of the child table. The last parent
/// row extends to the end of the child table; empty intervals own nothing.
fn owning_row(
	scope: &Database,
	parent: TableId,
	first_column: usize,
	child: TableId,
	owned: u32,
) -> Result<u32> {
	let tables = scope.tables();
	let parent_count = tables.table(parent).row_count();
	let child_count = tables.table(child).row_count();
	let owned = owned + 1; // one-based, like the stored range starts

	let first_of = |row: u32| tables.read_column(tables.row_bytes(parent, row)?, parent, first_column);
	let next_first_of = |row: u32| match row + 1 < parent_count {
		true => first_of(row + 1),
		false => Ok(child_count + 1),
	};

	let owner = partition_point(parent_count, |row| Ok(next_first_of(row)? > owned))?;
	if owner >= parent_count || first_of(owner)? > owned {
		return Err(Error::Malformed("failed to find an owning row"));
	}
	Ok(owner)
}

pub fn find_owner_of_field<'l>(field: FieldToken<'l>) -> Result<TypeDefRow<'l>> {
	let owner = owning_row(field.scope(), TableId::TypeDef, 4, TableId::Field, field.index())?;
	Ok(TypeDefRow::at(field.scope(), owner))
}

pub fn find_owner_of_method_def<'l>(method: MethodDefToken<'l>) -> Result<TypeDefRow<'l>> {
	let owner = owning_row(method.scope(), TableId::TypeDef, 5, TableId::MethodDef, method.index())?;
	Ok(TypeDefRow::at(method.scope(), owner))
}

pub fn find_owner_of_param<'l>(param: ParamToken<'l>) -> Result<MethodDefRow<'l>> {
	let owner = owning_row(param.scope(), TableId::MethodDef, 5, TableId::Param, param.index())?;
	Ok(MethodDefRow::at(param.scope(), owner))
}

pub fn find_owner_of_event<'l>(event: EventToken<'l>) -> Result<TypeDefRow<'l>> {
	let owner = owning_row(event.scope(), TableId::EventMap, 1, TableId::Event, event.index())?;
	let map = EventMapRow::at(event.scope(), owner);
	map.parent()?
		.ok_or(Error::Malformed("event map row has no parent"))?
		.row()
}

pub fn find_owner_of_property<'l>(property: PropertyToken<'l>) -> Result<TypeDefRow<'l>> {
	let owner = owning_row(property.scope(), TableId::PropertyMap, 1, TableId::Property, property.index())?;
	let map = PropertyMapRow::at(property.scope(), owner);
	map.parent()?
		.ok_or(Error::Malformed("property map row has no parent"))?
		.row()
}

/// The constant attached to a field, parameter or property, if any.
pub fn find_constant<'l>(parent: HasConstant<'l>) -> Result<Option<ConstantRow<'l>>> {
	let scope = parent.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::Constant, 1, parent.key())?;
	match last - first {
		0 => Ok(None),
		1 => Ok(Some(ConstantRow::at(scope, first))),
		_ => Err(Error::Malformed("constant table has a non-unique parent key")),
	}
}

/// The explicit layout of a field, if any.
pub fn find_field_layout<'l>(field: FieldToken<'l>) -> Result<Option<FieldLayoutRow<'l>>> {
	let scope = field.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::FieldLayout, 1, field.index() + 1)?;
	match last - first {
		0 => Ok(None),
		1 => Ok(Some(FieldLayoutRow::at(scope, first))),
		_ => Err(Error::Malformed("field layout table has a non-unique parent key")),
	}
}

pub fn find_custom_attributes<'l>(parent: HasCustomAttribute<'l>) -> Result<RowRange<'l, CustomAttributeRow<'l>>> {
	let scope = parent.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::CustomAttribute, 0, parent.key())?;
	Ok(RowRange::new(scope, first, last))
}

pub fn find_generic_params<'l>(owner: TypeOrMethodDef<'l>) -> Result<RowRange<'l, GenericParamRow<'l>>> {
	let scope = owner.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::GenericParam, 2, owner.key())?;
	Ok(RowRange::new(scope, first, last))
}

/// The `index`-th generic parameter of a type or method.
pub fn find_generic_param<'l>(owner: TypeOrMethodDef<'l>, index: u32) -> Result<GenericParamRow<'l>> {
	find_generic_params(owner)?
		.nth(index as usize)
		.ok_or(Error::OutOfRange("generic parameter index"))
}

pub fn find_generic_param_constraints<'l>(param: GenericParamToken<'l>) -> Result<RowRange<'l, GenericParamConstraintRow<'l>>> {
	let scope = param.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::GenericParamConstraint, 0, param.index() + 1)?;
	Ok(RowRange::new(scope, first, last))
}

pub fn find_interface_impls<'l>(class: TypeDefToken<'l>) -> Result<RowRange<'l, InterfaceImplRow<'l>>> {
	let scope = class.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::InterfaceImpl, 0, class.index() + 1)?;
	Ok(RowRange::new(scope, first, last))
}

pub fn find_method_impls<'l>(class: TypeDefToken<'l>) -> Result<RowRange<'l, MethodImplRow<'l>>> {
	let scope = class.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::MethodImpl, 0, class.index() + 1)?;
	Ok(RowRange::new(scope, first, last))
}

pub fn find_method_semantics<'l>(association: HasSemantics<'l>) -> Result<RowRange<'l, MethodSemanticsRow<'l>>> {
	let scope = association.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::MethodSemantics, 2, association.key())?;
	Ok(RowRange::new(scope, first, last))
}

/// The class a nested type is declared inside, if it is nested at all.
pub fn find_enclosing_class<'l>(nested: TypeDefToken<'l>) -> Result<Option<TypeDefToken<'l>>> {
	let scope = nested.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::NestedClass, 0, nested.index() + 1)?;
	match last - first {
		0 => Ok(None),
		1 => crate::rows::NestedClassRow::at(scope, first).enclosing_class(),
		_ => Err(Error::Malformed("nested class table has a non-unique nested key")),
	}
}

pub fn find_fields<'l>(class: TypeDefToken<'l>) -> Result<RowRange<'l, FieldRow<'l>>> {
	let row = class.row()?;
	Ok(RowRange::new(class.scope(), row.first_field()?, row.last_field()?))
}

pub fn find_methods<'l>(class: TypeDefToken<'l>) -> Result<RowRange<'l, MethodDefRow<'l>>> {
	let row = class.row()?;
	Ok(RowRange::new(class.scope(), row.first_method()?, row.last_method()?))
}

pub fn find_params<'l>(method: MethodDefToken<'l>) -> Result<RowRange<'l, ParamRow<'l>>> {
	let row = method.row()?;
	Ok(RowRange::new(method.scope(), row.first_param()?, row.last_param()?))
}

/// The events of a type, located through its EventMap row.
pub fn find_events<'l>(class: TypeDefToken<'l>) -> Result<RowRange<'l, EventRow<'l>>> {
	let scope = class.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::EventMap, 0, class.index() + 1)?;
	match last - first {
		0 => Ok(RowRange::empty(scope)),
		1 => {
			let map = EventMapRow::at(scope, first);
			Ok(RowRange::new(scope, map.first_event()?, map.last_event()?))
		},
		_ => Err(Error::Malformed("event map table has a non-unique parent key")),
	}
}

/// The properties of a type, located through its PropertyMap row.
pub fn find_properties<'l>(class: TypeDefToken<'l>) -> Result<RowRange<'l, PropertyRow<'l>>> {
	let scope = class.scope();
	let (first, last) = primary_key_equal_range(scope, TableId::PropertyMap, 0, class.index() + 1)?;
	match last - first {
		0 => Ok(RowRange::empty(scope)),
		1 => {
			let map = PropertyMapRow::at(scope, first);
			Ok(RowRange::new(scope, map.first_property()?, map.last_property()?))
		},
		_ => Err(Error::Malformed("property map table has a non-unique parent key")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::indices::coded_index::CodedIndexKind;
	use crate::test_image::ImageBuilder;

	/// Four TypeDefs owning fields 1.., 3.., 3.., 7.. of a ten-row field table.
	fn ranged_database() -> crate::Database {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		for first_field in [1u64, 3, 3, 7] {
			image.row(TableId::TypeDef, &[0, 1, 1, 0, first_field, 1]);
		}
		let sig = image.blob(&[0x06, 0x08]);
		for _ in 0..10 {
			image.row(TableId::Field, &[0, 1, sig as u64]);
		}
		image.build_database()
	}

	#[test]
	fn owner_lookup_honours_interval_boundaries() {
		let db = ranged_database();
		let owner_of = |field: u32| {
			find_owner_of_field(FieldToken::new(&db, field)).unwrap().index()
		};

		// The second parent's interval [3, 3) is empty, so field 2 (row
		// number 3) belongs to the third parent; the last parent's interval
		// extends to the end of the field table.
		assert_eq!(owner_of(0), 0);
		assert_eq!(owner_of(1), 0);
		assert_eq!(owner_of(2), 2);
		assert_eq!(owner_of(5), 2);
		assert_eq!(owner_of(6), 3);
		assert_eq!(owner_of(9), 3);
	}

	#[test]
	fn owned_ranges_follow_first_and_last_columns() {
		let db = ranged_database();
		let fields_of = |ty: u32| find_fields(TypeDefToken::new(&db, ty)).unwrap().len();
		assert_eq!(fields_of(0), 2);
		assert_eq!(fields_of(1), 0);
		assert_eq!(fields_of(2), 4);
		assert_eq!(fields_of(3), 4);
	}

	#[test]
	fn constants_are_zero_or_one_per_parent() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let sig = image.blob(&[0x06, 0x08]);
		for _ in 0..3 {
			image.row(TableId::Field, &[0, 1, sig as u64]);
		}
		let value = image.blob(&[0x2A, 0x00, 0x00, 0x00]);
		// HasConstant keys: Field#1 and Field#3 (tag 0).
		image.row(TableId::Constant, &[0x08, 1 << 2, value as u64]);
		image.row(TableId::Constant, &[0x08, 3 << 2, value as u64]);
		let db = image.build_database();

		let key_of = |field: u32| HasConstant::from(FieldToken::new(&db, field));
		assert!(find_constant(key_of(0)).unwrap().is_some());
		assert!(find_constant(key_of(1)).unwrap().is_none());
		assert!(find_constant(key_of(2)).unwrap().is_some());
	}

	#[test]
	fn custom_attributes_group_by_parent_key() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		image.row(TableId::MethodDef, &[0, 0, 0, 1, 1, 1]);
		let value = image.blob(&[0x01, 0x00, 0x00, 0x00]);

		let method_key = |row: u32| ((row + 1) << 5) as u64; // tag 0: MethodDef
		let typedef_key = |row: u32| (((row + 1) << 5) | 3) as u64; // tag 3: TypeDef
		let ctor = (1 << 3) | 2; // CustomAttributeType: MethodDef#1
		image.row(TableId::CustomAttribute, &[method_key(0), ctor, value as u64]);
		image.row(TableId::CustomAttribute, &[typedef_key(0), ctor, value as u64]);
		image.row(TableId::CustomAttribute, &[typedef_key(0), ctor, value as u64]);
		let db = image.build_database();

		let ty = HasCustomAttribute::from(TypeDefToken::new(&db, 0));
		let attributes = find_custom_attributes(ty).unwrap();
		assert_eq!(attributes.len(), 2);

		let method = HasCustomAttribute::from(MethodDefToken::new(&db, 0));
		assert_eq!(find_custom_attributes(method).unwrap().len(), 1);
	}

	#[test]
	fn generic_params_resolve_by_owner_and_index() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		image.row(TableId::MethodDef, &[0, 0, 0, 1, 1, 1]);
		let t = image.string("T");
		let u = image.string("U");
		let m = image.string("M");
		// TypeOrMethodDef: tag 0 TypeDef, tag 1 MethodDef.
		image.row(TableId::GenericParam, &[0, 0, 1 << 1, t as u64]);
		image.row(TableId::GenericParam, &[1, 0, 1 << 1, u as u64]);
		image.row(TableId::GenericParam, &[0, 0, (1 << 1) | 1, m as u64]);
		let db = image.build_database();

		let ty = TypeOrMethodDef::from(TypeDefToken::new(&db, 0));
		let names: Vec<_> = find_generic_params(ty).unwrap()
			.map(|p| p.name().unwrap())
			.collect();
		assert_eq!(names, ["T", "U"]);
		assert_eq!(find_generic_param(ty, 1).unwrap().name().unwrap(), "U");
		assert!(find_generic_param(ty, 2).is_err());

		let method = TypeOrMethodDef::from(MethodDefToken::new(&db, 0));
		assert_eq!(find_generic_params(method).unwrap().len(), 1);
	}

	#[test]
	fn events_and_properties_route_through_their_maps() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		let name = image.string("Changed");
		image.row(TableId::Event, &[0, name as u64, 0]);
		image.row(TableId::Event, &[0, name as u64, 0]);
		// Only the second TypeDef has events.
		image.row(TableId::EventMap, &[2, 1]);
		let db = image.build_database();

		assert!(find_events(TypeDefToken::new(&db, 0)).unwrap().is_empty());
		let events = find_events(TypeDefToken::new(&db, 1)).unwrap();
		assert_eq!(events.len(), 2);

		assert!(find_properties(TypeDefToken::new(&db, 1)).unwrap().is_empty());
	}

	#[test]
	fn nested_classes_resolve_their_enclosing_class() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		image.row(TableId::NestedClass, &[2, 1]);
		let db = image.build_database();

		let nested = find_enclosing_class(TypeDefToken::new(&db, 1)).unwrap();
		assert_eq!(nested.unwrap().index(), 0);
		assert!(find_enclosing_class(TypeDefToken::new(&db, 0)).unwrap().is_none());
	}

	#[test]
	fn unsorted_tables_fall_back_to_a_linear_scan() {
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		image.row(TableId::TypeDef, &[0, 1, 1, 0, 1, 1]);
		// Keys out of sorted order: 2, 1.
		image.row(TableId::InterfaceImpl, &[2, (1 << 2) | 1]);
		image.row(TableId::InterfaceImpl, &[1, (1 << 2) | 1]);
		image.unsorted(TableId::InterfaceImpl);
		let db = image.build_database();

		let impls = find_interface_impls(TypeDefToken::new(&db, 0)).unwrap();
		assert_eq!(impls.len(), 1);
	}

	#[test]
	fn composite_keys_recompose_tag_and_row() {
		// Sanity-check the key composition the searches rely on.
		let mut image = ImageBuilder::new();
		image.row(TableId::Module, &[0, 1, 1, 0, 0]);
		let db = image.build_database();
		let field = FieldToken::new(&db, 3);
		let key = HasConstant::from(field).key();
		assert_eq!(key >> CodedIndexKind::HasConstant.tag_bits(), 4);
		assert_eq!(key & CodedIndexKind::HasConstant.mask(), 0);
	}
}
