//! End-to-end tests over a complete (if tiny) managed PE image: the PE walk,
//! stream discovery, heap access, row navigation and signature parsing.

mod common;

use cormeta::indices::metadata_token::{FieldToken, MethodDefToken};
use cormeta::relationships::{find_fields, find_methods, find_owner_of_field, find_owner_of_method_def};
use cormeta::rows::{FieldAttributes, ModuleRow, TypeDefRow};
use cormeta::signatures::{CallingConvention, ElementType};
use cormeta::{Database, TableId};

#[test]
fn pe_walk_reaches_every_stream() {
	let image = common::wrap_in_pe(&common::tiny_assembly_metadata());
	let database = Database::from_image(image).unwrap();

	assert_eq!(database.version(), "v4.0.30319");
	assert_eq!(database.row_count(TableId::Module), 1);
	assert_eq!(database.row_count(TableId::TypeDef), 1);
	assert_eq!(database.row_count(TableId::Field), 1);
	assert_eq!(database.row_count(TableId::MethodDef), 1);

	let module: ModuleRow = database.row(0).unwrap();
	assert_eq!(module.name().unwrap(), "Tiny.dll");
	assert!(module.mvid().unwrap().is_some());
}

#[test]
fn create_from_file_round_trips_through_the_filesystem() {
	let image = common::wrap_in_pe(&common::tiny_assembly_metadata());
	let path = std::env::temp_dir().join("cormeta-tiny-assembly-test.dll");
	std::fs::write(&path, &image).unwrap();

	let database = Database::create_from_file(&path).unwrap();
	std::fs::remove_file(&path).ok();

	assert_eq!(database.row_count(TableId::Module), 1);
}

#[test]
fn rows_and_relationships_navigate_the_tiny_assembly() {
	let image = common::wrap_in_pe(&common::tiny_assembly_metadata());
	let database = Database::from_image(image).unwrap();

	let ty: TypeDefRow = database.row(0).unwrap();
	assert_eq!(ty.name().unwrap(), "Point");
	assert_eq!(ty.namespace().unwrap(), "Tiny");

	let fields: Vec<_> = find_fields(ty.token()).unwrap().collect();
	assert_eq!(fields.len(), 1);
	assert_eq!(fields[0].name().unwrap(), "x");
	assert!(fields[0].flags().unwrap().contains(FieldAttributes::PUBLIC));

	let methods: Vec<_> = find_methods(ty.token()).unwrap().collect();
	assert_eq!(methods.len(), 1);
	assert_eq!(methods[0].name().unwrap(), "Magnitude");

	let owner = find_owner_of_field(FieldToken::new(&database, 0)).unwrap();
	assert_eq!(owner.index(), 0);
	let owner = find_owner_of_method_def(MethodDefToken::new(&database, 0)).unwrap();
	assert_eq!(owner.index(), 0);
}

#[test]
fn signature_blobs_parse_from_the_blob_heap() {
	let image = common::wrap_in_pe(&common::tiny_assembly_metadata());
	let database = Database::from_image(image).unwrap();

	let ty: TypeDefRow = database.row(0).unwrap();
	let field = find_fields(ty.token()).unwrap().next().unwrap();
	let signature = field.signature().unwrap().as_field_sig();
	assert_eq!(signature.ty().unwrap().primitive_type().unwrap(), ElementType::I4);
	assert_eq!(signature.compute_size().unwrap(), 2);

	let method = find_methods(ty.token()).unwrap().next().unwrap();
	let signature = method.signature().unwrap().as_method_sig();
	assert!(signature.has_this().unwrap());
	assert_eq!(signature.calling_convention().unwrap(), CallingConvention::Default);
	assert_eq!(signature.parameter_count().unwrap(), 0);
	assert_eq!(
		signature.return_type().unwrap().primitive_type().unwrap(),
		ElementType::R8
	);
}

#[test]
fn corrupted_images_are_rejected_without_panicking() {
	let metadata = common::tiny_assembly_metadata();
	let image = common::wrap_in_pe(&metadata);

	// Truncations at every prefix must fail cleanly, never panic.
	for len in [0, 0x20, 0x80, 0x100, 0x200, 0x240, image.len() - 1] {
		assert!(Database::from_image(&image[..len]).is_err(), "prefix of {len} bytes");
	}

	// Flipping the metadata magic must be caught after the PE walk.
	let mut bad = image.clone();
	bad[0x250] = 0;
	assert!(Database::from_image(bad).is_err());
}
