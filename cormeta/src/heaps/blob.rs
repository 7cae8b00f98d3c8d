use std::fmt::{Debug, Formatter};

use crate::database::Database;
use crate::heaps::{BlobIndex, Bytes};
use crate::signatures::{FieldSig, MethodSig, PropertySig, TypeSig};
use crate::{Error, Result};

/// The `#Blob` heap: length-prefixed byte sequences indexed by byte offset.
///
/// The first one, two or four bytes of an entry encode its length, selected
/// by the top bits of the first byte (`0xxx` / `10xx` / `110x`).
pub struct BlobHeap {
	data: Bytes,
}

impl From<Bytes> for BlobHeap {
	fn from(data: Bytes) -> Self {
		Self { data }
	}
}

impl BlobHeap {
	/// Decodes the length prefix at `idx` and returns the entry's payload.
	pub fn get(&self, idx: BlobIndex) -> Result<&[u8]> {
		let slice = self.data.get(idx.0..)
			.ok_or(Error::Malformed("blob heap index out of range"))?;
		decode_length_prefixed(slice)
	}

	pub(crate) fn data(&self) -> &[u8] {
		&self.data
	}
}

/// Splits `data` into a decoded blob payload, validating the length prefix.
pub(crate) fn decode_length_prefixed(data: &[u8]) -> Result<&[u8]> {
	let Some(&initial) = data.first() else {
		return Err(Error::Malformed("empty blob encoding"));
	};

	let (prefix_size, length) = match initial >> 5 {
		0..=3 => (1, (initial & 0x7F) as usize),
		4 | 5 => (2, (initial & 0x3F) as usize),
		6 => (4, (initial & 0x1F) as usize),
		_ => return Err(Error::Malformed("invalid blob length prefix")),
	};

	if data.len() < prefix_size {
		return Err(Error::Malformed("truncated blob length prefix"));
	}

	let mut length = length;
	for &byte in &data[1..prefix_size] {
		length = (length << 8) | byte as usize;
	}

	data.get(prefix_size..prefix_size + length)
		.ok_or(Error::Malformed("blob extends past the end of the heap"))
}

impl Debug for BlobHeap {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("BlobHeap");
		dbg.field("data", &format_args!("[u8; {:#X}]", self.data.len()));
		dbg.finish()
	}
}

/// A byte range in or derived from the `#Blob` heap, tagged with the database
/// it originates from so that embedded tokens can be resolved.
#[derive(Copy, Clone)]
pub struct Blob<'l> {
	scope: &'l Database,
	data: &'l [u8],
}

impl<'l> Blob<'l> {
	pub fn new(scope: &'l Database, data: &'l [u8]) -> Self {
		Self { scope, data }
	}

	/// Decodes the length prefix at `offset` in `scope`'s blob heap.
	pub fn compute_from_stream(scope: &'l Database, offset: BlobIndex) -> Result<Self> {
		Ok(Self {
			scope,
			data: scope.blobs().get(offset)?,
		})
	}

	pub fn scope(&self) -> &'l Database {
		self.scope
	}

	pub fn bytes(&self) -> &'l [u8] {
		self.data
	}

	pub fn as_type_sig(&self) -> TypeSig<'l> {
		TypeSig::new(self.scope, self.data)
	}

	pub fn as_field_sig(&self) -> FieldSig<'l> {
		FieldSig::new(self.scope, self.data)
	}

	pub fn as_method_sig(&self) -> MethodSig<'l> {
		MethodSig::new(self.scope, self.data)
	}

	pub fn as_property_sig(&self) -> PropertySig<'l> {
		PropertySig::new(self.scope, self.data)
	}
}

impl PartialEq for Blob<'_> {
	fn eq(&self, other: &Self) -> bool {
		// The identity of the byte range identifies the blob; the scope is
		// not part of the comparison.
		std::ptr::eq(self.data.as_ptr(), other.data.as_ptr()) && self.data.len() == other.data.len()
	}
}

impl Eq for Blob<'_> {}

impl Debug for Blob<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("Blob");
		dbg.field("data", &format_args!("[u8; {:#X}]", self.data.len()));
		dbg.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	fn heap(bytes: &[u8]) -> BlobHeap {
		BlobHeap::from(Bytes::new(Arc::from(bytes)))
	}

	#[test]
	fn single_byte_prefix() {
		let heap = heap(&[0x03, 0x41, 0x42, 0x43]);
		assert_eq!(heap.get(BlobIndex(0)).unwrap(), &[0x41, 0x42, 0x43]);
	}

	#[test]
	fn two_byte_prefix() {
		let mut bytes = vec![0x80, 0x80];
		bytes.extend(std::iter::repeat(0xCC).take(0x80));
		let heap = heap(&bytes);
		let blob = heap.get(BlobIndex(0)).unwrap();
		assert_eq!(blob.len(), 0x80);
		assert!(blob.iter().all(|b| *b == 0xCC));
	}

	#[test]
	fn four_byte_prefix() {
		let mut bytes = vec![0xC0, 0x00, 0x40, 0x00];
		bytes.extend(std::iter::repeat(0xEE).take(0x4000));
		let heap = heap(&bytes);
		assert_eq!(heap.get(BlobIndex(0)).unwrap().len(), 0x4000);
	}

	#[test]
	fn zero_length_and_invalid_prefixes() {
		assert!(matches!(heap(&[0xE0]).get(BlobIndex(0)), Err(Error::Malformed(_))));

		let heap = heap(&[0x00, 0x03, 0x41]);
		assert_eq!(heap.get(BlobIndex(0)).unwrap(), &[] as &[u8]);
		// Offset 1 claims three bytes but only one follows.
		assert!(heap.get(BlobIndex(1)).is_err());
		assert!(heap.get(BlobIndex(100)).is_err());
	}

	#[test]
	fn prefix_width_is_minimal_per_top_bits() {
		// 0x7F fits the one-byte form; 0x80 needs the two-byte form.
		let mut bytes = vec![0x7F];
		bytes.extend(std::iter::repeat(0u8).take(0x7F));
		assert_eq!(heap(&bytes).get(BlobIndex(0)).unwrap().len(), 0x7F);
	}
}
