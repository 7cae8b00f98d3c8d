use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::slice::from_raw_parts;
use std::sync::Mutex;

use bumpalo::Bump;
use nohash_hasher::BuildNoHashHasher;

use crate::heaps::{Bytes, StringIndex};
use crate::{Error, Result};

/// The `#Strings` heap: null-terminated UTF-8 strings indexed by byte offset.
///
/// [`StringHeap::get`] returns a direct view into the heap. UTF-16
/// transcodings are interned in an arena behind a mutex so that repeated
/// lookups of the same offset return the same slice.
pub struct StringHeap {
	data: Bytes,
	utf16: Mutex<Utf16Cache>,
}

struct Utf16Cache {
	arena: Bump,
	entries: HashMap<u32, (*const u16, usize), BuildNoHashHasher<u32>>,
}

// SAFETY: the cached pointers target arena allocations owned by the same
// struct. Entries are only created, never removed, and the arena is only
// touched under the mutex, so the views handed out stay valid until drop.
unsafe impl Send for StringHeap {}
unsafe impl Sync for StringHeap {}

impl TryFrom<Bytes> for StringHeap {
	type Error = Error;
	fn try_from(data: Bytes) -> Result<Self> {
		match data.as_ref() {
			[0, ..] => Ok(Self {
				data,
				utf16: Mutex::new(Utf16Cache {
					arena: Bump::new(),
					entries: HashMap::default(),
				}),
			}),
			_ => Err(Error::Malformed("string heap does not start with an empty string")),
		}
	}
}

impl StringHeap {
	/// The null-terminated UTF-8 entry starting at `idx`, without its terminator.
	pub fn get(&self, idx: StringIndex) -> Result<&str> {
		let slice = self.data.get(idx.0..)
			.ok_or(Error::Malformed("string heap index out of range"))?;
		let end = slice.iter().position(|c| *c == 0)
			.ok_or(Error::Malformed("unterminated string heap entry"))?;
		std::str::from_utf8(&slice[..end])
			.map_err(|_| Error::Malformed("string heap entry is not valid UTF-8"))
	}

	/// The entry at `idx` transcoded to UTF-16, interned for the heap's lifetime.
	pub fn get_utf16(&self, idx: StringIndex) -> Result<&[u16]> {
		let mut cache = self.utf16.lock().unwrap();
		if let Some(&(ptr, len)) = cache.entries.get(&(idx.0 as u32)) {
			// SAFETY: see the Send/Sync impls above.
			return Ok(unsafe { from_raw_parts(ptr, len) });
		}

		let units: Vec<u16> = self.get(idx)?.encode_utf16().collect();
		let interned = cache.arena.alloc_slice_copy(&units);
		let (ptr, len) = (interned.as_ptr(), interned.len());
		cache.entries.insert(idx.0 as u32, (ptr, len));

		// SAFETY: see the Send/Sync impls above.
		Ok(unsafe { from_raw_parts(ptr, len) })
	}

	pub(crate) fn data(&self) -> &[u8] {
		&self.data
	}
}

impl Debug for StringHeap {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("StringHeap");
		dbg.field("data", &format_args!("[u8; {:#X}]", self.data.len()));
		dbg.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	fn heap(bytes: &[u8]) -> StringHeap {
		StringHeap::try_from(Bytes::new(Arc::from(bytes))).unwrap()
	}

	#[test]
	fn entries_are_null_terminated_utf8_views() {
		let heap = heap(b"\0Point\0M\xC3\xB6bius\0");
		assert_eq!(heap.get(StringIndex(0)).unwrap(), "");
		assert_eq!(heap.get(StringIndex(1)).unwrap(), "Point");
		assert_eq!(heap.get(StringIndex(7)).unwrap(), "Möbius");
		// An offset into the middle of an entry yields its suffix.
		assert_eq!(heap.get(StringIndex(3)).unwrap(), "int");
	}

	#[test]
	fn malformed_entries_are_rejected() {
		let heap = heap(b"\0abc\0\xFF\xFE\0");
		assert!(matches!(heap.get(StringIndex(100)), Err(Error::Malformed(_))));
		assert!(matches!(heap.get(StringIndex(5)), Err(Error::Malformed(_))));
		assert!(StringHeap::try_from(Bytes::new(Arc::from(&b"x\0"[..]))).is_err());
	}

	#[test]
	fn utf16_lookups_are_interned() {
		let heap = heap(b"\0Point\0");
		let a = heap.get_utf16(StringIndex(1)).unwrap();
		let b = heap.get_utf16(StringIndex(1)).unwrap();
		assert_eq!(a, "Point".encode_utf16().collect::<Vec<_>>().as_slice());
		assert_eq!(a.as_ptr(), b.as_ptr());
	}
}
