use std::fmt::{Debug, Formatter};
use std::mem::size_of;

use uuid::Uuid;

use crate::heaps::{Bytes, GuidIndex};
use crate::{Error, Result};

/// The `#GUID` heap: a packed array of 16-byte records indexed from one.
pub struct GuidHeap {
	data: Bytes,
}

impl TryFrom<Bytes> for GuidHeap {
	type Error = Error;
	fn try_from(data: Bytes) -> Result<Self> {
		match data.len() % size_of::<Uuid>() == 0 {
			true => Ok(Self { data }),
			false => Err(Error::Malformed("GUID heap size is not a multiple of 16")),
		}
	}
}

#[allow(clippy::len_without_is_empty)]
impl GuidHeap {
	pub fn len(&self) -> usize {
		self.data.len() / size_of::<Uuid>()
	}

	/// Record `idx`, or `None` for the index zero ("no GUID").
	pub fn get(&self, idx: GuidIndex) -> Result<Option<Uuid>> {
		match idx.0 {
			0 => Ok(None),
			_ => {
				let offset = (idx.0 - 1) * size_of::<Uuid>();
				let bytes = self.data.get(offset..offset + size_of::<Uuid>())
					.ok_or(Error::Malformed("GUID heap index out of range"))?;
				Ok(Some(Uuid::from_slice_le(bytes).unwrap()))
			},
		}
	}

	pub fn guids(&self) -> impl Iterator<Item = Uuid> + '_ {
		(1..=self.len()).map(|i| self.get(GuidIndex(i)).unwrap().unwrap())
	}
}

impl Debug for GuidHeap {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str("GuidHeap ")?;
		let mut dbg = f.debug_list();
		for guid in self.guids() {
			dbg.entry(&guid);
		}
		dbg.finish()
	}
}
