use crate::{Error, Result};

/// A bounds-checked little-endian cursor over an immutable byte slice.
///
/// All header parsing goes through this reader; running past the end of the
/// input surfaces as a format error, never as a panic. Table rows are not
/// read this way — their column offsets are precomputed by the schema engine
/// and loaded with [`read_unsigned`].
pub(crate) struct ByteReader<'a> {
	data: &'a [u8],
	offset: usize,
}

impl<'a> ByteReader<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		Self { data, offset: 0 }
	}

	/// A reader positioned at `offset`, which must lie within `data`.
	pub fn at(data: &'a [u8], offset: usize) -> Result<Self> {
		match offset <= data.len() {
			true => Ok(Self { data, offset }),
			false => Err(Error::Malformed("offset past the end of the image")),
		}
	}

	pub fn offset(&self) -> usize {
		self.offset
	}

	pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
		let taken = self.data
			.get(self.offset..self.offset + count)
			.ok_or(Error::Malformed("read past the end of the image"))?;
		self.offset += count;
		Ok(taken)
	}

	pub fn skip(&mut self, count: usize) -> Result<()> {
		self.read_bytes(count).map(|_| ())
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		Ok(self.read_bytes(1)?[0])
	}

	pub fn read_u16(&mut self) -> Result<u16> {
		Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
	}

	pub fn read_u64(&mut self) -> Result<u64> {
		Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
	}
}

/// Reads the 2- or 4-byte little-endian value of a heap, table or composite
/// index column, as selected by the precomputed width.
#[inline]
pub(crate) fn read_unsigned(data: &[u8], width: usize) -> Option<u32> {
	match width {
		2 => Some(u16::from_le_bytes(data.get(..2)?.try_into().ok()?) as u32),
		4 => Some(u32::from_le_bytes(data.get(..4)?.try_into().ok()?)),
		_ => None,
	}
}

/// Rounds `value` up to the next multiple of `multiple`.
#[inline]
pub(crate) fn round_up(value: usize, multiple: usize) -> usize {
	value.div_ceil(multiple) * multiple
}

/// The positions of the set bits of `mask`, ascending.
pub(crate) fn set_bits(mut mask: u64) -> impl Iterator<Item = u32> {
	std::iter::from_fn(move || {
		match mask {
			0 => None,
			_ => {
				let bit = mask.trailing_zeros();
				mask &= mask - 1;
				Some(bit)
			},
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reads_are_little_endian_and_advance() {
		let mut reader = ByteReader::new(&[0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
		assert_eq!(reader.read_u8().unwrap(), 1);
		assert_eq!(reader.read_u16().unwrap(), 0x1234);
		assert_eq!(reader.read_u32().unwrap(), 0x1234_5678);
		assert_eq!(reader.offset(), 7);
		assert!(reader.read_u8().is_err());
	}

	#[test]
	fn readers_can_start_mid_slice() {
		let data = [0u8; 8];
		assert_eq!(ByteReader::at(&data, 8).unwrap().offset(), 8);
		assert!(ByteReader::at(&data, 9).is_err());

		let mut reader = ByteReader::at(&data, 4).unwrap();
		assert!(reader.read_u32().is_ok());
		assert!(reader.read_u8().is_err());
	}

	#[test]
	fn skips_are_bounds_checked() {
		let mut reader = ByteReader::new(&[0u8; 4]);
		assert!(reader.skip(4).is_ok());
		assert!(reader.skip(1).is_err());
		assert_eq!(reader.offset(), 4);
	}

	#[test]
	fn set_bits_ascend() {
		assert_eq!(set_bits(0b1010_0101).collect::<Vec<_>>(), [0, 2, 5, 7]);
		assert_eq!(set_bits(0).count(), 0);
		assert_eq!(set_bits(1 << 63).next(), Some(63));
	}

	#[test]
	fn rounding_and_width_selected_reads() {
		assert_eq!(round_up(0, 4), 0);
		assert_eq!(round_up(4, 4), 4);
		assert_eq!(round_up(9, 4), 12);

		let data = [0x34, 0x12, 0x00, 0x00];
		assert_eq!(read_unsigned(&data, 2), Some(0x1234));
		assert_eq!(read_unsigned(&data, 4), Some(0x1234));
		assert_eq!(read_unsigned(&data[..1], 2), None);
		assert_eq!(read_unsigned(&data, 3), None);
	}
}
