use std::ops::RangeInclusive;

/// Bit accessors shared by every decoder in the crate.
/// Bit indices run from lsb to msb (right to left).
pub trait Bits: Copy {
    const WIDTH: u8;

    fn get_bit(self, bit_idx: u8) -> bool;
    fn set_bit(&mut self, bit_idx: u8, value: bool);

    /// Extracts an inclusive bit range, shifted down to position 0.
    fn get_bits(self, bits_range: RangeInclusive<u8>) -> Self;

    /// Sign-extends the low `number_of_bits` bits over the full width.
    fn sign_extended(self, number_of_bits: u8) -> Self;
}

macro_rules! impl_bits {
    ($($t:ty => $signed:ty),*) => {$(
        impl Bits for $t {
            const WIDTH: u8 = (size_of::<$t>() * 8) as u8;

            fn get_bit(self, bit_idx: u8) -> bool {
                debug_assert!(bit_idx < Self::WIDTH);
                (self >> bit_idx) & 1 != 0
            }

            fn set_bit(&mut self, bit_idx: u8, value: bool) {
                debug_assert!(bit_idx < Self::WIDTH);
                let mask = 1 << bit_idx;
                if value {
                    *self |= mask;
                } else {
                    *self &= !mask;
                }
            }

            fn get_bits(self, bits_range: RangeInclusive<u8>) -> Self {
                let start = *bits_range.start();
                let end = *bits_range.end();
                debug_assert!(start <= end && end < Self::WIDTH);

                let shifted = self >> start;
                let length = end - start + 1;
                if length == Self::WIDTH {
                    shifted
                } else {
                    shifted & ((1 << length) - 1)
                }
            }

            fn sign_extended(self, number_of_bits: u8) -> Self {
                debug_assert!(number_of_bits > 0 && number_of_bits <= Self::WIDTH);
                let shift = Self::WIDTH - number_of_bits;
                (((self << shift) as $signed) >> shift) as Self
            }
        }
    )*};
}

impl_bits!(u8 => i8, u16 => i16, u32 => i32, u64 => i64);
