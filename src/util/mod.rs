/// Number of bits needed to hold `count - 1`, the size-minus-one value of a dimension.
///
/// This is `32 - clz(count - 1)`, where a count of one (or zero, which wraps to all ones and is
/// never passed by callers that validated their input) needs no bits at all.
pub(crate) fn bits_for_count(count: u32) -> u32 {
    32 - count.wrapping_sub(1).leading_zeros()
}

/// Round `value` up to the next multiple of the power-of-two `align`.
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    (value + mask) & !mask
}

/// A contiguous run of bits inside a 32-bit word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Bits {
    pub(crate) shift: u32,
    pub(crate) width: u32,
}

impl Bits {
    pub(crate) const fn new(shift: u32, width: u32) -> Self {
        Bits { shift, width }
    }

    pub(crate) const fn mask(self) -> u32 {
        (((1u64 << self.width) - 1) as u32) << self.shift
    }

    /// Replace the field inside `word`, or `None` if `value` does not fit the width.
    pub(crate) fn insert(self, word: u32, value: u32) -> Option<u32> {
        if u64::from(value) >= 1u64 << self.width {
            return None;
        }

        Some((word & !self.mask()) | (value << self.shift))
    }

    pub(crate) fn extract(self, word: u32) -> u32 {
        (word & self.mask()) >> self.shift
    }
}
