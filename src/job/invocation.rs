use core::fmt;

use crate::util::{bits_for_count, Bits};

/// The packed dispatch dimensions of a job.
///
/// Six size-minus-one values (local size x, y, z, then workgroup counts x, y, z) share one
/// word, each starting at the bit where the previous one ends. The shifts word records where
/// each value except the first starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Invocation {
    pub packed: u64,
    /// Start bits of local y, local z, workgroups x, y, z.
    pub shifts: [u32; 5],
    /// Thread group split, the start bit of the workgroup counts.
    pub split: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackError {
    /// A dimension was zero.
    ZeroSize,
    /// The packed values do not fit into the available bits.
    Overflow { bits: u32, available: u32 },
}

pub(crate) const SHIFT_FIELDS: [Bits; 5] = [
    Bits::new(0, 6),
    Bits::new(6, 6),
    Bits::new(12, 6),
    Bits::new(18, 6),
    Bits::new(24, 6),
];

pub(crate) const SHIFT_WG_X: Bits = SHIFT_FIELDS[2];
pub(crate) const SHIFT_WG_Y: Bits = SHIFT_FIELDS[3];
pub(crate) const SHIFT_WG_Z: Bits = SHIFT_FIELDS[4];
pub(crate) const SPLIT: Bits = Bits::new(0, 6);

/// Pack local size and workgroup counts into an invocation.
///
/// Fails when any dimension is zero, or when the values do not fit the `available` bits.
pub fn pack_invocation(
    local: [u32; 3],
    groups: [u32; 3],
    available: u32,
) -> Result<Invocation, PackError> {
    let counts = [local[0], local[1], local[2], groups[0], groups[1], groups[2]];
    if counts.contains(&0) {
        return Err(PackError::ZeroSize);
    }

    let mut starts = [0u32; 6];
    let mut bits = 0;
    for (start, &count) in starts.iter_mut().zip(&counts) {
        *start = bits;
        bits += bits_for_count(count);
    }

    // Every start must also be expressible in the 6-bit shift fields.
    if bits > available.min(64) || starts.iter().any(|&start| start >= 64) {
        return Err(PackError::Overflow { bits, available });
    }

    let packed = starts
        .iter()
        .zip(&counts)
        .fold(0u64, |packed, (&start, &count)| {
            packed | (u64::from(count - 1) << start)
        });

    let mut shifts = [0; 5];
    shifts.copy_from_slice(&starts[1..]);

    Ok(Invocation {
        packed,
        shifts,
        split: starts[3],
    })
}

impl Invocation {
    pub(crate) fn from_words(packed: u64, shift_word: u32, split_word: u32) -> Self {
        let mut shifts = [0; 5];
        for (shift, field) in shifts.iter_mut().zip(SHIFT_FIELDS) {
            *shift = field.extract(shift_word);
        }

        Invocation {
            packed,
            shifts,
            split: SPLIT.extract(split_word),
        }
    }

    pub fn shift_word(&self) -> u32 {
        self.shifts
            .iter()
            .zip(SHIFT_FIELDS)
            .fold(0, |word, (&shift, field)| {
                word | ((shift << field.shift) & field.mask())
            })
    }

    /// Unpack into local size and workgroup counts.
    pub fn decode(&self) -> ([u32; 3], [u32; 3]) {
        let mut starts = [0u32; 7];
        starts[1..6].copy_from_slice(&self.shifts);
        starts[6] = 64;

        let mut counts = [0u32; 6];
        for (i, count) in counts.iter_mut().enumerate() {
            let (start, end) = (starts[i].min(64), starts[i + 1].clamp(starts[i].min(64), 64));
            let width = end - start;
            let value = if width == 0 {
                0
            } else {
                (self.packed >> start) & (u64::MAX >> (64 - width))
            };
            *count = (value as u32).wrapping_add(1);
        }

        (
            [counts[0], counts[1], counts[2]],
            [counts[3], counts[4], counts[5]],
        )
    }

    pub fn local_size(&self) -> [u32; 3] {
        self.decode().0
    }

    pub fn workgroups(&self) -> [u32; 3] {
        self.decode().1
    }
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::ZeroSize => f.write_str("dispatch dimensions must be at least one"),
            PackError::Overflow { bits, available } => write!(
                f,
                "dispatch dimensions need {} bits but only {} are available",
                bits, available
            ),
        }
    }
}

impl std::error::Error for PackError {}
