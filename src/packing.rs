//! Per-field byte packing for work-item sections.
//!
//! Every numeric field of a section is stored as a fixed-width little-endian offset
//! from a shared base. [`BitFieldPacker`] plans the base and the byte width for a
//! batch of values, and [`BitFieldUnpacker`] reverses a single value.
//!
//! A width of zero means every value in the batch equals the base, so the field
//! takes no bytes at all in the packed records.

use derive_more::Display;

/// Largest byte width a packed field may use.
pub const MAX_FIELD_WIDTH: u8 = 8;

/// How raw values are turned into offsets.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum PackMode {
    /// Offset from the smallest value in the batch.
    #[display(fmt = "absolute")]
    Absolute,
    /// Raw zero is kept as a reserved "unset" marker; every other value is
    /// stored relative to the smallest non-zero value, shifted up by one.
    #[display(fmt = "zero-sentinel")]
    ZeroSentinel,
}

/// Base and byte width chosen for one field of one section.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct FieldPacking {
    pub base: u64,
    pub width: u8,
}

impl FieldPacking {
    pub fn new(base: u64, width: u8) -> Self {
        Self { base, width }
    }

    /// True when the field is implied by the header and absent from the records.
    pub fn is_implied(&self) -> bool {
        self.width == 0
    }
}

/// Plans and applies the packing of one field.
#[derive(Copy, Clone, Debug)]
pub struct BitFieldPacker {
    mode: PackMode,
    packing: FieldPacking,
}

impl BitFieldPacker {
    /// Compute the minimal packing for `values`.
    pub fn plan(mode: PackMode, values: impl IntoIterator<Item = u64>) -> Self {
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut min_non_zero = u64::MAX;
        let mut seen = false;
        for v in values {
            seen = true;
            min = min.min(v);
            max = max.max(v);
            if v != 0 {
                min_non_zero = min_non_zero.min(v);
            }
        }

        let packing = if !seen {
            FieldPacking::default()
        } else if min == max {
            FieldPacking::new(min, 0)
        } else {
            match mode {
                PackMode::Absolute => FieldPacking::new(min, byte_width(max - min)),
                // min != max guarantees at least one non-zero value
                PackMode::ZeroSentinel => {
                    FieldPacking::new(min_non_zero, byte_width(max - min_non_zero + 1))
                }
            }
        };

        Self { mode, packing }
    }

    pub fn packing(&self) -> FieldPacking {
        self.packing
    }

    /// The offset stored for `value`.
    pub fn encode(&self, value: u64) -> u64 {
        if self.packing.is_implied() {
            return 0;
        }
        match self.mode {
            PackMode::Absolute => value - self.packing.base,
            PackMode::ZeroSentinel if value == 0 => 0,
            PackMode::ZeroSentinel => value - self.packing.base + 1,
        }
    }

    /// Append the packed bytes of `value` to `out`.
    pub fn pack_into(&self, value: u64, out: &mut Vec<u8>) {
        let width = usize::from(self.packing.width);
        if width == 0 {
            return;
        }
        let bytes = self.encode(value).to_le_bytes();
        out.extend_from_slice(&bytes[..width]);
    }
}

/// Reverses a [`BitFieldPacker`] given the header metadata of a section.
#[derive(Copy, Clone, Debug)]
pub struct BitFieldUnpacker {
    mode: PackMode,
    packing: FieldPacking,
}

impl BitFieldUnpacker {
    pub fn new(mode: PackMode, packing: FieldPacking) -> Self {
        Self { mode, packing }
    }

    pub fn width(&self) -> usize {
        usize::from(self.packing.width)
    }

    /// Recover the raw value from a stored offset.
    pub fn decode(&self, stored: u64) -> u64 {
        if self.packing.is_implied() {
            return self.packing.base;
        }
        match self.mode {
            PackMode::Absolute => self.packing.base.wrapping_add(stored),
            PackMode::ZeroSentinel if stored == 0 => 0,
            PackMode::ZeroSentinel => self.packing.base.wrapping_add(stored - 1),
        }
    }

    /// Read one value from the front of `bytes`, which must hold at least
    /// [`width`](Self::width) bytes.
    pub fn unpack(&self, bytes: &[u8]) -> u64 {
        let width = self.width();
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&bytes[..width]);
        self.decode(u64::from_le_bytes(buf))
    }
}

/// Number of bytes needed to hold `value`.
pub fn byte_width(value: u64) -> u8 {
    let bits = 64 - value.leading_zeros();
    bits.div_ceil(8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn round_trip(mode: PackMode, values: &[u64]) -> Vec<u64> {
        let packer = BitFieldPacker::plan(mode, values.iter().copied());
        let mut bytes = Vec::new();
        for v in values {
            packer.pack_into(*v, &mut bytes);
        }
        let unpacker = BitFieldUnpacker::new(mode, packer.packing());
        let width = unpacker.width();
        assert_eq!(bytes.len(), width * values.len());
        (0..values.len())
            .map(|i| unpacker.unpack(&bytes[i * width..]))
            .collect()
    }

    #[test]
    fn byte_widths() {
        assert_eq!(byte_width(0), 0);
        assert_eq!(byte_width(1), 1);
        assert_eq!(byte_width(0xFF), 1);
        assert_eq!(byte_width(0x100), 2);
        assert_eq!(byte_width(0xFFFF_FFFF), 4);
        assert_eq!(byte_width(u64::MAX), 8);
    }

    #[test]
    fn empty_batch_is_implied_zero() {
        let packer = BitFieldPacker::plan(PackMode::Absolute, std::iter::empty());
        assert_eq!(packer.packing(), FieldPacking::new(0, 0));
    }

    #[test]
    fn constant_batch_takes_no_bytes() {
        let packer = BitFieldPacker::plan(PackMode::Absolute, [42, 42, 42]);
        assert_eq!(packer.packing(), FieldPacking::new(42, 0));
        assert_eq!(round_trip(PackMode::Absolute, &[42, 42, 42]), vec![42, 42, 42]);

        let packer = BitFieldPacker::plan(PackMode::ZeroSentinel, [7, 7]);
        assert_eq!(packer.packing(), FieldPacking::new(7, 0));
        assert_eq!(round_trip(PackMode::ZeroSentinel, &[0, 0]), vec![0, 0]);
    }

    #[test]
    fn absolute_uses_min_as_base() {
        let packer = BitFieldPacker::plan(PackMode::Absolute, [1_000, 1_010, 1_255]);
        assert_eq!(packer.packing(), FieldPacking::new(1_000, 1));
        let packer = BitFieldPacker::plan(PackMode::Absolute, [1_000, 1_256]);
        assert_eq!(packer.packing(), FieldPacking::new(1_000, 2));
    }

    #[test]
    fn zero_sentinel_keeps_zero_apart_from_base() {
        let values = [0, 500, 501, 0, 500];
        let packer = BitFieldPacker::plan(PackMode::ZeroSentinel, values);
        assert_eq!(packer.packing(), FieldPacking::new(500, 1));
        assert_eq!(packer.encode(0), 0);
        assert_eq!(packer.encode(500), 1);
        assert_eq!(packer.encode(501), 2);
        assert_eq!(round_trip(PackMode::ZeroSentinel, &values), values.to_vec());
    }

    #[test]
    fn zero_sentinel_width_accounts_for_shift() {
        // 255 - 1 + 1 = 255 fits one byte, 256 - 1 + 1 needs two
        let packer = BitFieldPacker::plan(PackMode::ZeroSentinel, [0, 1, 255]);
        assert_eq!(packer.packing().width, 1);
        let packer = BitFieldPacker::plan(PackMode::ZeroSentinel, [0, 1, 256]);
        assert_eq!(packer.packing().width, 2);
    }

    #[test]
    fn full_range_values() {
        let values = [0, u64::MAX, 1 << 63];
        assert_eq!(round_trip(PackMode::Absolute, &values), values.to_vec());
        assert_eq!(round_trip(PackMode::ZeroSentinel, &values), values.to_vec());
    }

    proptest! {
        #[test]
        fn absolute_round_trip(values in prop::collection::vec(any::<u64>(), 1..64)) {
            prop_assert_eq!(round_trip(PackMode::Absolute, &values), values);
        }

        #[test]
        fn zero_sentinel_round_trip(values in prop::collection::vec(
            prop_oneof![Just(0u64), any::<u32>().prop_map(u64::from)], 1..64))
        {
            prop_assert_eq!(round_trip(PackMode::ZeroSentinel, &values), values);
        }

        #[test]
        fn width_never_exceeds_max(values in prop::collection::vec(any::<u64>(), 0..16)) {
            let abs = BitFieldPacker::plan(PackMode::Absolute, values.iter().copied());
            let zs = BitFieldPacker::plan(PackMode::ZeroSentinel, values.iter().copied());
            prop_assert!(abs.packing().width <= MAX_FIELD_WIDTH);
            prop_assert!(zs.packing().width <= MAX_FIELD_WIDTH);
        }
    }
}
