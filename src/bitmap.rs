use std::collections::BTreeSet;
use std::fmt;

use crate::range::AddressRange;
use crate::wire::packed_len;
use crate::wire::BitmapMessage;
use crate::Addr;
use crate::Error;
use crate::Result;


/// A packed per-address boolean occupancy vector over a fixed address
/// range.
///
/// Position `i` of the bitmap corresponds to address
/// `range.begin() + i`. Accessing an address outside the owning range is
/// a programming error and panics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressBitmap {
    /// The range of addresses this bitmap covers.
    range: AddressRange,
    /// One occupancy value per address in the range.
    bits: Vec<bool>,
}

impl AddressBitmap {
    /// Construct a bitmap over the given range with every position set
    /// to `false`.
    pub fn new(range: AddressRange) -> Self {
        Self {
            range,
            bits: vec![false; range.width() as usize],
        }
    }

    /// Construct a bitmap over `[min(set), max(set)]` with every address
    /// in the set marked `true`.
    ///
    /// # Panics
    /// Panics when the set is empty; no range is derivable from it.
    pub fn from_addresses(addresses: &BTreeSet<Addr>) -> Self {
        assert!(
            !addresses.is_empty(),
            "cannot derive a bitmap range from an empty address set"
        );
        // SANITY: Non-emptiness was just asserted.
        let begin = *addresses.first().unwrap();
        let end = *addresses.last().unwrap();

        let mut bitmap = Self::new(AddressRange::new(begin, end));
        for &addr in addresses {
            let () = bitmap.set(addr, true);
        }
        bitmap
    }

    /// Construct a bitmap from its wire representation.
    ///
    /// The message's byte payload must have exactly
    /// `max(1, ceil(width / 8))` bytes; anything else is a protocol
    /// violation. Padding bits past the last address are ignored.
    pub fn from_message(message: &BitmapMessage) -> Result<Self> {
        let range = message.range;
        let expected = packed_len(range);
        if message.bitmap.len() as u64 != expected {
            return Err(Error::malformed(format!(
                "address bitmap for {range} has {} bytes, expected {expected}",
                message.bitmap.len()
            )))
        }

        let mut bitmap = Self::new(range);
        for (i, bit) in bitmap.bits.iter_mut().enumerate() {
            *bit = message.bitmap[i / 8] & (1 << (i % 8)) != 0;
        }
        Ok(bitmap)
    }

    /// Convert this bitmap into its wire representation.
    ///
    /// Padding bits past the last address are written as zero.
    pub fn to_message(&self) -> BitmapMessage {
        let mut bytes = vec![0u8; packed_len(self.range) as usize];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        BitmapMessage {
            range: self.range,
            bitmap: bytes,
        }
    }

    /// The range of addresses this bitmap covers.
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// Get the value at the given address.
    ///
    /// # Panics
    /// Panics when `addr` is outside the bitmap's range.
    pub fn get(&self, addr: Addr) -> bool {
        assert!(
            self.range.contains(addr),
            "address {addr:#x} is outside of bitmap range {}",
            self.range
        );
        self.bits[(addr - self.range.begin()) as usize]
    }

    /// Set the value at the given address.
    ///
    /// # Panics
    /// Panics when `addr` is outside the bitmap's range.
    pub fn set(&mut self, addr: Addr, value: bool) {
        assert!(
            self.range.contains(addr),
            "address {addr:#x} is outside of bitmap range {}",
            self.range
        );
        self.bits[(addr - self.range.begin()) as usize] = value;
    }

    /// Extract the maximal runs of consecutive addresses that all hold
    /// `value`, as a set of disjoint closed ranges.
    pub fn contiguous_ranges(&self, value: bool) -> BTreeSet<AddressRange> {
        let mut ranges = BTreeSet::new();
        let mut open = None;

        for (i, &bit) in self.bits.iter().enumerate() {
            let addr = self.range.begin() + i as Addr;
            if bit == value {
                if open.is_none() {
                    open = Some(addr);
                }
            } else if let Some(begin) = open.take() {
                ranges.insert(AddressRange::new(begin, addr - 1));
            }
        }

        // A run still open at the final address closes at the end of the
        // bitmap's range.
        if let Some(begin) = open {
            ranges.insert(AddressRange::new(begin, self.range.end()));
        }
        ranges
    }
}

impl fmt::Display for AddressBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.range)?;

        let has_true = self.bits.iter().any(|&bit| bit);
        let has_false = self.bits.iter().any(|&bit| !bit);
        if has_false && !has_true {
            f.write_str("0...0")
        } else if has_true && !has_false {
            f.write_str("1...1")
        } else {
            for &bit in &self.bits {
                f.write_str(if bit { "1" } else { "0" })?;
            }
            Ok(())
        }
    }
}
