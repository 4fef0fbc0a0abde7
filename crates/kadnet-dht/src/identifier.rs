//! Fixed-width unsigned identifiers and the XOR distance metric.
//!
//! An [`Identifier`] is a big-endian byte string whose width is fixed at
//! construction (160 bits for a production node, as small as 8 bits for
//! tests). All arithmetic is implicitly mod 2^width: every byte slice an
//! `Identifier` ever holds has its unused high-order bits in the first byte
//! masked to zero.

use rand::RngCore;

use crate::{DhtError, Result};

/// A fixed-width unsigned identifier, compared and XORed as an unsigned
/// integer under big-endian byte order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    width_bits: u32,
    bytes: Vec<u8>,
}

impl Identifier {
    /// The identifier's width in bits.
    pub fn width_bits(&self) -> u32 {
        self.width_bits
    }

    /// Number of bytes used to store `width_bits` bits.
    fn byte_len(width_bits: u32) -> usize {
        width_bits.div_ceil(8) as usize
    }

    /// Mask off the unused high bits of the most significant byte so the
    /// stored value never exceeds `2^width_bits - 1`.
    fn mask(mut bytes: Vec<u8>, width_bits: u32) -> Vec<u8> {
        let extra_bits = (bytes.len() as u32 * 8).saturating_sub(width_bits);
        if extra_bits > 0 && !bytes.is_empty() {
            let keep_bits = 8 - extra_bits.min(8);
            bytes[0] &= 0xFFu8.checked_shr(8 - keep_bits as u32).unwrap_or(0);
        }
        bytes
    }

    /// Construct an identifier from big-endian bytes, masking to `width_bits`.
    ///
    /// If `bytes` is shorter than the required length it is zero-padded on
    /// the left; if longer, the low-order bytes are kept (the value is
    /// reduced mod 2^width_bits).
    pub fn from_be_bytes(bytes: &[u8], width_bits: u32) -> Self {
        let needed = Self::byte_len(width_bits);
        let mut out = vec![0u8; needed];
        if bytes.len() >= needed {
            out.copy_from_slice(&bytes[bytes.len() - needed..]);
        } else {
            out[needed - bytes.len()..].copy_from_slice(bytes);
        }
        Self {
            width_bits,
            bytes: Self::mask(out, width_bits),
        }
    }

    /// The all-zero identifier of the given width.
    pub fn zero(width_bits: u32) -> Self {
        Self::from_be_bytes(&[], width_bits)
    }

    /// Generate a cryptographically-irrelevant random identifier of the
    /// given width in bits (`b` in spec terms), landing in `[0, 2^b)`.
    pub fn random(width_bits: u32, rng: &mut impl RngCore) -> Self {
        let mut bytes = vec![0u8; Self::byte_len(width_bits)];
        rng.fill_bytes(&mut bytes);
        Self {
            width_bits,
            bytes: Self::mask(bytes, width_bits),
        }
    }

    /// Big-endian byte view of the identifier.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parse a base-10 string into an identifier of the given width,
    /// reducing mod 2^width_bits as the Python reference does
    /// (`key &= (2**self.id_size) - 1`).
    pub fn from_decimal(s: &str, width_bits: u32) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DhtError::InvalidDecimal(s.to_string()));
        }
        // Schoolbook base-10 -> base-256 conversion: accumulate digit by
        // digit into a growing little-endian byte buffer.
        let mut acc: Vec<u8> = vec![0];
        for ch in s.chars() {
            let digit = ch.to_digit(10).ok_or_else(|| DhtError::InvalidDecimal(s.to_string()))?;
            let mut carry = digit;
            for byte in acc.iter_mut() {
                let v = (*byte as u32) * 10 + carry;
                *byte = (v & 0xFF) as u8;
                carry = v >> 8;
            }
            while carry > 0 {
                acc.push((carry & 0xFF) as u8);
                carry >>= 8;
            }
        }
        acc.reverse(); // now big-endian
        Ok(Self::from_be_bytes(&acc, width_bits))
    }

    /// Render the identifier as a base-10 string, matching the decimal
    /// integers the wire protocol uses for `sender`/`rpcid`/keys.
    pub fn to_decimal(&self) -> String {
        // Schoolbook base-256 -> base-10 conversion via repeated divmod 10.
        let mut digits: Vec<u8> = Vec::new();
        let mut work = self.bytes.clone();
        while work.iter().any(|&b| b != 0) {
            let mut remainder: u32 = 0;
            for byte in work.iter_mut() {
                let v = remainder * 256 + *byte as u32;
                *byte = (v / 10) as u8;
                remainder = v % 10;
            }
            digits.push(remainder as u8);
        }
        if digits.is_empty() {
            "0".to_string()
        } else {
            digits
                .iter()
                .rev()
                .map(|d| (b'0' + d) as char)
                .collect()
        }
    }

    /// Render the identifier as lower-case hex, for log lines (mirrors the
    /// Python reference's `hex(self.node_id)` log prefix).
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// XOR distance between `self` and `other`. Both identifiers must share
    /// the same width.
    pub fn xor_distance(&self, other: &Self) -> Result<Self> {
        if self.width_bits != other.width_bits {
            return Err(DhtError::WidthMismatch {
                a: self.width_bits,
                b: other.width_bits,
            });
        }
        let bytes = self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        Ok(Self {
            width_bits: self.width_bits,
            bytes,
        })
    }

    /// The Kademlia bucket index for this distance: `floor(log2(d))`, with
    /// distance 0 mapping to bucket 0.
    ///
    /// Equivalent to `bit_length(d) - 1` for `d >= 1`.
    pub fn bucket_index(&self) -> usize {
        match leading_zero_bits(&self.bytes) {
            None => 0, // distance is zero (self)
            Some(lz) => {
                let total_bits = self.bytes.len() * 8;
                total_bits - 1 - lz
            }
        }
    }

    /// Whether this identifier is the all-zero value.
    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Number of leading zero bits across a big-endian byte slice, or `None` if
/// every byte is zero.
fn leading_zero_bits(bytes: &[u8]) -> Option<usize> {
    for (i, byte) in bytes.iter().enumerate() {
        if *byte != 0 {
            return Some(i * 8 + byte.leading_zeros() as usize);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_decimal_roundtrip() {
        let id = Identifier::from_decimal("1234567890123456789012345", 160).expect("parse");
        assert_eq!(id.to_decimal(), "1234567890123456789012345");
    }

    #[test]
    fn test_decimal_zero() {
        let id = Identifier::zero(160);
        assert_eq!(id.to_decimal(), "0");
    }

    #[test]
    fn test_decimal_masks_to_width() {
        // 256 does not fit in 8 bits; expect it reduced mod 256 -> 0.
        let id = Identifier::from_decimal("256", 8).expect("parse");
        assert_eq!(id.to_decimal(), "0");
        let id = Identifier::from_decimal("257", 8).expect("parse");
        assert_eq!(id.to_decimal(), "1");
    }

    #[test]
    fn test_invalid_decimal_rejected() {
        assert!(Identifier::from_decimal("not a number", 160).is_err());
        assert!(Identifier::from_decimal("", 160).is_err());
        assert!(Identifier::from_decimal("-5", 160).is_err());
    }

    #[test]
    fn test_xor_distance_self_is_zero() {
        let a = Identifier::from_decimal("42", 8).expect("parse");
        let d = a.xor_distance(&a).expect("same width");
        assert!(d.is_zero());
    }

    #[test]
    fn test_xor_distance_width_mismatch() {
        let a = Identifier::zero(8);
        let b = Identifier::zero(16);
        assert!(a.xor_distance(&b).is_err());
    }

    // S12: zig-zag offsets tested in routing_table; bucket_index boundary
    // behavior (invariant 2) covered here.
    #[test]
    fn test_bucket_index_boundaries() {
        // distance 1 -> bucket 0; distance 255 (8-bit) -> bucket 7.
        let one = Identifier::from_decimal("1", 8).expect("parse");
        assert_eq!(one.bucket_index(), 0);
        let max = Identifier::from_decimal("255", 8).expect("parse");
        assert_eq!(max.bucket_index(), 7);
        let mid = Identifier::from_decimal("128", 8).expect("parse");
        assert_eq!(mid.bucket_index(), 7);
        let small = Identifier::from_decimal("2", 8).expect("parse");
        assert_eq!(small.bucket_index(), 1);
    }

    #[test]
    fn test_bucket_index_invariant() {
        for d in 1u32..256 {
            let id = Identifier::from_decimal(&d.to_string(), 8).expect("parse");
            let idx = id.bucket_index();
            assert!(2u32.pow(idx as u32) <= d && d < 2u32.pow(idx as u32 + 1));
        }
    }

    // S5: random id of width b in [1,9] lands in [0, 2^b).
    #[test]
    fn test_random_identifier_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for width in 1u32..=9 {
            for _ in 0..20 {
                let id = Identifier::random(width, &mut rng);
                let max = 2u64.pow(width);
                let value: u64 = id
                    .as_bytes()
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | b as u64);
                assert!(value < max, "width={width} value={value} max={max}");
            }
        }
    }

    #[test]
    fn test_hex_display() {
        let id = Identifier::from_decimal("255", 8).expect("parse");
        assert_eq!(id.to_hex(), "ff");
        assert_eq!(format!("{id}"), "ff");
    }
}
