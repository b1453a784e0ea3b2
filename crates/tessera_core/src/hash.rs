//! # Hashing Utilities
//!
//! Deterministic, per-process hashing for type-erased component values.
//!
//! Every hash in the runtime goes through one fixed-key SipHash-1-3 so that
//! two containers hashing the same component bytes always agree, no matter
//! which thread or subsystem computed the value.

use std::hash::{Hash, Hasher};

use bytemuck::Pod;
use siphasher::sip::SipHasher13;

/// Fixed SipHash keys. Values are arbitrary but must never change at runtime.
const SIP_KEY_0: u64 = 0x5445_5353_4552_4131;
const SIP_KEY_1: u64 = 0x9E37_79B9_7F4A_7C15;

#[inline]
fn hasher() -> SipHasher13 {
    SipHasher13::new_with_keys(SIP_KEY_0, SIP_KEY_1)
}

/// Mixes `value` into `seed`.
///
/// Order-sensitive: `hash_combine(a, b) != hash_combine(b, a)` in general.
#[inline]
#[must_use]
pub const fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ (value
        .wrapping_add(0x9E37_79B9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

/// Folds a 64-bit hash into `usize` on 32-bit targets.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn fold_if_needed(value: u64) -> usize {
    if usize::BITS < 64 {
        (value ^ (value >> 32)) as usize
    } else {
        value as usize
    }
}

/// Hashes a byte slice.
#[inline]
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut state = hasher();
    state.write(bytes);
    state.finish()
}

/// Hashes any `Hash` value.
#[inline]
#[must_use]
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut state = hasher();
    value.hash(&mut state);
    state.finish()
}

/// Hashes a plain-old-data value by its bytes.
///
/// Float fields hash by bit pattern, so `0.0` and `-0.0` differ.
#[inline]
#[must_use]
pub fn hash_pod<T: Pod>(value: &T) -> u64 {
    hash_bytes(bytemuck::bytes_of(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_value(&42u32), hash_value(&42u32));
        assert_eq!(hash_bytes(b"position"), hash_bytes(b"position"));
        assert_ne!(hash_bytes(b"position"), hash_bytes(b"velocity"));
    }

    #[test]
    fn test_hash_combine_order_sensitive() {
        let a = hash_value(&1u8);
        let b = hash_value(&2u8);
        assert_ne!(hash_combine(a, b), hash_combine(b, a));
    }

    #[test]
    fn test_fold_keeps_full_width_on_64_bit() {
        let value = 0xDEAD_BEEF_0000_0001u64;
        if usize::BITS == 64 {
            assert_eq!(fold_if_needed(value) as u64, value);
        } else {
            assert_eq!(fold_if_needed(value), (0xDEAD_BEEF_u32 ^ 1) as usize);
        }
    }

    #[test]
    fn test_pod_hash_uses_bit_pattern() {
        assert_ne!(hash_pod(&0.0f32), hash_pod(&-0.0f32));
        assert_eq!(hash_pod(&[1.5f32, 2.5]), hash_pod(&[1.5f32, 2.5]));
    }
}
