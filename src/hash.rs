//! # Literal hashing
//!
//! One hash function is shared by compile-time static tables and the runtime
//! table primitives, so a key hashed while building link-time data lands in
//! the same slots when the loaded program looks it up.
//!
//! - null: `0`
//! - bool: `0` / `1`
//! - int: the two's complement bits
//! - float: the IEEE-754 bits (`+0.0` and `-0.0` differ)
//! - string: DJB2, `h = h * 33 + b` starting from `5381`
//!
//! All arithmetic wraps modulo 2^64.

use crate::value::{Tag, Value};

pub const DJB2_SEED: u64 = 5381;

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(DJB2_SEED, |h, &b| {
        h.wrapping_shl(5).wrapping_add(h).wrapping_add(b as u64)
    })
}

pub fn hash_null() -> u64 {
    0
}

pub fn hash_bool(value: bool) -> u64 {
    value as u64
}

pub fn hash_int(value: i64) -> u64 {
    value as u64
}

pub fn hash_float_bits(bits: u64) -> u64 {
    bits
}

/// Hash of a box whose string contents, if any, are already in hand.
///
/// Non-literal boxes (tables, functions, opaque data) hash by address, which
/// is what the runtime uses for identity keys.
pub fn hash_value(value: Value, bytes: Option<&[u8]>) -> u64 {
    match value.tag {
        Tag::Null => hash_null(),
        Tag::Bool => hash_bool(value.as_bool()),
        Tag::Int => hash_int(value.as_int()),
        Tag::Float => hash_float_bits(value.data),
        Tag::Str => hash_bytes(bytes.unwrap_or_default()),
        Tag::Table | Tag::Func | Tag::Opaque => value.data,
    }
}

/// First slot searched for `hash` in a table of `capacity` slots.
pub fn slot_start(hash: u64, capacity: u32) -> usize {
    (hash % capacity as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn djb2_matches_reference_values() {
        assert_eq!(hash_bytes(b""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(hash_bytes(b"a"), 177670);
        assert_eq!(hash_bytes(b"ab"), 177670 * 33 + 98);
    }

    #[test]
    fn djb2_wraps_instead_of_overflowing() {
        let long = vec![0xffu8; 4096];
        let a = hash_bytes(&long);
        let b = hash_bytes(&long);
        assert_eq!(a, b);
    }

    #[test]
    fn float_hash_is_bitwise() {
        assert_ne!(
            hash_float_bits(0.0f64.to_bits()),
            hash_float_bits((-0.0f64).to_bits())
        );
        assert_eq!(hash_value(Value::float(1.5), None), 1.5f64.to_bits());
    }

    #[test]
    fn scalar_hashes() {
        assert_eq!(hash_value(Value::null(), None), 0);
        assert_eq!(hash_value(Value::bool(true), None), 1);
        assert_eq!(hash_value(Value::int(-1), None), u64::MAX);
    }
}
