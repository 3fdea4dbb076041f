//! MurmurHash3 mixing helpers for small fixed-size keys.
//!
//! Used to key caches by a handful of handle identities without going
//! through a full `Hasher`.

/// Seed shared by all one-shot murmur mixes in the crate.
pub const MURMUR3_SEED: u32 = 0x7F07_C65;

/// Mix one 32-bit word into `seed`.
#[must_use]
pub fn murmur3_one_32(input: u32, seed: u32) -> u32 {
    let mut k = input.wrapping_mul(0xcc9e_2d51);
    k = k.rotate_left(15);
    k = k.wrapping_mul(0x1b87_3593);

    let mut h = seed ^ k;
    h = h.rotate_left(13);
    h.wrapping_mul(5).wrapping_add(0xe654_6b64)
}

/// Mix one 64-bit word into `seed`, low half first.
#[must_use]
pub fn murmur3_one_64(input: u64, seed: u32) -> u32 {
    let seed = murmur3_one_32((input & 0xFFFF_FFFF) as u32, seed);
    murmur3_one_32((input >> 32) as u32, seed)
}

/// Final avalanche step.
#[must_use]
pub fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

/// Hash an ordered pair of 64-bit identities into a 32-bit key.
#[must_use]
pub fn hash_pair(first: u64, second: u64) -> u32 {
    let h = murmur3_one_64(first, MURMUR3_SEED);
    fmix32(murmur3_one_64(second, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_hash_is_order_sensitive() {
        assert_ne!(hash_pair(1, 2), hash_pair(2, 1));
    }

    #[test]
    fn pair_hash_is_stable() {
        assert_eq!(hash_pair(7, 9), hash_pair(7, 9));
        assert_ne!(hash_pair(0, 0), hash_pair(0, 1));
    }

    #[test]
    fn fmix_of_zero_is_zero() {
        assert_eq!(fmix32(0), 0);
    }
}
