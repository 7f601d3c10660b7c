//! Stable address hashing.
//!
//! Addresses enter the model as `hash(address) mod 10_000_000`. The hash has
//! to be identical across processes, platforms and releases, and identical to
//! the one the training job used, so it is SipHash-2-4 under a fixed key
//! followed by a 64-bit avalanche finalizer. Changing anything here
//! invalidates every trained artifact.

use siphasher::sip::SipHasher24;
use std::hash::Hasher;

/// Fixed 16-byte SipHash key used by the training tooling.
const HASH_KEY: &[u8; 16] = b"0123456789123456";

/// Hashed addresses are reduced into this many buckets.
pub const HASH_MODULUS: u64 = 10_000_000;

/// Bucketed hash of an address, as fed to the model.
pub fn address_hash(address: &str) -> u64 {
    stable_hash(address.as_bytes()) % HASH_MODULUS
}

/// Full 64-bit stable hash of arbitrary bytes.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    finalize(siphash24(HASH_KEY, bytes))
}

fn finalize(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    x
}

fn siphash24(key: &[u8; 16], data: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new_with_key(key);
    // Raw bytes only; `Hash for str` would append a 0xff terminator
    hasher.write(data);
    hasher.finish()
}
