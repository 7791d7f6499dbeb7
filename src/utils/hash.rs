//! Key hashing shared by the router fast path, the codecs, and clients.

/// Key hash type as carried on the wire.
pub type KeyHash = u32;

/// Wire key hashes are masked to 31 bits to match the controller's signed
/// representation.
pub const KEYHASH_MASK: u32 = 0x7fff_ffff;

/// djb2 string hash over the raw key bytes.
pub fn djb2_hash(key: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in key {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(b as u64);
    }
    hash
}

/// The masked 31-bit key hash placed in frame headers.
pub fn compute_keyhash(key: &[u8]) -> KeyHash {
    (djb2_hash(key) as u32) & KEYHASH_MASK
}
