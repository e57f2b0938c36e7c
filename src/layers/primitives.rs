//! Byte-level building blocks shared by the layers and the advisor service.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Draw `len` random bytes and render them as lowercase hex
pub(crate) fn random_hex(rng: &mut dyn RngCore, len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of `data` as lowercase hex
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Counter-mode SHA-256 keystream of `len` bytes
pub(crate) fn keystream(key: &[u8], label: &[u8], len: usize) -> Vec<u8> {
    let mut stream = Vec::with_capacity(len + 32);
    let mut counter = 0u64;
    while stream.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(label);
        hasher.update(counter.to_le_bytes());
        stream.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    stream.truncate(len);
    stream
}

/// XOR `data` with a keystream in place (an involution)
pub(crate) fn xor_keystream(data: &mut [u8], key: &[u8], label: &[u8]) {
    let stream = keystream(key, label, data.len());
    for (byte, mask) in data.iter_mut().zip(stream) {
        *byte ^= mask;
    }
}

/// Multiplicative inverse of an odd byte modulo 256
pub(crate) fn inverse_mod_256(value: u8) -> u8 {
    debug_assert!(value % 2 == 1, "only odd bytes are invertible mod 256");
    // Newton iteration doubles the number of correct low bits each round.
    let mut inv = value;
    for _ in 0..3 {
        inv = inv.wrapping_mul(2u8.wrapping_sub(value.wrapping_mul(inv)));
    }
    inv
}

/// Fold byte pairs into `((a << 8) | b) ^ mask`, low byte first
///
/// A trailing odd byte is copied through.
pub(crate) fn fold_pairs(data: &[u8], mask: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        let combined = ((u16::from(pair[0]) << 8) | u16::from(pair[1])) ^ mask;
        out.extend_from_slice(&combined.to_le_bytes());
    }
    out.extend_from_slice(chunks.remainder());
    out
}

/// Inverse of [`fold_pairs`]
pub(crate) fn unfold_pairs(data: &[u8], mask: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        let original = u16::from_le_bytes([pair[0], pair[1]]) ^ mask;
        out.extend_from_slice(&original.to_be_bytes());
    }
    out.extend_from_slice(chunks.remainder());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_decodes_to_requested_length() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(4);
        let text = random_hex(&mut rng, 12);
        assert_eq!(text.len(), 24);
        assert_eq!(hex::decode(&text).unwrap().len(), 12);
    }

    #[test]
    fn test_inverse_mod_256_all_odd_bytes() {
        for value in (1..=255u8).step_by(2) {
            assert_eq!(value.wrapping_mul(inverse_mod_256(value)), 1, "value {}", value);
        }
    }

    #[test]
    fn test_pair_fold_inverts_odd_and_even_lengths() {
        for len in 0..7 {
            let data: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let folded = fold_pairs(&data, 0x55AA);
            assert_eq!(folded.len(), data.len());
            assert_eq!(unfold_pairs(&folded, 0x55AA), data);
        }
    }

    #[test]
    fn test_keystream_is_deterministic_and_label_separated() {
        let a = keystream(b"key", b"one", 70);
        assert_eq!(a.len(), 70);
        assert_eq!(a, keystream(b"key", b"one", 70));
        assert_ne!(a, keystream(b"key", b"two", 70));
    }
}
